//! Symbol-closure resolver: picks the minimal set of auxiliary-archive
//! members needed to satisfy the base archive's undefined externals.
//!
//! The algorithm runs in two phases: a seed phase that unconditionally
//! picks every base-archive member carrying at least one symbol, and a
//! fixpoint phase that repeatedly scans the auxiliary archives, pulling in
//! any member that exports a currently-needed symbol, until a full pass
//! resolves nothing new.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::thread;

use crate::archive::ArchiveReader;
use crate::directive;
use crate::error::Result;
use crate::util::{content_addressed_rename, StringSet};

/// One named auxiliary archive, in the order given on the command line.
pub struct Auxiliary<'a> {
    pub reader: &'a dyn ArchiveReader,
}

/// Outcome of a full resolver run. "No symbol resolved" is a normal,
/// successful outcome, not an error — it is just a different variant.
pub enum RunOutcome {
    Aborted,
    Resolved(ClosureResult),
}

pub struct ClosureResult {
    /// Final, deduplicated, order-stable list of extracted object paths to
    /// hand to the external-tool driver.
    pub picked: Vec<PathBuf>,
    pub kept_defaultlibs: StringSet,
    pub total_resolved: usize,
}

/// Runs the full seed + fixpoint resolution.
///
/// `progress` receives each `"<iter>:RESOLVED:<count>:<name>"` line as it is
/// produced; the CLI front-end is responsible for the carriage-return
/// erase-and-rewrite presentation, this function only emits the text.
pub fn resolve(
    base: &dyn ArchiveReader,
    auxiliaries: &[Auxiliary<'_>],
    work_dir: &Path,
    obj_ext: &str,
    delete_default_lib: bool,
    input_lib_names: &[String],
    mut progress: impl FnMut(&str),
) -> Result<RunOutcome> {
    let mut needed = StringSet::new();
    let mut resolved = StringSet::new();
    let mut kept_defaultlibs = StringSet::new();
    let mut picked_hashes: HashSet<String> = HashSet::new();
    let mut picked_paths: Vec<PathBuf> = Vec::new();

    // Seed phase: every base member that carries at least one symbol is
    // unconditionally picked. Extraction, directive rewriting, and hash
    // renaming touch only a per-member scratch file, so each qualifying
    // member is handled by its own worker thread; the spawning thread
    // joins them back in member-index order before merging any shared
    // state, so the final picked list never depends on which worker
    // happens to finish first.
    let seed_indices: Vec<usize> = (0..base.num_members())
        .filter(|&i| !base.export_symbols(i).is_empty() || !base.import_symbols(i).is_empty())
        .collect();

    let seed_results: Vec<Result<(PathBuf, Vec<String>)>> = thread::scope(|scope| {
        let handles: Vec<_> = seed_indices
            .iter()
            .map(|&i| {
                let tmp_name = format!("b{i}{obj_ext}");
                scope.spawn(move || {
                    extract_and_rewrite(
                        base,
                        i,
                        work_dir,
                        &tmp_name,
                        delete_default_lib,
                        input_lib_names,
                        obj_ext,
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("seed worker panicked"))
            .collect()
    });

    for (&i, result) in seed_indices.iter().zip(seed_results) {
        let (final_path, kept) = result?;
        for name in kept {
            kept_defaultlibs.put(name);
        }
        if let Some(path) = dedup(final_path, &mut picked_hashes) {
            picked_paths.push(path);
        }

        for sym in base.import_symbols(i) {
            needed.put(sym.name());
        }
    }

    // Fixpoint phase.
    let mut already_extracted: HashSet<(usize, usize)> = HashSet::new();
    let mut total_resolved = 0usize;
    let mut iter = 0usize;

    loop {
        iter += 1;
        let mut resolved_this_pass = 0usize;

        for (k, aux) in auxiliaries.iter().enumerate() {
            for i in 0..aux.reader.num_members() {
                if already_extracted.contains(&(k, i)) {
                    continue;
                }

                let exports = aux.reader.export_symbols(i);
                if exports.is_empty() {
                    already_extracted.insert((k, i));
                    continue;
                }

                let matched_names: Vec<String> = exports
                    .iter()
                    .filter(|s| needed.has(s.name()))
                    .map(|s| s.name().to_string())
                    .collect();
                if matched_names.is_empty() {
                    continue;
                }

                for name in &matched_names {
                    needed.del(name);
                    resolved.put(name.clone());
                    resolved_this_pass += 1;
                    total_resolved += 1;
                    progress(&format!("{iter}:RESOLVED:{total_resolved}:{name}"));
                }

                already_extracted.insert((k, i));

                let tmp_name = format!("{k}_{i}{obj_ext}");
                let (final_path, kept) = extract_and_rewrite(
                    aux.reader,
                    i,
                    work_dir,
                    &tmp_name,
                    delete_default_lib,
                    input_lib_names,
                    obj_ext,
                )?;
                for name in kept {
                    kept_defaultlibs.put(name);
                }
                if let Some(path) = dedup(final_path, &mut picked_hashes) {
                    picked_paths.push(path);
                }

                for sym in aux.reader.import_symbols(i) {
                    if !resolved.has(sym.name()) {
                        needed.put(sym.name());
                    }
                }
            }
        }

        if resolved_this_pass == 0 {
            break;
        }
    }

    if total_resolved == 0 {
        return Ok(RunOutcome::Aborted);
    }

    Ok(RunOutcome::Resolved(ClosureResult {
        picked: picked_paths,
        kept_defaultlibs,
        total_resolved,
    }))
}

/// Extracts member `index` of `reader` to `work_dir/tmp_name`, optionally
/// rewrites its `.drectve` section, then renames it to its content hash,
/// returning the final path and whichever `-defaultlib` names it left
/// untouched.
///
/// Touches only the scratch file named by `tmp_name`, so distinct calls
/// with distinct `tmp_name`s (as the seed phase issues) can run
/// concurrently against the same `work_dir` without synchronization.
fn extract_and_rewrite(
    reader: &dyn ArchiveReader,
    index: usize,
    work_dir: &Path,
    tmp_name: &str,
    delete_default_lib: bool,
    input_lib_names: &[String],
    obj_ext: &str,
) -> Result<(PathBuf, Vec<String>)> {
    let tmp_path = work_dir.join(tmp_name);
    {
        let mut f = File::create(&tmp_path)?;
        reader.extract(index, &mut f)?;
        f.flush()?;
    }

    let kept = if delete_default_lib {
        directive::rewrite(&tmp_path, input_lib_names)?
    } else {
        Vec::new()
    };

    let final_path = content_addressed_rename(&tmp_path, obj_ext)?;
    Ok((final_path, kept))
}

/// Registers `final_path`'s content hash in `picked_hashes`, returning the
/// path only the first time that hash is seen. Callers must call this in
/// the resolver's own sequential member order rather than extraction
/// completion order, so the final picked list is stable regardless of how
/// extraction work was scheduled.
fn dedup(final_path: PathBuf, picked_hashes: &mut HashSet<String>) -> Option<PathBuf> {
    let hash = final_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();

    if picked_hashes.insert(hash) {
        Some(final_path)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{Symbol, SymbolKind};

    struct FakeArchive {
        exports: Vec<Vec<Symbol>>,
        imports: Vec<Vec<Symbol>>,
    }

    impl ArchiveReader for FakeArchive {
        fn num_members(&self) -> usize {
            self.exports.len()
        }
        fn extract(&self, index: usize, sink: &mut dyn std::io::Write) -> Result<()> {
            sink.write_all(format!("member-{index}").as_bytes())?;
            Ok(())
        }
        fn export_symbols(&self, index: usize) -> &[Symbol] {
            &self.exports[index]
        }
        fn import_symbols(&self, index: usize) -> &[Symbol] {
            &self.imports[index]
        }
        fn member_name(&self, _index: usize) -> &str {
            "fake"
        }
    }

    fn sym(name: &str, kind: SymbolKind) -> Symbol {
        Symbol::new(name.to_string(), kind)
    }

    #[test]
    fn empty_closure_aborts_without_picking_anything() {
        let base = FakeArchive {
            exports: vec![vec![]],
            imports: vec![vec![]],
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = resolve(&base, &[], dir.path(), ".o", false, &[], |_| {}).unwrap();
        assert!(matches!(outcome, RunOutcome::Aborted));
    }

    #[test]
    fn single_hop_resolves_one_symbol_and_picks_both_members() {
        let base = FakeArchive {
            exports: vec![vec![]],
            imports: vec![vec![sym("foo", SymbolKind::Import)]],
        };
        let aux = FakeArchive {
            exports: vec![vec![sym("foo", SymbolKind::Export)]],
            imports: vec![vec![]],
        };
        let dir = tempfile::tempdir().unwrap();
        let mut lines = Vec::new();
        let outcome = resolve(
            &base,
            &[Auxiliary { reader: &aux }],
            dir.path(),
            ".o",
            false,
            &[],
            |line| lines.push(line.to_string()),
        )
        .unwrap();

        match outcome {
            RunOutcome::Resolved(result) => {
                assert_eq!(result.total_resolved, 1);
                assert_eq!(result.picked.len(), 2);
            }
            RunOutcome::Aborted => panic!("expected resolution"),
        }
        assert_eq!(lines, vec!["1:RESOLVED:1:foo".to_string()]);
    }

    #[test]
    fn two_hop_transitive_resolution_picks_both_auxiliary_members() {
        let base = FakeArchive {
            exports: vec![vec![]],
            imports: vec![vec![sym("foo", SymbolKind::Import)]],
        };
        let aux0 = FakeArchive {
            exports: vec![vec![sym("foo", SymbolKind::Export)]],
            imports: vec![vec![sym("bar", SymbolKind::Import)]],
        };
        let aux1 = FakeArchive {
            exports: vec![vec![sym("bar", SymbolKind::Export)]],
            imports: vec![vec![]],
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = resolve(
            &base,
            &[Auxiliary { reader: &aux0 }, Auxiliary { reader: &aux1 }],
            dir.path(),
            ".o",
            false,
            &[],
            |_| {},
        )
        .unwrap();

        match outcome {
            RunOutcome::Resolved(result) => {
                assert_eq!(result.total_resolved, 2);
                assert_eq!(result.picked.len(), 3);
            }
            RunOutcome::Aborted => panic!("expected resolution"),
        }
    }

    #[test]
    fn content_identical_members_dedup_to_a_single_picked_entry() {
        // Both auxiliary archives produce byte-identical extraction content
        // ("member-0" in both cases), so after hash-renaming they collapse.
        let base = FakeArchive {
            exports: vec![vec![]],
            imports: vec![vec![
                sym("foo", SymbolKind::Import),
                sym("bar", SymbolKind::Import),
            ]],
        };
        let aux0 = FakeArchive {
            exports: vec![vec![sym("foo", SymbolKind::Export)]],
            imports: vec![vec![]],
        };
        let aux1 = FakeArchive {
            exports: vec![vec![sym("bar", SymbolKind::Export)]],
            imports: vec![vec![]],
        };
        let dir = tempfile::tempdir().unwrap();
        let outcome = resolve(
            &base,
            &[Auxiliary { reader: &aux0 }, Auxiliary { reader: &aux1 }],
            dir.path(),
            ".o",
            false,
            &[],
            |_| {},
        )
        .unwrap();

        match outcome {
            RunOutcome::Resolved(result) => {
                // base member (member-0, unique) + one deduplicated aux
                // member (both aux members extract identical "member-0"
                // content and collapse to a single hash).
                assert_eq!(result.picked.len(), 2);
            }
            RunOutcome::Aborted => panic!("expected resolution"),
        }
    }
}

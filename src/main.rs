use std::io::Write as _;
use std::thread;
use std::time::Instant;

use clap::Parser;
use prelib::archive::coff::CoffArchive;
use prelib::archive::unix::UnixArchive;
use prelib::archive::ArchiveReader;
use prelib::cli::Args;
use prelib::resolver::{self, Auxiliary, RunOutcome};
use prelib::{PrelibError, Result};

fn main() {
    let start = Instant::now();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    };

    eprintln!("Elapsed {:.3?}", start.elapsed());
    std::process::exit(exit_code);
}

fn run() -> Result<()> {
    let args = Args::parse();
    let resolved = args.resolve().map_err(PrelibError::Io)?;

    let work_dir = tempfile::tempdir()?;
    let obj_ext = if cfg!(windows) { ".obj" } else { ".o" };

    tracing::info!(base = %resolved.base_file.display(), "opening base archive");
    let base_coff;
    let base_unix;
    let base: &dyn ArchiveReader = if cfg!(windows) {
        base_coff = CoffArchive::open(&resolved.base_file)?;
        &base_coff
    } else {
        base_unix = UnixArchive::open(&resolved.base_file, &resolved.arch)?;
        &base_unix
    };

    // The N auxiliary archives are independent of each other to open, so
    // each gets its own scoped worker thread; the spawning thread joins
    // them back in command-line order before resolution begins, rather
    // than in whichever order opening happens to finish.
    let aux_coff: Vec<CoffArchive>;
    let aux_unix: Vec<UnixArchive>;
    if cfg!(windows) {
        aux_coff = thread::scope(|scope| {
            let handles: Vec<_> = resolved
                .input_files
                .iter()
                .map(|path| {
                    tracing::info!(input = %path.display(), "opening auxiliary archive");
                    scope.spawn(move || CoffArchive::open(path))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("archive-open worker panicked"))
                .collect::<Result<Vec<_>>>()
        })?;
        aux_unix = Vec::new();
    } else {
        aux_unix = thread::scope(|scope| {
            let handles: Vec<_> = resolved
                .input_files
                .iter()
                .map(|path| {
                    tracing::info!(input = %path.display(), "opening auxiliary archive");
                    scope.spawn(move || UnixArchive::open(path, &resolved.arch))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("archive-open worker panicked"))
                .collect::<Result<Vec<_>>>()
        })?;
        aux_coff = Vec::new();
    }
    let auxiliaries: Vec<Auxiliary<'_>> = if cfg!(windows) {
        aux_coff.iter().map(|r| Auxiliary { reader: r }).collect()
    } else {
        aux_unix.iter().map(|r| Auxiliary { reader: r }).collect()
    };

    let mut last_line_len = 0usize;
    let outcome = resolver::resolve(
        base,
        &auxiliaries,
        work_dir.path(),
        obj_ext,
        resolved.delete_default_lib,
        &resolved.input_lib_names,
        |line| {
            let mut stdout = std::io::stdout();
            if line.len() < last_line_len {
                print!("\r{}", " ".repeat(last_line_len));
            }
            print!("\r{line}");
            stdout.flush().ok();
            last_line_len = line.len();
        },
    )?;

    let result = match outcome {
        RunOutcome::Aborted => {
            println!("ABORT: No symbol resolved");
            return Ok(());
        }
        RunOutcome::Resolved(result) => result,
    };
    println!();

    if cfg!(windows) {
        let lib_exe = prelib::toolchain::find_coff_archiver()?;
        prelib::toolchain::link_coff(
            &lib_exe,
            &result.picked,
            &resolved.output_file,
            &resolved.extra_lib_flags,
            work_dir.path(),
        )?;
    } else {
        prelib::toolchain::link_unix(
            &result.picked,
            &resolved.output_file,
            &resolved.arch,
            work_dir.path(),
        )?;
    }

    if resolved.delete_default_lib && !result.kept_defaultlibs.is_empty() {
        println!("These '-defaultlib:\"NAME\"' were not removed from '.drectve' section:");
        for name in result.kept_defaultlibs.sorted_values() {
            println!("  {name}");
        }
    }

    Ok(())
}

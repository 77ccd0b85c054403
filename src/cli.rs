//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

use crate::archive::lib_basename;

/// Merges a base static archive with its auxiliary import archives into
/// one pre-linked archive.
///
/// Example:
///   prelib --base=myproject.lib \
///          --input=zlibstat.lib,libprotobuf.lib \
///          --output=myproject-prelinked.lib \
///          --delete-default-lib \
///          --extra-lib-flags="/LTCG /WX"
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Comma separated list of file paths of auxiliary (import/support) archives.
    #[arg(long)]
    pub input: String,

    /// File path of the base static archive.
    #[arg(long)]
    pub base: PathBuf,

    /// File path of the output archive.
    #[arg(long)]
    pub output: PathBuf,

    /// Architecture selector for Unix fat-archive thinning (x86_64 or i386).
    #[arg(long, default_value = "x86_64")]
    pub arch: String,

    /// Remove '-defaultlib:"NAME"' directives from '.drectve' when NAME is
    /// one of the input archives. COFF hosts only; forced off elsewhere.
    #[arg(long, default_value_t = true)]
    pub delete_default_lib: bool,

    /// Extra 'lib' command options for the final concatenation stage.
    #[arg(long, default_value = "")]
    pub extra_lib_flags: String,
}

/// Resolved, host-adjusted form of [`Args`], ready for the resolver.
pub struct ResolvedArgs {
    pub input_files: Vec<PathBuf>,
    pub base_file: PathBuf,
    pub output_file: PathBuf,
    pub arch: String,
    pub delete_default_lib: bool,
    pub extra_lib_flags: String,
    pub input_lib_names: Vec<String>,
}

impl Args {
    pub fn resolve(self) -> std::io::Result<ResolvedArgs> {
        let input_files: Vec<PathBuf> = self
            .input
            .split(',')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        let base_file = std::fs::canonicalize(&self.base).unwrap_or(self.base);
        let output_file = std::path::absolute(&self.output).unwrap_or(self.output);

        // Forced off outside COFF hosts regardless of the flag default,
        // since '.drectve' directives only exist in COFF objects.
        let delete_default_lib = cfg!(windows) && self.delete_default_lib;

        let mut input_lib_names: Vec<String> =
            input_files.iter().map(|p| lib_basename(p)).collect();
        input_lib_names.push(lib_basename(&base_file));

        Ok(ResolvedArgs {
            input_files,
            base_file,
            output_file,
            arch: self.arch,
            delete_default_lib,
            extra_lib_flags: self.extra_lib_flags,
            input_lib_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_comma_separated_input_list() {
        let args = Args {
            input: "a.lib,b.lib".to_string(),
            base: PathBuf::from("base.lib"),
            output: PathBuf::from("out.lib"),
            arch: "x86_64".to_string(),
            delete_default_lib: true,
            extra_lib_flags: String::new(),
        };
        let resolved = args.resolve().unwrap();
        assert_eq!(resolved.input_files.len(), 2);
    }

    #[test]
    fn derives_lowercased_extensionless_input_lib_names() {
        let args = Args {
            input: "ZlibStat.Lib".to_string(),
            base: PathBuf::from("base.lib"),
            output: PathBuf::from("out.lib"),
            arch: "x86_64".to_string(),
            delete_default_lib: true,
            extra_lib_flags: String::new(),
        };
        let resolved = args.resolve().unwrap();
        assert!(resolved.input_lib_names.contains(&"zlibstat".to_string()));
    }

    #[test]
    fn delete_default_lib_is_forced_off_outside_coff_hosts() {
        let args = Args {
            input: String::new(),
            base: PathBuf::from("base.lib"),
            output: PathBuf::from("out.lib"),
            arch: "x86_64".to_string(),
            delete_default_lib: true,
            extra_lib_flags: String::new(),
        };
        let resolved = args.resolve().unwrap();
        if !cfg!(windows) {
            assert!(!resolved.delete_default_lib);
        }
    }
}

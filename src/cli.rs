use crate::transpiler::TranspileOptions;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "entry2js",
    about = "Transpiles the Entry block scripts of an unpacked project into FastEntry JavaScript."
)]
pub struct Args {
    #[arg(value_name = "INPUT", help = "Path to the project's project.json.")]
    pub input: PathBuf,

    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds a single object or function may take before it is reported as failed."
    )]
    pub unit_timeout: u64,

    #[arg(
        long,
        value_name = "NAME",
        default_value = "script",
        help = "Output directory, created next to project.json."
    )]
    pub out_dir_name: String,

    #[arg(
        long,
        help = "Print the parsed program of every script instead of writing JavaScript."
    )]
    pub dump_ast: bool,

    #[arg(short, long, help = "Only print warnings and errors.")]
    pub quiet: bool,
}

impl Args {
    pub fn transpile_options(&self) -> TranspileOptions {
        TranspileOptions {
            unit_timeout: Duration::from_secs(self.unit_timeout),
            out_dir_name: self.out_dir_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_options() {
        let args = Args::try_parse_from(["entry2js", "project.json"]).unwrap();
        let options = args.transpile_options();
        let defaults = TranspileOptions::default();
        assert_eq!(options.unit_timeout, defaults.unit_timeout);
        assert_eq!(options.out_dir_name, defaults.out_dir_name);
        assert!(!args.dump_ast);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Args::try_parse_from(["entry2js", "p.json", "--unit-timeout", "0"]).is_err());
        let args =
            Args::try_parse_from(["entry2js", "p.json", "--unit-timeout", "5", "-q"]).unwrap();
        assert_eq!(args.unit_timeout, 5);
        assert!(args.quiet);
    }
}

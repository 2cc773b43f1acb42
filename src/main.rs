use anyhow::Result;
use clap::Parser;
use entry2js_core::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    entry2js_core::run_cli(&args)
}

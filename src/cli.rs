//! CLI argument parsing.
//!
//! The binary only loads a pipeline file and hands it to the library runner.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pipet",
    version,
    about = "Run scripts in sequence, piping extracted output into the next step",
    after_help = "Examples:\n  pipet run pipeline.json\n  pipet run pipeline.json --bin deno --bin-arg run --json\n  pipet check pipeline.json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Run every step of a pipeline file in order")]
pub struct RunArgs {
    /// Pipeline JSON file
    #[arg(value_name = "PIPELINE")]
    pub pipeline: PathBuf,

    /// Working directory for steps that do not set their own
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Interpreter for script steps that do not set their own
    #[arg(long, value_name = "BIN")]
    pub bin: Option<String>,

    /// Argument placed before the script path (repeatable)
    #[arg(long = "bin-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub bin_args: Vec<String>,

    /// Start from an empty environment instead of the host's
    #[arg(long)]
    pub no_inherit_env: bool,

    /// Emit a machine-readable JSON report on stdout
    #[arg(long)]
    pub json: bool,

    /// Log step progress and extraction passes to stderr
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Validate a pipeline file and resolve its programs without running it")]
pub struct CheckArgs {
    /// Pipeline JSON file
    #[arg(value_name = "PIPELINE")]
    pub pipeline: PathBuf,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Log loading details to stderr
    #[arg(long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_collects_repeated_bin_args() {
        let args = RootArgs::try_parse_from([
            "pipet",
            "run",
            "pipeline.json",
            "--bin",
            "deno",
            "--bin-arg",
            "run",
            "--bin-arg",
            "--allow-env",
            "--json",
        ])
        .expect("parse args");
        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.pipeline, PathBuf::from("pipeline.json"));
        assert_eq!(run.bin.as_deref(), Some("deno"));
        assert_eq!(run.bin_args, vec!["run", "--allow-env"]);
        assert!(run.json);
        assert!(!run.no_inherit_env);
    }

    #[test]
    fn check_requires_a_pipeline() {
        assert!(RootArgs::try_parse_from(["pipet", "check"]).is_err());
        let args = RootArgs::try_parse_from(["pipet", "check", "p.json"]).expect("parse args");
        assert!(matches!(args.command, Command::Check(_)));
    }
}

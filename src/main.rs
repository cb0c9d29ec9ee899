use anyhow::{Context, Result};
use clap::Parser;
use pipet::pipeline::{check_pipeline, load_pipeline, CheckReport, Overrides};
use pipet::{Pipet, RunReport};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CheckArgs, Command, RootArgs, RunArgs};

const LOG_ENV: &str = "PIPET_LOG";

fn main() -> Result<ExitCode> {
    let args = RootArgs::parse();
    match args.command {
        Command::Run(args) => {
            init_tracing(args.verbose);
            cmd_run(args)
        }
        Command::Check(args) => {
            init_tracing(args.verbose);
            cmd_check(args)
        }
    }
}

/// Diagnostics go to stderr; stdout carries child output and reports.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let overrides = Overrides {
        cwd: args.cwd,
        bin: args.bin,
        bin_args: (!args.bin_args.is_empty()).then_some(args.bin_args),
        no_inherit_env: args.no_inherit_env,
    };
    let pipeline = load_pipeline(&args.pipeline, &overrides)?;
    let report = Pipet::new().run_report(&pipeline.steps, &pipeline.options);

    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize run report")?;
        println!("{text}");
    } else {
        print_run_summary(&report);
    }
    Ok(exit_code(report.is_success()))
}

fn cmd_check(args: CheckArgs) -> Result<ExitCode> {
    let pipeline = load_pipeline(&args.pipeline, &Overrides::default())?;
    let report = check_pipeline(&pipeline)?;

    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize check report")?;
        println!("{text}");
    } else {
        print_check_summary(&report);
    }
    Ok(exit_code(report.is_ready()))
}

fn print_run_summary(report: &RunReport) {
    for step in &report.steps {
        match &step.error {
            None => eprintln!("ok      {:>2} {} ({})", step.index, step.label, step.kind),
            Some(error) => eprintln!("failed  {:>2} {}: {error}", step.index, step.label),
        }
    }
    if let Some(reason) = &report.aborted {
        eprintln!("aborted: {reason}");
    }
    eprintln!("{} succeeded, {} failed", report.succeeded, report.failed);
}

fn print_check_summary(report: &CheckReport) {
    println!("pipeline: {}", report.source.display());
    for step in &report.steps {
        let resolved = step
            .resolved
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "not found".to_string());
        println!("{:>2} {} -> {} [{resolved}]", step.index, step.label, step.program);
        for problem in &step.problems {
            println!("     {problem}");
        }
    }
    if report.is_ready() {
        println!("ready");
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

//! Pipeline files.
//!
//! A pipeline file is the JSON form of a step list plus its run defaults, so
//! the CLI can drive the runner without Rust code. Rule maps keep declaration
//! order, which decides evaluation order and argument order.
use crate::builder::{bin, decorate_args, decorate_env, log, script, sleep};
use crate::env::{serialize_values, EnvValue, EnvValues, RunEnv, StepEnv};
use crate::rule::{ArgRule, NextDef, RuleMap, ValueRule};
use crate::run::{Hook, RunOptions, DEFAULT_BIN};
use crate::step::{Invocation, ProcessStep, Step};
use crate::validate::validate_steps;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const PIPELINE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    pub schema_version: u32,
    #[serde(default)]
    pub defaults: Defaults,
    /// Seed values for the run environment.
    #[serde(default)]
    pub env: IndexMap<String, Value>,
    /// Start from the host environment before applying `env`.
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,
    #[serde(default)]
    pub before_run: Option<String>,
    #[serde(default)]
    pub after_run: Option<String>,
    pub steps: Vec<StepDecl>,
}

fn default_inherit_env() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub bin: Option<String>,
    #[serde(default)]
    pub bin_args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDecl {
    Script(ProcessDecl),
    Bin(ProcessDecl),
    Log { message: String },
    Sleep { seconds: f64 },
    SetEnv { env: IndexMap<String, Value> },
    SetArgs { args: Vec<String> },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessDecl {
    pub script: String,
    /// Either a map of values or the string `"inherit"`.
    #[serde(default)]
    pub env: Option<EnvDecl>,
    #[serde(default)]
    pub env_mode: EnvMode,
    #[serde(default)]
    pub next: NextDecl,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub bin: Option<String>,
    #[serde(default)]
    pub bin_args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EnvDecl {
    Keyword(String),
    Values(IndexMap<String, Value>),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvMode {
    #[default]
    Merge,
    Replace,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NextDecl {
    #[serde(default)]
    pub args: RuleMap<ArgRule>,
    #[serde(default)]
    pub env: RuleMap<ValueRule>,
}

/// Command-line values that take the place of the file's run defaults.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cwd: Option<PathBuf>,
    pub bin: Option<String>,
    pub bin_args: Option<Vec<String>>,
    pub no_inherit_env: bool,
}

/// A loaded pipeline, ready to hand to [`crate::Pipet::run`].
#[derive(Debug)]
pub struct Pipeline {
    pub source: PathBuf,
    pub steps: Vec<Step>,
    pub options: RunOptions,
}

/// Read and convert the pipeline file at `path`.
pub fn load_pipeline(path: &Path, overrides: &Overrides) -> Result<Pipeline> {
    let bytes = fs::read(path).with_context(|| format!("read pipeline {}", path.display()))?;
    let file: PipelineFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse pipeline JSON {}", path.display()))?;
    let base_dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let (steps, options) = build_pipeline(file, base_dir, overrides)
        .with_context(|| format!("load pipeline {}", path.display()))?;
    Ok(Pipeline {
        source: path.to_path_buf(),
        steps,
        options,
    })
}

/// Convert a parsed file into steps and run options. Relative directories
/// resolve against `base_dir`.
pub fn build_pipeline(
    file: PipelineFile,
    base_dir: &Path,
    overrides: &Overrides,
) -> Result<(Vec<Step>, RunOptions)> {
    if file.schema_version != PIPELINE_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported pipeline schema_version {}",
            file.schema_version
        ));
    }
    let cwd = overrides
        .cwd
        .clone()
        .or_else(|| file.defaults.cwd.map(|cwd| base_dir.join(cwd)));

    let mut env = EnvValues::new();
    if file.inherit_env && !overrides.no_inherit_env {
        env.extend(std::env::vars().map(|(key, value)| (key, EnvValue::from(value))));
    }
    env.extend(to_env_values(file.env));

    let hook_cwd = cwd.clone();
    let before_run = file
        .before_run
        .map(|line| command_hook(&line, hook_cwd.clone()))
        .transpose()
        .context("before_run")?;
    let after_run = file
        .after_run
        .map(|line| command_hook(&line, hook_cwd.clone()))
        .transpose()
        .context("after_run")?;

    let steps = file
        .steps
        .into_iter()
        .enumerate()
        .map(|(index, decl)| build_step(decl, base_dir).with_context(|| format!("step {index}")))
        .collect::<Result<Vec<_>>>()?;
    validate_steps(&steps).context("validate pipeline")?;

    let options = RunOptions {
        cwd,
        bin: overrides.bin.clone().or(file.defaults.bin),
        bin_args: overrides.bin_args.clone().or(file.defaults.bin_args),
        env: Some(env),
        before_run,
        after_run,
    };
    Ok((steps, options))
}

fn build_step(decl: StepDecl, base_dir: &Path) -> Result<Step> {
    let step: Step = match decl {
        StepDecl::Script(process) => build_process(process, Invocation::Interpreted, base_dir)?.into(),
        StepDecl::Bin(process) => build_process(process, Invocation::Direct, base_dir)?.into(),
        StepDecl::Log { message } => log(message),
        StepDecl::Sleep { seconds } => {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(anyhow!("sleep seconds must be a non-negative number (got {seconds})"));
            }
            sleep(seconds)
        }
        StepDecl::SetEnv { env } => {
            let values = serialize_values(&to_env_values(env))?;
            decorate_env(move |mut current| {
                current.extend(values.clone());
                Ok(current)
            })
        }
        StepDecl::SetArgs { args } => decorate_args(move |_| Ok(args.clone())),
    };
    Ok(step)
}

fn build_process(decl: ProcessDecl, invocation: Invocation, base_dir: &Path) -> Result<ProcessStep> {
    let values = match decl.env {
        None => None,
        Some(EnvDecl::Keyword(keyword)) if keyword == "inherit" => None,
        Some(EnvDecl::Keyword(keyword)) => {
            return Err(anyhow!(
                "env must be an object or \"inherit\" (got {keyword:?})"
            ))
        }
        Some(EnvDecl::Values(values)) => Some(to_env_values(values)),
    };
    let env = match (values, decl.env_mode) {
        (None, EnvMode::Merge) => StepEnv::Inherit,
        (None, EnvMode::Replace) => StepEnv::Replace(EnvValues::new()),
        (Some(values), EnvMode::Merge) => StepEnv::Merge(values),
        (Some(values), EnvMode::Replace) => StepEnv::Replace(values),
    };
    let next = NextDef {
        args: decl.next.args,
        env: decl.next.env,
        decorate_env: None,
    };
    let mut step = match invocation {
        Invocation::Interpreted => script(decl.script, env, next),
        Invocation::Direct => bin(decl.script, env, next),
    };
    if let Some(cwd) = decl.cwd {
        step = step.cwd(base_dir.join(cwd));
    }
    if let Some(bin) = decl.bin {
        step = step.bin(bin);
    }
    if let Some(bin_args) = decl.bin_args {
        step = step.bin_args(bin_args);
    }
    Ok(step)
}

fn to_env_values(values: IndexMap<String, Value>) -> EnvValues {
    values
        .into_iter()
        .map(|(key, value)| (key, EnvValue::from(value)))
        .collect()
}

/// Build a hook that runs a shell-words command line with inherited stdio.
fn command_hook(line: &str, cwd: Option<PathBuf>) -> Result<Hook> {
    let argv = shell_words::split(line).with_context(|| format!("split command {line:?}"))?;
    let Some((program, args)) = argv.split_first() else {
        return Err(anyhow!("command line is empty"));
    };
    let program = program.clone();
    let args = args.to_vec();
    let line = line.to_string();
    Ok(Box::new(move || {
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        if let Some(cwd) = &cwd {
            cmd.current_dir(cwd);
        }
        let status = cmd.status().with_context(|| format!("spawn {program}"))?;
        if !status.success() {
            return Err(anyhow!("`{line}` exited with {status}"));
        }
        Ok(())
    }))
}

/// Launch readiness of one process step, resolved without spawning it.
#[derive(Debug, Clone, Serialize)]
pub struct CheckedStep {
    pub index: usize,
    pub label: String,
    pub kind: &'static str,
    pub program: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PathBuf>,
    /// Script path for interpreted steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub source: PathBuf,
    pub steps: Vec<CheckedStep>,
}

impl CheckReport {
    pub fn is_ready(&self) -> bool {
        self.steps.iter().all(|step| step.problems.is_empty())
    }
}

/// Resolve each process step's program against the run environment's `PATH`
/// and flag anything that would fail to spawn.
pub fn check_pipeline(pipeline: &Pipeline) -> Result<CheckReport> {
    let options = &pipeline.options;
    let path_var = match &options.env {
        Some(values) => RunEnv::from_values(values)?
            .get("PATH")
            .map(str::to_string),
        None => std::env::var("PATH").ok(),
    };
    let current_dir = std::env::current_dir().context("resolve current directory")?;

    let mut steps = Vec::new();
    for (index, step) in pipeline.steps.iter().enumerate() {
        let Step::Process(process) = step else {
            continue;
        };
        let cwd = process
            .cwd
            .clone()
            .or_else(|| options.cwd.clone())
            .unwrap_or_else(|| current_dir.clone());
        let (program, script) = match process.invocation {
            Invocation::Direct => (process.script.clone(), None),
            Invocation::Interpreted => (
                process
                    .bin
                    .clone()
                    .or_else(|| options.bin.clone())
                    .unwrap_or_else(|| DEFAULT_BIN.to_string()),
                Some(cwd.join(&process.script)),
            ),
        };

        let mut problems = Vec::new();
        let resolved = match which::which_in(&program, path_var.as_deref(), &cwd) {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                problems.push(format!("program {program:?} not found: {err}"));
                None
            }
        };
        if let Some(script) = &script {
            if !script.is_file() {
                problems.push(format!("script {} does not exist", script.display()));
            }
        }
        if !cwd.is_dir() {
            problems.push(format!("working directory {} does not exist", cwd.display()));
        }
        steps.push(CheckedStep {
            index,
            label: process.label().to_string(),
            kind: step.kind(),
            program,
            resolved,
            script,
            problems,
        });
    }
    Ok(CheckReport {
        source: pipeline.source.clone(),
        steps,
    })
}

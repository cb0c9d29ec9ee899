//! Step sequencer.
//!
//! Drives declared steps strictly one after another. Process steps stream
//! their stdout through the extraction pass; the environment and argument
//! list they produce are carried into the next step. A failed process is
//! recorded and the sequence continues; declaration errors, required fields
//! and inline failures stop the run.
mod collect;
mod exec;

use crate::env::{EnvValues, RunEnv};
use crate::error::PipetError;
use crate::step::{InlineStep, Invocation, ProcessStep, Step};
use crate::validate::validate_steps;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use collect::OutputCollector;
pub use exec::{ExitReport, ProcessSpawner, Settled, SpawnRequest, SystemSpawner};

/// Interpreter used for script steps when neither the step nor the run names one.
pub const DEFAULT_BIN: &str = "node";

pub type Hook = Box<dyn Fn() -> anyhow::Result<()>>;

/// Run-level defaults and hooks. Step values override these.
#[derive(Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub bin: Option<String>,
    pub bin_args: Option<Vec<String>>,
    /// Initial environment; `None` seeds from the host process.
    pub env: Option<EnvValues>,
    pub before_run: Option<Hook>,
    /// Runs once the sequence ends, whether it completed or aborted.
    pub after_run: Option<Hook>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("cwd", &self.cwd)
            .field("bin", &self.bin)
            .field("bin_args", &self.bin_args)
            .field("env", &self.env.as_ref().map(|values| values.len()))
            .field("before_run", &self.before_run.is_some())
            .field("after_run", &self.after_run.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    #[serde(serialize_with = "serialize_error")]
    Failed(PipetError),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn error(&self) -> Option<&PipetError> {
        match self {
            Self::Success => None,
            Self::Failed(err) => Some(err),
        }
    }
}

fn serialize_error<S: serde::Serializer>(err: &PipetError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub label: String,
    pub kind: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serializable summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the run stopped before every step was attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn new(steps: &[Step], outcomes: &[StepOutcome], aborted: Option<PipetError>) -> Self {
        let steps: Vec<StepReport> = steps
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (step, outcome))| StepReport {
                index,
                label: step.label().to_string(),
                kind: step.kind(),
                status: if outcome.is_success() { "success" } else { "failed" },
                error: outcome.error().map(ToString::to_string),
            })
            .collect();
        let succeeded = steps.iter().filter(|step| step.error.is_none()).count();
        Self {
            failed: steps.len() - succeeded,
            succeeded,
            steps,
            aborted: aborted.map(|err| err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }
}

/// Shared cancellation flag for a runner. Cancelling kills the current child
/// at its next output chunk and keeps later process steps from spawning.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State owned by one run: the only values that cross step boundaries.
struct RunState {
    env: RunEnv,
    args: Vec<String>,
    outcomes: Vec<StepOutcome>,
}

pub struct Pipet<S = SystemSpawner> {
    spawner: S,
    cancel: CancelToken,
}

impl Pipet<SystemSpawner> {
    pub fn new() -> Self {
        Self::with_spawner(SystemSpawner::default())
    }
}

impl Default for Pipet<SystemSpawner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ProcessSpawner> Pipet<S> {
    pub fn with_spawner(spawner: S) -> Self {
        Self {
            spawner,
            cancel: CancelToken::default(),
        }
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run `steps` in order and return one outcome per step.
    ///
    /// Errors returned here abort the run; process failures are recorded in
    /// the outcome list instead.
    pub fn run(&self, steps: &[Step], options: &RunOptions) -> Result<Vec<StepOutcome>, PipetError> {
        let (outcomes, result) = self.execute(steps, options);
        result.map(|()| outcomes)
    }

    /// Like [`Pipet::run`], but keeps the outcomes recorded before an abort.
    pub fn run_report(&self, steps: &[Step], options: &RunOptions) -> RunReport {
        let (outcomes, result) = self.execute(steps, options);
        RunReport::new(steps, &outcomes, result.err())
    }

    fn execute(
        &self,
        steps: &[Step],
        options: &RunOptions,
    ) -> (Vec<StepOutcome>, Result<(), PipetError>) {
        let mut state = match prepare(steps, options) {
            Ok(state) => state,
            Err(err) => return (Vec::new(), Err(err)),
        };
        let sequenced = self.sequence(steps, options, &mut state);
        let after = match &options.after_run {
            Some(hook) => hook().map_err(|err| PipetError::inline("after_run", &err)),
            None => Ok(()),
        };
        let result = sequenced.and(after);

        let failed = state
            .outcomes
            .iter()
            .filter(|outcome| !outcome.is_success())
            .count();
        match &result {
            Ok(()) => tracing::info!(steps = state.outcomes.len(), failed, "run complete"),
            Err(err) => tracing::error!(steps = state.outcomes.len(), failed, "run aborted: {err}"),
        }
        (state.outcomes, result)
    }

    fn sequence(
        &self,
        steps: &[Step],
        options: &RunOptions,
        state: &mut RunState,
    ) -> Result<(), PipetError> {
        for (index, step) in steps.iter().enumerate() {
            tracing::info!(
                step = index,
                label = step.label(),
                kind = step.kind(),
                "step start"
            );
            let outcome = match step {
                Step::Inline(inline) => {
                    run_inline(inline, state)?;
                    StepOutcome::Success
                }
                Step::Process(process) => self.run_process(process, options, state)?,
            };
            match &outcome {
                StepOutcome::Success => {
                    tracing::info!(step = index, label = step.label(), "step finished");
                }
                StepOutcome::Failed(err) => {
                    tracing::error!(step = index, label = step.label(), "{err}");
                }
            }
            state.outcomes.push(outcome);
        }
        Ok(())
    }

    fn run_process(
        &self,
        step: &ProcessStep,
        options: &RunOptions,
        state: &mut RunState,
    ) -> Result<StepOutcome, PipetError> {
        let label = step.label();
        state.env.apply(&step.env)?;
        let args = std::mem::take(&mut state.args);

        if self.cancel.is_cancelled() {
            return Ok(StepOutcome::Failed(PipetError::Spawn {
                label: label.to_string(),
                message: "run cancelled".to_string(),
            }));
        }
        let request = match resolve_request(step, options, &state.env, args) {
            Ok(request) => request,
            Err(err) => return Ok(StepOutcome::Failed(err)),
        };
        tracing::debug!(
            program = %request.program,
            args = ?request.args,
            cwd = %request.cwd.display(),
            "spawning"
        );

        let mut collector = OutputCollector::new(&step.next);
        let settled = {
            let mut on_chunk = |chunk: &str| collector.push(chunk);
            self.spawner.spawn(&request, &self.cancel, &mut on_chunk)
        };
        let settled = match settled {
            Ok(settled) => settled,
            Err(err) => return Ok(StepOutcome::Failed(err)),
        };

        state.args = collector.finish(&mut state.env, label)?;
        if let Some(decorator) = &step.next.decorate_env {
            state
                .env
                .decorate(decorator)
                .map_err(|err| PipetError::inline(label, &err))?;
        }

        Ok(match settled {
            Settled::Exited(report) if report.success => StepOutcome::Success,
            Settled::Exited(report) => StepOutcome::Failed(PipetError::Exit {
                label: label.to_string(),
                status: report.description,
            }),
            Settled::Continued | Settled::Aborted => StepOutcome::Success,
            Settled::Cancelled => StepOutcome::Failed(PipetError::Exit {
                label: label.to_string(),
                status: "run cancelled".to_string(),
            }),
        })
    }
}

/// Check declarations, seed the environment and run the `before_run` hook.
fn prepare(steps: &[Step], options: &RunOptions) -> Result<RunState, PipetError> {
    validate_steps(steps)?;
    let env = match &options.env {
        Some(values) => RunEnv::from_values(values)?,
        None => RunEnv::from_process(),
    };
    if let Some(hook) = &options.before_run {
        hook().map_err(|err| PipetError::inline("before_run", &err))?;
    }
    Ok(RunState {
        env,
        args: Vec::new(),
        outcomes: Vec::with_capacity(steps.len()),
    })
}

fn run_inline(step: &InlineStep, state: &mut RunState) -> Result<(), PipetError> {
    let label = step.label();
    let result = match step {
        InlineStep::Callback { callback, .. } => callback(&state.outcomes),
        InlineStep::DecorateEnv(decorator) => state.env.decorate(decorator),
        InlineStep::DecorateArgs(decorator) => {
            let current = std::mem::take(&mut state.args);
            decorator(current).map(|args| state.args = args)
        }
    };
    result.map_err(|err| PipetError::inline(label, &err))
}

/// Work out program, argv and working directory for a process step.
///
/// Precedence is step value, then run option, then built-in default. The
/// argv is the binary prefix args, the script path for interpreted steps,
/// then the extracted args.
fn resolve_request(
    step: &ProcessStep,
    options: &RunOptions,
    env: &RunEnv,
    args: Vec<String>,
) -> Result<SpawnRequest, PipetError> {
    let cwd = match step.cwd.as_ref().or(options.cwd.as_ref()) {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().map_err(|err| PipetError::Spawn {
            label: step.label().to_string(),
            message: format!("resolve current directory: {err}"),
        })?,
    };
    let mut argv = step
        .bin_args
        .as_ref()
        .or(options.bin_args.as_ref())
        .cloned()
        .unwrap_or_default();
    let program = match step.invocation {
        Invocation::Direct => step.script.clone(),
        Invocation::Interpreted => {
            argv.push(cwd.join(&step.script).display().to_string());
            step.bin
                .as_deref()
                .or(options.bin.as_deref())
                .unwrap_or(DEFAULT_BIN)
                .to_string()
        }
    };
    argv.extend(args);
    Ok(SpawnRequest {
        label: step.label().to_string(),
        program,
        args: argv,
        cwd,
        env: env.vars().clone(),
    })
}

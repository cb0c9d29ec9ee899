//! Declaration helpers for steps and the inline utilities placed between them.
use crate::env::{EnvMap, StepEnv};
use crate::rule::NextDef;
use crate::run::StepOutcome;
use crate::step::{InlineStep, Invocation, ProcessStep, Step};
use anyhow::{anyhow, Context};
use std::io::Write;
use std::time::Duration;

/// A script run through the interpreter (`node` unless overridden).
pub fn script(path: impl Into<String>, env: StepEnv, next: NextDef) -> ProcessStep {
    ProcessStep::new(path, Invocation::Interpreted)
        .env(env)
        .next(next)
}

/// An executable invoked directly, without interpreter wrapping.
pub fn bin(name: impl Into<String>, env: StepEnv, next: NextDef) -> ProcessStep {
    ProcessStep::new(name, Invocation::Direct)
        .env(env)
        .next(next)
}

/// Replace the running environment with whatever `decorator` returns.
pub fn decorate_env<F>(decorator: F) -> Step
where
    F: Fn(EnvMap) -> anyhow::Result<EnvMap> + 'static,
{
    InlineStep::DecorateEnv(Box::new(decorator)).into()
}

/// Replace the argument list handed to the next process step.
pub fn decorate_args<F>(decorator: F) -> Step
where
    F: Fn(Vec<String>) -> anyhow::Result<Vec<String>> + 'static,
{
    InlineStep::DecorateArgs(Box::new(decorator)).into()
}

/// Print a line to stdout between steps.
pub fn log(message: impl Into<String>) -> Step {
    let message = message.into();
    InlineStep::Callback {
        label: "log".to_string(),
        callback: Box::new(move |_| {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{message}").context("write log line")?;
            stdout.flush().context("flush stdout")?;
            Ok(())
        }),
    }
    .into()
}

/// Run `callback` against the outcomes recorded so far.
pub fn tap<F>(callback: F) -> Step
where
    F: Fn(&[StepOutcome]) -> anyhow::Result<()> + 'static,
{
    InlineStep::Callback {
        label: "tap".to_string(),
        callback: Box::new(callback),
    }
    .into()
}

/// Pause for `seconds` before the next step.
pub fn sleep(seconds: f64) -> Step {
    InlineStep::Callback {
        label: "sleep".to_string(),
        callback: Box::new(move |_| {
            let duration = Duration::try_from_secs_f64(seconds)
                .map_err(|err| anyhow!("invalid sleep duration {seconds}: {err}"))?;
            std::thread::sleep(duration);
            Ok(())
        }),
    }
    .into()
}

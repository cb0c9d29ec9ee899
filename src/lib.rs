//! Sequential script runner.
//!
//! Each step's stdout is scanned with declared rules; the values they extract
//! become the environment and command-line arguments of the next step.
pub mod args;
pub mod builder;
pub mod env;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod rule;
pub mod run;
pub mod step;
pub mod validate;

pub use builder::{bin, decorate_args, decorate_env, log, script, sleep, tap};
pub use env::{EnvMap, EnvValue, RunEnv, StepEnv};
pub use error::PipetError;
pub use extract::EarlyExit;
pub use rule::{ArgRule, NextDef, Pattern, ValueRule};
pub use run::{CancelToken, Pipet, RunOptions, RunReport, StepOutcome};
pub use step::{InlineStep, Invocation, ProcessStep, Step};

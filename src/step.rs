//! Step declarations.
//!
//! A step is resolved to its kind when it is declared: a process to spawn, or
//! an inline action run between processes. The runner only reads steps.
use crate::env::{EnvDecorator, StepEnv};
use crate::rule::NextDef;
use crate::run::StepOutcome;
use std::fmt;
use std::path::PathBuf;

/// Callback run against the outcomes recorded so far.
pub type StepCallback = Box<dyn Fn(&[StepOutcome]) -> anyhow::Result<()>>;

/// Receives the running argument list and returns its replacement.
pub type ArgsDecorator = Box<dyn Fn(Vec<String>) -> anyhow::Result<Vec<String>>>;

/// How a process step's `script` is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// `script` is a path run through the interpreter binary.
    Interpreted,
    /// `script` is the executable itself.
    Direct,
}

#[derive(Debug)]
pub struct ProcessStep {
    pub script: String,
    pub invocation: Invocation,
    pub env: StepEnv,
    pub next: NextDef,
    pub cwd: Option<PathBuf>,
    pub bin: Option<String>,
    pub bin_args: Option<Vec<String>>,
}

impl ProcessStep {
    pub fn new(script: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            script: script.into(),
            invocation,
            env: StepEnv::Inherit,
            next: NextDef::default(),
            cwd: None,
            bin: None,
            bin_args: None,
        }
    }

    pub fn env(mut self, env: StepEnv) -> Self {
        self.env = env;
        self
    }

    pub fn next(mut self, next: NextDef) -> Self {
        self.next = next;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Interpreter override; ignored for direct invocations.
    pub fn bin(mut self, bin: impl Into<String>) -> Self {
        self.bin = Some(bin.into());
        self
    }

    pub fn bin_args<I, A>(mut self, bin_args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.bin_args = Some(bin_args.into_iter().map(Into::into).collect());
        self
    }

    pub fn label(&self) -> &str {
        &self.script
    }
}

pub enum InlineStep {
    Callback { label: String, callback: StepCallback },
    DecorateEnv(EnvDecorator),
    DecorateArgs(ArgsDecorator),
}

impl InlineStep {
    pub fn label(&self) -> &str {
        match self {
            Self::Callback { label, .. } => label,
            Self::DecorateEnv(_) => "decorate_env",
            Self::DecorateArgs(_) => "decorate_args",
        }
    }
}

impl fmt::Debug for InlineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InlineStep({})", self.label())
    }
}

#[derive(Debug)]
pub enum Step {
    Process(ProcessStep),
    Inline(InlineStep),
}

impl Step {
    pub fn label(&self) -> &str {
        match self {
            Self::Process(step) => step.label(),
            Self::Inline(step) => step.label(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process(ProcessStep {
                invocation: Invocation::Interpreted,
                ..
            }) => "script",
            Self::Process(_) => "bin",
            Self::Inline(_) => "inline",
        }
    }
}

impl From<ProcessStep> for Step {
    fn from(step: ProcessStep) -> Self {
        Self::Process(step)
    }
}

impl From<InlineStep> for Step {
    fn from(step: InlineStep) -> Self {
        Self::Inline(step)
    }
}

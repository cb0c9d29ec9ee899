//! Extraction rule types for the `next` descriptor of a process step.
//!
//! A rule turns the text a step printed into one named value: either a
//! literal, or the capture groups of every match of a pattern. Environment
//! rules feed the run-wide environment; argument rules feed the argument list
//! of the next process step.
use crate::env::EnvDecorator;
use crate::error::PipetError;
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;

/// Key of the positional argument rule.
pub const POSITIONAL_KEY: &str = "$";
pub const DEFAULT_PREFIX: &str = "--";
pub const DEFAULT_EQUALITY: &str = "=";
pub const DEFAULT_SEPARATOR: &str = ",";

/// Rules keyed by target name, in declaration order.
pub type RuleMap<R> = IndexMap<String, R>;

/// A compiled match pattern.
///
/// Matching is always global: every non-overlapping match is visited, so a
/// `g` flag is accepted and ignored. The remaining flags are applied as
/// declared.
#[derive(Clone)]
pub struct Pattern {
    regex: Regex,
    flags: String,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, PipetError> {
        Self::with_flags(source, "")
    }

    pub fn with_flags(source: &str, flags: &str) -> Result<Self, PipetError> {
        let mut builder = RegexBuilder::new(source);
        for flag in flags.chars() {
            match flag {
                // Global and unicode are always on.
                'g' | 'u' => {}
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                'U' => {
                    builder.swap_greed(true);
                }
                other => {
                    return Err(PipetError::config(format!(
                        "unsupported regex flag {other:?} in /{source}/{flags}"
                    )))
                }
            }
        }
        let regex = builder
            .build()
            .map_err(|err| PipetError::config(format!("invalid regex /{source}/: {err}")))?;
        Ok(Self {
            regex,
            flags: flags.to_string(),
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn source(&self) -> &str {
        self.regex.as_str()
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self {
        Self {
            regex,
            flags: String::new(),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source(), self.flags)
    }
}

/// Extraction rule for one environment key (also the extraction half of an
/// argument rule).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawValueRule")]
pub struct ValueRule {
    pub pattern: Option<Pattern>,
    /// Literal value; bypasses `pattern` when non-empty.
    pub value: Option<String>,
    pub required: bool,
    /// Comma-join every match instead of keeping the last one.
    pub array: bool,
    pub abort_early: bool,
    pub continue_early: bool,
    /// Joins the capture groups of a single match.
    pub separator: Option<String>,
}

impl ValueRule {
    pub fn matching(pattern: impl Into<Pattern>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn abort_early(mut self) -> Self {
        self.abort_early = true;
        self
    }

    pub fn continue_early(mut self) -> Self {
        self.continue_early = true;
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    pub(crate) fn literal_value(&self) -> Option<&str> {
        self.value.as_deref().filter(|value| !value.is_empty())
    }

    pub(crate) fn group_separator(&self) -> &str {
        self.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR)
    }

    pub(crate) fn has_source(&self) -> bool {
        self.pattern.is_some() || self.literal_value().is_some()
    }
}

impl AsRef<ValueRule> for ValueRule {
    fn as_ref(&self) -> &ValueRule {
        self
    }
}

/// Extraction rule for one argument of the next process step.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawArgRule")]
pub struct ArgRule {
    pub extract: ValueRule,
    pub prefix: Option<String>,
    pub equality: Option<String>,
    /// Render `--key` without a value.
    pub boolean: bool,
}

impl ArgRule {
    pub fn matching(pattern: impl Into<Pattern>) -> Self {
        Self {
            extract: ValueRule::matching(pattern),
            ..Self::default()
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            extract: ValueRule::literal(value),
            ..Self::default()
        }
    }

    pub fn flag() -> Self {
        Self {
            boolean: true,
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.extract.required = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.extract.array = true;
        self
    }

    pub fn abort_early(mut self) -> Self {
        self.extract.abort_early = true;
        self
    }

    pub fn continue_early(mut self) -> Self {
        self.extract.continue_early = true;
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.extract.separator = Some(separator.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn equality(mut self, equality: impl Into<String>) -> Self {
        self.equality = Some(equality.into());
        self
    }

    pub(crate) fn prefix_or_default(&self) -> &str {
        self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }

    pub(crate) fn equality_or_default(&self) -> &str {
        self.equality.as_deref().unwrap_or(DEFAULT_EQUALITY)
    }
}

impl AsRef<ValueRule> for ArgRule {
    fn as_ref(&self) -> &ValueRule {
        &self.extract
    }
}

/// What a process step hands to the next one.
#[derive(Default)]
pub struct NextDef {
    pub args: RuleMap<ArgRule>,
    pub env: RuleMap<ValueRule>,
    /// Applied to the run environment once this step's env values are committed.
    pub decorate_env: Option<EnvDecorator>,
}

impl NextDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, key: impl Into<String>, rule: ArgRule) -> Self {
        self.args.insert(key.into(), rule);
        self
    }

    pub fn env(mut self, key: impl Into<String>, rule: ValueRule) -> Self {
        self.env.insert(key.into(), rule);
        self
    }

    pub fn decorate_env(mut self, decorator: EnvDecorator) -> Self {
        self.decorate_env = Some(decorator);
        self
    }
}

impl fmt::Debug for NextDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextDef")
            .field("args", &self.args)
            .field("env", &self.env)
            .field("decorate_env", &self.decorate_env.is_some())
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawValueRule {
    #[serde(default, rename = "match")]
    pattern: Option<String>,
    #[serde(default)]
    flags: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    array: bool,
    #[serde(default, alias = "abortEarly")]
    abort_early: bool,
    #[serde(default, alias = "continueEarly")]
    continue_early: bool,
    #[serde(default)]
    separator: Option<String>,
}

impl TryFrom<RawValueRule> for ValueRule {
    type Error = PipetError;

    fn try_from(raw: RawValueRule) -> Result<Self, Self::Error> {
        let pattern = compile_raw(raw.pattern.as_deref(), raw.flags.as_deref())?;
        Ok(Self {
            pattern,
            value: raw.value,
            required: raw.required,
            array: raw.array,
            abort_early: raw.abort_early,
            continue_early: raw.continue_early,
            separator: raw.separator,
        })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArgRule {
    #[serde(default, rename = "match")]
    pattern: Option<String>,
    #[serde(default)]
    flags: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    array: bool,
    #[serde(default, alias = "abortEarly")]
    abort_early: bool,
    #[serde(default, alias = "continueEarly")]
    continue_early: bool,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    equality: Option<String>,
    #[serde(default)]
    boolean: bool,
}

impl TryFrom<RawArgRule> for ArgRule {
    type Error = PipetError;

    fn try_from(raw: RawArgRule) -> Result<Self, Self::Error> {
        let pattern = compile_raw(raw.pattern.as_deref(), raw.flags.as_deref())?;
        Ok(Self {
            extract: ValueRule {
                pattern,
                value: raw.value,
                required: raw.required,
                array: raw.array,
                abort_early: raw.abort_early,
                continue_early: raw.continue_early,
                separator: raw.separator,
            },
            prefix: raw.prefix,
            equality: raw.equality,
            boolean: raw.boolean,
        })
    }
}

fn compile_raw(source: Option<&str>, flags: Option<&str>) -> Result<Option<Pattern>, PipetError> {
    match (source, flags) {
        (Some(source), flags) => Pattern::with_flags(source, flags.unwrap_or("")).map(Some),
        (None, Some(_)) => Err(PipetError::config("`flags` given without `match`")),
        (None, None) => Ok(None),
    }
}

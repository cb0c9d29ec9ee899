//! Run-wide environment state.
//!
//! One `RunEnv` is owned by each runner. It is seeded once, then only ever
//! grows between steps: step overrides and extracted values are merged key by
//! key, never reset, unless a step asks for a full replacement.
use crate::error::PipetError;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::BTreeMap;

pub type EnvMap = BTreeMap<String, String>;

/// Receives the running environment and returns the one to continue with.
pub type EnvDecorator = Box<dyn Fn(EnvMap) -> anyhow::Result<EnvMap>>;

/// A caller-supplied environment value before it is stringified.
#[derive(Debug, Clone)]
pub enum EnvValue {
    Text(String),
    /// Stored as the pattern source.
    Pattern(Regex),
    /// Strings are used as-is, objects and arrays are JSON-encoded, other
    /// scalars use their display form. `null` is rejected.
    Json(serde_json::Value),
}

impl EnvValue {
    pub fn serialize(&self, key: &str) -> Result<String, PipetError> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Pattern(regex) => Ok(regex.as_str().to_string()),
            Self::Json(value) => match value {
                serde_json::Value::Null => Err(PipetError::Serialize {
                    key: key.to_string(),
                }),
                serde_json::Value::String(text) => Ok(text.clone()),
                serde_json::Value::Bool(flag) => Ok(flag.to_string()),
                serde_json::Value::Number(number) => Ok(number.to_string()),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    serde_json::to_string(value).map_err(|err| {
                        PipetError::config(format!("Env \"{key}\" cannot be encoded: {err}"))
                    })
                }
            },
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Regex> for EnvValue {
    fn from(value: Regex) -> Self {
        Self::Pattern(value)
    }
}

impl From<serde_json::Value> for EnvValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

impl From<i64> for EnvValue {
    fn from(value: i64) -> Self {
        Self::Json(value.into())
    }
}

impl From<bool> for EnvValue {
    fn from(value: bool) -> Self {
        Self::Json(value.into())
    }
}

pub type EnvValues = IndexMap<String, EnvValue>;

/// Environment a process step applies before it is spawned.
#[derive(Debug, Clone, Default)]
pub enum StepEnv {
    /// Spawn with the run environment as it is.
    #[default]
    Inherit,
    /// Merge these values into the run environment first.
    Merge(EnvValues),
    /// Clear the run environment, then set these values.
    Replace(EnvValues),
}

impl StepEnv {
    pub fn merge<K, V, I>(values: I) -> Self
    where
        K: Into<String>,
        V: Into<EnvValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Merge(collect_values(values))
    }

    pub fn replace<K, V, I>(values: I) -> Self
    where
        K: Into<String>,
        V: Into<EnvValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Replace(collect_values(values))
    }

    pub(crate) fn values(&self) -> Option<&EnvValues> {
        match self {
            Self::Inherit => None,
            Self::Merge(values) | Self::Replace(values) => Some(values),
        }
    }
}

fn collect_values<K, V, I>(values: I) -> EnvValues
where
    K: Into<String>,
    V: Into<EnvValue>,
    I: IntoIterator<Item = (K, V)>,
{
    values
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Stringify every value, failing on the first `null`.
pub fn serialize_values(values: &EnvValues) -> Result<EnvMap, PipetError> {
    values
        .iter()
        .map(|(key, value)| Ok((key.clone(), value.serialize(key)?)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEnv {
    vars: EnvMap,
}

impl RunEnv {
    /// Seed from the host process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_values(values: &EnvValues) -> Result<Self, PipetError> {
        Ok(Self {
            vars: serialize_values(values)?,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Defined and non-empty.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.is_empty())
    }

    pub fn vars(&self) -> &EnvMap {
        &self.vars
    }

    /// Overwrite per key; keys absent from `values` are kept.
    pub fn merge(&mut self, values: EnvMap) {
        self.vars.extend(values);
    }

    pub fn apply(&mut self, step_env: &StepEnv) -> Result<(), PipetError> {
        match step_env {
            StepEnv::Inherit => Ok(()),
            StepEnv::Merge(values) => {
                let serialized = serialize_values(values)?;
                self.merge(serialized);
                Ok(())
            }
            StepEnv::Replace(values) => {
                self.vars = serialize_values(values)?;
                Ok(())
            }
        }
    }

    /// Run a decorator against a snapshot and adopt its result.
    pub(crate) fn decorate(&mut self, decorator: &EnvDecorator) -> anyhow::Result<()> {
        let decorated = decorator(self.vars.clone())?;
        self.vars = decorated;
        Ok(())
    }
}

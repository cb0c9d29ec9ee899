//! Value extraction from step output.
//!
//! Rules are evaluated in declaration order against the whole text seen so
//! far. Each match of a rule's pattern yields one candidate (its capture
//! groups joined by the rule separator); array rules comma-join candidates,
//! other rules keep the last one.
use crate::env::EnvMap;
use crate::rule::{RuleMap, ValueRule, DEFAULT_SEPARATOR};
use regex::Captures;

/// Early-exit signal raised by a rule once it has produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyExit {
    /// Stop listening and kill the process.
    Abort,
    /// Stop listening and move on; the process is left to finish.
    Continue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub values: EnvMap,
    pub early_exit: Option<EarlyExit>,
    /// Count of leading rules that were evaluated before the pass stopped.
    pub visited: usize,
}

pub fn extract<R: AsRef<ValueRule>>(text: &str, rules: &RuleMap<R>) -> Extraction {
    let mut values = EnvMap::new();
    for (index, (key, rule)) in rules.iter().enumerate() {
        let rule = rule.as_ref();
        if let Some(literal) = rule.literal_value() {
            assign(&mut values, key, rule.array, literal.to_string());
            if let Some(early_exit) = early_exit_of(rule) {
                return Extraction {
                    values,
                    early_exit: Some(early_exit),
                    visited: index + 1,
                };
            }
            continue;
        }
        let Some(pattern) = rule.pattern.as_ref() else {
            continue;
        };
        for captures in pattern.regex().captures_iter(text) {
            let candidate = join_groups(&captures, rule.group_separator());
            assign(&mut values, key, rule.array, candidate);
            if let Some(early_exit) = early_exit_of(rule) {
                return Extraction {
                    values,
                    early_exit: Some(early_exit),
                    visited: index + 1,
                };
            }
        }
    }
    Extraction {
        values,
        early_exit: None,
        visited: rules.len(),
    }
}

fn assign(values: &mut EnvMap, key: &str, array: bool, candidate: String) {
    match values.get_mut(key) {
        // Cross-match accumulation is always comma-joined, whatever the
        // per-match separator is.
        Some(existing) if array && !existing.is_empty() => {
            existing.push_str(DEFAULT_SEPARATOR);
            existing.push_str(&candidate);
        }
        _ => {
            values.insert(key.to_string(), candidate);
        }
    }
}

fn join_groups(captures: &Captures<'_>, separator: &str) -> String {
    captures
        .iter()
        .skip(1)
        .map(|group| group.map_or("", |found| found.as_str()))
        .collect::<Vec<_>>()
        .join(separator)
}

fn early_exit_of(rule: &ValueRule) -> Option<EarlyExit> {
    if rule.continue_early {
        Some(EarlyExit::Continue)
    } else if rule.abort_early {
        Some(EarlyExit::Abort)
    } else {
        None
    }
}

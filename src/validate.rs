//! Required-field and declaration checks.
//!
//! Declarations are checked up front so a bad rule or a `null` env value
//! stops the run before anything is spawned. Required environment keys are
//! checked against the run environment after a step's values are merged.
use crate::env::{serialize_values, RunEnv};
use crate::error::PipetError;
use crate::rule::{NextDef, RuleMap, ValueRule, POSITIONAL_KEY};
use crate::step::Step;

/// Fail on the first required rule (among the first `visited`) whose key is
/// unset or empty in the merged environment.
pub fn check_required_env(
    rules: &RuleMap<ValueRule>,
    visited: usize,
    env: &RunEnv,
    label: &str,
) -> Result<(), PipetError> {
    for (key, rule) in rules.iter().take(visited) {
        if rule.required && !env.is_set(key) {
            return Err(PipetError::MissingEnv {
                key: key.clone(),
                label: label.to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_steps(steps: &[Step]) -> Result<(), PipetError> {
    if steps.is_empty() {
        return Err(PipetError::config("Need at least 1 script to run"));
    }
    for step in steps {
        let Step::Process(process) = step else {
            continue;
        };
        if let Some(values) = process.env.values() {
            serialize_values(values)?;
        }
        validate_next(process.label(), &process.next)?;
    }
    Ok(())
}

pub fn validate_next(label: &str, next: &NextDef) -> Result<(), PipetError> {
    for (key, rule) in &next.env {
        if !rule.has_source() {
            return Err(PipetError::config(format!(
                "Env rule \"{key}\" of script \"{label}\" needs a `match` or a `value`"
            )));
        }
    }
    for (key, rule) in &next.args {
        // The positional rule always carries its raw value; `boolean` is ignored.
        let positional = key == POSITIONAL_KEY;
        if rule.boolean && !positional && rule.extract.array {
            return Err(PipetError::config(format!(
                "Arg rule \"{key}\" of script \"{label}\" cannot be both `boolean` and `array`"
            )));
        }
        if (positional || !rule.boolean) && !rule.extract.has_source() {
            return Err(PipetError::config(format!(
                "Arg rule \"{key}\" of script \"{label}\" needs a `match` or a `value`"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{log, script};
    use crate::env::{EnvMap, StepEnv};
    use crate::rule::{ArgRule, Pattern};
    use serde_json::json;

    fn env_with(pairs: &[(&str, &str)]) -> RunEnv {
        let mut env = RunEnv::default();
        env.merge(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect::<EnvMap>(),
        );
        env
    }

    fn required_rules() -> RuleMap<ValueRule> {
        let mut rules = RuleMap::new();
        rules.insert(
            "TOKEN".to_string(),
            ValueRule::matching(Pattern::new("token=(\\w+)").expect("pattern")).required(),
        );
        rules
    }

    #[test]
    fn required_key_satisfied_by_earlier_step() {
        let env = env_with(&[("TOKEN", "from-before")]);
        check_required_env(&required_rules(), 1, &env, "login.js").expect("satisfied");
    }

    #[test]
    fn required_key_missing_or_empty_fails() {
        let err = check_required_env(&required_rules(), 1, &RunEnv::default(), "login.js")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Required key \"TOKEN\" is not set after running script \"login.js\""
        );
        let empty = env_with(&[("TOKEN", "")]);
        assert!(check_required_env(&required_rules(), 1, &empty, "login.js").is_err());
    }

    #[test]
    fn unvisited_required_key_is_not_checked() {
        check_required_env(&required_rules(), 0, &RunEnv::default(), "login.js")
            .expect("not visited");
    }

    #[test]
    fn empty_step_list_is_rejected() {
        let err = validate_steps(&[]).unwrap_err();
        assert_eq!(err, PipetError::config("Need at least 1 script to run"));
    }

    #[test]
    fn rule_without_source_is_rejected() {
        let steps: Vec<Step> = vec![script(
            "a.js",
            StepEnv::Inherit,
            NextDef::new().env("EMPTY", ValueRule::default()),
        )
        .into()];
        assert!(matches!(
            validate_steps(&steps),
            Err(PipetError::Config(_))
        ));
    }

    #[test]
    fn boolean_arg_needs_no_source_but_cannot_be_array() {
        let ok = NextDef::new().arg("version", ArgRule::flag());
        validate_next("a.js", &ok).expect("flag is valid");

        let both = NextDef::new().arg("version", ArgRule::flag().array());
        assert!(validate_next("a.js", &both).is_err());
    }

    #[test]
    fn boolean_positional_rule_still_needs_a_source() {
        let bare = NextDef::new().arg("$", ArgRule::flag());
        assert!(matches!(
            validate_next("a.js", &bare),
            Err(PipetError::Config(_))
        ));

        let literal = ArgRule {
            boolean: true,
            ..ArgRule::literal("raw")
        };
        let with_value = NextDef::new().arg("$", literal);
        validate_next("a.js", &with_value).expect("positional flag with a value");
    }

    #[test]
    fn null_step_env_is_caught_before_running() {
        let steps: Vec<Step> = vec![
            log("first"),
            script(
                "a.js",
                StepEnv::merge([("count", json!(null))]),
                NextDef::new(),
            )
            .into(),
        ];
        assert_eq!(
            validate_steps(&steps),
            Err(PipetError::Serialize {
                key: "count".to_string()
            })
        );
    }
}

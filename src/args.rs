//! Argument list construction for the next process step.
use crate::env::EnvMap;
use crate::error::PipetError;
use crate::rule::{ArgRule, RuleMap, POSITIONAL_KEY};

/// Render argument tokens from extracted values, in rule declaration order.
///
/// Only the first `visited` rules are held to `required`; rules an early exit
/// kept from being evaluated are not treated as missing.
pub fn build_args(
    values: &EnvMap,
    rules: &RuleMap<ArgRule>,
    visited: usize,
    label: &str,
) -> Result<Vec<String>, PipetError> {
    let mut args = Vec::with_capacity(rules.len());
    for (index, (key, rule)) in rules.iter().enumerate() {
        let mapped = values.get(key).map(String::as_str);
        let present = mapped.filter(|value| !value.is_empty());
        if rule.extract.required && index < visited && present.is_none() {
            return Err(PipetError::MissingArg {
                key: key.clone(),
                label: label.to_string(),
            });
        }
        if key == POSITIONAL_KEY {
            if let Some(value) = mapped {
                args.push(value.to_string());
            }
            continue;
        }
        let prefix = rule.prefix_or_default();
        if rule.boolean {
            args.push(format!("{prefix}{key}"));
            continue;
        }
        if let Some(value) = mapped {
            let equality = rule.equality_or_default();
            args.push(format!("{prefix}{key}{equality}{value}"));
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::rule::Pattern;

    fn rules(entries: Vec<(&str, ArgRule)>) -> RuleMap<ArgRule> {
        entries
            .into_iter()
            .map(|(key, rule)| (key.to_string(), rule))
            .collect()
    }

    fn build(text: &str, rules: &RuleMap<ArgRule>) -> Result<Vec<String>, PipetError> {
        let extraction = extract(text, rules);
        build_args(&extraction.values, rules, extraction.visited, "step.js")
    }

    #[test]
    fn literal_with_default_formatting() {
        let rules = rules(vec![("title", ArgRule::literal("hello"))]);
        assert_eq!(build("", &rules).expect("build"), vec!["--title=hello"]);
    }

    #[test]
    fn boolean_flag_ignores_extracted_value() {
        let rules = rules(vec![
            ("version", ArgRule::flag()),
            ("verbose", ArgRule { boolean: true, ..ArgRule::literal("yes") }.prefix("-")),
        ]);
        assert_eq!(
            build("", &rules).expect("build"),
            vec!["--version", "-verbose"]
        );
    }

    #[test]
    fn custom_prefix_and_equality() {
        let rules = rules(vec![(
            "out",
            ArgRule::matching(Pattern::new(r"wrote (\S+)").expect("pattern"))
                .prefix("-")
                .equality(" "),
        )]);
        assert_eq!(
            build("wrote /tmp/a.txt", &rules).expect("build"),
            vec!["-out /tmp/a.txt"]
        );
    }

    #[test]
    fn positional_rule_is_never_formatted() {
        let rules = rules(vec![(
            "$",
            ArgRule::matching(Pattern::new(r"Count is (.+) and (.+)").expect("pattern"))
                .array()
                .separator(" ")
                .prefix("--")
                .equality("="),
        )]);
        assert_eq!(
            build("Count is 5 and 9", &rules).expect("build"),
            vec!["5 9"]
        );
    }

    #[test]
    fn missing_required_arg_names_key_and_step() {
        let rules = rules(vec![(
            "token",
            ArgRule::matching(Pattern::new(r"token=(\w+)").expect("pattern")).required(),
        )]);
        let err = build("no token here", &rules).unwrap_err();
        assert_eq!(
            err,
            PipetError::MissingArg {
                key: "token".to_string(),
                label: "step.js".to_string(),
            }
        );
    }

    #[test]
    fn optional_arg_without_value_is_omitted() {
        let rules = rules(vec![
            (
                "id",
                ArgRule::matching(Pattern::new(r"id=(\w+)").expect("pattern")),
            ),
            ("$", ArgRule::matching(Pattern::new(r"file=(\S+)").expect("pattern"))),
            ("dry-run", ArgRule::flag()),
        ]);
        assert_eq!(build("", &rules).expect("build"), vec!["--dry-run"]);
    }

    #[test]
    fn unvisited_required_rule_is_not_violated() {
        let rules = rules(vec![
            (
                "stop",
                ArgRule::matching(Pattern::new("(halt)").expect("pattern")).abort_early(),
            ),
            (
                "never",
                ArgRule::matching(Pattern::new("(x)").expect("pattern")).required(),
            ),
        ]);
        assert_eq!(build("halt", &rules).expect("build"), vec!["--stop=halt"]);
    }
}

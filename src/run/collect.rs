use crate::args::build_args;
use crate::env::RunEnv;
use crate::error::PipetError;
use crate::extract::{extract, EarlyExit, Extraction};
use crate::rule::NextDef;
use crate::validate::check_required_env;

/// One extraction pass over the cumulative output. Argument rules go first;
/// when they request an early exit the environment rules are not evaluated.
struct Pass {
    args: Extraction,
    env: Option<Extraction>,
}

impl Pass {
    fn evaluate(text: &str, next: &NextDef) -> Self {
        let args = extract(text, &next.args);
        let env = args
            .early_exit
            .is_none()
            .then(|| extract(text, &next.env));
        Self { args, env }
    }

    fn early_exit(&self) -> Option<EarlyExit> {
        self.args
            .early_exit
            .or_else(|| self.env.as_ref().and_then(|env| env.early_exit))
    }
}

/// Buffers a step's stdout and re-runs extraction on every chunk.
pub(super) struct OutputCollector<'a> {
    next: &'a NextDef,
    buffer: String,
    latest: Option<Pass>,
}

impl<'a> OutputCollector<'a> {
    pub(super) fn new(next: &'a NextDef) -> Self {
        Self {
            next,
            buffer: String::new(),
            latest: None,
        }
    }

    pub(super) fn push(&mut self, chunk: &str) -> Option<EarlyExit> {
        self.buffer.push_str(chunk);
        let pass = Pass::evaluate(&self.buffer, self.next);
        let early_exit = pass.early_exit();
        tracing::debug!(
            chunk_bytes = chunk.len(),
            buffer_bytes = self.buffer.len(),
            ?early_exit,
            "extraction pass"
        );
        self.latest = Some(pass);
        early_exit
    }

    /// Commit the last pass: build the next argument list, merge env values
    /// and enforce required rules. A step that printed nothing still gets one
    /// pass over empty output so literal values apply.
    pub(super) fn finish(self, env: &mut RunEnv, label: &str) -> Result<Vec<String>, PipetError> {
        let pass = self
            .latest
            .unwrap_or_else(|| Pass::evaluate("", self.next));
        let args = build_args(
            &pass.args.values,
            &self.next.args,
            pass.args.visited,
            label,
        )?;
        if let Some(extracted) = pass.env {
            env.merge(extracted.values);
            check_required_env(&self.next.env, extracted.visited, env, label)?;
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{ArgRule, Pattern, ValueRule};

    fn pattern(source: &str) -> Pattern {
        Pattern::new(source).expect("compile pattern")
    }

    #[test]
    fn match_spanning_chunks_is_found_on_cumulative_buffer() {
        let next = NextDef::new().env(
            "countResult",
            ValueRule::matching(pattern(r"Count is (\d+) and (\d+)\n")),
        );
        let mut collector = OutputCollector::new(&next);
        assert_eq!(collector.push("Count is 5 a"), None);
        assert_eq!(collector.push("nd 9\n"), None);
        let mut env = RunEnv::default();
        let args = collector.finish(&mut env, "count.js").expect("finish");
        assert!(args.is_empty());
        assert_eq!(env.get("countResult"), Some("5,9"));
    }

    #[test]
    fn arg_early_exit_skips_env_pass() {
        let next = NextDef::new()
            .arg("port", ArgRule::matching(pattern(r"port (\d+)")).continue_early())
            .env("SEEN", ValueRule::literal("yes").required());
        let mut collector = OutputCollector::new(&next);
        assert_eq!(collector.push("port 8080\n"), Some(EarlyExit::Continue));
        let mut env = RunEnv::default();
        let args = collector.finish(&mut env, "server.js").expect("finish");
        assert_eq!(args, vec!["--port=8080"]);
        assert_eq!(env.get("SEEN"), None);
    }

    #[test]
    fn env_early_exit_is_reported() {
        let next = NextDef::new().env(
            "ERROR",
            ValueRule::matching(pattern(r"error: (.+)")).abort_early(),
        );
        let mut collector = OutputCollector::new(&next);
        assert_eq!(collector.push("ok\n"), None);
        assert_eq!(collector.push("error: boom\n"), Some(EarlyExit::Abort));
        let mut env = RunEnv::default();
        collector.finish(&mut env, "job.js").expect("finish");
        assert_eq!(env.get("ERROR"), Some("boom"));
    }

    #[test]
    fn silent_step_still_applies_literals_and_requirements() {
        let next = NextDef::new()
            .arg("title", ArgRule::literal("hello"))
            .env("MODE", ValueRule::literal("ci"));
        let collector = OutputCollector::new(&next);
        let mut env = RunEnv::default();
        let args = collector.finish(&mut env, "quiet.js").expect("finish");
        assert_eq!(args, vec!["--title=hello"]);
        assert_eq!(env.get("MODE"), Some("ci"));

        let required = NextDef::new().env(
            "TOKEN",
            ValueRule::matching(pattern(r"token=(\w+)")).required(),
        );
        let err = OutputCollector::new(&required)
            .finish(&mut RunEnv::default(), "quiet.js")
            .unwrap_err();
        assert_eq!(
            err,
            PipetError::MissingEnv {
                key: "TOKEN".to_string(),
                label: "quiet.js".to_string(),
            }
        );
    }

    #[test]
    fn requirement_checked_only_once_output_settles() {
        let next = NextDef::new().env(
            "TOKEN",
            ValueRule::matching(pattern(r"token=(\w+)")).required(),
        );
        let mut collector = OutputCollector::new(&next);
        assert_eq!(collector.push("starting\n"), None);
        assert_eq!(collector.push("token=abc\n"), None);
        let mut env = RunEnv::default();
        collector.finish(&mut env, "login.js").expect("finish");
        assert_eq!(env.get("TOKEN"), Some("abc"));
    }
}

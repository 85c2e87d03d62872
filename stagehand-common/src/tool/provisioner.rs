//! Verb-level driver for the provisioning tool.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument};

use super::command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
use super::vars::VarFile;
use super::verb::{Verb, VerbFlags};
use crate::error::{HarnessError, HarnessResult};
use crate::options::InvocationConfig;
use crate::retry::{RetryOutcome, RetryPolicy, invoke_with_retry};

/// Runs tool verbs for one [`InvocationConfig`].
///
/// Every verb except `output` goes through the retry engine. Outputs are
/// read once; a failing `output` is reported verbatim.
#[derive(Clone)]
pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    config: InvocationConfig,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("working_dir", &self.config.working_dir)
            .field("tool", &self.config.tool)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Provisioner {
    /// Drive the real tool binary.
    pub fn new(config: InvocationConfig) -> HarnessResult<Self> {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    pub fn with_runner(
        config: InvocationConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> HarnessResult<Self> {
        let policy = config.retry_policy()?;
        Ok(Self {
            runner,
            config,
            policy,
        })
    }

    pub fn config(&self) -> &InvocationConfig {
        &self.config
    }

    fn flags(&self) -> VerbFlags {
        VerbFlags {
            no_color: self.config.no_color,
            upgrade: self.config.upgrade,
        }
    }

    /// Command line for `verb`, with any extra trailing arguments.
    pub fn command(&self, verb: Verb, extra: &[&str]) -> CommandSpec {
        CommandSpec::new(&self.config.tool)
            .args(verb.args(self.flags()))
            .args(extra.iter().copied())
            .cwd(&self.config.working_dir)
            .envs(&self.config.env)
    }

    /// Run `verb` once, or through the retry engine when the verb retries.
    fn execute(&self, verb: Verb, extra: &[&str]) -> HarnessResult<RetryOutcome> {
        let command = self.command(verb, extra);
        if verb.retries() {
            return invoke_with_retry(self.runner.as_ref(), &command, verb.as_str(), &self.policy);
        }
        let output = self.runner.run(&command)?;
        if !output.success() {
            let mut label = vec![verb.as_str()];
            label.extend_from_slice(extra);
            return Err(HarnessError::Provisioning {
                verb: label.join(" "),
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }
        Ok(RetryOutcome {
            output,
            attempts: 1,
        })
    }

    #[instrument(skip(self), fields(working_dir = %self.config.working_dir.display()))]
    fn run_verb(&self, verb: Verb) -> HarnessResult<RetryOutcome> {
        if verb.takes_vars() {
            VarFile::write(&self.config.working_dir, &self.config.vars)?;
        }
        let outcome = self.execute(verb, &[])?;
        info!(
            verb = verb.as_str(),
            attempts = outcome.attempts,
            duration_ms = outcome.output.duration.as_millis() as u64,
            "Tool verb completed"
        );
        Ok(outcome)
    }

    pub fn init(&self) -> HarnessResult<RetryOutcome> {
        self.run_verb(Verb::Init)
    }

    pub fn validate(&self) -> HarnessResult<RetryOutcome> {
        self.run_verb(Verb::Validate)
    }

    pub fn plan(&self) -> HarnessResult<RetryOutcome> {
        self.run_verb(Verb::Plan)
    }

    pub fn apply(&self) -> HarnessResult<RetryOutcome> {
        self.run_verb(Verb::Apply)
    }

    /// `init` followed by `apply`; returns the apply outcome.
    pub fn init_and_apply(&self) -> HarnessResult<RetryOutcome> {
        self.init()?;
        self.apply()
    }

    pub fn destroy(&self) -> HarnessResult<RetryOutcome> {
        self.run_verb(Verb::Destroy)
    }

    fn raw_output(&self, name: Option<&str>) -> HarnessResult<CommandOutput> {
        let extra: Vec<&str> = name.into_iter().collect();
        Ok(self.execute(Verb::Output, &extra)?.output)
    }

    fn output_value(&self, name: &str) -> HarnessResult<(Value, String)> {
        let output = self.raw_output(Some(name))?;
        let value = serde_json::from_str(output.stdout.trim()).map_err(|_| {
            HarnessError::UnexpectedOutput {
                name: name.to_string(),
                expected: "valid JSON",
                output: output.stdout.clone(),
            }
        })?;
        Ok((value, output.stdout))
    }

    /// Scalar output as a string. Numbers and booleans are stringified.
    pub fn output(&self, name: &str) -> HarnessResult<String> {
        let (value, raw) = self.output_value(name)?;
        scalar_to_string(&value).ok_or_else(|| HarnessError::UnexpectedOutput {
            name: name.to_string(),
            expected: "a scalar",
            output: raw,
        })
    }

    /// List output, order preserved.
    pub fn output_list(&self, name: &str) -> HarnessResult<Vec<String>> {
        let (value, raw) = self.output_value(name)?;
        value
            .as_array()
            .and_then(|items| items.iter().map(scalar_to_string).collect::<Option<Vec<_>>>())
            .ok_or_else(|| HarnessError::UnexpectedOutput {
                name: name.to_string(),
                expected: "a list of scalars",
                output: raw,
            })
    }

    /// String-keyed map output.
    pub fn output_map(&self, name: &str) -> HarnessResult<BTreeMap<String, String>> {
        let (value, raw) = self.output_value(name)?;
        value
            .as_object()
            .and_then(|map| {
                map.iter()
                    .map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                    .collect::<Option<BTreeMap<_, _>>>()
            })
            .ok_or_else(|| HarnessError::UnexpectedOutput {
                name: name.to_string(),
                expected: "a map of scalars",
                output: raw,
            })
    }

    /// Every output's value, keyed by name.
    pub fn output_all(&self) -> HarnessResult<BTreeMap<String, Value>> {
        let output = self.raw_output(None)?;
        let parsed: BTreeMap<String, Value> = serde_json::from_str(output.stdout.trim())
            .map_err(|_| HarnessError::UnexpectedOutput {
                name: "*".to_string(),
                expected: "a JSON object of outputs",
                output: output.stdout.clone(),
            })?;
        Ok(parsed
            .into_iter()
            .map(|(name, entry)| {
                let value = entry.get("value").cloned().unwrap_or(entry);
                (name, value)
            })
            .collect())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetrySettings;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records commands and answers by verb.
    #[derive(Default)]
    struct FakeTool {
        seen: Mutex<Vec<CommandSpec>>,
        outputs: BTreeMap<String, (i32, String)>,
    }

    impl FakeTool {
        fn answer(mut self, key: &str, exit_code: i32, stdout: &str) -> Self {
            self.outputs
                .insert(key.to_string(), (exit_code, stdout.to_string()));
            self
        }

        fn verbs(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.args[0].clone())
                .collect()
        }
    }

    impl CommandRunner for FakeTool {
        fn run(&self, command: &CommandSpec) -> HarnessResult<CommandOutput> {
            self.seen.lock().unwrap().push(command.clone());
            let key = match command.args.last() {
                Some(last) if command.args[0] == "output" && !last.starts_with('-') => {
                    format!("output {last}")
                }
                _ => command.args[0].clone(),
            };
            let (exit_code, stdout) = self.outputs.get(&key).cloned().unwrap_or((0, String::new()));
            Ok(CommandOutput {
                exit_code,
                stdout,
                stderr: String::new(),
                duration: Duration::from_millis(5),
            })
        }
    }

    fn config(dir: PathBuf) -> InvocationConfig {
        InvocationConfig {
            working_dir: dir,
            vars: BTreeMap::from([("random_suffix".to_string(), Value::from("abc123"))]),
            retry: RetrySettings::no_retry(),
            tool: "terraform".into(),
            no_color: true,
            upgrade: false,
            suffix_var: "random_suffix".into(),
            env: BTreeMap::from([("ARM_CLIENT_ID".to_string(), "client".to_string())]),
        }
    }

    #[test]
    fn test_init_and_apply_writes_var_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(FakeTool::default());
        let p = Provisioner::with_runner(config(dir.path().to_path_buf()), tool.clone()).unwrap();
        let outcome = p.init_and_apply().unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(tool.verbs(), vec!["init", "apply"]);
        assert_eq!(VarFile::read(dir.path()).unwrap()["random_suffix"], "abc123");

        let seen = tool.seen.lock().unwrap();
        assert_eq!(seen[1].cwd.as_deref(), Some(dir.path()));
        assert_eq!(seen[1].env["ARM_CLIENT_ID"], "client");
    }

    #[test]
    fn test_outputs_decode_by_shape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(
            FakeTool::default()
                .answer("output name", 0, "\"rg-abc123\"\n")
                .answer("output count", 0, "3")
                .answer("output ids", 0, "[\"a\",\"b\"]")
                .answer("output tags", 0, "{\"env\":\"test\"}"),
        );
        let p = Provisioner::with_runner(config(dir.path().to_path_buf()), tool).unwrap();
        assert_eq!(p.output("name").unwrap(), "rg-abc123");
        assert_eq!(p.output("count").unwrap(), "3");
        assert_eq!(p.output_list("ids").unwrap(), vec!["a", "b"]);
        assert_eq!(p.output_map("tags").unwrap()["env"], "test");
    }

    #[test]
    fn test_output_shape_mismatch_quotes_raw() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(FakeTool::default().answer("output ids", 0, "{\"k\":[1]}"));
        let p = Provisioner::with_runner(config(dir.path().to_path_buf()), tool).unwrap();
        let err = p.output_list("ids").unwrap_err();
        assert!(matches!(err, HarnessError::UnexpectedOutput { .. }));
        assert_eq!(err.tool_output(), Some("{\"k\":[1]}"));
    }

    #[test]
    fn test_output_all_unwraps_values() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(FakeTool::default().answer(
            "output",
            0,
            r#"{"id":{"sensitive":false,"type":"string","value":"/subscriptions/x"}}"#,
        ));
        let p = Provisioner::with_runner(config(dir.path().to_path_buf()), tool).unwrap();
        let all = p.output_all().unwrap();
        assert_eq!(all["id"], "/subscriptions/x");
    }

    #[test]
    fn test_failed_output_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(
            FakeTool::default()
                .answer("output name", 1, "timeout")
                .answer("destroy", 1, "timeout"),
        );
        let mut retrying = config(dir.path().to_path_buf());
        retrying.retry = RetrySettings::azure_defaults()
            .with_max_retries(2)
            .with_delay(Duration::ZERO);
        let p = Provisioner::with_runner(retrying, tool.clone()).unwrap();

        let err = p.output("name").unwrap_err();
        assert!(matches!(err, HarnessError::Provisioning { ref verb, .. } if verb == "output name"));
        assert_eq!(tool.verbs(), vec!["output"]);

        // The same signature on a retrying verb is retried.
        assert!(matches!(
            p.destroy(),
            Err(HarnessError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(tool.verbs().len(), 4);
    }
}

//! Batch jobs and the framing that carries many logical results over one
//! physical round trip.
//!
//! A job is rendered into a single bash script. Each command runs in its own
//! subshell with stdin detached, wrapped by begin/end markers that embed a
//! per-job nonce and the command's exit code. Callers never see the markers:
//! [`Framing::parse`] turns the raw stream back into typed
//! [`CommandOutcome`] records.

use crate::domain::error::GatewayError;

/// One labelled command inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub label: String,
    pub script: String,
}

/// An ordered set of labelled commands executed in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchJob {
    commands: Vec<RemoteCommand>,
}

impl BatchJob {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`BatchJob::add`].
    #[must_use]
    pub fn with(mut self, label: impl Into<String>, script: impl Into<String>) -> Self {
        self.add(label, script);
        self
    }

    pub fn add(&mut self, label: impl Into<String>, script: impl Into<String>) {
        self.commands.push(RemoteCommand {
            label: label.into(),
            script: script.into(),
        });
    }

    #[must_use]
    pub fn commands(&self) -> &[RemoteCommand] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Labels must be unique within a job.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateLabel`] naming the first repeated label.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut seen = std::collections::HashSet::new();
        for cmd in &self.commands {
            if !seen.insert(cmd.label.as_str()) {
                return Err(GatewayError::DuplicateLabel(cmd.label.clone()));
            }
        }
        Ok(())
    }
}

/// Captured stdout and exit code of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub label: String,
    pub stdout: String,
    pub exit_code: i32,
}

impl CommandOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout with surrounding whitespace removed.
    #[must_use]
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Result of a batch, in job order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    outcomes: Vec<CommandOutcome>,
}

impl BatchResult {
    #[must_use]
    pub fn from_outcomes(outcomes: Vec<CommandOutcome>) -> Self {
        Self { outcomes }
    }

    /// Look up a command's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownLabel`] if the job had no such label.
    pub fn get(&self, label: &str) -> Result<&CommandOutcome, GatewayError> {
        self.outcomes
            .iter()
            .find(|o| o.label == label)
            .ok_or_else(|| GatewayError::UnknownLabel(label.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownLabel`] if the job had no such label.
    pub fn stdout(&self, label: &str) -> Result<&str, GatewayError> {
        self.get(label).map(|o| o.stdout.as_str())
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownLabel`] if the job had no such label.
    pub fn exit_code(&self, label: &str) -> Result<i32, GatewayError> {
        self.get(label).map(|o| o.exit_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.outcomes.iter()
    }

    /// Outcomes whose label starts with `prefix`.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a CommandOutcome> {
        self.outcomes.iter().filter(move |o| o.label.starts_with(prefix))
    }
}

/// Marker scheme for one job. The nonce must be unguessable by the commands
/// being run; the gateway draws a fresh one for every job.
#[derive(Debug, Clone)]
pub struct Framing {
    nonce: String,
}

impl Framing {
    #[must_use]
    pub fn new(nonce: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
        }
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    fn begin_marker(&self, index: usize) -> String {
        format!("@@TANDEM:{}:B:{index}@@", self.nonce)
    }

    fn end_prefix(&self, index: usize) -> String {
        format!("@@TANDEM:{}:E:{index}", self.nonce)
    }

    /// Render the whole job as a bash script for `bash -s`.
    #[must_use]
    pub fn render(&self, job: &BatchJob) -> String {
        let mut script = String::from("set +e\n");
        for (index, cmd) in job.commands().iter().enumerate() {
            script.push_str(&format!(
                "printf '%s\\n' '{begin}'\n(\n{body}\n) </dev/null\n__tandem_rc=$?\nprintf '\\n%s:%d@@\\n' '{end}' \"$__tandem_rc\"\n",
                begin = self.begin_marker(index),
                body = cmd.script,
                end = self.end_prefix(index),
            ));
        }
        script.push_str("exit 0\n");
        script
    }

    /// What the remote side prints for one command. The gateway never calls
    /// this; fakes and tests use it to produce realistic streams.
    #[must_use]
    pub fn frame_output(&self, index: usize, stdout: &str, exit_code: i32) -> String {
        format!(
            "{}\n{stdout}\n{}:{exit_code}@@\n",
            self.begin_marker(index),
            self.end_prefix(index)
        )
    }

    /// Split the combined stream back into per-command outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Truncated`] if any command's frame is missing or
    /// malformed (the stream ended early).
    pub fn parse(&self, job: &BatchJob, output: &str) -> Result<BatchResult, GatewayError> {
        let mut outcomes = Vec::with_capacity(job.len());
        let mut cursor = 0;

        for (index, cmd) in job.commands().iter().enumerate() {
            let truncated = || GatewayError::Truncated {
                label: cmd.label.clone(),
            };

            let begin = format!("{}\n", self.begin_marker(index));
            let start = output[cursor..]
                .find(&begin)
                .map(|p| cursor + p + begin.len())
                .ok_or_else(truncated)?;

            let end = format!("\n{}:", self.end_prefix(index));
            let end_at = output[start..]
                .find(&end)
                .map(|p| start + p)
                .ok_or_else(truncated)?;

            let code_from = end_at + end.len();
            let code_len = output[code_from..].find("@@").ok_or_else(truncated)?;
            let exit_code: i32 = output[code_from..code_from + code_len]
                .parse()
                .map_err(|_| truncated())?;

            outcomes.push(CommandOutcome {
                label: cmd.label.clone(),
                stdout: output[start..end_at].to_string(),
                exit_code,
            });
            cursor = code_from + code_len + 2;
        }

        Ok(BatchResult { outcomes })
    }
}

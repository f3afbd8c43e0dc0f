//! Evaluator that runs the build's shell on the testcase

use crate::bisect::{Evaluation, Evaluator, Verdict};
use crate::config::EvaluatorConfig;
use crate::error::{BisectError, BisectResult};
use crate::evaluate::capability::CapabilityCache;
use crate::evaluate::level::{classify, Exit, Level, RunOutput};
use crate::process::output_tail;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs `<build>/<binary> [supported optional flags] [args] <testcase>`
pub struct CommandEvaluator {
    binary: String,
    args: Vec<String>,
    optional_flags: Vec<String>,
    timeout: Duration,
    min_level: Level,
    capabilities: Arc<CapabilityCache>,
}

impl CommandEvaluator {
    pub fn new(binary: impl Into<String>, capabilities: Arc<CapabilityCache>) -> Self {
        Self {
            binary: binary.into(),
            args: vec![],
            optional_flags: vec![],
            timeout: Duration::from_secs(120),
            min_level: Level::KnownCrash,
            capabilities,
        }
    }

    pub fn from_config(config: &EvaluatorConfig, capabilities: Arc<CapabilityCache>) -> Self {
        Self::new(config.binary.clone(), capabilities)
            .with_args(config.args.clone())
            .with_optional_flags(config.optional_flags.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_min_level(config.min_level)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_optional_flags(mut self, flags: Vec<String>) -> Self {
        self.optional_flags = flags;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }

    async fn argv(&self, binary: &Path, testcase: &Path) -> Vec<String> {
        let mut argv = vec![];
        for flag in &self.optional_flags {
            if self.capabilities.supports(binary, flag).await {
                argv.push(flag.clone());
            } else {
                debug!("{} does not support {}, leaving it out", binary.display(), flag);
            }
        }
        argv.extend(self.args.iter().cloned());
        argv.push(testcase.to_string_lossy().into_owned());
        argv
    }

    async fn run(&self, binary: &Path, argv: &[String]) -> std::io::Result<RunOutput> {
        let child = Command::new(binary)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(RunOutput {
                    exit: exit_of(&output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Err(_) => Ok(RunOutput {
                exit: Exit::TimedOut,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

fn exit_of(status: &std::process::ExitStatus) -> Exit {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Exit::Signal(signal);
        }
    }
    Exit::Code(status.code().unwrap_or(-1))
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn run_once(&self, build_path: &Path, testcase: &Path) -> BisectResult<Evaluation> {
        if !testcase.is_file() {
            return Err(BisectError::EvaluatorFatal(format!(
                "testcase {} does not exist",
                testcase.display()
            )));
        }

        let binary: PathBuf = build_path.join(&self.binary);
        if !binary.is_file() {
            return Ok(Evaluation::skip(format!(
                "{} not found in build",
                binary.display()
            )));
        }

        let argv = self.argv(&binary, testcase).await;
        debug!("Executing: {} {:?}", binary.display(), argv);

        let run = match self.run(&binary, &argv).await {
            Ok(run) => run,
            Err(e) => {
                return Ok(Evaluation::skip(format!(
                    "failed to start {}: {}",
                    binary.display(),
                    e
                )))
            }
        };

        let classification = classify(&run);
        let verdict = if classification.level.is_interesting(self.min_level) {
            Verdict::Bad
        } else {
            Verdict::Good
        };

        let tail = output_tail(&run.stdout, &run.stderr);
        let diagnostics = if tail.is_empty() {
            classification.summary()
        } else {
            format!("{}\n{}", classification.summary(), tail)
        };
        Ok(Evaluation::new(verdict, diagnostics))
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

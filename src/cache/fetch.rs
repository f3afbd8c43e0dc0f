//! Fetch collaborator: produces a build's files in a staging directory
//!
//! The network transfer or compilation itself lives outside this crate. The
//! manager only needs something that fills a directory or fails.

use crate::build::BuildDescriptor;
use crate::error::{BisectError, BisectResult};
use crate::process::{output_tail, render_argv};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Exit status a fetch command uses to say "no such build exists"
pub const EXIT_NO_BUILD: i32 = 3;

/// Exit status a fetch command uses to say "the build failed to compile"
pub const EXIT_COMPILE_FAILED: i32 = 4;

/// Produces the files of one build into `dest`
#[async_trait]
pub trait BuildFetcher: Send + Sync {
    /// Fill `dest` (an existing, empty directory) with the build's files.
    ///
    /// Errors are reported per build: `NoBuildAvailable`, `Fetch` or
    /// `Compile`. The caller does not retry.
    async fn fetch(&self, build: &BuildDescriptor, dest: &Path) -> BisectResult<()>;

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}

/// Fetcher that runs an external command template
///
/// Placeholders: `{id}`, `{branch}`, `{flags}`, `{prefix}`, `{dest}`.
/// Exit status 0 is success, [`EXIT_NO_BUILD`] maps to `NoBuildAvailable`,
/// [`EXIT_COMPILE_FAILED`] to `Compile`, anything else to `Fetch`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    argv: Vec<String>,
}

impl CommandFetcher {
    pub fn new(argv: Vec<String>) -> BisectResult<Self> {
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(BisectError::Configuration(
                "fetch.command must name a program".to_string(),
            ));
        }
        Ok(Self { argv })
    }

    fn render(&self, build: &BuildDescriptor, dest: &Path) -> Vec<String> {
        render_argv(
            &self.argv,
            &[
                ("id", build.id().to_string()),
                ("branch", build.branch().to_string()),
                ("flags", build.flags().tag()),
                ("prefix", build.prefix()),
                ("dest", dest.to_string_lossy().into_owned()),
            ],
        )
    }
}

#[async_trait]
impl BuildFetcher for CommandFetcher {
    async fn fetch(&self, build: &BuildDescriptor, dest: &Path) -> BisectResult<()> {
        let argv = self.render(build, dest);
        debug!("Executing fetch: {:?}", argv);

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BisectError::fetch(build.prefix(), format!("{}: {}", argv[0], e)))?;

        if output.status.success() {
            return Ok(());
        }

        let tail = output_tail(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        );
        match output.status.code() {
            Some(EXIT_NO_BUILD) => Err(BisectError::NoBuildAvailable(build.prefix())),
            Some(EXIT_COMPILE_FAILED) => Err(BisectError::Compile {
                prefix: build.prefix(),
                reason: tail,
            }),
            code => Err(BisectError::fetch(
                build.prefix(),
                format!("exit {:?}: {}", code, tail),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::build::{Branch, BuildFlags};
    use tempfile::TempDir;

    fn descriptor() -> BuildDescriptor {
        BuildDescriptor::new(
            "2023-01-07".parse().unwrap(),
            Branch::Central,
            BuildFlags::default(),
        )
    }

    fn sh(script: &str) -> CommandFetcher {
        CommandFetcher::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn empty_command_rejected() {
        assert!(matches!(
            CommandFetcher::new(vec![]),
            Err(BisectError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn fetch_writes_into_dest() {
        let temp = TempDir::new().unwrap();
        let fetcher = sh("echo {id} > {dest}/js");
        fetcher.fetch(&descriptor(), temp.path()).await.unwrap();

        let content = std::fs::read_to_string(temp.path().join("js")).unwrap();
        assert_eq!(content.trim(), "2023-01-07");
    }

    #[tokio::test]
    async fn exit_codes_map_to_errors() {
        let temp = TempDir::new().unwrap();

        let err = sh("exit 3").fetch(&descriptor(), temp.path()).await.unwrap_err();
        assert!(matches!(err, BisectError::NoBuildAvailable(_)));

        let err = sh("echo boom >&2; exit 4")
            .fetch(&descriptor(), temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, BisectError::Compile { ref reason, .. } if reason.contains("boom")));

        let err = sh("exit 1").fetch(&descriptor(), temp.path()).await.unwrap_err();
        assert!(matches!(err, BisectError::Fetch { .. }));
        assert!(err.is_skippable());
    }
}

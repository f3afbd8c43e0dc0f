//! Per-binary flag support, probed once and remembered
//!
//! Owned by the caller and shared (`Arc`) with whatever needs it; there is no
//! process-wide instance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Cache of `(binary, flag) -> supported`
#[derive(Debug)]
pub struct CapabilityCache {
    probe_args: Vec<String>,
    timeout: Duration,
    entries: Mutex<HashMap<(PathBuf, String), bool>>,
}

impl CapabilityCache {
    /// `probe_args` follow the flag when probing, e.g. `["-e", "42"]`
    pub fn new(probe_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            probe_args,
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `binary` accepts `flag`. Probes on first use.
    pub async fn supports(&self, binary: &Path, flag: &str) -> bool {
        let key = (binary.to_path_buf(), flag.to_string());
        if let Some(&known) = self.entries().get(&key) {
            return known;
        }

        let supported = self.probe(binary, flag).await;
        debug!(
            "{} {} {}",
            binary.display(),
            if supported { "supports" } else { "rejects" },
            flag
        );
        self.entries().insert(key, supported);
        supported
    }

    /// Record a known answer without probing
    pub fn record(&self, binary: &Path, flag: &str, supported: bool) {
        self.entries()
            .insert((binary.to_path_buf(), flag.to_string()), supported);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<(PathBuf, String), bool>> {
        // A poisoned map only holds booleans; keep using it
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn probe(&self, binary: &Path, flag: &str) -> bool {
        let child = Command::new(binary)
            .arg(flag)
            .args(&self.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("Probe of {} failed to start: {}", binary.display(), e);
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn shell(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("js");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn cache() -> CapabilityCache {
        CapabilityCache::new(
            vec!["-e".to_string(), "42".to_string()],
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn probes_once_per_flag() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let binary = shell(
            &dir,
            &format!(
                "echo x >> {}\n[ \"$1\" = \"--ion-eager\" ] && [ \"$2\" = \"-e\" ]",
                counter.display()
            ),
        );
        let cache = cache();

        assert!(cache.supports(&binary, "--ion-eager").await);
        assert!(cache.supports(&binary, "--ion-eager").await);
        assert!(!cache.supports(&binary, "--no-such-flag").await);

        let probes = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(probes.lines().count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn missing_binary_supports_nothing() {
        let cache = cache();
        assert!(!cache.supports(Path::new("/nonexistent/js"), "--ion-eager").await);
    }

    #[tokio::test]
    async fn recorded_answers_skip_probe() {
        let cache = cache();
        cache.record(Path::new("/nonexistent/js"), "--ion-eager", true);
        assert!(cache.supports(Path::new("/nonexistent/js"), "--ion-eager").await);
    }
}

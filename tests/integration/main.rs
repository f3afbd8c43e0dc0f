//! Integration tests for autobisect

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn autobisect() -> Command {
        let mut cmd = cargo_bin_cmd!("autobisect");
        cmd.env_remove("AUTOBISECT_CONFIG");
        cmd
    }

    /// Fetch script producing a `js` shell that asserts from 2023-01-07 on
    const FETCH_SCRIPT: &str = r#"
case "$1" in
  2023-01-0[7-9]|2023-01-1?) body='echo "Assertion failure: bad, at jsapi.cpp:1" >&2; exit 3' ;;
  *) body='exit 0' ;;
esac
printf '#!/bin/sh\n%s\n' "$body" > "$2/js" && chmod +x "$2/js"
"#;

    /// Write a config whose cache lives under `temp` and return its path
    fn write_config(temp: &Path) -> PathBuf {
        let path = temp.join("config.toml");
        let content = format!(
            r#"[storage]
storage-path = '{}'

[fetch]
command = ["sh", "-c", '''{}''', "fetch", "{{id}}", "{{dest}}"]

[evaluator]
binary = "js"
timeout-secs = 30
"#,
            temp.join("cache").display(),
            FETCH_SCRIPT
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    fn write_testcase(temp: &Path) -> PathBuf {
        let path = temp.join("crash.js");
        std::fs::write(&path, "gczeal(4);\n").unwrap();
        path
    }

    #[test]
    fn help_displays() {
        autobisect()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("find the build that introduced"));
    }

    #[test]
    fn version_displays() {
        autobisect()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("autobisect"));
    }

    #[test]
    fn config_path_honours_flag() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("custom.toml");
        autobisect()
            .args(["--config", config.to_str().unwrap(), "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("missing.toml");
        autobisect()
            .args(["--config", config.to_str().unwrap(), "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[storage]"))
            .stdout(predicate::str::contains("persist-limit = 30000"));
    }

    #[test]
    fn config_init_then_set() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        let config = config.to_str().unwrap();

        autobisect()
            .args(["--config", config, "config", "init"])
            .assert()
            .success();
        autobisect()
            .args(["--config", config, "config", "set", "bisect.skip-budget", "6"])
            .assert()
            .success();
        autobisect()
            .args(["--config", config, "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("skip-budget = 6"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        std::fs::write(&config, "[bisect]\ncount = 0\n").unwrap();
        autobisect()
            .args(["--config", config.to_str().unwrap(), "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error (configuration):"))
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn invalid_boundary_fails() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let testcase = write_testcase(temp.path());
        autobisect()
            .args(["--config", config.to_str().unwrap(), "bisect"])
            .arg(&testcase)
            .args(["--start", "2023-02-30"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error (boundaries):"))
            .stderr(predicate::str::contains("Invalid boundary value"));
    }

    #[test]
    fn missing_testcase_fails() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        autobisect()
            .args(["--config", config.to_str().unwrap(), "bisect", "nope.js"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Testcase cannot be evaluated"));
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        autobisect()
            .args(["--config", config.to_str().unwrap(), "cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached builds"));
    }

    #[cfg(unix)]
    #[test]
    fn bisect_finds_first_bad_build() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let config = config.to_str().unwrap();
        let testcase = write_testcase(temp.path());

        autobisect()
            .args(["--config", config, "bisect"])
            .arg(&testcase)
            .args(["--start", "2023-01-01", "--end", "2023-01-10"])
            .assert()
            .success()
            .stdout(predicate::str::contains("first bad: central-2023-01-07-opt"))
            .stdout(predicate::str::contains("last good: central-2023-01-06-opt"));

        autobisect()
            .args(["--config", config, "cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("central-2023-01-07-opt"));
    }

    #[cfg(unix)]
    #[test]
    fn find_fix_verifies_fixed_end() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let testcase = write_testcase(temp.path());

        // Every build from 2023-01-07 on still asserts, so the end is not fixed
        autobisect()
            .args(["--config", config.to_str().unwrap(), "bisect"])
            .arg(&testcase)
            .args(["--start", "2023-01-07", "--end", "2023-01-12"])
            .args(["--find-fix", "--verify"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Boundary verification failed"))
            .stderr(predicate::str::contains("expected GOOD"));
    }

    #[cfg(unix)]
    #[test]
    fn verify_rejects_bad_start() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let testcase = write_testcase(temp.path());

        autobisect()
            .args(["--config", config.to_str().unwrap(), "bisect"])
            .arg(&testcase)
            .args(["--start", "2023-01-08", "--end", "2023-01-10", "--verify"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error (verification):"))
            .stderr(predicate::str::contains("Boundary verification failed"))
            .stderr(predicate::str::contains("--verify"));
    }
}

//! CLI tests for `modrunner test`.
//!
//! Spawns the modrunner binary and verifies exit codes for invalid
//! invocations, passing runs and failing runs. Engine runs use a shell script
//! that speaks the engine's line protocol.

use std::fs;
use std::path::Path;
use std::process::Command;

use modrunner::exit_codes;

fn modrunner(cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_modrunner"));
    cmd.current_dir(cwd).env_remove("RUST_LOG");
    cmd
}

#[test]
fn invalid_test_type_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = modrunner(temp.path())
        .args(["test", "widget"])
        .output()
        .expect("modrunner test");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid test type"));
}

#[test]
fn missing_mojit_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = modrunner(temp.path())
        .args(["test", "mojit", "Nope"])
        .output()
        .expect("modrunner test");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Could not find mojit."));
}

#[cfg(unix)]
mod engine_script {
    use super::*;
    use modrunner::io::config::{CONFIG_FILE, RunnerConfig, write_config};
    use modrunner::test_support::{write_framework, write_module};

    /// Lay out a mojit plus an engine script reporting `failed` failures.
    fn setup(root: &Path, failed: u32) {
        write_framework(&root.join("node_modules/mojito"));
        write_module(&root.join("mojits/Foo/controller.common.js"), "Foo", &[]);
        write_module(
            &root.join("mojits/Foo/tests/controller.common-tests.js"),
            "Foo-tests",
            &["Foo", "mojito-test"],
        );
        let mut failures = String::new();
        for n in 0..failed {
            failures.push_str(&format!(
                "echo '{{\"event\":\"case-failure\",\"case\":\"Foo case\",\"test\":\"test {n}\",\"message\":\"nope\"}}'\n"
            ));
        }
        let script = format!(
            "grep -q Foo-tests \"$1\" || exit 3\n\
             echo '{{\"event\":\"begin\"}}'\n\
             echo '{{\"event\":\"suite-begin\",\"suite\":\"Foo\"}}'\n\
             {failures}\
             echo '{{\"event\":\"complete\",\"results\":{{\"passed\":2,\"failed\":{failed}}}}}'\n\
             printf '<testsuites><testsuite name=\"Foo\"/></testsuites>' > \"$2/report.xml\"\n"
        );
        fs::write(root.join("engine.sh"), script).expect("write engine");

        let mut config = RunnerConfig::default();
        config.engine.command = vec![
            "sh".to_string(),
            "engine.sh".to_string(),
            "{context}".to_string(),
            "{out}".to_string(),
        ];
        write_config(&root.join(CONFIG_FILE), &config).expect("write config");
    }

    #[test]
    fn passing_mojit_exits_ok() {
        let temp = tempfile::tempdir().expect("tempdir");
        setup(temp.path(), 0);

        let output = modrunner(temp.path())
            .args(["test", "mojit", "Foo"])
            .output()
            .expect("modrunner test");

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(output.status.code(), Some(exit_codes::OK), "stdout: {stdout}");
        assert!(stdout.contains("Passed."));
        let xml = fs::read_to_string(temp.path().join("artifacts/test/result.xml"))
            .expect("result.xml");
        assert!(xml.contains(r#"<testsuite name="Foo"/>"#));
    }

    #[test]
    fn failing_mojit_exits_failed_and_prints_details() {
        let temp = tempfile::tempdir().expect("tempdir");
        setup(temp.path(), 1);

        let output = modrunner(temp.path())
            .args(["test", "mojit", "Foo", "-d", "out"])
            .output()
            .expect("modrunner test");

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(output.status.code(), Some(exit_codes::FAILED), "stdout: {stdout}");
        assert!(stdout.contains("Foo :: Foo case :: test 0"));
        assert!(stdout.contains("Failed."));
        assert!(temp.path().join("out/summary.json").is_file());
    }
}

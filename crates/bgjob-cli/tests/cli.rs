//! Lifecycle tests against the real `bgjob` binary, with an isolated data
//! dir and the passphrase injected per invocation.

use std::process::{Command, Output};
use std::time::{Duration, Instant};

const PASSPHRASE: &str = "cli-test-secret";

fn openssl_available() -> bool {
    Command::new("openssl")
        .arg("version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn bgjob(data_dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bgjob"))
        .args(args)
        .env("BGJOB_PASSPHRASE", PASSPHRASE)
        .env("BGJOB_DATA_DIR", data_dir)
        .output()
        .expect("run bgjob")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn start_job(data_dir: &std::path::Path, command: &str) -> String {
    let out = bgjob(data_dir, &["start", command]);
    assert!(
        out.status.success(),
        "start failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let text = stdout(&out);
    // "Started job <id> (pid <pid>)"
    text.split_whitespace()
        .nth(2)
        .expect("job id in start output")
        .to_string()
}

/// Poll `list` until the job shows the wanted status or the deadline hits.
fn wait_for_status(data_dir: &std::path::Path, id: &str, status: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let out = bgjob(data_dir, &["list"]);
        assert!(out.status.success());
        let line = stdout(&out)
            .lines()
            .find(|l| l.starts_with(id))
            .map(str::to_string);
        if line.as_deref().is_some_and(|l| l.contains(status)) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} never reached {status}: {line:?}"
        );
        std::thread::sleep(Duration::from_millis(200));
    }
}

#[test]
fn start_list_stop_lifecycle() {
    if !openssl_available() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let id = start_job(dir.path(), "sleep 60");

    wait_for_status(dir.path(), &id, "running");

    let out = bgjob(dir.path(), &["stop", &id]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Stopped job"));

    wait_for_status(dir.path(), &id, "stopped");

    // Stopping again is a visible no-op, not an error.
    let out = bgjob(dir.path(), &["stop", &id]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("already stopped"));
}

#[test]
fn natural_exit_is_reconciled_and_logs_decrypt() {
    if !openssl_available() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    // Outlives the startup grace period, then exits on its own.
    let id = start_job(dir.path(), "sleep 1; echo alpha; echo beta");

    // No explicit stop: the next list has to notice the supervisor is gone.
    wait_for_status(dir.path(), &id, "stopped");

    let out = bgjob(dir.path(), &["logs", &id, "-n", "0"]);
    assert!(
        out.status.success(),
        "logs failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let text = stdout(&out);
    assert!(text.contains("alpha"), "missing output: {text:?}");
    assert!(text.contains("beta"), "missing output: {text:?}");

    // A finished job no longer accepts input, distinctly and promptly.
    let out = bgjob(dir.path(), &["send", &id, "anyone there?"]);
    assert!(!out.status.success());
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("not accepting input"),
        "unexpected stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    // A pipe that was cleaned up from disk gets its own diagnostic.
    std::fs::remove_file(dir.path().join("inputs").join(format!("{id}.in")))
        .expect("remove fifo");
    let out = bgjob(dir.path(), &["send", &id, "anyone there?"]);
    assert!(!out.status.success());
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("input interface not found"),
        "unexpected stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

#[test]
fn missing_passphrase_fails_before_any_io() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = Command::new(env!("CARGO_BIN_EXE_bgjob"))
        .arg("list")
        .env_remove("BGJOB_PASSPHRASE")
        .env("BGJOB_DATA_DIR", dir.path())
        .output()
        .expect("run bgjob");
    assert!(!out.status.success());
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("BGJOB_PASSPHRASE"),
        "unexpected stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    // No state artifacts may appear before the precondition check.
    assert!(std::fs::read_dir(dir.path()).expect("read dir").next().is_none());
}

#[test]
fn exit_within_grace_period_is_a_startup_failure() {
    if !openssl_available() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");

    // `true` is long gone before the grace window closes; even a clean
    // exit there means nothing is supervising, so start must fail and
    // record no job.
    let out = bgjob(dir.path(), &["start", "true"]);
    assert!(!out.status.success(), "start must fail: {}", stdout(&out));
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("supervisor exited during startup"),
        "unexpected stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let out = bgjob(dir.path(), &["list"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("No background jobs."));
}

#[test]
fn wrong_passphrase_on_list_is_a_decrypt_error() {
    if !openssl_available() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    // Outlives the startup grace window so start records it.
    let id = start_job(dir.path(), "sleep 1");
    let _ = id;

    let out = Command::new(env!("CARGO_BIN_EXE_bgjob"))
        .arg("list")
        .env("BGJOB_PASSPHRASE", "not-the-passphrase")
        .env("BGJOB_DATA_DIR", dir.path())
        .output()
        .expect("run bgjob");
    assert!(!out.status.success());
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("decryption failed"),
        "unexpected stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

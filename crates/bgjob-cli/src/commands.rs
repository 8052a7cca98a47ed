use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use libbgjob::{
    BgjobError, CipherGateway, Config, JobRecord, JobStatus, StateStore, Supervisor, config,
    resolve_id, send_input, short_id,
};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// How long `start` watches the freshly spawned supervisor before trusting
/// that it survived (a missing openssl or bad passphrase kills it here).
const STARTUP_GRACE: Duration = Duration::from_millis(500);

const COMMAND_COLUMN_WIDTH: usize = 40;

/// Start a command as a detached, supervised background job.
pub fn start(cfg: &Config, parts: &[String]) -> anyhow::Result<()> {
    cfg.ensure_dirs()?;

    let command = parts.join(" ");
    let id = short_id();
    let log_file = cfg.log_path(&id);
    let input_file = cfg.input_path(&id);

    let exe = std::env::current_exe().context("cannot locate the bgjob executable")?;
    let mut child = std::process::Command::new(exe)
        .arg("supervise")
        .arg("--command")
        .arg(&command)
        .arg("--log-file")
        .arg(&log_file)
        .arg("--input-file")
        .arg(&input_file)
        // Explicitly hand the passphrase and data dir to the supervisor;
        // nothing else of our environment matters to it.
        .env(config::PASSPHRASE_ENV, &cfg.passphrase)
        .env(config::DATA_DIR_ENV, &cfg.data_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        // Fresh process group so `stop` can signal the whole job at once.
        .process_group(0)
        .spawn()
        .context("failed to launch supervisor")?;
    let pid = child.id();

    std::thread::sleep(STARTUP_GRACE);
    // Any exit inside the grace period is a startup failure, clean or not:
    // a supervisor that is gone before we record the job is not supervising.
    if let Some(status) = child.try_wait()? {
        let detail = match status.code() {
            Some(code) => format!(" (exit code {code})"),
            None => " (killed by signal)".to_string(),
        };
        return Err(BgjobError::SpawnFailed(detail).into());
    }

    let record = JobRecord {
        id: id.clone(),
        pid,
        command,
        start_time: Local::now(),
        end_time: None,
        status: JobStatus::Running,
        log_file: log_file.clone(),
        input_file,
        cwd: std::env::current_dir()?,
    };
    StateStore::new(cfg).update(|doc| {
        doc.insert(record.id.clone(), record);
    })?;

    println!("Started job {id} (pid {pid})");
    println!("Logs: {}", log_file.display());
    Ok(())
}

/// Stop a job by sending SIGTERM to its supervisor's process group.
pub fn stop(cfg: &Config, prefix: &str) -> anyhow::Result<()> {
    let store = StateStore::new(cfg);
    let doc = store.load_reconciled()?;
    let id = resolve_id(&doc, prefix)?.to_string();
    let record = &doc[&id];

    if record.status != JobStatus::Running {
        println!("Job {id} is already {}", record.status);
        return Ok(());
    }

    match killpg(Pid::from_raw(record.pid as i32), Signal::SIGTERM) {
        Ok(()) => println!("Stopped job {id} (pid {})", record.pid),
        // Already gone; still record the transition.
        Err(Errno::ESRCH) => println!("Job {id} (pid {}) was already gone", record.pid),
        Err(errno) => {
            return Err(std::io::Error::from_raw_os_error(errno as i32))
                .with_context(|| format!("failed to signal job {id}"));
        }
    }

    store.update(|doc| {
        if let Some(rec) = doc.get_mut(&id) {
            rec.status = JobStatus::Stopped;
            rec.end_time = Some(Local::now());
        }
    })?;
    Ok(())
}

/// List all jobs as a table, after reconciling liveness.
pub fn list(cfg: &Config) -> anyhow::Result<()> {
    let doc = StateStore::new(cfg).load_reconciled()?;
    if doc.is_empty() {
        println!("No background jobs.");
        return Ok(());
    }

    println!(
        "{:<10} {:<8} {:<10} {:<20} COMMAND",
        "ID", "PID", "STATUS", "STARTED"
    );
    println!("{}", "-".repeat(80));
    for record in doc.values() {
        println!(
            "{:<10} {:<8} {:<10} {:<20} {}",
            record.id,
            record.pid,
            record.status,
            record.start_time.format("%Y-%m-%d %H:%M:%S"),
            truncate_command(&record.command, COMMAND_COLUMN_WIDTH),
        );
    }
    Ok(())
}

/// Decrypt a job's log and print its tail (or everything for `lines <= 0`).
pub fn logs(cfg: &Config, prefix: &str, lines: i64) -> anyhow::Result<()> {
    let doc = StateStore::new(cfg).load_reconciled()?;
    let id = resolve_id(&doc, prefix)?;
    let record = &doc[id];

    if !record.log_file.exists() {
        anyhow::bail!("log file not found for job {id}");
    }

    let plain = CipherGateway::new(cfg.passphrase.clone()).decrypt(&record.log_file)?;
    let text = String::from_utf8_lossy(&plain);
    println!("--- Logs for {id} ---");
    print!("{}", tail_lines(&text, lines));
    Ok(())
}

/// Send one message through a job's control channel.
pub fn send(cfg: &Config, prefix: &str, text: &str, no_newline: bool) -> anyhow::Result<()> {
    let doc = StateStore::new(cfg).load_reconciled()?;
    let id = resolve_id(&doc, prefix)?;
    let record = &doc[id];

    send_input(&record.input_file, id, text, !no_newline)?;
    println!("Sent input to {id}");
    Ok(())
}

/// Entry point of the detached supervisor process itself.
pub fn supervise(
    cfg: &Config,
    command: String,
    log_file: PathBuf,
    input_file: PathBuf,
) -> anyhow::Result<()> {
    let cipher = CipherGateway::new(cfg.passphrase.clone());
    Supervisor::new(command, log_file, input_file, cipher).run()?;
    Ok(())
}

fn truncate_command(command: &str, width: usize) -> String {
    if command.chars().count() <= width {
        command.to_string()
    } else {
        let cut: String = command.chars().take(width.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn tail_lines(text: &str, lines: i64) -> String {
    if lines <= 0 {
        return text.to_string();
    }
    let split: Vec<&str> = text.split_inclusive('\n').collect();
    let start = split.len().saturating_sub(lines as usize);
    split[start..].concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_n_lines() {
        let text = "one\ntwo\nthree\nfour\n";
        assert_eq!(tail_lines(text, 2), "three\nfour\n");
        assert_eq!(tail_lines(text, 10), text);
        assert_eq!(tail_lines(text, 0), text);
        assert_eq!(tail_lines(text, -5), text);
        assert_eq!(tail_lines("no trailing newline", 1), "no trailing newline");
    }

    #[test]
    fn long_commands_are_truncated_for_the_table() {
        assert_eq!(truncate_command("ls -la", 40), "ls -la");
        let long = "x".repeat(50);
        let shown = truncate_command(&long, 40);
        assert_eq!(shown.len(), 40);
        assert!(shown.ends_with("..."));
    }
}

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use tracing::{debug, info, warn};

use crate::channel::ensure_fifo;
use crate::cipher::CipherGateway;
use crate::error::BgjobError;

/// Bounded multiplex wait, so the loop re-checks child and sink liveness
/// even when neither fd has pending data.
const POLL_INTERVAL_MS: u16 = 500;
const READ_BUF: usize = 4096;

/// One supervisor per job: owns a pty-attached child, an encrypting log
/// sink, and the control-channel reader, for the job's whole lifetime.
///
/// The loop is synchronous and single-threaded; parallelism across jobs
/// comes from one OS process per job. The supervisor never writes to the
/// state store. If it dies without an explicit `stop`, the job stays
/// `running` on disk until the next read-path reconciliation notices.
pub struct Supervisor {
    command: String,
    log_path: PathBuf,
    input_path: PathBuf,
    cipher: CipherGateway,
}

impl Supervisor {
    pub fn new(
        command: impl Into<String>,
        log_path: impl Into<PathBuf>,
        input_path: impl Into<PathBuf>,
        cipher: CipherGateway,
    ) -> Self {
        Self {
            command: command.into(),
            log_path: log_path.into(),
            input_path: input_path.into(),
            cipher,
        }
    }

    /// Run the job to completion.
    ///
    /// Starting: spawn the encrypting sink, open the control channel, fork
    /// the command onto a pty slave. Running: poll the pty master and the
    /// channel, forwarding bytes verbatim in both directions. Draining:
    /// flush the pty's tail, close the sink's stdin to finalize the cipher
    /// stream, and reap the sink.
    pub fn run(&self) -> Result<(), BgjobError> {
        let mut sink = self.cipher.spawn_sink(&self.log_path)?;
        let mut sink_in = sink
            .stdin
            .take()
            .ok_or_else(|| BgjobError::Encrypt("sink stdin unavailable".into()))?;

        ensure_fifo(&self.input_path)?;
        // Opened for both directions so the read side never observes the
        // "last writer closed" EOF condition between writer sessions.
        let mut fifo = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.input_path)?;

        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| BgjobError::Pty(e.to_string()))?;

        // The command string goes through `sh -c` so pipes and redirects
        // behave as the caller intends. Documented injection surface.
        let mut cmd = CommandBuilder::new("sh");
        cmd.args(["-c", &self.command]);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| BgjobError::Pty(e.to_string()))?;
        drop(pair.slave);

        let master = pair.master;
        let mut master_reader = master
            .try_clone_reader()
            .map_err(|e| BgjobError::Pty(e.to_string()))?;
        let mut master_writer = master
            .take_writer()
            .map_err(|e| BgjobError::Pty(e.to_string()))?;
        let master_fd = master
            .as_raw_fd()
            .ok_or_else(|| BgjobError::Pty("pty master exposes no fd".into()))?;

        info!(command = %self.command, child_pid = ?child.process_id(), "supervising");

        let mut buf = [0u8; READ_BUF];
        let outcome = loop {
            // The sink is the only place output goes; without it the loop
            // would buffer unboundedly, so its death is fatal for this run.
            match sink.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    break Err(BgjobError::Encrypt(format!(
                        "encrypting sink exited mid-run ({status})"
                    )));
                }
                Err(e) => break Err(e.into()),
            }

            // SAFETY: master_fd belongs to `master`, which outlives the loop.
            let master_bfd = unsafe { BorrowedFd::borrow_raw(master_fd) };
            let mut fds = [
                PollFd::new(master_bfd, PollFlags::POLLIN),
                PollFd::new(fifo.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(errno) => break Err(errno.into()),
            }
            let master_ready = fds[0]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP));
            let fifo_ready = fds[1]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN));

            if master_ready {
                match master_reader.read(&mut buf) {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        sink_in.write_all(&buf[..n])?;
                        sink_in.flush()?;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    // Linux reports EIO on the master once the child is gone.
                    Err(e) => {
                        debug!(err = %e, "pty master closed");
                        break Ok(());
                    }
                }
            }

            if fifo_ready {
                match fifo.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        // Forward verbatim; the child sees it as typed input.
                        master_writer.write_all(&buf[..n])?;
                        master_writer.flush()?;
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => warn!(err = %e, "control channel read failed"),
                }
            }

            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    debug!(%status, "child exited");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            }
        };

        if outcome.is_ok() {
            drain_master(master_fd, &mut master_reader, &mut sink_in);
        }
        drop(sink_in);
        let _ = sink.wait();
        let _ = child.try_wait();

        match &outcome {
            Ok(()) => info!("supervisor finished"),
            Err(err) => warn!(%err, "supervisor aborted"),
        }
        outcome
    }
}

/// Forward whatever the pty still buffers after the child exits. Bounded:
/// the child is gone, so the kernel buffer is finite.
fn drain_master(master_fd: RawFd, reader: &mut Box<dyn Read + Send>, sink_in: &mut impl Write) {
    let mut buf = [0u8; READ_BUF];
    loop {
        // SAFETY: caller guarantees master_fd is still open.
        let bfd = unsafe { BorrowedFd::borrow_raw(master_fd) };
        let mut fds = [PollFd::new(bfd, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(n) if n > 0 => {}
            _ => return,
        }
        if !fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
            return;
        }
        match reader.read(&mut buf) {
            Ok(n) if n > 0 => {
                if sink_in.write_all(&buf[..n]).is_err() {
                    return;
                }
            }
            _ => return,
        }
    }
}

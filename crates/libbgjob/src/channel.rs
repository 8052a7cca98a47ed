use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::debug;

use crate::error::BgjobError;

/// Create the named pipe for a job's control channel if it does not exist.
pub fn ensure_fifo(path: &Path) -> Result<(), BgjobError> {
    if !path.exists() {
        mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)?;
    }
    Ok(())
}

/// Write one message into a job's control channel.
///
/// The open is write-only and non-blocking, so a channel with no attached
/// supervisor fails immediately with `ENXIO`. That case is surfaced as
/// [`BgjobError::ChannelUnavailable`] rather than a generic I/O error; it is
/// what "job not accepting input" means. A recorded pipe path that no
/// longer exists is its own condition, [`BgjobError::ChannelMissing`]. A
/// newline is appended unless the caller suppresses it.
pub fn send_input(
    path: &Path,
    job_id: &str,
    text: &str,
    append_newline: bool,
) -> Result<(), BgjobError> {
    let mut fifo = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| match e.raw_os_error() {
            Some(libc::ENXIO) => BgjobError::ChannelUnavailable(job_id.to_string()),
            Some(libc::ENOENT) => BgjobError::ChannelMissing(job_id.to_string()),
            _ => BgjobError::Io(e),
        })?;

    fifo.write_all(text.as_bytes())?;
    if append_newline {
        fifo.write_all(b"\n")?;
    }
    debug!(id = %job_id, bytes = text.len(), "input sent");
    Ok(())
}

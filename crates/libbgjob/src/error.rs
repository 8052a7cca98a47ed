use thiserror::Error;

#[derive(Error, Debug)]
pub enum BgjobError {
    #[error("BGJOB_PASSPHRASE environment variable is not set")]
    MissingPassphrase,

    #[error("decryption failed (wrong passphrase or corrupted file): {0}")]
    Decrypt(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("no job found with id starting with '{0}'")]
    JobNotFound(String),

    #[error("ambiguous job id '{0}' matches: {1}")]
    AmbiguousJob(String, String),

    #[error("job {0} is not accepting input (no supervisor listening)")]
    ChannelUnavailable(String),

    #[error("input interface not found for job {0}")]
    ChannelMissing(String),

    #[error("supervisor exited during startup{0}; check that openssl is installed and the passphrase is valid")]
    SpawnFailed(String),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("state file is not a valid job table: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<nix::errno::Errno> for BgjobError {
    fn from(err: nix::errno::Errno) -> Self {
        BgjobError::Io(std::io::Error::from_raw_os_error(err as i32))
    }
}

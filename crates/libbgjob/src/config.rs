use std::path::{Path, PathBuf};

use crate::error::BgjobError;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const PASSPHRASE_ENV: &str = "BGJOB_PASSPHRASE";
pub const DATA_DIR_ENV: &str = "BGJOB_DATA_DIR";

const DEFAULT_DATA_DIR: &str = ".local/state/bgjob";

/// Explicit configuration for every store and supervisor operation.
///
/// The passphrase is read from the environment exactly once, here, and
/// threaded into constructors from then on. It is never written to disk.
#[derive(Debug, Clone)]
pub struct Config {
    pub passphrase: String,
    pub data_dir: PathBuf,
}

impl Config {
    /// Build a config from the process environment.
    ///
    /// Fails with [`BgjobError::MissingPassphrase`] before any file I/O if
    /// `BGJOB_PASSPHRASE` is unset or empty. Data dir priority:
    /// `$BGJOB_DATA_DIR`, then `~/.local/state/bgjob`.
    pub fn from_env() -> Result<Self, BgjobError> {
        let passphrase = match std::env::var(PASSPHRASE_ENV) {
            Ok(value) if !value.is_empty() => value,
            _ => return Err(BgjobError::MissingPassphrase),
        };

        let data_dir = if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                BgjobError::Io(std::io::Error::other("HOME env var not set"))
            })?;
            PathBuf::from(home).join(DEFAULT_DATA_DIR)
        };

        Ok(Self {
            passphrase,
            data_dir,
        })
    }

    pub fn new(passphrase: impl Into<String>, data_dir: impl Into<PathBuf>) -> Result<Self, BgjobError> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(BgjobError::MissingPassphrase);
        }
        Ok(Self {
            passphrase,
            data_dir: data_dir.into(),
        })
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json.enc")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join("state.lock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.data_dir.join("inputs")
    }

    pub fn log_path(&self, job_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{job_id}.log.enc"))
    }

    pub fn input_path(&self, job_id: &str) -> PathBuf {
        self.inputs_dir().join(format!("{job_id}.in"))
    }

    /// Create the data, log, and input directories with `0700` permissions.
    pub fn ensure_dirs(&self) -> Result<(), BgjobError> {
        for dir in [&self.data_dir, &self.logs_dir(), &self.inputs_dir()] {
            ensure_private_dir(dir)?;
        }
        Ok(())
    }
}

fn ensure_private_dir(path: &Path) -> Result<(), BgjobError> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    #[cfg(unix)]
    {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_passphrase_is_rejected() {
        let err = Config::new("", "/tmp/bgjob-test").expect_err("empty passphrase should fail");
        assert!(matches!(err, BgjobError::MissingPassphrase));
    }

    #[test]
    fn paths_derive_from_job_id() {
        let cfg = Config::new("secret", "/var/lib/bgjob").expect("config");
        assert_eq!(
            cfg.log_path("abcd1234"),
            PathBuf::from("/var/lib/bgjob/logs/abcd1234.log.enc")
        );
        assert_eq!(
            cfg.input_path("abcd1234"),
            PathBuf::from("/var/lib/bgjob/inputs/abcd1234.in")
        );
        assert_eq!(cfg.state_file(), PathBuf::from("/var/lib/bgjob/state.json.enc"));
    }

    #[cfg(unix)]
    #[test]
    fn ensure_dirs_sets_strict_permissions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::new("secret", dir.path().join("data")).expect("config");
        cfg.ensure_dirs().expect("create dirs");
        let mode = std::fs::metadata(cfg.logs_dir())
            .expect("metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o700);
    }
}

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use chrono::Local;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::cipher::CipherGateway;
use crate::config::Config;
use crate::error::BgjobError;
use crate::job::{JobStatus, StateDoc};

/// Lock-protected, encrypted store for the shared job table.
///
/// A single advisory lock file serializes access across arbitrarily many
/// concurrent invocations: shared for reads, exclusive for writes. The
/// guards are RAII, so every exit path releases the lock.
pub struct StateStore {
    state_file: PathBuf,
    lock_file: PathBuf,
    cipher: CipherGateway,
}

impl StateStore {
    pub fn new(config: &Config) -> Self {
        Self {
            state_file: config.state_file(),
            lock_file: config.lock_file(),
            cipher: CipherGateway::new(config.passphrase.clone()),
        }
    }

    /// Load the job table under a shared lock.
    ///
    /// An absent state file means no job was ever started and yields an
    /// empty table. A decryption or parse failure is a hard error, never
    /// silently treated as empty.
    pub fn load(&self) -> Result<StateDoc, BgjobError> {
        let _guard = self.lock(FlockArg::LockShared)?;
        self.load_locked()
    }

    /// Replace the job table under an exclusive lock.
    ///
    /// The lock is held for the full encrypt + write; the ciphertext lands
    /// in a temp file first and is renamed into place, so a partial write
    /// is never observable.
    pub fn save(&self, doc: &StateDoc) -> Result<(), BgjobError> {
        let _guard = self.lock(FlockArg::LockExclusive)?;
        self.save_locked(doc)
    }

    /// Read-modify-write the job table under one exclusive lock.
    ///
    /// Concurrent updaters are fully serialized, so independent keys written
    /// by two racing callers both survive.
    pub fn update<F>(&self, mutate: F) -> Result<StateDoc, BgjobError>
    where
        F: FnOnce(&mut StateDoc),
    {
        let _guard = self.lock(FlockArg::LockExclusive)?;
        let mut doc = self.load_locked()?;
        mutate(&mut doc);
        self.save_locked(&doc)?;
        Ok(doc)
    }

    /// Load the job table and lazily reconcile recorded liveness against
    /// observed pids, persisting only if something changed.
    pub fn load_reconciled(&self) -> Result<StateDoc, BgjobError> {
        let mut doc = self.load()?;
        if reconcile(&mut doc) {
            self.save(&doc)?;
        }
        Ok(doc)
    }

    fn lock(&self, arg: FlockArg) -> Result<Flock<File>, BgjobError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_file)?;
        Flock::lock(file, arg).map_err(|(_, errno)| errno.into())
    }

    fn load_locked(&self) -> Result<StateDoc, BgjobError> {
        if !self.state_file.exists() {
            return Ok(StateDoc::new());
        }
        let plaintext = self.cipher.decrypt(&self.state_file)?;
        let doc = serde_json::from_slice(&plaintext)?;
        Ok(doc)
    }

    fn save_locked(&self, doc: &StateDoc) -> Result<(), BgjobError> {
        let plaintext = serde_json::to_vec_pretty(doc)?;
        let tmp = self.state_file.with_extension("enc.tmp");
        self.cipher.encrypt(&plaintext, &tmp)?;
        std::fs::rename(&tmp, &self.state_file)?;
        debug!(jobs = doc.len(), "state saved");
        Ok(())
    }
}

/// Mark every `running` record whose pid no longer exists as `stopped`,
/// stamping `end_time`. Returns whether anything changed.
///
/// This is the only path by which a job whose supervisor died without an
/// explicit `stop` becomes visible as stopped; supervisors never push their
/// own exit back into the store.
pub fn reconcile(doc: &mut StateDoc) -> bool {
    let mut changed = false;
    for record in doc.values_mut() {
        if record.status == JobStatus::Running && !pid_alive(record.pid) {
            warn!(id = %record.id, pid = record.pid, "supervisor gone, marking stopped");
            record.status = JobStatus::Stopped;
            record.end_time = Some(Local::now());
            changed = true;
        }
    }
    changed
}

/// Signal-0 probe for process existence.
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

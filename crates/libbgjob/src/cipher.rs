use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::error::BgjobError;

/// Env var name the openssl child reads its passphrase from. Set on the
/// child's environment only, never required in our own.
const CHILD_PASS_ENV: &str = "BGJOB_CIPHER_PASS";

/// Subprocess-invoked symmetric cipher with password-based key derivation.
///
/// Both the state document and per-job logs go through the same
/// `openssl enc -aes-256-cbc -pbkdf2` invocation, so one passphrase
/// decrypts either artifact.
#[derive(Debug, Clone)]
pub struct CipherGateway {
    passphrase: String,
}

impl CipherGateway {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    fn command(&self, mode: &str) -> Command {
        let mut cmd = Command::new("openssl");
        cmd.args(["enc", mode, "-aes-256-cbc", "-pbkdf2", "-pass"])
            .arg(format!("env:{CHILD_PASS_ENV}"))
            .env(CHILD_PASS_ENV, &self.passphrase);
        cmd
    }

    /// Encrypt `plaintext` to `out_path` in one shot.
    pub fn encrypt(&self, plaintext: &[u8], out_path: &Path) -> Result<(), BgjobError> {
        let mut child = self
            .command("-e")
            .arg("-out")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BgjobError::Encrypt(format!("failed to spawn openssl: {e}")))?;

        // Scoped so stdin closes before wait().
        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| BgjobError::Encrypt("openssl stdin unavailable".into()))?;
            stdin.write_all(plaintext)?;
        }
        child.stdin.take();

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(BgjobError::Encrypt(stderr_excerpt(&output.stderr)));
        }
        debug!(path = %out_path.display(), bytes = plaintext.len(), "encrypted");
        Ok(())
    }

    /// Decrypt `in_path` and return the plaintext.
    ///
    /// A non-zero openssl exit (wrong passphrase, truncated ciphertext) is a
    /// hard [`BgjobError::Decrypt`]; partial stdout is never returned.
    pub fn decrypt(&self, in_path: &Path) -> Result<Vec<u8>, BgjobError> {
        let output = self
            .command("-d")
            .arg("-in")
            .arg(in_path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BgjobError::Decrypt(format!("failed to spawn openssl: {e}")))?;

        if !output.status.success() {
            return Err(BgjobError::Decrypt(stderr_excerpt(&output.stderr)));
        }
        Ok(output.stdout)
    }

    /// Spawn a long-lived encrypting sink writing to `out_path`.
    ///
    /// The caller streams captured bytes into the child's stdin; closing
    /// stdin finalizes the cipher stream.
    pub fn spawn_sink(&self, out_path: &Path) -> Result<Child, BgjobError> {
        let child = self
            .command("-e")
            .arg("-out")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BgjobError::Encrypt(format!("failed to spawn openssl sink: {e}")))?;
        Ok(child)
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        "openssl exited with an error".to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
pub(crate) fn openssl_available() -> bool {
    Command::new("openssl")
        .arg("version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The remote-execution transport: file upload and command execution over
//! SSH, plus first-contact trust bootstrap.
//!
//! Remote work goes through the [`Session`] trait so the configuration
//! fan-out can be exercised in tests without a network; the production
//! implementation shells out to `ssh`/`scp` with the admin identity.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use slog::{Logger, debug};
use tokio::process::Command;

use crate::line_file::{LineFile, LineFileError};

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("failed to run {program}")]
    Spawn {
        program: &'static str,
        #[source]
        err: std::io::Error,
    },

    #[error("{program} to {target} exited with {status}: {stderr}")]
    CommandFailed {
        program: &'static str,
        target: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("failed to stage file for upload")]
    Stage(#[source] std::io::Error),

    #[error(transparent)]
    KnownHosts(#[from] LineFileError),
}

/// One authenticated remote session: upload file contents to a path,
/// execute a command and observe its exit status.
#[async_trait]
pub trait Session: Send + Sync {
    async fn upload(
        &self,
        contents: &str,
        remote_path: &str,
    ) -> Result<(), SshError>;

    async fn exec(&self, command: &str) -> Result<(), SshError>;
}

/// SSH/SCP subprocess session against one host.
pub struct SshSession {
    username: String,
    hostname: String,
    private_key: Utf8PathBuf,
    known_hosts: Utf8PathBuf,
    log: Logger,
}

impl SshSession {
    pub fn new(
        username: &str,
        hostname: &str,
        private_key: &Utf8Path,
        known_hosts: &Utf8Path,
        log: &Logger,
    ) -> SshSession {
        SshSession {
            username: username.to_string(),
            hostname: hostname.to_string(),
            private_key: private_key.to_owned(),
            known_hosts: known_hosts.to_owned(),
            log: log.new(slog::o!("host" => hostname.to_string())),
        }
    }

    fn target(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }

    /// Options shared by every `ssh`/`scp` invocation.  First contact
    /// accepts the host's offered identity and records it in the
    /// operator's known-hosts file; later contacts verify against it.
    fn ssh_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.private_key.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("UserKnownHostsFile={}", self.known_hosts),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ]
    }

    async fn run(
        &self,
        program: &'static str,
        command: &mut Command,
    ) -> Result<(), SshError> {
        let output = command
            .output()
            .await
            .map_err(|err| SshError::Spawn { program, err })?;
        if !output.status.success() {
            return Err(SshError::CommandFailed {
                program,
                target: self.target(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Makes first contact with the host, accepting its offered identity,
    /// and returns exactly the known-hosts lines that contact appended so
    /// they can be recorded (and later removed) verbatim.
    pub async fn bootstrap_trust(&self) -> Result<Vec<String>, SshError> {
        let known_hosts = LineFile::new(self.known_hosts.clone());
        let before = known_hosts.read_lines()?.len();
        self.exec("true").await?;
        let after = known_hosts.read_lines()?;
        Ok(after.get(before..).unwrap_or(&[]).to_vec())
    }
}

#[async_trait]
impl Session for SshSession {
    async fn upload(
        &self,
        contents: &str,
        remote_path: &str,
    ) -> Result<(), SshError> {
        debug!(self.log, "uploading file"; "remote_path" => remote_path);
        let staged =
            camino_tempfile::NamedUtf8TempFile::new().map_err(SshError::Stage)?;
        std::fs::write(staged.path(), contents).map_err(SshError::Stage)?;

        let mut command = Command::new("scp");
        command
            .args(self.ssh_options())
            .arg("-q")
            .arg(staged.path().as_str())
            .arg(format!("{}:{}", self.target(), remote_path));
        self.run("scp", &mut command).await
    }

    async fn exec(&self, remote_command: &str) -> Result<(), SshError> {
        debug!(self.log, "running remote command"; "command" => remote_command);
        let mut command = Command::new("ssh");
        command
            .args(self.ssh_options())
            .arg(self.target())
            .arg(remote_command);
        self.run("ssh", &mut command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_options_pin_identity_and_known_hosts() {
        let log = Logger::root(slog::Discard, slog::o!());
        let session = SshSession::new(
            "admin",
            "c-0",
            Utf8Path::new("/home/admin/.ssh/id_rsa"),
            Utf8Path::new("/home/admin/.ssh/known_hosts"),
            &log,
        );
        let options = session.ssh_options();
        assert!(options.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(options.contains(&"/home/admin/.ssh/id_rsa".to_string()));
        assert!(options
            .contains(&"UserKnownHostsFile=/home/admin/.ssh/known_hosts".to_string()));
        assert_eq!(session.target(), "admin@c-0");
    }
}

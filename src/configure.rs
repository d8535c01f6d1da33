// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The parallel configuration fan-out: one task per host, five strictly
//! ordered steps per task, failures isolated to the host they happened on.

use slog::{Logger, error, info};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::plan::HostBundle;
use crate::ssh::{Session, SshError};

/// The configuration steps, in the order they run on every host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    SshFiles,
    HostsFile,
    SystemPackages,
    UserPackages,
    ConfigFiles,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::SshFiles => "updating ~/.ssh",
            Step::HostsFile => "updating /etc/hosts",
            Step::SystemPackages => "installing system packages",
            Step::UserPackages => "installing user packages",
            Step::ConfigFiles => "uploading config files",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{step} failed")]
pub struct ConfigureError {
    pub step: Step,
    #[source]
    pub err: SshError,
}

/// Content identical for every host in the cluster, uploaded by the first
/// two configuration steps.
#[derive(Debug)]
pub struct SharedFiles {
    pub public_key: String,
    pub private_key: String,
    /// Cluster-wide known-hosts snapshot, so every host trusts every other.
    pub known_hosts: String,
    /// Rendered hosts file mapping every cluster hostname to its address.
    pub hosts_file: String,
}

/// Configures a single host over one session.  The five steps run strictly
/// in order; the first failure aborts this host (and only this host).
pub async fn configure_host<S: Session>(
    session: &S,
    hostname: &str,
    bundle: &HostBundle,
    shared: &SharedFiles,
    log: &Logger,
) -> Result<(), ConfigureError> {
    info!(log, "configuration started"; "host" => hostname);
    let step = |step: Step| move |err: SshError| ConfigureError { step, err };

    let start = Instant::now();
    session
        .upload(&shared.public_key, "./.ssh/id_rsa.pub")
        .await
        .map_err(step(Step::SshFiles))?;
    session
        .upload(&shared.private_key, "./.ssh/id_rsa")
        .await
        .map_err(step(Step::SshFiles))?;
    session
        .upload(&shared.known_hosts, "./.ssh/known_hosts")
        .await
        .map_err(step(Step::SshFiles))?;
    info!(
        log, "updated ~/.ssh";
        "host" => hostname, "elapsed" => ?start.elapsed(),
    );

    let start = Instant::now();
    session
        .upload(&shared.hosts_file, "hosts")
        .await
        .map_err(step(Step::HostsFile))?;
    session
        .exec("sudo mv hosts /etc/hosts")
        .await
        .map_err(step(Step::HostsFile))?;
    info!(
        log, "updated /etc/hosts";
        "host" => hostname, "elapsed" => ?start.elapsed(),
    );

    let start = Instant::now();
    session
        .upload(bundle.role.system_packages_script(), "system_packages_conf")
        .await
        .map_err(step(Step::SystemPackages))?;
    session
        .exec("chmod +x ./system_packages_conf")
        .await
        .map_err(step(Step::SystemPackages))?;
    session
        .exec("sudo ./system_packages_conf")
        .await
        .map_err(step(Step::SystemPackages))?;
    info!(
        log, "installed system packages";
        "host" => hostname, "elapsed" => ?start.elapsed(),
    );

    let start = Instant::now();
    let install_script =
        bundle.role.user_packages_script(&bundle.install_params());
    session
        .upload(&install_script, "user_packages_conf")
        .await
        .map_err(step(Step::UserPackages))?;
    session
        .exec("chmod +x ./user_packages_conf")
        .await
        .map_err(step(Step::UserPackages))?;
    session
        .exec("./user_packages_conf")
        .await
        .map_err(step(Step::UserPackages))?;
    info!(
        log, "installed user packages";
        "host" => hostname, "elapsed" => ?start.elapsed(),
    );

    let start = Instant::now();
    for (path, contents) in &bundle.files {
        session
            .upload(contents, path.as_str())
            .await
            .map_err(step(Step::ConfigFiles))?;
    }
    info!(
        log, "uploaded config files";
        "host" => hostname,
        "files" => bundle.files.len(),
        "elapsed" => ?start.elapsed(),
    );

    info!(log, "configuration completed"; "host" => hostname);
    Ok(())
}

/// Configures every host concurrently, one task per host.  All tasks are
/// joined before returning; the per-host outcome map is the combined
/// report.
pub async fn configure_all<S, F>(
    addresses: &BTreeMap<String, IpAddr>,
    bundles: &BTreeMap<String, HostBundle>,
    shared: Arc<SharedFiles>,
    make_session: F,
    log: &Logger,
) -> BTreeMap<String, Result<(), ConfigureError>>
where
    S: Session + 'static,
    F: Fn(&str, IpAddr) -> S,
{
    let mut tasks = JoinSet::new();
    for (hostname, ip) in addresses {
        let Some(bundle) = bundles.get(hostname) else {
            continue;
        };
        let session = make_session(hostname, *ip);
        let hostname = hostname.clone();
        let bundle = bundle.clone();
        let shared = Arc::clone(&shared);
        let task_log = log.clone();
        tasks.spawn(async move {
            let result = configure_host(
                &session,
                &hostname,
                &bundle,
                &shared,
                &task_log,
            )
            .await;
            (hostname, result)
        });
    }

    let mut outcomes = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((hostname, result)) => {
                match &result {
                    Ok(()) => {
                        info!(
                            log, "configure completed";
                            "host" => hostname.as_str(),
                        );
                    }
                    Err(err) => {
                        error!(
                            log, "configure failed";
                            "host" => hostname.as_str(),
                            "error" => %err,
                        );
                    }
                }
                outcomes.insert(hostname, result);
            }
            Err(join_error) => {
                error!(log, "configure task panicked"; "error" => %join_error);
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Role;
    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use std::sync::Mutex;

    /// Session double: records operations in order and fails any exec whose
    /// command contains the configured needle.
    struct FakeSession {
        operations: Arc<Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn upload(
            &self,
            _contents: &str,
            remote_path: &str,
        ) -> Result<(), SshError> {
            self.operations
                .lock()
                .unwrap()
                .push(format!("upload {remote_path}"));
            Ok(())
        }

        async fn exec(&self, command: &str) -> Result<(), SshError> {
            self.operations
                .lock()
                .unwrap()
                .push(format!("exec {command}"));
            if let Some(needle) = self.fail_on {
                if command.contains(needle) {
                    return Err(SshError::Spawn {
                        program: "ssh",
                        err: std::io::Error::other("scripted failure"),
                    });
                }
            }
            Ok(())
        }
    }

    fn test_bundle() -> HostBundle {
        HostBundle {
            role: Role::Zookeeper,
            install_path: Utf8PathBuf::from("/home/admin/opt/zookeeper"),
            repository: "http://mirror.example.com/zookeeper/".to_string(),
            version: "3.4.6".to_string(),
            files: BTreeMap::from([(
                Utf8PathBuf::from("/home/admin/opt/zookeeper/conf/zoo.cfg"),
                "tickTime=2000".to_string(),
            )]),
        }
    }

    fn test_shared() -> Arc<SharedFiles> {
        Arc::new(SharedFiles {
            public_key: "PUB".to_string(),
            private_key: "PRIV".to_string(),
            known_hosts: "HASHES".to_string(),
            hosts_file: "127.0.0.1 localhost".to_string(),
        })
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let operations = Arc::new(Mutex::new(Vec::new()));
        let session = FakeSession {
            operations: Arc::clone(&operations),
            fail_on: None,
        };
        configure_host(
            &session,
            "c-0",
            &test_bundle(),
            &test_shared(),
            &test_logger(),
        )
        .await
        .unwrap();

        let operations = operations.lock().unwrap();
        assert_eq!(
            *operations,
            vec![
                "upload ./.ssh/id_rsa.pub",
                "upload ./.ssh/id_rsa",
                "upload ./.ssh/known_hosts",
                "upload hosts",
                "exec sudo mv hosts /etc/hosts",
                "upload system_packages_conf",
                "exec chmod +x ./system_packages_conf",
                "exec sudo ./system_packages_conf",
                "upload user_packages_conf",
                "exec chmod +x ./user_packages_conf",
                "exec ./user_packages_conf",
                "upload /home/admin/opt/zookeeper/conf/zoo.cfg",
            ]
        );
    }

    #[tokio::test]
    async fn failure_is_isolated_to_one_host() {
        let addresses: BTreeMap<String, IpAddr> = BTreeMap::from([
            ("c-0".to_string(), "203.0.113.1".parse().unwrap()),
            ("c-1".to_string(), "203.0.113.2".parse().unwrap()),
            ("c-2".to_string(), "203.0.113.3".parse().unwrap()),
        ]);
        let bundles: BTreeMap<String, HostBundle> = addresses
            .keys()
            .map(|name| (name.clone(), test_bundle()))
            .collect();

        // Host c-1's package installation fails; its siblings are
        // unaffected.
        let outcomes = configure_all(
            &addresses,
            &bundles,
            test_shared(),
            |hostname, _ip| FakeSession {
                operations: Arc::new(Mutex::new(Vec::new())),
                fail_on: (hostname == "c-1")
                    .then_some("./user_packages_conf"),
            },
            &test_logger(),
        )
        .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes["c-0"].is_ok());
        assert!(outcomes["c-2"].is_ok());
        let err = outcomes["c-1"].as_ref().unwrap_err();
        assert_eq!(err.step, Step::UserPackages);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `destroy` flow: undo everything a cluster descriptor records.
//!
//! Local trust and name-resolution entries are removed before the droplets
//! are deleted, so a failure partway through droplet deletion never leaves
//! the local machine pointing at resources that are about to disappear.
//! The local steps are idempotent: re-running against an already-cleaned
//! machine is a no-op.

use camino::Utf8Path;
use slog::{Logger, info};
use std::collections::BTreeSet;

use crate::cloud::{CloudApi, CloudError};
use crate::config::UserConfig;
use crate::descriptor::ClusterDescriptor;
use crate::line_file::{self, LineFile, LineFileError};

pub async fn run(
    descriptor_path: &Utf8Path,
    config: &UserConfig,
    cloud: &dyn CloudApi,
    log: &Logger,
) -> anyhow::Result<()> {
    let descriptor = ClusterDescriptor::load(descriptor_path)?;

    remove_local_state(
        &descriptor,
        &LineFile::new(config.known_hosts_path.clone()),
        &LineFile::new(config.hosts_file.clone()),
        log,
    )?;
    delete_droplets(cloud, &descriptor, log).await?;

    info!(log, "removing cluster descriptor"; "path" => %descriptor.path());
    descriptor.remove()?;
    Ok(())
}

/// Removes the recorded trust lines from the operator's known-hosts file
/// and the recorded `ip hostname` entries from the local hosts file.
pub fn remove_local_state(
    descriptor: &ClusterDescriptor,
    known_hosts: &LineFile,
    hosts_file: &LineFile,
    log: &Logger,
) -> Result<(), LineFileError> {
    let trust: BTreeSet<String> = descriptor
        .trust_lines()
        .into_iter()
        .map(|line| line.trim().to_string())
        .collect();
    known_hosts.remove_lines(&trust)?;
    info!(
        log, "removed trust records";
        "path" => %known_hosts.path(),
        "lines" => trust.len(),
    );

    let entries: BTreeSet<String> =
        line_file::host_entries(&descriptor.addresses()).into_iter().collect();
    hosts_file.remove_lines(&entries)?;
    info!(
        log, "removed hosts entries";
        "path" => %hosts_file.path(),
        "lines" => entries.len(),
    );
    Ok(())
}

/// Deletes every live droplet whose id the descriptor records.  Matching
/// is by exact id against the live droplet list, never by name, so a name
/// reused by someone else is untouchable; a recorded droplet that is
/// already gone is skipped.
async fn delete_droplets(
    cloud: &dyn CloudApi,
    descriptor: &ClusterDescriptor,
    log: &Logger,
) -> Result<(), CloudError> {
    let recorded = descriptor.droplet_ids();
    let live = cloud.list_droplets().await?;
    for droplet in live {
        if recorded.contains(&droplet.id) {
            cloud.delete_droplet(droplet.id).await?;
            info!(
                log, "deleted droplet";
                "id" => droplet.id,
                "name" => droplet.name.as_str(),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::fakes::FakeCloud;
    use camino_tempfile::Utf8TempDir;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn test_descriptor(dir: &Utf8TempDir) -> ClusterDescriptor {
        let mut descriptor = ClusterDescriptor::create(
            &dir.path().join("c.json"),
            &["c-0".to_string(), "c-1".to_string()],
        )
        .unwrap();
        descriptor.record_id("c-0", 1).unwrap();
        descriptor
            .record_address("c-0", "203.0.113.1".parse().unwrap())
            .unwrap();
        descriptor
            .record_trust("c-0", vec!["c-0 ssh-rsa KEY0".to_string()])
            .unwrap();
        descriptor.record_id("c-1", 3).unwrap();
        descriptor
            .record_address("c-1", "203.0.113.3".parse().unwrap())
            .unwrap();
        descriptor
            .record_trust("c-1", vec!["c-1 ssh-rsa KEY1".to_string()])
            .unwrap();
        descriptor
    }

    #[test]
    fn local_cleanup_removes_exactly_the_recorded_lines() {
        let dir = Utf8TempDir::new().unwrap();
        let descriptor = test_descriptor(&dir);

        let known_hosts = LineFile::new(dir.path().join("known_hosts"));
        known_hosts
            .append_lines(&[
                "unrelated ssh-rsa OTHER".to_string(),
                "c-0 ssh-rsa KEY0".to_string(),
                "c-1 ssh-rsa KEY1".to_string(),
            ])
            .unwrap();
        let hosts_file = LineFile::new(dir.path().join("hosts"));
        hosts_file
            .append_lines(&[
                "127.0.0.1 localhost".to_string(),
                "203.0.113.1 c-0".to_string(),
                "203.0.113.3 c-1".to_string(),
            ])
            .unwrap();

        remove_local_state(&descriptor, &known_hosts, &hosts_file, &test_logger())
            .unwrap();
        assert_eq!(
            known_hosts.read_lines().unwrap(),
            vec!["unrelated ssh-rsa OTHER"]
        );
        assert_eq!(
            hosts_file.read_lines().unwrap(),
            vec!["127.0.0.1 localhost"]
        );

        // Running teardown again over already-clean files is a no-op.
        remove_local_state(&descriptor, &known_hosts, &hosts_file, &test_logger())
            .unwrap();
        assert_eq!(
            known_hosts.read_lines().unwrap(),
            vec!["unrelated ssh-rsa OTHER"]
        );
    }

    #[tokio::test]
    async fn droplets_are_deleted_by_id_only() {
        let dir = Utf8TempDir::new().unwrap();
        let mut descriptor = test_descriptor(&dir);
        // A recorded droplet that no longer exists must be skipped, not
        // treated as an error.
        descriptor.record_id("c-2", 99).unwrap();

        // Live droplets 1, 2 and 3; the descriptor records 1, 3 and 99.
        let cloud = FakeCloud::with_existing(&["c-0", "someone-else", "c-1"]);
        delete_droplets(&cloud, &descriptor, &test_logger()).await.unwrap();

        assert_eq!(*cloud.deleted.lock().unwrap(), vec![1, 3]);
    }
}

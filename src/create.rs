// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `create` flow: plan, validate, create droplets, wait for them,
//! record everything, then configure every host in parallel.

use anyhow::bail;
use camino::{Utf8Path, Utf8PathBuf};
use slog::{Logger, info, warn};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::cloud::CloudApi;
use crate::cluster::{self, Role};
use crate::config::UserConfig;
use crate::configure::{self, SharedFiles};
use crate::descriptor::ClusterDescriptor;
use crate::lifecycle;
use crate::line_file::{self, LineFile};
use crate::plan;
use crate::ssh::SshSession;

pub async fn run(
    cluster_name: &str,
    topology_path: &Utf8Path,
    config: &UserConfig,
    cloud: &dyn CloudApi,
    log: &Logger,
) -> anyhow::Result<()> {
    let groups = cluster::load_topology(topology_path)?;
    let plan = plan::plan(cluster_name, &groups, config)?;
    let hostnames = plan.hostnames();
    info!(
        log, "planned cluster";
        "cluster" => cluster_name,
        "hosts" => hostnames.len(),
    );

    let peers = plan.count_role(Role::Zookeeper);
    if peers > 0 && peers % 2 == 0 {
        warn!(
            log,
            "zookeeper ensemble has an even number of members; \
             an odd ensemble tolerates the same failures with one fewer host";
            "count" => peers,
        );
    }

    // Nothing below this call runs unless the whole plan fits the account.
    lifecycle::validate(cloud, &config.region, &hostnames).await?;

    let descriptor_path = Utf8PathBuf::from(format!("{}.json", cluster_name));
    let mut descriptor =
        ClusterDescriptor::create(&descriptor_path, &hostnames)?;
    info!(log, "cluster descriptor stored"; "path" => %descriptor.path());

    let ids = lifecycle::create_all(
        cloud,
        &plan.droplets,
        &config.public_key,
        &mut descriptor,
        log,
    )
    .await?;
    let addresses = lifecycle::await_active(
        cloud,
        &ids,
        config.status_poll_interval,
        config.status_poll_timeout,
        log,
    )
    .await?;
    for (hostname, ip) in &addresses {
        descriptor.record_address(hostname, *ip)?;
    }

    // Make every cluster hostname resolvable locally before anything
    // connects by name.
    let entries = line_file::host_entries(&addresses);
    LineFile::new(config.hosts_file.clone()).append_lines(&entries)?;
    info!(
        log, "updated local hosts file";
        "path" => %config.hosts_file,
        "entries" => entries.len(),
    );

    // First contact per host, recording the learned trust lines one host
    // at a time so a crash leaves an exact record of what to undo.
    let mut failures: BTreeMap<String, String> = BTreeMap::new();
    for hostname in &hostnames {
        let session = SshSession::new(
            &config.username,
            hostname,
            &config.private_key_path,
            &config.known_hosts_path,
            log,
        );
        match session.bootstrap_trust().await {
            Ok(lines) => {
                descriptor.record_trust(hostname, lines)?;
                info!(log, "trust bootstrapped"; "host" => hostname.as_str());
            }
            Err(err) => {
                warn!(
                    log, "trust bootstrap failed";
                    "host" => hostname.as_str(),
                    "error" => %err,
                );
                failures.insert(
                    hostname.clone(),
                    format!("{:#}", anyhow::Error::new(err)),
                );
            }
        }
    }

    let shared = Arc::new(SharedFiles {
        public_key: config.public_key.clone(),
        private_key: config.private_key.clone(),
        known_hosts: descriptor.trust_lines().join("\n"),
        hosts_file: line_file::render_remote_hosts_file(&addresses),
    });

    // Hosts that never got trust bootstrapped cannot be configured; the
    // rest proceed in parallel.
    let configurable: BTreeMap<String, IpAddr> = addresses
        .iter()
        .filter(|(hostname, _)| !failures.contains_key(*hostname))
        .map(|(hostname, ip)| (hostname.clone(), *ip))
        .collect();
    let outcomes = configure::configure_all(
        &configurable,
        &plan.bundles,
        shared,
        |hostname, _ip| {
            SshSession::new(
                &config.username,
                hostname,
                &config.private_key_path,
                &config.known_hosts_path,
                log,
            )
        },
        log,
    )
    .await;
    for (hostname, outcome) in outcomes {
        if let Err(err) = outcome {
            failures
                .insert(hostname, format!("{:#}", anyhow::Error::new(err)));
        }
    }

    if !failures.is_empty() {
        for (hostname, reason) in &failures {
            warn!(
                log, "host failed";
                "host" => hostname.as_str(),
                "reason" => reason.as_str(),
            );
        }
        bail!(
            "{} of {} hosts failed configuration ({}); \
             the cluster descriptor at {} reflects what succeeded",
            failures.len(),
            hostnames.len(),
            failures.keys().cloned().collect::<Vec<_>>().join(", "),
            descriptor.path(),
        );
    }

    info!(
        log, "cluster ready";
        "cluster" => cluster_name,
        "hosts" => hostnames.len(),
    );
    Ok(())
}

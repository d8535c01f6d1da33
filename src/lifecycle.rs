// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Droplet lifecycle: validation before anything is created, bulk
//! creation, and the poll loop that waits for every droplet to come up.

use slog::{Logger, info};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use crate::cloud::{CloudApi, CloudError, CreateDroplet, Droplet};
use crate::descriptor::{ClusterDescriptor, DescriptorError};
use crate::plan::DropletRequest;
use crate::poll::{self, CondCheckError, wait_for_condition};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("region {0:?} is not available to this account")]
    UnknownRegion(String),

    #[error(
        "cannot create {requested} droplets: account limit is {limit} \
         and {existing} droplets already exist"
    )]
    Capacity { limit: usize, existing: usize, requested: usize },

    #[error("droplet name {0:?} is already in use")]
    NameConflict(String),

    #[error("droplets were not all active after {0:?}")]
    ActivateTimeout(Duration),

    #[error("droplet {0:?} has no public IPv4 address")]
    NoPublicAddress(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Checks that the whole plan can go through before creating anything:
/// the region exists, the account has room for every droplet, and no
/// planned name collides with an existing droplet.
pub async fn validate(
    cloud: &dyn CloudApi,
    region: &str,
    names: &[String],
) -> Result<(), LifecycleError> {
    let regions = cloud.regions().await?;
    if !regions.iter().any(|slug| slug == region) {
        return Err(LifecycleError::UnknownRegion(region.to_string()));
    }

    let limit = cloud.droplet_limit().await?;
    let existing = cloud.list_droplets().await?;
    if limit.saturating_sub(existing.len()) < names.len() {
        return Err(LifecycleError::Capacity {
            limit,
            existing: existing.len(),
            requested: names.len(),
        });
    }

    let existing_names: BTreeSet<&str> =
        existing.iter().map(|droplet| droplet.name.as_str()).collect();
    for name in names {
        if existing_names.contains(name.as_str()) {
            return Err(LifecycleError::NameConflict(name.clone()));
        }
    }
    Ok(())
}

/// Creates every planned droplet, in plan order, recording each id into
/// the descriptor as soon as the creation call returns.
pub async fn create_all(
    cloud: &dyn CloudApi,
    requests: &[DropletRequest],
    public_key: &str,
    descriptor: &mut ClusterDescriptor,
    log: &Logger,
) -> Result<BTreeMap<String, u64>, LifecycleError> {
    let ssh_keys = vec![public_key.to_string()];
    let mut ids = BTreeMap::new();
    for request in requests {
        let droplet = cloud
            .create_droplet(&CreateDroplet {
                name: &request.name,
                region: &request.region,
                size: request.size.slug(),
                image: &request.image,
                ssh_keys: &ssh_keys,
                private_networking: true,
                user_data: &request.user_data,
            })
            .await?;
        info!(
            log, "created droplet";
            "host" => request.name.as_str(),
            "id" => droplet.id,
            "size" => request.size.slug(),
        );
        descriptor.record_id(&request.name, droplet.id)?;
        ids.insert(request.name.clone(), droplet.id);
    }
    Ok(ids)
}

/// Polls until every created droplet reports `active` with a public
/// address, then resolves hostname to address.
pub async fn await_active(
    cloud: &dyn CloudApi,
    ids: &BTreeMap<String, u64>,
    poll_interval: Duration,
    poll_timeout: Duration,
    log: &Logger,
) -> Result<BTreeMap<String, IpAddr>, LifecycleError> {
    info!(
        log, "waiting for droplets to become active";
        "count" => ids.len(),
    );
    let wanted: BTreeMap<u64, &str> =
        ids.iter().map(|(name, id)| (*id, name.as_str())).collect();

    let droplets = wait_for_condition(
        || async {
            let droplets = cloud.list_droplets().await?;
            let ready = |id: &u64| {
                droplets.iter().any(|droplet| {
                    droplet.id == *id
                        && droplet.is_active()
                        && droplet.public_ip().is_some()
                })
            };
            if wanted.keys().all(ready) {
                Ok(droplets)
            } else {
                Err(CondCheckError::NotYet)
            }
        },
        &poll_interval,
        &poll_timeout,
    )
    .await
    .map_err(|err| match err {
        poll::Error::TimedOut(elapsed) => {
            LifecycleError::ActivateTimeout(elapsed)
        }
        poll::Error::PermanentError(err) => LifecycleError::Cloud(err),
    })?;

    let by_id: BTreeMap<u64, &Droplet> =
        droplets.iter().map(|droplet| (droplet.id, droplet)).collect();
    let mut addresses = BTreeMap::new();
    for (name, id) in ids {
        let ip = by_id
            .get(id)
            .and_then(|droplet| droplet.public_ip())
            .ok_or_else(|| LifecycleError::NoPublicAddress(name.clone()))?;
        addresses.insert(name.clone(), ip);
    }
    Ok(addresses)
}

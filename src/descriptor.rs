// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The durable cluster descriptor: everything `create` has done so far,
//! and everything `destroy` needs to undo it.
//!
//! The descriptor is a single JSON document per cluster, rewritten in full
//! after every mutation so the on-disk file is always a complete snapshot.
//! A crash mid-provisioning leaves a file naming every host with whatever
//! is known about it: a host with no `id` was never created, a host with an
//! `id` but no `ssh_hashes` was created but not yet trusted.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error(
        "cluster descriptor {0} already exists \
         (another run in progress, or a leftover cluster to destroy first?)"
    )]
    AlreadyExists(Utf8PathBuf),

    #[error("failed to read cluster descriptor {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to write cluster descriptor {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to parse cluster descriptor {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: serde_json::Error,
    },
}

/// Durable record for one host.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq,
)]
pub struct HostRecord {
    /// Droplet id, recorded as soon as the creation call returns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Public address, recorded once the droplet is observed active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,

    /// known-hosts lines learned when trust was bootstrapped for this
    /// host; removed again verbatim on teardown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_hashes: Vec<String>,
}

/// The cluster descriptor and its backing file.
#[derive(Debug)]
pub struct ClusterDescriptor {
    path: Utf8PathBuf,
    pub hosts: BTreeMap<String, HostRecord>,
}

impl ClusterDescriptor {
    /// Starts a new descriptor listing every planned hostname, and writes
    /// it out.  Refuses to clobber an existing descriptor: one run owns
    /// the file at a time.
    pub fn create(
        path: &Utf8Path,
        hostnames: &[String],
    ) -> Result<ClusterDescriptor, DescriptorError> {
        if path.exists() {
            return Err(DescriptorError::AlreadyExists(path.to_owned()));
        }
        let descriptor = ClusterDescriptor {
            path: path.to_owned(),
            hosts: hostnames
                .iter()
                .map(|name| (name.clone(), HostRecord::default()))
                .collect(),
        };
        descriptor.save()?;
        Ok(descriptor)
    }

    pub fn load(path: &Utf8Path) -> Result<ClusterDescriptor, DescriptorError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            DescriptorError::Read { path: path.to_owned(), err }
        })?;
        let hosts = serde_json::from_str(&contents).map_err(|err| {
            DescriptorError::Parse { path: path.to_owned(), err }
        })?;
        Ok(ClusterDescriptor { path: path.to_owned(), hosts })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn record_id(
        &mut self,
        hostname: &str,
        id: u64,
    ) -> Result<(), DescriptorError> {
        self.hosts.entry(hostname.to_string()).or_default().id = Some(id);
        self.save()
    }

    pub fn record_address(
        &mut self,
        hostname: &str,
        ip: IpAddr,
    ) -> Result<(), DescriptorError> {
        self.hosts.entry(hostname.to_string()).or_default().ip = Some(ip);
        self.save()
    }

    pub fn record_trust(
        &mut self,
        hostname: &str,
        lines: Vec<String>,
    ) -> Result<(), DescriptorError> {
        self.hosts
            .entry(hostname.to_string())
            .or_default()
            .ssh_hashes
            .extend(lines);
        self.save()
    }

    /// All recorded droplet ids.
    pub fn droplet_ids(&self) -> BTreeSet<u64> {
        self.hosts.values().filter_map(|record| record.id).collect()
    }

    /// All hosts with a recorded address.
    pub fn addresses(&self) -> BTreeMap<String, IpAddr> {
        self.hosts
            .iter()
            .filter_map(|(name, record)| {
                record.ip.map(|ip| (name.clone(), ip))
            })
            .collect()
    }

    /// All recorded known-hosts lines, across every host.
    pub fn trust_lines(&self) -> Vec<String> {
        self.hosts
            .values()
            .flat_map(|record| record.ssh_hashes.iter().cloned())
            .collect()
    }

    /// Rewrites the whole descriptor file.  The new contents are written
    /// next to the file and renamed over it, so no reader ever sees a
    /// partial document.
    pub fn save(&self) -> Result<(), DescriptorError> {
        let contents = serde_json::to_string_pretty(&self.hosts)
            .expect("descriptor serialization is infallible");
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let write_err = |err: std::io::Error| DescriptorError::Write {
            path: self.path.clone(),
            err,
        };
        let mut temp = camino_tempfile::Builder::new()
            .prefix(".dropkick-")
            .tempfile_in(parent)
            .map_err(write_err)?;
        temp.write_all(contents.as_bytes()).map_err(write_err)?;
        temp.persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    /// Removes the descriptor file.  Only called once teardown has
    /// reversed everything the descriptor records.
    pub fn remove(self) -> Result<(), DescriptorError> {
        std::fs::remove_file(&self.path).map_err(|err| {
            DescriptorError::Write { path: self.path.clone(), err }
        })
    }
}

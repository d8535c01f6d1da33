// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster topology descriptions: roles, droplet sizes, and the topology
//! file format.

use anyhow::Context;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

/// The software workload a group of droplets runs.
///
/// The declaration order doubles as the planning precedence order: Hadoop
/// hosts are always named before ZooKeeper hosts, so name indices are stable
/// across runs of the same topology.
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Hadoop,
    Zookeeper,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Hadoop => "hadoop",
            Role::Zookeeper => "zookeeper",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A DigitalOcean droplet size slug.
///
/// The declaration order is the size ordering used when sorting host
/// requests (never lexical: "16gb" sorts above "2gb").
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum SizeSlug {
    #[serde(rename = "512mb")]
    Mb512,
    #[serde(rename = "1gb")]
    Gb1,
    #[serde(rename = "2gb")]
    Gb2,
    #[serde(rename = "4gb")]
    Gb4,
    #[serde(rename = "8gb")]
    Gb8,
    #[serde(rename = "16gb")]
    Gb16,
}

impl SizeSlug {
    pub fn slug(&self) -> &'static str {
        match self {
            SizeSlug::Mb512 => "512mb",
            SizeSlug::Gb1 => "1gb",
            SizeSlug::Gb2 => "2gb",
            SizeSlug::Gb4 => "4gb",
            SizeSlug::Gb8 => "8gb",
            SizeSlug::Gb16 => "16gb",
        }
    }
}

impl std::fmt::Display for SizeSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// One `{ "size": ..., "count": ... }` entry of a role group.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostRequest {
    pub size: SizeSlug,
    pub count: usize,
}

/// One role group of the topology file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleGroup {
    pub role: Role,
    pub hosts: Vec<HostRequest>,
}

/// Loads a topology file: a JSON array of role groups.
///
/// Unknown role tags and size slugs are rejected here, before anything has
/// talked to the cloud.
pub fn load_topology(path: &Utf8Path) -> anyhow::Result<Vec<RoleGroup>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read topology file {path}"))?;
    let groups: Vec<RoleGroup> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse topology file {path}"))?;
    Ok(groups)
}

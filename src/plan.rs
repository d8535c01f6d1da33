// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The topology planner: turns a cluster topology into an ordered list of
//! droplet-creation requests and a per-host configuration bundle.
//!
//! Planning is deterministic and side-effect free.  Roles are processed in
//! precedence order and sizes largest-first within a role, with a single
//! name counter shared across roles, so the same topology always produces
//! the same names.

use camino::Utf8PathBuf;
use std::collections::{BTreeMap, BTreeSet};

use crate::cluster::{Role, RoleGroup, SizeSlug};
use crate::config::UserConfig;
use crate::roles::{hadoop, zookeeper, InstallParams};

/// One droplet to be created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DropletRequest {
    pub name: String,
    pub size: SizeSlug,
    pub image: String,
    pub region: String,
    pub user_data: String,
}

/// Everything one host needs configured after it is up: its role, where the
/// role software goes, where to download it from, and the rendered config
/// files keyed by their remote path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostBundle {
    pub role: Role,
    pub install_path: Utf8PathBuf,
    pub repository: String,
    pub version: String,
    pub files: BTreeMap<Utf8PathBuf, String>,
}

impl HostBundle {
    pub fn install_params(&self) -> InstallParams<'_> {
        InstallParams {
            install_path: &self.install_path,
            repository: &self.repository,
            version: &self.version,
        }
    }
}

/// The full plan for a cluster: droplet requests in creation order plus the
/// per-host bundles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub droplets: Vec<DropletRequest>,
    pub bundles: BTreeMap<String, HostBundle>,
}

impl Plan {
    /// Hostnames in creation order.
    pub fn hostnames(&self) -> Vec<String> {
        self.droplets.iter().map(|d| d.name.clone()).collect()
    }

    /// Number of planned hosts with the given role.
    pub fn count_role(&self, role: Role) -> usize {
        self.bundles.values().filter(|b| b.role == role).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("topology requests no droplets")]
    Empty,

    #[error("no hadoop memory profile for droplet size {0}")]
    UnsupportedSize(SizeSlug),

    #[error("no {role} package mirror for region {region:?}")]
    NoMirror { role: Role, region: String },
}

/// Plans a cluster.  Pure: no I/O, deterministic for a given topology and
/// configuration.
pub fn plan(
    cluster_name: &str,
    groups: &[RoleGroup],
    config: &UserConfig,
) -> Result<Plan, PlanError> {
    let user_data = config.user_data();
    let mut droplets = Vec::new();
    let mut bundles = BTreeMap::new();
    let mut counter = 0usize;

    // BTreeSet iteration order is the Role precedence order.
    let roles: BTreeSet<Role> = groups.iter().map(|g| g.role).collect();

    for role in roles {
        let mut sizes = requested_sizes(groups, role);
        let install_path = config.install_path(role);
        let repository = config
            .repository(role)
            .ok_or_else(|| PlanError::NoMirror {
                role,
                region: config.region.clone(),
            })?
            .to_string();
        let version = config.version(role).to_string();

        match role {
            Role::Hadoop => {
                // The dedicated master is an extra droplet ahead of every
                // requested (worker) size, so the first host of the role
                // group is always the master.
                sizes.insert(0, hadoop::MASTER_SIZE);
                let names: Vec<String> = sizes
                    .iter()
                    .map(|_| next_name(cluster_name, &mut counter))
                    .collect();
                let master = names[0].clone();
                let workers = &names[1..];

                // Task totals are aggregated over the workers only.
                let mut map_task_total = 0;
                let mut reduce_task_total = 0;
                for size in &sizes[1..] {
                    let profile = hadoop::size_profile(*size)
                        .ok_or(PlanError::UnsupportedSize(*size))?;
                    map_task_total += profile.map_task_per_node;
                    reduce_task_total += profile.reduce_task_per_node;
                }

                let config_dir = install_path.join("etc").join("hadoop");
                let core_site = hadoop::core_site(&master);
                let hdfs_site = hadoop::hdfs_site(&master);
                let slaves = workers.join("\n");

                for (name, size) in names.iter().zip(&sizes) {
                    let profile = hadoop::size_profile(*size)
                        .ok_or(PlanError::UnsupportedSize(*size))?;
                    let mut files = BTreeMap::new();
                    files.insert(
                        config_dir.join("core-site.xml"),
                        core_site.clone(),
                    );
                    files.insert(
                        config_dir.join("mapred-site.xml"),
                        hadoop::mapred_site(
                            &master,
                            profile,
                            map_task_total,
                            reduce_task_total,
                        ),
                    );
                    files.insert(
                        config_dir.join("hdfs-site.xml"),
                        hdfs_site.clone(),
                    );
                    files.insert(
                        config_dir.join("yarn-site.xml"),
                        hadoop::yarn_site(&master, profile),
                    );
                    files.insert(config_dir.join("master"), master.clone());
                    files.insert(config_dir.join("slaves"), slaves.clone());

                    droplets.push(DropletRequest {
                        name: name.clone(),
                        size: *size,
                        image: config.image.clone(),
                        region: config.region.clone(),
                        user_data: user_data.clone(),
                    });
                    bundles.insert(
                        name.clone(),
                        HostBundle {
                            role,
                            install_path: install_path.clone(),
                            repository: repository.clone(),
                            version: version.clone(),
                            files,
                        },
                    );
                }
            }
            Role::Zookeeper => {
                let names: Vec<String> = sizes
                    .iter()
                    .map(|_| next_name(cluster_name, &mut counter))
                    .collect();
                let ensemble_config = zookeeper::ensemble_config(&names);
                let config_path = install_path.join("conf").join("zoo.cfg");

                for (name, size) in names.iter().zip(&sizes) {
                    let mut files = BTreeMap::new();
                    files
                        .insert(config_path.clone(), ensemble_config.clone());

                    droplets.push(DropletRequest {
                        name: name.clone(),
                        size: *size,
                        image: config.image.clone(),
                        region: config.region.clone(),
                        user_data: user_data.clone(),
                    });
                    bundles.insert(
                        name.clone(),
                        HostBundle {
                            role,
                            install_path: install_path.clone(),
                            repository: repository.clone(),
                            version: version.clone(),
                            files,
                        },
                    );
                }
            }
        }
    }

    if droplets.is_empty() {
        return Err(PlanError::Empty);
    }
    Ok(Plan { droplets, bundles })
}

fn next_name(cluster_name: &str, counter: &mut usize) -> String {
    let name = format!("{}-{}", cluster_name, counter);
    *counter += 1;
    name
}

/// Every size requested for `role`, expanded per count and sorted
/// largest-first.
fn requested_sizes(groups: &[RoleGroup], role: Role) -> Vec<SizeSlug> {
    let mut sizes: Vec<SizeSlug> = groups
        .iter()
        .filter(|group| group.role == role)
        .flat_map(|group| &group.hosts)
        .flat_map(|request| {
            std::iter::repeat(request.size).take(request.count)
        })
        .collect();
    sizes.sort();
    sizes.reverse();
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::HostRequest;
    use crate::config::UserConfig;
    use std::time::Duration;

    fn test_config() -> UserConfig {
        UserConfig {
            token: "secret".to_string(),
            username: "admin".to_string(),
            image: "ubuntu-14-04-x64".to_string(),
            region: "sfo1".to_string(),
            timezone: "US/Pacific".to_string(),
            install: "opt".to_string(),
            hosts_file: Utf8PathBuf::from("/etc/hosts"),
            public_key_path: Utf8PathBuf::from("/home/admin/.ssh/id_rsa.pub"),
            private_key_path: Utf8PathBuf::from("/home/admin/.ssh/id_rsa"),
            known_hosts_path: Utf8PathBuf::from(
                "/home/admin/.ssh/known_hosts",
            ),
            public_key: "ssh-rsa AAAA admin@host".to_string(),
            private_key: "KEY".to_string(),
            status_poll_interval: Duration::from_secs(5),
            status_poll_timeout: Duration::from_secs(600),
            hadoop_version: "2.5.2".to_string(),
            zookeeper_version: "3.4.6".to_string(),
        }
    }

    fn group(role: Role, hosts: &[(SizeSlug, usize)]) -> RoleGroup {
        RoleGroup {
            role,
            hosts: hosts
                .iter()
                .map(|&(size, count)| HostRequest { size, count })
                .collect(),
        }
    }

    #[test]
    fn planning_is_deterministic() {
        let groups = vec![
            group(Role::Zookeeper, &[(SizeSlug::Gb2, 3)]),
            group(Role::Hadoop, &[(SizeSlug::Gb8, 2), (SizeSlug::Gb16, 1)]),
        ];
        let config = test_config();
        let first = plan("test", &groups, &config).unwrap();
        let second = plan("test", &groups, &config).unwrap();
        assert_eq!(first, second);

        let mut names = first.hostnames();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), first.droplets.len());
    }

    #[test]
    fn hadoop_gets_a_dedicated_master() {
        let groups =
            vec![group(Role::Hadoop, &[(SizeSlug::Gb8, 2), (SizeSlug::Gb16, 1)])];
        let plan = plan("test", &groups, &test_config()).unwrap();

        // Three workers requested, four droplets planned.
        assert_eq!(plan.droplets.len(), 4);
        assert_eq!(plan.droplets[0].name, "test-0");
        assert_eq!(plan.droplets[0].size, hadoop::MASTER_SIZE);
        // Workers sorted largest-first.
        assert_eq!(plan.droplets[1].size, SizeSlug::Gb16);
        assert_eq!(plan.droplets[2].size, SizeSlug::Gb8);
        assert_eq!(plan.droplets[3].size, SizeSlug::Gb8);

        // Task totals exclude the master: 8 + 4 + 4.
        let mapred = &plan.bundles["test-0"].files
            [&Utf8PathBuf::from("/home/admin/opt/hadoop/etc/hadoop/mapred-site.xml")];
        assert!(mapred.contains(
            "<name>mapreduce.tasktracker.map.tasks.maximum</name>\n    <value>16</value>"
        ));
    }

    #[test]
    fn two_largest_sizes_scenario() {
        let groups = vec![group(
            Role::Hadoop,
            &[(SizeSlug::Gb16, 1), (SizeSlug::Gb8, 1)],
        )];
        let plan = plan("name", &groups, &test_config()).unwrap();

        assert_eq!(plan.hostnames(), vec!["name-0", "name-1", "name-2"]);
        assert_eq!(plan.droplets[0].size, SizeSlug::Gb4);
        assert_eq!(plan.droplets[1].size, SizeSlug::Gb16);
        assert_eq!(plan.droplets[2].size, SizeSlug::Gb8);

        let slaves = &plan.bundles["name-0"].files
            [&Utf8PathBuf::from("/home/admin/opt/hadoop/etc/hadoop/slaves")];
        assert_eq!(slaves, "name-1\nname-2");
        let master = &plan.bundles["name-0"].files
            [&Utf8PathBuf::from("/home/admin/opt/hadoop/etc/hadoop/master")];
        assert_eq!(master, "name-0");
    }

    #[test]
    fn zookeeper_peers_are_numbered_in_creation_order() {
        let groups = vec![group(Role::Zookeeper, &[(SizeSlug::Gb2, 3)])];
        let plan = plan("zk", &groups, &test_config()).unwrap();

        assert_eq!(plan.hostnames(), vec!["zk-0", "zk-1", "zk-2"]);
        let config = &plan.bundles["zk-1"].files
            [&Utf8PathBuf::from("/home/admin/opt/zookeeper/conf/zoo.cfg")];
        assert!(config.contains("server.1=zk-0\nserver.2=zk-1\nserver.3=zk-2"));
    }

    #[test]
    fn hadoop_is_named_before_zookeeper() {
        let groups = vec![
            group(Role::Zookeeper, &[(SizeSlug::Gb2, 1)]),
            group(Role::Hadoop, &[(SizeSlug::Gb8, 1)]),
        ];
        let plan = plan("mix", &groups, &test_config()).unwrap();

        // hadoop master, hadoop worker, then the zookeeper host, one shared
        // counter across roles.
        assert_eq!(plan.hostnames(), vec!["mix-0", "mix-1", "mix-2"]);
        assert_eq!(plan.bundles["mix-0"].role, Role::Hadoop);
        assert_eq!(plan.bundles["mix-2"].role, Role::Zookeeper);
    }

    #[test]
    fn hadoop_size_without_profile_is_rejected() {
        let groups = vec![group(Role::Hadoop, &[(SizeSlug::Mb512, 1)])];
        let err = plan("bad", &groups, &test_config()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnsupportedSize(SizeSlug::Mb512)
        ));
    }

    #[test]
    fn empty_topology_is_rejected() {
        let err = plan("none", &[], &test_config()).unwrap_err();
        assert!(matches!(err, PlanError::Empty));
    }
}

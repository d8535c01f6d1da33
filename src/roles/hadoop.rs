// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hadoop site configuration and install scripts.
//!
//! A Hadoop role group always gets one dedicated master droplet at
//! [`MASTER_SIZE`] in addition to the requested worker sizes.  The memory
//! and task-slot figures rendered into `mapred-site.xml`/`yarn-site.xml`
//! come from the per-size table below; the cluster-wide task totals are
//! summed over the workers only.

use super::InstallParams;
use crate::cluster::SizeSlug;

/// Size of the dedicated master droplet prepended to every Hadoop group.
pub const MASTER_SIZE: SizeSlug = SizeSlug::Gb4;

/// Memory and task-slot settings for one droplet size.
#[derive(Clone, Copy, Debug)]
pub struct SizeProfile {
    pub container_heap_max: u32,
    pub map_task_heap_max: u32,
    pub reduce_task_heap_max: u32,
    pub map_jvm_heap_max: u32,
    pub reduce_jvm_heap_max: u32,
    pub map_task_per_node: u32,
    pub reduce_task_per_node: u32,
}

/// Per-size tuning table.  Sizes below 4gb have too little memory to run a
/// YARN container and have no entry; requesting one for a Hadoop group is a
/// plan error.
pub fn size_profile(size: SizeSlug) -> Option<&'static SizeProfile> {
    match size {
        SizeSlug::Gb4 => Some(&SizeProfile {
            container_heap_max: 2048,
            map_task_heap_max: 1024,
            reduce_task_heap_max: 1024,
            map_jvm_heap_max: 896,
            reduce_jvm_heap_max: 896,
            map_task_per_node: 2,
            reduce_task_per_node: 2,
        }),
        SizeSlug::Gb8 => Some(&SizeProfile {
            container_heap_max: 4096,
            map_task_heap_max: 1024,
            reduce_task_heap_max: 1024,
            map_jvm_heap_max: 896,
            reduce_jvm_heap_max: 896,
            map_task_per_node: 4,
            reduce_task_per_node: 4,
        }),
        SizeSlug::Gb16 => Some(&SizeProfile {
            container_heap_max: 8192,
            map_task_heap_max: 1024,
            reduce_task_heap_max: 1024,
            map_jvm_heap_max: 896,
            reduce_jvm_heap_max: 896,
            map_task_per_node: 8,
            reduce_task_per_node: 8,
        }),
        _ => None,
    }
}

/// Renders a Hadoop property-list XML document.
fn property_xml(properties: &[(&str, String)]) -> String {
    let mut out = String::from("<?xml version='1.0' encoding='utf-8'?>\n");
    out.push_str("<configuration>\n");
    for (name, value) in properties {
        out.push_str("  <property>\n");
        out.push_str(&format!("    <name>{name}</name>\n"));
        out.push_str(&format!("    <value>{value}</value>\n"));
        out.push_str("  </property>\n");
    }
    out.push_str("</configuration>\n");
    out
}

pub fn core_site(master: &str) -> String {
    property_xml(&[
        ("fs.defaultFS", format!("hdfs://{master}:9000")),
        (
            "io.compression.codecs",
            "org.apache.hadoop.io.compress.SnappyCodec".to_string(),
        ),
    ])
}

pub fn mapred_site(
    master: &str,
    profile: &SizeProfile,
    map_task_total: u32,
    reduce_task_total: u32,
) -> String {
    property_xml(&[
        ("mapreduce.framework.name", "yarn".to_string()),
        ("mapreduce.jobtracker.address", format!("{master}:54311")),
        ("mapreduce.map.memory.mb", profile.map_task_heap_max.to_string()),
        (
            "mapreduce.reduce.memory.mb",
            profile.reduce_task_heap_max.to_string(),
        ),
        (
            "mapreduce.map.java.opts",
            format!("-Xmx{}m", profile.map_jvm_heap_max),
        ),
        (
            "mapreduce.reduce.java.opts",
            format!("-Xmx{}m", profile.reduce_jvm_heap_max),
        ),
        ("mapreduce.job.maps", profile.map_task_per_node.to_string()),
        ("mapreduce.job.reduces", profile.reduce_task_per_node.to_string()),
        (
            "mapreduce.tasktracker.map.tasks.maximum",
            map_task_total.to_string(),
        ),
        (
            "mapreduce.tasktracker.reduce.tasks.maximum",
            reduce_task_total.to_string(),
        ),
    ])
}

pub fn hdfs_site(master: &str) -> String {
    property_xml(&[
        ("dfs.replication", "3".to_string()),
        ("dfs.secondary.http.address", format!("{master}:50090")),
        ("dfs.permissions", "false".to_string()),
    ])
}

pub fn yarn_site(master: &str, profile: &SizeProfile) -> String {
    property_xml(&[
        ("yarn.nodemanager.aux-services", "mapreduce_shuffle".to_string()),
        (
            "yarn.nodemanager.aux-services.mapreduce.shuffle.class",
            "org.apache.hadoop.mapred.ShuffleHandler".to_string(),
        ),
        (
            "yarn.nodemanager.resource.memory-mb",
            profile.container_heap_max.to_string(),
        ),
        (
            "yarn.resourcemanager.resource-tracker.address",
            format!("{master}:8025"),
        ),
        ("yarn.resourcemanager.scheduler.address", format!("{master}:8030")),
        ("yarn.resourcemanager.address", format!("{master}:8040")),
    ])
}

pub const SYSTEM_PACKAGES_SCRIPT: &str = "\
apt-get update
apt-get -y install build-essential software-properties-common python-software-properties
apt-get -y install nscd bc screen python3-pip libxml2-dev libxslt1-dev zlib1g-dev
apt-get -y install libsnappy1 libsnappy-dev

# install java
add-apt-repository -y ppa:webupd8team/java
apt-get update
echo debconf shared/accepted-oracle-license-v1-1 select true | sudo debconf-set-selections
echo debconf shared/accepted-oracle-license-v1-1 seen true | sudo debconf-set-selections
apt-get -y --force-yes install oracle-java7-installer oracle-java7-set-default
";

pub fn user_packages_script(params: &InstallParams<'_>) -> String {
    let InstallParams { install_path, repository, version } = *params;
    format!(
        r#"# Make directory

mkdir -p $(dirname {install_path})

# Download & Install

wget {repository}/hadoop-{version}/hadoop-{version}.tar.gz
tar -xvf hadoop-{version}.tar.gz
mv hadoop-{version} {install_path}
rm hadoop-{version}.tar.gz
cp /usr/lib/libsnappy.so {install_path}/lib/native/

sed -i -e '/^export JAVA_HOME/s/^.*$/export JAVA_HOME=\/usr\/lib\/jvm\/java-7-oracle/' {install_path}/etc/hadoop/hadoop-env.sh

# Set env variables

echo '' >> ${{HOME}}/.bashrc
echo "export HADOOP_PREFIX={install_path}" >> ${{HOME}}/.bashrc
echo 'export HADOOP_CONF_DIR=${{HADOOP_PREFIX}}/etc/hadoop' >> ${{HOME}}/.bashrc
echo 'export HADOOP_MAPRED_HOME=${{HADOOP_PREFIX}}' >> ${{HOME}}/.bashrc
echo 'export HADOOP_COMMON_HOME=${{HADOOP_PREFIX}}' >> ${{HOME}}/.bashrc
echo 'export HADOOP_HDFS_HOME=${{HADOOP_PREFIX}}' >> ${{HOME}}/.bashrc
echo 'export HADOOP_YARN_HOME=${{HADOOP_PREFIX}}' >> ${{HOME}}/.bashrc
echo '' >> ${{HOME}}/.bashrc
echo 'export PATH=$PATH:${{HADOOP_PREFIX}}/bin:${{HADOOP_PREFIX}}/sbin' >> ${{HOME}}/.bashrc
"#
    )
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ZooKeeper ensemble configuration and install scripts.

use super::InstallParams;

/// Renders `zoo.cfg` for an ensemble.
///
/// Every member gets the same file: the fixed operational settings followed
/// by one `server.<ordinal>=<hostname>` line per peer.  Ordinals start at 1
/// and follow creation order, so they are stable for the life of the
/// cluster.
pub fn ensemble_config(peers: &[String]) -> String {
    let mut out = String::from(
        "tickTime=2000\ninitLimit=10\nsyncLimit=5\nclientPort=2181\n",
    );
    out.push('\n');
    for (index, peer) in peers.iter().enumerate() {
        out.push_str(&format!("server.{}={}\n", index + 1, peer));
    }
    out
}

pub const SYSTEM_PACKAGES_SCRIPT: &str = "\
apt-get update
apt-get -y install build-essential software-properties-common python-software-properties
apt-get -y install nscd bc screen python3-pip libxml2-dev libxslt1-dev zlib1g-dev

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

wget {repository}/zookeeper-{version}/zookeeper-{version}.tar.gz
tar -xvf zookeeper-{version}.tar.gz
mv zookeeper-{version} {install_path}
rm zookeeper-{version}.tar.gz

# Set env variables

echo '' >> ${{HOME}}/.bashrc
echo "export ZOOKEEPER_INSTALL={install_path}" >> ${{HOME}}/.bashrc
echo '' >> ${{HOME}}/.bashrc
echo 'export PATH=$PATH:${{ZOOKEEPER_INSTALL}}/bin' >> ~/.bashrc
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensemble_config_lists_peers_in_creation_order() {
        let peers = vec![
            "test-3".to_string(),
            "test-4".to_string(),
            "test-5".to_string(),
        ];
        let config = ensemble_config(&peers);
        assert!(config.starts_with("tickTime=2000\n"));
        assert!(config.contains("clientPort=2181\n"));
        assert!(config.ends_with(
            "server.1=test-3\nserver.2=test-4\nserver.3=test-5\n"
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator configuration, loaded from `~/.dropkick/config.toml`.
//!
//! On first run the file is created from a commented template and the tool
//! exits, telling the operator to fill in the API token.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::time::Duration;

use crate::cluster::Role;

pub const DEFAULT_IMAGE: &str = "ubuntu-14-04-x64";
pub const DEFAULT_REGION: &str = "sfo1";
pub const DEFAULT_TIMEZONE: &str = "US/Pacific";
pub const DEFAULT_INSTALL_DIR: &str = "opt";
pub const DEFAULT_HADOOP_VERSION: &str = "2.5.2";
pub const DEFAULT_ZOOKEEPER_VERSION: &str = "3.4.6";

const CONFIG_TEMPLATE: &str = r#"# DigitalOcean API (v2) token.
# https://www.digitalocean.com/community/tutorials/how-to-use-the-digitalocean-api-v2
token = ""

# Droplet region: nyc1|nyc2|nyc3|sfo1|lon1|sgp1|ams1|ams2|ams3
region = "sfo1"

# Timezone pushed to every droplet: US/Pacific, Asia/Seoul, ...
timezone = "US/Pacific"

# Package installation path on each droplet (relative to the admin home)
install = "opt"
"#;

const CLOUD_CONFIG_TEMPLATE: &str = r#"#cloud-config

users:
  - name: {username}
    groups: sudo
    shell: /bin/bash
    sudo: ['ALL=(ALL) NOPASSWD:ALL']
    ssh-authorized-keys:
      - {public_key}

timezone: {timezone}"#;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "no configuration found: a template was created at {0}; \
         fill in the API token and re-run"
    )]
    TemplateCreated(Utf8PathBuf),

    #[error("no API token configured in {0}")]
    MissingToken(Utf8PathBuf),

    #[error("failed to read {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

/// The raw on-disk settings.  Everything is optional; [`UserConfig::load`]
/// merges in the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ConfigFile {
    token: Option<String>,
    username: Option<String>,
    image: Option<String>,
    region: Option<String>,
    timezone: Option<String>,
    install: Option<String>,
    ssh_dir: Option<Utf8PathBuf>,
    hosts_file: Option<Utf8PathBuf>,
    status_poll_interval_secs: Option<u64>,
    status_poll_timeout_secs: Option<u64>,
    hadoop_version: Option<String>,
    zookeeper_version: Option<String>,
}

/// Fully-resolved operator configuration.
#[derive(Clone, Debug)]
pub struct UserConfig {
    pub token: String,
    pub username: String,
    pub image: String,
    pub region: String,
    pub timezone: String,
    pub install: String,
    pub hosts_file: Utf8PathBuf,
    pub public_key_path: Utf8PathBuf,
    pub private_key_path: Utf8PathBuf,
    pub known_hosts_path: Utf8PathBuf,
    pub public_key: String,
    pub private_key: String,
    pub status_poll_interval: Duration,
    pub status_poll_timeout: Duration,
    pub hadoop_version: String,
    pub zookeeper_version: String,
}

impl UserConfig {
    /// Loads configuration from `path`, or from the default
    /// `~/.dropkick/config.toml` if no path is given.
    pub fn load(path: Option<&Utf8Path>) -> Result<UserConfig, ConfigError> {
        let path = match path {
            Some(path) => path.to_owned(),
            None => home_dir()?.join(".dropkick").join("config.toml"),
        };

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    ConfigError::Write { path: parent.to_owned(), err }
                })?;
            }
            std::fs::write(&path, CONFIG_TEMPLATE).map_err(|err| {
                ConfigError::Write { path: path.clone(), err }
            })?;
            return Err(ConfigError::TemplateCreated(path));
        }

        let contents = std::fs::read_to_string(&path).map_err(|err| {
            ConfigError::Read { path: path.clone(), err }
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|err| {
            ConfigError::Parse { path: path.clone(), err }
        })?;

        let token = match file.token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(ConfigError::MissingToken(path)),
        };
        let username = match file.username {
            Some(username) => username,
            None => std::env::var("USER")
                .map_err(|_| ConfigError::MissingEnv("USER"))?,
        };
        let ssh_dir = match file.ssh_dir {
            Some(dir) => dir,
            None => home_dir()?.join(".ssh"),
        };

        let public_key_path = ssh_dir.join("id_rsa.pub");
        let private_key_path = ssh_dir.join("id_rsa");
        let known_hosts_path = ssh_dir.join("known_hosts");
        let public_key = read_trimmed(&public_key_path)?;
        let private_key = read_trimmed(&private_key_path)?;

        Ok(UserConfig {
            token,
            username,
            image: file.image.unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            region: file.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            timezone: file
                .timezone
                .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            install: file
                .install
                .unwrap_or_else(|| DEFAULT_INSTALL_DIR.to_string()),
            hosts_file: file
                .hosts_file
                .unwrap_or_else(|| Utf8PathBuf::from("/etc/hosts")),
            public_key_path,
            private_key_path,
            known_hosts_path,
            public_key,
            private_key,
            status_poll_interval: Duration::from_secs(
                file.status_poll_interval_secs.unwrap_or(5),
            ),
            status_poll_timeout: Duration::from_secs(
                file.status_poll_timeout_secs.unwrap_or(600),
            ),
            hadoop_version: file
                .hadoop_version
                .unwrap_or_else(|| DEFAULT_HADOOP_VERSION.to_string()),
            zookeeper_version: file
                .zookeeper_version
                .unwrap_or_else(|| DEFAULT_ZOOKEEPER_VERSION.to_string()),
        })
    }

    /// The cloud-init user data shared by every droplet in a cluster:
    /// creates the admin account with passwordless sudo and the operator's
    /// public key.
    pub fn user_data(&self) -> String {
        CLOUD_CONFIG_TEMPLATE
            .replace("{username}", &self.username)
            .replace("{public_key}", &self.public_key)
            .replace("{timezone}", &self.timezone)
    }

    /// Remote installation path for a role's software.
    pub fn install_path(&self, role: Role) -> Utf8PathBuf {
        Utf8PathBuf::from("/home")
            .join(&self.username)
            .join(&self.install)
            .join(role.name())
    }

    /// Package version to install for a role.
    pub fn version(&self, role: Role) -> &str {
        match role {
            Role::Hadoop => &self.hadoop_version,
            Role::Zookeeper => &self.zookeeper_version,
        }
    }

    /// Apache mirror serving a role's packages from the configured region.
    /// See <http://www.apache.org/mirrors/>.
    pub fn repository(&self, role: Role) -> Option<&'static str> {
        repository_for(role, &self.region)
    }
}

fn repository_for(role: Role, region: &str) -> Option<&'static str> {
    match role {
        Role::Hadoop => match region {
            "nyc1" | "nyc2" | "nyc3" | "sfo1" => {
                Some("http://www.gtlib.gatech.edu/pub/apache/hadoop/common/")
            }
            "lon1" => Some("http://mirror.vorboss.net/apache/hadoop/common/"),
            "sgp1" => Some("http://mirror.nus.edu.sg/apache/hadoop/common/"),
            "ams1" | "ams2" | "ams3" => {
                Some("http://apache.proserve.nl/hadoop/common/")
            }
            _ => None,
        },
        Role::Zookeeper => match region {
            "nyc1" | "nyc2" | "nyc3" | "sfo1" => {
                Some("http://www.gtlib.gatech.edu/pub/apache/zookeeper/")
            }
            "lon1" => Some("http://mirror.vorboss.net/apache/zookeeper/"),
            "sgp1" => Some("http://mirror.nus.edu.sg/apache/zookeeper/"),
            "ams1" | "ams2" | "ams3" => {
                Some("http://apache.proserve.nl/zookeeper/")
            }
            _ => None,
        },
    }
}

fn home_dir() -> Result<Utf8PathBuf, ConfigError> {
    std::env::var("HOME")
        .map(Utf8PathBuf::from)
        .map_err(|_| ConfigError::MissingEnv("HOME"))
}

fn read_trimmed(path: &Utf8Path) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| ConfigError::Read { path: path.to_owned(), err })?;
    Ok(contents.trim().to_string())
}

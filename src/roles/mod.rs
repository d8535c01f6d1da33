// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Role-specific configuration rendering and install scripts.
//!
//! These are pure data transforms: size class + cluster topology in,
//! rendered config text and shell script text out.  All remote I/O lives in
//! the configuration fan-out.

use camino::Utf8Path;

use crate::cluster::Role;

pub mod hadoop;
pub mod zookeeper;

/// Parameters for rendering a role's user-package install script.
#[derive(Clone, Copy, Debug)]
pub struct InstallParams<'a> {
    pub install_path: &'a Utf8Path,
    pub repository: &'a str,
    pub version: &'a str,
}

impl Role {
    /// Shell script installing the OS-level prerequisites for this role,
    /// run as root on every new droplet.
    pub fn system_packages_script(&self) -> &'static str {
        match self {
            Role::Hadoop => hadoop::SYSTEM_PACKAGES_SCRIPT,
            Role::Zookeeper => zookeeper::SYSTEM_PACKAGES_SCRIPT,
        }
    }

    /// Shell script downloading and installing the role software itself,
    /// run as the admin user.
    pub fn user_packages_script(&self, params: &InstallParams<'_>) -> String {
        match self {
            Role::Hadoop => hadoop::user_packages_script(params),
            Role::Zookeeper => zookeeper::user_packages_script(params),
        }
    }
}

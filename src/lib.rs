// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning of Hadoop and ZooKeeper clusters on DigitalOcean droplets.
//!
//! The `create` flow plans a set of droplets from a topology file, creates
//! them through the DigitalOcean API, waits for them to become active, and
//! then configures every host over SSH in parallel.  Everything created is
//! recorded incrementally in a JSON cluster descriptor, which is the sole
//! input to the `destroy` flow.

pub mod cloud;
pub mod cluster;
pub mod config;
pub mod configure;
pub mod create;
pub mod descriptor;
pub mod destroy;
pub mod lifecycle;
pub mod line_file;
pub mod plan;
pub mod poll;
pub mod roles;
pub mod ssh;

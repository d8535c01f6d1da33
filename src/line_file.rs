// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Line-record files shared with the rest of the system: the operator's
//! SSH known-hosts file and the local hosts file.
//!
//! Both are mutated the same way: read the whole file, modify, and replace
//! it atomically (write the new contents next to the file, then rename), so
//! a reader never observes a partially-written file.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::Write;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
#[error("failed to update {path}")]
pub struct LineFileError {
    pub path: Utf8PathBuf,
    #[source]
    pub err: std::io::Error,
}

/// A file of line records supporting append and exact-line removal.
#[derive(Clone, Debug)]
pub struct LineFile {
    path: Utf8PathBuf,
}

impl LineFile {
    pub fn new<P: Into<Utf8PathBuf>>(path: P) -> LineFile {
        LineFile { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads all lines.  A file that does not exist yet reads as empty.
    pub fn read_lines(&self) -> Result<Vec<String>, LineFileError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                Ok(contents.lines().map(str::to_string).collect())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Vec::new())
            }
            Err(err) => Err(self.error(err)),
        }
    }

    /// Appends the given lines, creating the file if needed.
    pub fn append_lines(&self, lines: &[String]) -> Result<(), LineFileError> {
        let mut all = self.read_lines()?;
        all.extend(lines.iter().cloned());
        self.replace_with(&all)
    }

    /// Removes every line whose trimmed content appears in `lines`.
    /// Removing lines that are not present is a no-op, as is removal from a
    /// file that does not exist.
    pub fn remove_lines(
        &self,
        lines: &BTreeSet<String>,
    ) -> Result<(), LineFileError> {
        if !self.path.exists() {
            return Ok(());
        }
        let remaining: Vec<String> = self
            .read_lines()?
            .into_iter()
            .filter(|line| !lines.contains(line.trim()))
            .collect();
        self.replace_with(&remaining)
    }

    fn replace_with(&self, lines: &[String]) -> Result<(), LineFileError> {
        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let mut temp = camino_tempfile::Builder::new()
            .prefix(".dropkick-")
            .tempfile_in(parent)
            .map_err(|err| self.error(err))?;
        temp.write_all(contents.as_bytes())
            .map_err(|err| self.error(err))?;
        temp.persist(&self.path).map_err(|err| self.error(err.error))?;
        Ok(())
    }

    fn error(&self, err: std::io::Error) -> LineFileError {
        LineFileError { path: self.path.clone(), err }
    }
}

/// `ip hostname` entries for the cluster, ordered by the numeric suffix of
/// the hostname so the rendered file follows creation order.
pub fn host_entries(addresses: &BTreeMap<String, IpAddr>) -> Vec<String> {
    let mut hostnames: Vec<&String> = addresses.keys().collect();
    hostnames.sort_by(|a, b| {
        (host_index(a), a.as_str()).cmp(&(host_index(b), b.as_str()))
    });
    hostnames
        .into_iter()
        .map(|name| format!("{} {}", addresses[name], name))
        .collect()
}

/// Preamble of the hosts file pushed to every droplet.
pub const HOSTS_PREAMBLE: &str = "127.0.0.1 localhost

# The following lines are desirable for IPv6 capable hosts
::1     ip6-localhost ip6-loopback
fe00::0 ip6-localnet
ff00::0 ip6-mcastprefix
ff02::1 ip6-allnodes
ff02::2 ip6-allrouters

";

/// The complete hosts file uploaded to every droplet, mapping every cluster
/// hostname to its public address.
pub fn render_remote_hosts_file(
    addresses: &BTreeMap<String, IpAddr>,
) -> String {
    let mut out = String::from(HOSTS_PREAMBLE);
    for entry in host_entries(addresses) {
        out.push_str(&entry);
        out.push('\n');
    }
    out
}

fn host_index(name: &str) -> Option<u64> {
    let (_, suffix) = name.rsplit_once('-')?;
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn append_and_remove_round_trip() {
        let dir = Utf8TempDir::new().unwrap();
        let file = LineFile::new(dir.path().join("known_hosts"));

        file.append_lines(&["alpha 1".to_string(), "beta 2".to_string()])
            .unwrap();
        file.append_lines(&["gamma 3".to_string()]).unwrap();
        assert_eq!(file.read_lines().unwrap(), vec!["alpha 1", "beta 2", "gamma 3"]);

        let to_remove =
            BTreeSet::from(["beta 2".to_string(), "unknown".to_string()]);
        file.remove_lines(&to_remove).unwrap();
        assert_eq!(file.read_lines().unwrap(), vec!["alpha 1", "gamma 3"]);

        // Removing again is a no-op, not an error.
        file.remove_lines(&to_remove).unwrap();
        assert_eq!(file.read_lines().unwrap(), vec!["alpha 1", "gamma 3"]);
    }

    #[test]
    fn missing_file_reads_empty_and_remove_is_a_noop() {
        let dir = Utf8TempDir::new().unwrap();
        let file = LineFile::new(dir.path().join("absent"));
        assert_eq!(file.read_lines().unwrap(), Vec::<String>::new());
        file.remove_lines(&BTreeSet::from(["x".to_string()])).unwrap();
        assert!(!file.path().exists());
    }

    #[test]
    fn removal_matches_trimmed_lines() {
        let dir = Utf8TempDir::new().unwrap();
        let file = LineFile::new(dir.path().join("hosts"));
        file.append_lines(&["  padded entry  ".to_string()]).unwrap();
        file.remove_lines(&BTreeSet::from(["padded entry".to_string()]))
            .unwrap();
        assert_eq!(file.read_lines().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn host_entries_follow_creation_order() {
        let addresses: BTreeMap<String, IpAddr> = BTreeMap::from([
            ("c-10".to_string(), "10.0.0.10".parse().unwrap()),
            ("c-2".to_string(), "10.0.0.2".parse().unwrap()),
            ("c-0".to_string(), "10.0.0.0".parse().unwrap()),
        ]);
        assert_eq!(
            host_entries(&addresses),
            vec!["10.0.0.0 c-0", "10.0.0.2 c-2", "10.0.0.10 c-10"]
        );
    }

    #[test]
    fn remote_hosts_file_has_loopback_preamble() {
        let addresses: BTreeMap<String, IpAddr> =
            BTreeMap::from([("c-0".to_string(), "10.0.0.1".parse().unwrap())]);
        let rendered = render_remote_hosts_file(&addresses);
        assert!(rendered.starts_with("127.0.0.1 localhost\n"));
        assert!(rendered.ends_with("\n10.0.0.1 c-0\n"));
    }
}

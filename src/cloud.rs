// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The DigitalOcean v2 API, reduced to the handful of calls the
//! orchestrator needs.
//!
//! The [`CloudApi`] trait is the seam for tests: the production
//! implementation is [`DigitalOceanClient`]; tests substitute a recording
//! fake so that validation failures can be shown to issue zero create
//! calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slog::{Logger, debug};
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.digitalocean.com";

/// Droplet status value reported once a machine is up.
pub const STATUS_ACTIVE: &str = "active";

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("request to DigitalOcean failed")]
    Request(#[from] reqwest::Error),

    #[error("DigitalOcean API returned {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct NetworkV4 {
    pub ip_address: IpAddr,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub networks: Networks,
}

impl Droplet {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn public_ip(&self) -> Option<IpAddr> {
        self.networks
            .v4
            .iter()
            .find(|network| network.kind == "public")
            .map(|network| network.ip_address)
    }
}

/// Body of a droplet-creation request.
#[derive(Debug, Serialize)]
pub struct CreateDroplet<'a> {
    pub name: &'a str,
    pub region: &'a str,
    pub size: &'a str,
    pub image: &'a str,
    pub ssh_keys: &'a [String],
    pub private_networking: bool,
    pub user_data: &'a str,
}

/// The cloud calls the orchestrator depends on.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Region slugs this account may create droplets in.
    async fn regions(&self) -> Result<Vec<String>, CloudError>;

    /// Account-wide droplet limit.
    async fn droplet_limit(&self) -> Result<usize, CloudError>;

    /// Every droplet currently existing on the account.
    async fn list_droplets(&self) -> Result<Vec<Droplet>, CloudError>;

    async fn create_droplet(
        &self,
        params: &CreateDroplet<'_>,
    ) -> Result<Droplet, CloudError>;

    /// Deletes a droplet.  Deleting a droplet that is already gone is not
    /// an error.
    async fn delete_droplet(&self, id: u64) -> Result<(), CloudError>;
}

pub struct DigitalOceanClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
    log: Logger,
}

impl DigitalOceanClient {
    pub fn new(token: &str, log: &Logger) -> Result<Self, CloudError> {
        Self::new_with_base_url(DEFAULT_API_BASE, token, log)
    }

    pub fn new_with_base_url(
        base_url: &str,
        token: &str,
        log: &Logger,
    ) -> Result<Self, CloudError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(DigitalOceanClient {
            base_url: base_url.to_string(),
            token: token.to_string(),
            client,
            log: log.new(slog::o!("component" => "DigitalOceanClient")),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, CloudError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ApiErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        }
    };
    Err(CloudError::Api { status: status.as_u16(), message })
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct RegionsResponse {
    regions: Vec<Region>,
}

#[derive(Deserialize)]
struct Region {
    slug: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    account: Account,
}

#[derive(Deserialize)]
struct Account {
    droplet_limit: usize,
}

#[derive(Deserialize)]
struct DropletsResponse {
    droplets: Vec<Droplet>,
}

#[derive(Deserialize)]
struct DropletResponse {
    droplet: Droplet,
}

#[async_trait]
impl CloudApi for DigitalOceanClient {
    async fn regions(&self) -> Result<Vec<String>, CloudError> {
        let response: RegionsResponse = self.get("/v2/regions").await?;
        Ok(response.regions.into_iter().map(|region| region.slug).collect())
    }

    async fn droplet_limit(&self) -> Result<usize, CloudError> {
        let response: AccountResponse = self.get("/v2/account").await?;
        Ok(response.account.droplet_limit)
    }

    async fn list_droplets(&self) -> Result<Vec<Droplet>, CloudError> {
        // One page is enough: the droplet limit of the accounts this tool
        // is pointed at is far below the page size.
        let response: DropletsResponse =
            self.get("/v2/droplets?page=1&per_page=200").await?;
        Ok(response.droplets)
    }

    async fn create_droplet(
        &self,
        params: &CreateDroplet<'_>,
    ) -> Result<Droplet, CloudError> {
        debug!(self.log, "creating droplet"; "name" => params.name);
        let response = self
            .client
            .post(self.url("/v2/droplets"))
            .bearer_auth(&self.token)
            .json(params)
            .send()
            .await?;
        let response = check_status(response).await?;
        let created: DropletResponse = response.json().await?;
        Ok(created.droplet)
    }

    async fn delete_droplet(&self, id: u64) -> Result<(), CloudError> {
        debug!(self.log, "deleting droplet"; "id" => id);
        let response = self
            .client
            .delete(self.url(&format!("/v2/droplets/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! A recording in-memory stand-in for the DigitalOcean API.

    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    pub struct FakeCloud {
        pub regions: Vec<String>,
        pub droplet_limit: usize,
        pub droplets: Mutex<Vec<Droplet>>,
        next_id: AtomicU64,
        /// Number of `list_droplets` calls after which new droplets report
        /// `active` and a public address.  Zero means immediately.
        pub activate_after_lists: usize,
        list_calls: AtomicUsize,
        pub create_calls: AtomicUsize,
        pub deleted: Mutex<Vec<u64>>,
    }

    impl FakeCloud {
        pub fn new() -> FakeCloud {
            FakeCloud {
                regions: vec!["sfo1".to_string(), "nyc1".to_string()],
                droplet_limit: 25,
                droplets: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(100),
                activate_after_lists: 0,
                list_calls: AtomicUsize::new(0),
                create_calls: AtomicUsize::new(0),
                deleted: Mutex::new(Vec::new()),
            }
        }

        pub fn with_existing(names: &[&str]) -> FakeCloud {
            let fake = FakeCloud::new();
            {
                let mut droplets = fake.droplets.lock().unwrap();
                for (i, name) in names.iter().enumerate() {
                    droplets.push(Droplet {
                        id: 1 + i as u64,
                        name: name.to_string(),
                        status: STATUS_ACTIVE.to_string(),
                        networks: Networks::default(),
                    });
                }
            }
            fake
        }
    }

    #[async_trait]
    impl CloudApi for FakeCloud {
        async fn regions(&self) -> Result<Vec<String>, CloudError> {
            Ok(self.regions.clone())
        }

        async fn droplet_limit(&self) -> Result<usize, CloudError> {
            Ok(self.droplet_limit)
        }

        async fn list_droplets(&self) -> Result<Vec<Droplet>, CloudError> {
            let calls = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let mut droplets = self.droplets.lock().unwrap();
            if calls > self.activate_after_lists {
                for droplet in droplets.iter_mut() {
                    if droplet.status == "new" {
                        droplet.status = STATUS_ACTIVE.to_string();
                        let octet = (droplet.id % 250) as u8;
                        droplet.networks.v4.push(NetworkV4 {
                            ip_address: IpAddr::V4(Ipv4Addr::new(
                                203, 0, 113, octet,
                            )),
                            kind: "public".to_string(),
                        });
                    }
                }
            }
            Ok(droplets.clone())
        }

        async fn create_droplet(
            &self,
            params: &CreateDroplet<'_>,
        ) -> Result<Droplet, CloudError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let droplet = Droplet {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                name: params.name.to_string(),
                status: "new".to_string(),
                networks: Networks::default(),
            };
            self.droplets.lock().unwrap().push(droplet.clone());
            Ok(droplet)
        }

        async fn delete_droplet(&self, id: u64) -> Result<(), CloudError> {
            self.deleted.lock().unwrap().push(id);
            self.droplets.lock().unwrap().retain(|d| d.id != id);
            Ok(())
        }
    }
}

use reqwest::blocking::Client;
use serde::Deserialize;
use std::fmt;

use crate::error::{AutomationError, AutomationResult};
use crate::secrets::ResolvedSecret;
use crate::utils::expect_success;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub variables: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<Inventory>,
}

pub trait InventorySource {
    fn inventory(&self, name: &str) -> AutomationResult<Option<Inventory>>;
}

pub struct TowerClient {
    base_url: String,
    username: String,
    password: ResolvedSecret,
    http: Client,
}

impl fmt::Debug for TowerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TowerClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl TowerClient {
    pub fn connect(
        base_url: &str,
        username: &str,
        password: ResolvedSecret,
    ) -> AutomationResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|err| AutomationError::http(base_url, err))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password,
            http,
        })
    }
}

impl InventorySource for TowerClient {
    fn inventory(&self, name: &str) -> AutomationResult<Option<Inventory>> {
        let url = format!("{}/api/v2/inventories/", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("name", name)])
            .basic_auth(&self.username, Some(self.password.expose()))
            .send()
            .map_err(|err| AutomationError::http(&url, err))?;
        let page: Page = expect_success(response, &url)?
            .json()
            .map_err(|err| AutomationError::http(&url, err))?;
        Ok(page.results.into_iter().find(|inventory| inventory.name == name))
    }
}

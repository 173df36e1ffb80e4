//! Client for the group/vehicle directory API.
//!
//! Pure request/response: every call POSTs a JSON body and receives a
//! `{status, data, err, msg}` envelope. A non-200 HTTP status or a
//! non-`SUCCESS` envelope status is a reportable failure; retry policy is
//! left to the caller (there is none in this service).

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("directory API error: {0}")]
    Api(String),
}

/// One node of the group hierarchy.
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub name: String,
    pub groupid: i64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub pgroupid: i64,
    #[serde(default)]
    pub pname: String,
    #[serde(default)]
    pub ppath: String,
}

/// A vehicle with its attached devices, as returned per group.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleData {
    #[serde(default)]
    pub vehicleid: i64,
    #[serde(default)]
    pub vehicleno: String,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub vehicleprefdata: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub deviceno: String,
    #[serde(default)]
    pub deviceid: i64,
    #[serde(default)]
    pub devicetype: String,
    #[serde(default)]
    pub simno: String,
    #[serde(default)]
    pub simid: i64,
    #[serde(default)]
    pub bindtag: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    err: String,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

pub struct DirectoryClient {
    http: Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(base_url: &str) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("fleetpack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Exchanges fixed credentials for a bearer token.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, DirectoryError> {
        let body = serde_json::json!({
            "user": {
                "type": "localuser",
                "username": username,
                "password": password,
            }
        });
        let data: TokenData = self.post_envelope("/gettoken", &body).await?;
        Ok(data.token)
    }

    /// Fetches the full group hierarchy visible to the token.
    pub async fn get_my_groups(&self, token: &str) -> Result<Vec<Group>, DirectoryError> {
        let body = serde_json::json!({ "token": token });
        self.post_envelope("/api/user/getmygroups", &body).await
    }

    /// Fetches the vehicle/device list for one group.
    pub async fn get_my_vehicles(
        &self,
        token: &str,
        group_id: i64,
    ) -> Result<Vec<VehicleData>, DirectoryError> {
        // The API takes the group id as a string field.
        let body = serde_json::json!({
            "token": token,
            "groupid": group_id.to_string(),
        });
        self.post_envelope("/api/vehicle/getmyvdsnew", &body).await
    }

    async fn post_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, DirectoryError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(DirectoryError::Status(resp.status()));
        }
        let envelope: Envelope<T> = resp.json().await?;
        if envelope.status != "SUCCESS" {
            return Err(DirectoryError::Api(envelope.err));
        }
        envelope
            .data
            .ok_or_else(|| DirectoryError::Api("missing data in SUCCESS response".to_string()))
    }
}

//! reqwest-backed EDGAR client

use super::types::{FilingIndex, Frame};
use super::FilingSource;
use crate::error::PipelineError;
use crate::models::FiscalQuarter;
use crate::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const SUBMISSIONS_BASE_URL: &str = "https://data.sec.gov/submissions";
const FRAMES_BASE_URL: &str = "https://data.sec.gov/api/xbrl/frames";
const FRAMES_TAXONOMY: &str = "us-gaap";
const FRAMES_UNIT: &str = "USD";

pub struct EdgarClient {
    client: Client,
    submissions_base_url: String,
    frames_base_url: String,
}

impl EdgarClient {
    /// `user_agent` must identify the requester (name and contact email).
    pub fn new(user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent.trim()).map_err(|e| {
                PipelineError::ConfigError(format!("Invalid SEC user agent: {}", e))
            })?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .gzip(true)
            .deflate(true)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            submissions_base_url: SUBMISSIONS_BASE_URL.to_string(),
            frames_base_url: FRAMES_BASE_URL.to_string(),
        })
    }

    pub fn submissions_url(&self, entity_id: &str) -> String {
        format!("{}/CIK{}.json", self.submissions_base_url, entity_id)
    }

    pub fn frame_url(&self, concept: &str, quarter: &FiscalQuarter) -> String {
        format!(
            "{}/{}/{}/{}/{}.json",
            self.frames_base_url,
            FRAMES_TAXONOMY,
            concept,
            FRAMES_UNIT,
            quarter.frame_period()
        )
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::TransportError(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::TransportError(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get(url).await?.bytes().await.map_err(|e| {
            PipelineError::TransportError(format!("Reading body of {} failed: {}", url, e))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl FilingSource for EdgarClient {
    async fn filing_index(&self, entity_id: &str) -> Result<FilingIndex> {
        self.get_json(&self.submissions_url(entity_id)).await
    }

    async fn frame(&self, concept: &str, quarter: &FiscalQuarter) -> Result<Frame> {
        self.get_json(&self.frame_url(concept, quarter)).await
    }

    async fn document(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.get(url).await?.bytes().await.map_err(|e| {
            PipelineError::TransportError(format!("Reading body of {} failed: {}", url, e))
        })?;
        Ok(bytes.to_vec())
    }
}

//! HTTP result source for the analysis API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::ResultSource;
use super::types::{Cursor, FetchResponse, JobId};
use crate::config::SourceConfig;
use crate::error::{ConfigError, Error, SourceError};

/// Queries `GET {base}/api/analysis/{job}/results?since={cursor}`.
pub struct HttpResultSource {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpResultSource {
    pub fn new(config: &SourceConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "PORTFOLIO_API_URL".to_string(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "PORTFOLIO_API_URL".to_string(),
                message: format!("{base_url} cannot be used as a base URL"),
            }
            .into());
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(SourceError::from)?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        })
    }

    fn results_url(&self, job_id: &JobId, since: Option<&Cursor>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "analysis", job_id.as_str(), "results"]);
        }
        if let Some(cursor) = since {
            url.query_pairs_mut().append_pair("since", cursor.as_str());
        }
        url
    }

    fn classify(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else {
            SourceError::from(e)
        }
    }
}

#[async_trait]
impl ResultSource for HttpResultSource {
    async fn fetch_results(
        &self,
        job_id: &JobId,
        since: Option<&Cursor>,
    ) -> Result<FetchResponse, SourceError> {
        let url = self.results_url(job_id, since);
        debug!(job_id = %job_id, url = %url, "Fetching analysis results");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response text".to_string());
            return Err(SourceError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<FetchResponse>()
            .await
            .map_err(|e| match self.classify(e) {
                SourceError::Request(msg) => SourceError::InvalidResponse(msg),
                other => other,
            })
    }
}

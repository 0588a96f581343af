// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A reporter that POSTs profiles to a collector.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use thiserror::Error;

use super::Reporter;

#[derive(Error, Debug)]
enum HttpReporterError {
    #[error("failed to serialize profiles: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to send profiles: {0}")]
    Request(#[from] reqwest::Error),
    #[error("collector responded with {0}")]
    Status(StatusCode),
}

/// A reporter that sends each batch as a JSON array in the body of a POST
/// request. Any non-2xx response is an error.
#[derive(Debug)]
pub struct HttpReporter {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HttpReporter {
    /// Instantiate a new HttpReporter posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        HttpReporter {
            client: reqwest::Client::new(),
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header to every request, e.g. an API key.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Uses a preconfigured client, e.g. one with a timeout or a proxy.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn report_profiles(
        &self,
        profiles: &[serde_json::Value],
    ) -> Result<(), HttpReporterError> {
        let body = serde_json::to_vec(profiles)?;
        let res = self
            .client
            .request(Method::POST, self.url.as_str())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(HttpReporterError::Status(status));
        }
        tracing::debug!(count = profiles.len(), %status, "sent profiles");
        Ok(())
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report(
        &self,
        profiles: &[serde_json::Value],
    ) -> Result<(), Box<dyn std::error::Error + Send>> {
        self.report_profiles(profiles)
            .await
            .map_err(|e| Box::new(e) as _)
    }
}

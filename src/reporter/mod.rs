// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Destinations for recorded profiles.

use std::fmt;

use async_trait::async_trait;

#[cfg(feature = "http")]
pub mod http;
pub mod local;
pub mod multi;

/// Abstraction around sending recorded profiles.
///
/// `profiles` holds one flush worth of serialized profiles, oldest first.
/// An error makes the recorder keep the batch and retry it after a backoff.
#[async_trait]
pub trait Reporter: fmt::Debug {
    /// Delivers a batch of profiles.
    async fn report(
        &self,
        profiles: &[serde_json::Value],
    ) -> Result<(), Box<dyn std::error::Error + Send>>;
}

/// A reporter that drops everything, used when no transport was configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

#[async_trait]
impl Reporter for NoopReporter {
    async fn report(
        &self,
        profiles: &[serde_json::Value],
    ) -> Result<(), Box<dyn std::error::Error + Send>> {
        tracing::warn!(
            count = profiles.len(),
            "no reporter configured, dropping profiles"
        );
        Ok(())
    }
}

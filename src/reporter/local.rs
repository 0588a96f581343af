// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A reporter that reports into a directory.

use async_trait::async_trait;
use chrono::SecondsFormat;
use std::path::PathBuf;
use std::sync::atomic::{self, AtomicU64};
use std::time::SystemTime;
use thiserror::Error;

use super::Reporter;

#[derive(Error, Debug)]
enum LocalReporterError {
    #[error("{0}")]
    IoError(#[from] std::io::Error),
    #[error("{0}")]
    Serialize(#[from] serde_json::Error),
}

/// A reporter that reports into a directory.
///
/// Each batch is written as a JSON array to `yyyy-mm-ddTHH-MM-SSZ.json`.
/// Every batch after the first one of this reporter gets its sequence number
/// as a `-N` suffix, so batches flushed within the same second never collide.
#[derive(Debug)]
pub struct LocalReporter {
    directory: PathBuf,
    sequence: AtomicU64,
}

impl LocalReporter {
    /// Instantiate a new LocalReporter writing into the provided directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        LocalReporter {
            directory: directory.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Writes the batch to disk.
    async fn report_profiles(
        &self,
        profiles: &[serde_json::Value],
    ) -> Result<(), LocalReporterError> {
        let time: chrono::DateTime<chrono::Utc> = SystemTime::now().into();
        let time = time
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .replace(":", "-");
        let file_name = match self.sequence.fetch_add(1, atomic::Ordering::Relaxed) {
            0 => format!("{time}.json"),
            n => format!("{time}-{n}.json"),
        };
        tracing::debug!(count = profiles.len(), "reporting {file_name}");
        let body = serde_json::to_vec(profiles)?;
        tokio::fs::write(self.directory.join(file_name), body).await?;
        Ok(())
    }
}

#[async_trait]
impl Reporter for LocalReporter {
    async fn report(
        &self,
        profiles: &[serde_json::Value],
    ) -> Result<(), Box<dyn std::error::Error + Send>> {
        self.report_profiles(profiles)
            .await
            .map_err(|e| Box::new(e) as _)
    }
}

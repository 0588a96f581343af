// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A reporter that fans out to several reporters.

use async_trait::async_trait;

use super::Reporter;

#[derive(Debug)]
/// A reporter that reports profiles to several destinations.
///
/// If one of the destinations errors, it will continue reporting to the other ones.
/// A failed batch is retried on every destination, so destinations that
/// succeeded may see it again.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter + Send + Sync>>,
}

impl MultiReporter {
    /// Create a new MultiReporter from a set of reporters
    pub fn new(reporters: Vec<Box<dyn Reporter + Send + Sync>>) -> Self {
        MultiReporter { reporters }
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn report(
        &self,
        profiles: &[serde_json::Value],
    ) -> Result<(), Box<dyn std::error::Error + Send>> {
        let errs = futures::future::join_all(
            self.reporters
                .iter()
                .map(|reporter| reporter.report(profiles)),
        )
        .await;
        // return the first error
        errs.into_iter().collect()
    }
}

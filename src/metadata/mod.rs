// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Identity of the profiled process.

/// Supplies the process id as seen from outside the process, e.g. the host
/// pid of a containerized process.
///
/// Returning `None` keeps the process' own pid. Any
/// `Fn() -> Option<String>` closure is a provider.
pub trait PidProvider: Send + Sync {
    /// The pid to report, if known.
    fn external_pid(&self) -> Option<String>;
}

impl<F> PidProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn external_pid(&self) -> Option<String> {
        self()
    }
}

/// The pid of this process, as reported in profiles.
pub(crate) fn process_id() -> String {
    std::process::id().to_string()
}

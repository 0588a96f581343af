// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A compare-and-swap boolean.

use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean that can only be flipped by whoever observes the opposite
/// state, used for idempotent start/stop and for the shared
/// "a sampler is active" flag.
#[derive(Debug, Default)]
pub struct Flag {
    value: AtomicBool,
}

impl Flag {
    /// Creates an unset flag.
    pub const fn new() -> Self {
        Self {
            value: AtomicBool::new(false),
        }
    }

    /// Sets the flag. Returns `true` if this call changed it.
    pub fn set_if_unset(&self) -> bool {
        self.value
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clears the flag. Returns `true` if this call changed it.
    pub fn unset_if_set(&self) -> bool {
        self.value
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the flag is currently set.
    pub fn is_set(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }
}

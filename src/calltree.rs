// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The call tree that every sampler aggregates into.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use serde::{ser::SerializeStruct, Serialize, Serializer};

#[derive(Debug, Default, Clone, Copy)]
struct Aggregate {
    measurement: f64,
    num_samples: i64,
}

/// A node of the call tree, identified by `(method_name, file_name, file_line)`.
///
/// Each node accumulates a measurement (CPU milliseconds, bytes or blocked
/// milliseconds, depending on the sampler) and a sample count, inclusive of
/// everything recorded below it. Children are keyed by [`CallSite::key`].
#[derive(Debug)]
pub struct CallSite {
    method_name: String,
    file_name: String,
    file_line: i64,
    aggregate: Mutex<Aggregate>,
    children: RwLock<HashMap<String, Arc<CallSite>>>,
}

impl CallSite {
    /// Creates an empty node.
    pub fn new(method_name: impl Into<String>, file_name: impl Into<String>, file_line: i64) -> Self {
        CallSite {
            method_name: method_name.into(),
            file_name: file_name.into(),
            file_line,
            aggregate: Mutex::new(Aggregate::default()),
            children: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the nameless node used as the root of a tree.
    pub fn root() -> Self {
        Self::new("", "", 0)
    }

    /// Identity key of a call site, e.g. `"main (src/main.rs:12)"`.
    pub fn key(method_name: &str, file_name: &str, file_line: i64) -> String {
        format!("{method_name} ({file_name}:{file_line})")
    }

    /// Returns the child with the given identity, inserting it if absent.
    pub fn find_or_add_child(&self, method_name: &str, file_name: &str, file_line: i64) -> Arc<CallSite> {
        let key = Self::key(method_name, file_name, file_line);
        if let Some(child) = self
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return child.clone();
        }

        // another writer may have inserted it between the two locks
        self.children
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| Arc::new(CallSite::new(method_name, file_name, file_line)))
            .clone()
    }

    /// Adds `value` to the measurement and `count` to the sample count.
    pub fn increment(&self, value: f64, count: i64) {
        let mut aggregate = self.aggregate.lock().unwrap_or_else(PoisonError::into_inner);
        aggregate.measurement += value;
        aggregate.num_samples += count;
    }

    /// The function name.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The source file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The source line.
    pub fn file_line(&self) -> i64 {
        self.file_line
    }

    /// The accumulated measurement of this node alone.
    pub fn measurement(&self) -> f64 {
        self.aggregate().measurement
    }

    /// The accumulated sample count of this node alone.
    pub fn num_samples(&self) -> i64 {
        self.aggregate().num_samples
    }

    /// A snapshot of the children, ordered by identity key.
    pub fn children(&self) -> Vec<Arc<CallSite>> {
        let children = self.children.read().unwrap_or_else(PoisonError::into_inner);
        let mut children: Vec<_> = children.iter().collect();
        children.sort_by(|a, b| a.0.cmp(b.0));
        children.into_iter().map(|(_, child)| child.clone()).collect()
    }

    /// Measurement and sample count summed over the direct children.
    ///
    /// Samplers add every sample to each node on its path, so for the root of
    /// a tree this is everything the tree recorded.
    pub fn totals(&self) -> (f64, i64) {
        self.children()
            .iter()
            .map(|child| child.aggregate())
            .fold((0.0, 0), |(m, n), child| (m + child.measurement, n + child.num_samples))
    }

    /// Depth-first search for the first descendant with the given method name.
    pub fn find_descendant(&self, method_name: &str) -> Option<Arc<CallSite>> {
        for child in self.children() {
            if child.method_name == method_name {
                return Some(child);
            }
            if let Some(found) = child.find_descendant(method_name) {
                return Some(found);
            }
        }
        None
    }

    fn aggregate(&self) -> Aggregate {
        *self.aggregate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Serialize for CallSite {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let aggregate = self.aggregate();
        let mut s = serializer.serialize_struct("CallSite", 6)?;
        s.serialize_field("method_name", &self.method_name)?;
        s.serialize_field("file_name", &self.file_name)?;
        s.serialize_field("file_line", &self.file_line)?;
        s.serialize_field("measurement", &aggregate.measurement)?;
        s.serialize_field("num_samples", &aggregate.num_samples)?;
        s.serialize_field("children", &self.children())?;
        s.end()
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decoding of pprof-format profiles into a flat, resolved sample list.
//!
//! The raw profiling engines hand the samplers pprof protobuf bytes, either
//! plain or gzip-compressed. [`RawProfile::decode`] resolves every sample's
//! location ids into [`Frame`]s so that the samplers only deal with
//! names, files and lines.

use std::{
    collections::HashMap,
    io::{self, Read},
};

use flate2::read::GzDecoder;
use prost::Message;
use thiserror::Error;

pub(crate) mod proto;
#[cfg(test)]
pub(crate) mod testing;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Failure to turn raw profiler output into a [`RawProfile`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ParseError {
    /// The bytes are not a valid pprof protobuf.
    #[error("malformed pprof data: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The gzip envelope could not be read.
    #[error("decompressing profile: {0}")]
    Io(#[from] io::Error),
    /// A sample refers to a location that is not in the profile.
    #[error("sample references unknown location {0}")]
    UnknownLocation(u64),
    /// A message refers to a string table entry that does not exist.
    #[error("string table index {0} out of range")]
    UnknownString(i64),
}

/// A named column of [`RawSample::values`], e.g. `cpu/nanoseconds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleType {
    /// Column name: `samples`, `cpu`, `inuse_space`, `contentions`, `delay`...
    pub kind: String,
    /// Unit of the column.
    pub unit: String,
}

/// A resolved source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Function name.
    pub function_name: String,
    /// Source file.
    pub file_name: String,
    /// Source line.
    pub line: i64,
}

/// A program location of a sample's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Instruction address, 0 when unknown.
    pub address: u64,
    /// Source positions at this address, inlined callee first.
    pub lines: Vec<Frame>,
}

impl Location {
    /// The position used for call-tree aggregation.
    pub fn frame(&self) -> Option<&Frame> {
        self.lines.first()
    }
}

/// A single stack with its measured values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    /// The stack, leaf first.
    pub locations: Vec<Location>,
    /// One value per [`RawProfile::sample_types`] column.
    pub values: Vec<i64>,
}

impl RawSample {
    /// A key identifying the stack across successive snapshots.
    ///
    /// Addresses are used when known, falling back to the frame identity.
    pub fn stack_key(&self) -> String {
        self.locations
            .iter()
            .map(|location| match (location.address, location.frame()) {
                (0, Some(frame)) => format!(
                    "{} ({}:{})",
                    frame.function_name, frame.file_name, frame.line
                ),
                (address, _) => format!("{address:x}"),
            })
            .collect::<Vec<_>>()
            .join(":")
    }

    /// The value of column `index`, or 0 if the sample is short.
    pub fn value(&self, index: usize) -> i64 {
        self.values.get(index).copied().unwrap_or(0)
    }
}

/// A decoded pprof profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawProfile {
    /// Names of the value columns.
    pub sample_types: Vec<SampleType>,
    /// The samples.
    pub samples: Vec<RawSample>,
    /// Collection time, nanoseconds since the epoch, 0 if unknown.
    pub time_nanos: i64,
    /// Collection duration in nanoseconds, 0 if unknown.
    pub duration_nanos: i64,
}

impl RawProfile {
    /// Decodes plain or gzip-compressed pprof protobuf bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut inflated)?;
            Self::from_proto(proto::Profile::decode(inflated.as_slice())?)
        } else {
            Self::from_proto(proto::Profile::decode(bytes)?)
        }
    }

    /// Index of the value column named `kind`.
    pub fn value_index(&self, kind: &str) -> Option<usize> {
        self.sample_types.iter().position(|t| t.kind == kind)
    }

    fn from_proto(profile: proto::Profile) -> Result<Self, ParseError> {
        let strings = &profile.string_table;
        let string = |index: i64| -> Result<String, ParseError> {
            usize::try_from(index)
                .ok()
                .and_then(|i| strings.get(i))
                .cloned()
                .ok_or(ParseError::UnknownString(index))
        };

        let mut functions = HashMap::with_capacity(profile.function.len());
        for function in &profile.function {
            functions.insert(function.id, (string(function.name)?, string(function.filename)?));
        }

        let mut locations = HashMap::with_capacity(profile.location.len());
        for location in &profile.location {
            let lines = location
                .line
                .iter()
                .filter_map(|line| {
                    functions.get(&line.function_id).map(|(name, file)| Frame {
                        function_name: name.clone(),
                        file_name: file.clone(),
                        line: line.line,
                    })
                })
                .collect();
            locations.insert(
                location.id,
                Location {
                    address: location.address,
                    lines,
                },
            );
        }

        let sample_types = profile
            .sample_type
            .iter()
            .map(|t| {
                Ok(SampleType {
                    kind: string(t.ty)?,
                    unit: string(t.unit)?,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        let samples = profile
            .sample
            .iter()
            .map(|sample| {
                let locations = sample
                    .location_id
                    .iter()
                    .map(|id| {
                        locations
                            .get(id)
                            .cloned()
                            .ok_or(ParseError::UnknownLocation(*id))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RawSample {
                    locations,
                    values: sample.value.clone(),
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(RawProfile {
            sample_types,
            samples,
            time_nanos: profile.time_nanos,
            duration_nanos: profile.duration_nanos,
        })
    }
}

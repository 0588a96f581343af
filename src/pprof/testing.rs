// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Builds pprof protobuf bytes for tests.

use std::collections::HashMap;

use prost::Message;

use super::proto;

/// Builds a pprof profile from stacks of `(function, file, line)`, leaf first.
#[derive(Debug, Default, Clone)]
pub(crate) struct ProfileBuilder {
    profile: proto::Profile,
    strings: HashMap<String, i64>,
    locations: HashMap<(String, String, i64), u64>,
}

impl ProfileBuilder {
    pub(crate) fn new(sample_types: &[(&str, &str)]) -> Self {
        let mut builder = ProfileBuilder::default();
        builder.string("");
        for (ty, unit) in sample_types {
            let value_type = proto::ValueType {
                ty: builder.string(ty),
                unit: builder.string(unit),
            };
            builder.profile.sample_type.push(value_type);
        }
        builder
    }

    pub(crate) fn sample(&mut self, stack: &[(&str, &str, i64)], values: &[i64]) -> &mut Self {
        let location_id = stack
            .iter()
            .map(|(function, file, line)| self.location(function, file, *line))
            .collect();
        self.profile.sample.push(proto::Sample {
            location_id,
            value: values.to_vec(),
        });
        self
    }

    pub(crate) fn into_proto(self) -> proto::Profile {
        self.profile
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        self.profile.encode_to_vec()
    }

    fn string(&mut self, s: &str) -> i64 {
        if let Some(index) = self.strings.get(s) {
            return *index;
        }
        let index = self.profile.string_table.len() as i64;
        self.profile.string_table.push(s.to_owned());
        self.strings.insert(s.to_owned(), index);
        index
    }

    fn location(&mut self, function: &str, file: &str, line: i64) -> u64 {
        let key = (function.to_owned(), file.to_owned(), line);
        if let Some(id) = self.locations.get(&key) {
            return *id;
        }
        let id = self.profile.location.len() as u64 + 1;
        let function = proto::Function {
            id,
            name: self.string(function),
            system_name: 0,
            filename: self.string(file),
        };
        self.profile.function.push(function);
        self.profile.location.push(proto::Location {
            id,
            address: 0x1000 + id * 0x10,
            line: vec![proto::Line {
                function_id: id,
                line,
            }],
        });
        self.locations.insert(key, id);
        id
    }
}

// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Object tags

use std::collections::BTreeMap;

/// Maximum number of tags attached to a single object
pub const MAX_TAGS: usize = 10;

/// Maximum length in bytes of a tag key
pub const MAX_KEY_LEN: usize = 128;

/// Maximum length in bytes of a tag value
pub const MAX_VALUE_LEN: usize = 256;

/// Error returned by [`TagSet::validate`]
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("Too many tags: {count} exceeds the limit of {MAX_TAGS}")]
    TooMany { count: usize },

    #[error("Invalid tag key \"{key}\"")]
    InvalidKey { key: String },

    #[error("Invalid value \"{value}\" for tag \"{key}\"")]
    InvalidValue { key: String, value: String },
}

fn valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '+' | '-' | '.' | '/' | ':' | '=' | '_')
}

/// A set of string key-value pairs attached to an object
///
/// Keys are unique, and iteration is in key order. A [`TagSet`] is written
/// alongside the payload of an object and replaced wholesale by every
/// subsequent write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Create an empty [`TagSet`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag, replacing any existing value for `key`
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`Self::push`]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Returns the value of the tag `key` if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the tags in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Checks the number of tags and the length and character set of every
    /// key and value
    pub fn validate(&self) -> Result<(), Error> {
        if self.0.len() > MAX_TAGS {
            return Err(Error::TooMany {
                count: self.0.len(),
            });
        }
        for (key, value) in &self.0 {
            if key.is_empty() || key.len() > MAX_KEY_LEN || !key.chars().all(valid_char) {
                return Err(Error::InvalidKey { key: key.clone() });
            }
            if value.len() > MAX_VALUE_LEN || !value.chars().all(valid_char) {
                return Err(Error::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for TagSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

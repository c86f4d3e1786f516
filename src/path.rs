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

//! Object keys

use std::borrow::Cow;
use std::fmt::Formatter;

use itertools::Itertools;
use percent_encoding::{percent_encode, AsciiSet, CONTROLS};

/// The delimiter separating the segments of a key
pub const DELIMITER: &str = "/";

/// Characters percent encoded when building a [`Path`] from an arbitrary string
const UNSAFE: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'#')
    .add(b'?')
    .add(b'*')
    .add(b'|')
    .add(b'{')
    .add(b'}')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'~')
    .add(b'`');

/// Error returned by [`Path::parse`]
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("Path \"{path}\" contained empty path segment")]
    EmptySegment { path: String },

    #[error("Path \"{path}\" contained illegal segment \"{segment}\"")]
    BadSegment { path: String, segment: String },
}

/// A single segment of a [`Path`]
///
/// A segment never contains the delimiter, an ASCII control character, and is
/// never one of the relative segments `.` or `..`
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct PathPart<'a> {
    raw: Cow<'a, str>,
}

impl<'a> From<&'a str> for PathPart<'a> {
    fn from(v: &'a str) -> Self {
        let raw = match v {
            "." => "%2E".into(),
            ".." => "%2E%2E".into(),
            other => percent_encode(other.as_bytes(), UNSAFE).into(),
        };
        Self { raw }
    }
}

impl From<String> for PathPart<'static> {
    fn from(s: String) -> Self {
        Self {
            raw: Cow::Owned(PathPart::from(s.as_str()).raw.into_owned()),
        }
    }
}

impl AsRef<str> for PathPart<'_> {
    fn as_ref(&self) -> &str {
        self.raw.as_ref()
    }
}

/// The key of an object within a backing store
///
/// Keys are `/` delimited, carry no leading or trailing delimiter and no empty
/// segments. Constructing a [`Path`] with [`Path::from`] percent encodes any
/// unsafe characters, whereas [`Path::parse`] accepts an already encoded key
/// and rejects one that is malformed.
///
/// ```
/// # use tagstore::path::Path;
/// assert_eq!(Path::from("repro//sample.dat").as_ref(), "repro/sample.dat");
/// assert_eq!(Path::from("a/../b").as_ref(), "a/%2E%2E/b");
/// assert_eq!(Path::from_iter(["sources", "x/y"]).as_ref(), "sources/x%2Fy");
/// Path::parse("sources//sample.dat").unwrap_err();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Path {
    raw: String,
}

impl Path {
    /// Parse an already encoded key, stripping a single leading and trailing `/`
    pub fn parse(path: impl AsRef<str>) -> Result<Self, Error> {
        let path = path.as_ref();
        let stripped = path.strip_prefix(DELIMITER).unwrap_or(path);
        if stripped.is_empty() {
            return Ok(Self::default());
        }
        let stripped = stripped.strip_suffix(DELIMITER).unwrap_or(stripped);

        for segment in stripped.split(DELIMITER) {
            if segment.is_empty() {
                return Err(Error::EmptySegment { path: path.into() });
            }
            if segment == "." || segment == ".." || segment.chars().any(|c| c.is_ascii_control())
            {
                return Err(Error::BadSegment {
                    path: path.into(),
                    segment: segment.into(),
                });
            }
        }

        Ok(Self {
            raw: stripped.to_string(),
        })
    }

    /// Returns the segments of this [`Path`]
    pub fn parts(&self) -> impl Iterator<Item = PathPart<'_>> {
        self.raw
            .split(DELIMITER)
            .filter(|s| !s.is_empty())
            .map(|s| PathPart { raw: s.into() })
    }

    /// Returns the segments of this [`Path`] following `prefix`, or `None`
    /// if `prefix` is not a segment-wise prefix of this path
    pub fn prefix_match(&self, prefix: &Self) -> Option<impl Iterator<Item = PathPart<'_>> + '_> {
        let mut parts = self.parts();
        for expected in prefix.parts() {
            if parts.next()? != expected {
                return None;
            }
        }
        Some(parts)
    }

    /// Creates a new child of this [`Path`]
    pub fn child<'a>(&self, child: impl Into<PathPart<'a>>) -> Self {
        let child = child.into();
        let raw = match self.raw.is_empty() {
            true => child.raw.into_owned(),
            false => format!("{}{}{}", self.raw, DELIMITER, child.raw),
        };
        Self { raw }
    }

    /// Returns a new [`Path`] with the segments of `other` appended to this one
    pub fn join(&self, other: &Self) -> Self {
        Self {
            raw: self.parts().chain(other.parts()).map(|p| p.raw).join(DELIMITER),
        }
    }

    /// Returns true if this path has no segments
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Self::from_iter(path.split(DELIMITER))
    }
}

impl From<String> for Path {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.raw
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.raw.fmt(f)
    }
}

impl<'a, I> FromIterator<I> for Path
where
    I: Into<PathPart<'a>>,
{
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        let raw = iter
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.raw.is_empty())
            .map(|s| s.raw)
            .join(DELIMITER);

        Self { raw }
    }
}

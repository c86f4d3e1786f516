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

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::reader::RetryableReader;
use crate::Result;

/// A cheaply cloneable, ordered collection of [`Bytes`]
#[derive(Debug, Clone)]
pub struct PutPayload(Arc<[Bytes]>);

impl Default for PutPayload {
    fn default() -> Self {
        Self(Arc::new([]))
    }
}

impl PutPayload {
    /// Create a new empty [`PutPayload`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total length of the [`Bytes`] in this payload
    pub fn content_length(&self) -> usize {
        self.0.iter().map(Bytes::len).sum()
    }

    /// Returns an iterator over the [`Bytes`] in this payload
    pub fn iter(&self) -> std::slice::Iter<'_, Bytes> {
        self.0.iter()
    }
}

impl AsRef<[Bytes]> for PutPayload {
    fn as_ref(&self) -> &[Bytes] {
        self.0.as_ref()
    }
}

impl From<Bytes> for PutPayload {
    fn from(value: Bytes) -> Self {
        Self(Arc::new([value]))
    }
}

impl From<Vec<u8>> for PutPayload {
    fn from(value: Vec<u8>) -> Self {
        Bytes::from(value).into()
    }
}

impl From<&'static str> for PutPayload {
    fn from(value: &'static str) -> Self {
        Bytes::from(value).into()
    }
}

impl From<&'static [u8]> for PutPayload {
    fn from(value: &'static [u8]) -> Self {
        Bytes::from(value).into()
    }
}

impl From<String> for PutPayload {
    fn from(value: String) -> Self {
        Bytes::from(value).into()
    }
}

impl FromIterator<Bytes> for PutPayload {
    fn from_iter<T: IntoIterator<Item = Bytes>>(iter: T) -> Self {
        Self(iter.into_iter().filter(|b| !b.is_empty()).collect())
    }
}

impl From<PutPayload> for Bytes {
    fn from(value: PutPayload) -> Self {
        match value.0.len() {
            0 => Self::new(),
            1 => value.0[0].clone(),
            _ => {
                let mut buf = Vec::with_capacity(value.content_length());
                value.iter().for_each(|x| buf.extend_from_slice(x));
                buf.into()
            }
        }
    }
}

/// The source of the bytes written by an upload
///
/// A [`PayloadSource::Buffered`] payload is already in memory and may be
/// replayed. A [`PayloadSource::Stream`] is consumed exactly once, from start
/// to finish, and its length is never queried up front.
pub enum PayloadSource {
    /// An in-memory payload
    Buffered(PutPayload),
    /// A single-pass stream of bytes
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl std::fmt::Debug for PayloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(p) => write!(f, "PayloadSource::Buffered({} bytes)", p.content_length()),
            Self::Stream(_) => write!(f, "PayloadSource::Stream"),
        }
    }
}

impl PayloadSource {
    /// Create a [`PayloadSource`] from a stream of bytes
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Returns true if this source can be read more than once
    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Buffered(_))
    }
}

impl From<PutPayload> for PayloadSource {
    fn from(value: PutPayload) -> Self {
        Self::Buffered(value)
    }
}

impl From<Bytes> for PayloadSource {
    fn from(value: Bytes) -> Self {
        Self::Buffered(value.into())
    }
}

impl From<Vec<u8>> for PayloadSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Buffered(value.into())
    }
}

impl From<&'static str> for PayloadSource {
    fn from(value: &'static str) -> Self {
        Self::Buffered(value.into())
    }
}

impl From<String> for PayloadSource {
    fn from(value: String) -> Self {
        Self::Buffered(value.into())
    }
}

impl From<RetryableReader> for PayloadSource {
    fn from(value: RetryableReader) -> Self {
        Self::Stream(value.into_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_payload() {
        let payload: PutPayload = [
            Bytes::from_static(b"sam"),
            Bytes::new(),
            Bytes::from_static(b"ple"),
        ]
        .into_iter()
        .collect();

        assert_eq!(payload.as_ref().len(), 2);
        assert_eq!(payload.content_length(), 6);
        assert_eq!(Bytes::from(payload), Bytes::from_static(b"sample"));

        assert_eq!(Bytes::from(PutPayload::new()), Bytes::new());
    }

    #[test]
    fn test_replayable() {
        assert!(PayloadSource::from("sample").is_replayable());
        let stream = futures::stream::iter([Ok(Bytes::from_static(b"sample"))]);
        let source = PayloadSource::from_stream(stream);
        assert!(!source.is_replayable());
        assert_eq!(format!("{source:?}"), "PayloadSource::Stream");
    }
}

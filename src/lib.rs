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

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! # tagstore
//!
//! Conditional, tag-aware object storage with resumable streaming reads and
//! streaming writes.
//!
//! A [`Container`] wraps a backing [`ObjectStore`] and exposes `get`, `put`,
//! `exists`, `head` and `delete` over a single namespace:
//!
//! * [`Container::get`] returns a [`RetryableReader`] that streams the object
//!   and transparently resumes from the last delivered offset after a
//!   transient failure.
//! * [`Container::put`] streams a payload to the store in fixed-size parts,
//!   attaching a [`TagSet`] and, optionally, gating the write on a
//!   [`TagCondition`] evaluated against the tags of the object being replaced.
//!
//! Streaming the result of a `get` straight into a conditional `put` is a
//! first-class pattern: the source stream is read exactly once, sequentially,
//! and never buffered in full.
//!
//! ```
//! # async fn example() -> tagstore::Result<()> {
//! use std::sync::Arc;
//! use tagstore::memory::InMemory;
//! use tagstore::{Container, TagSet, UploadRequest};
//!
//! let store = Arc::new(InMemory::new());
//! let sources = Container::new(store.clone(), "sources");
//! let repro = Container::new(store, "repro");
//!
//! sources.put(UploadRequest::new("sample.dat", "sample")).await?;
//!
//! // Stream one object into another, only if the destination's
//! // "MyTag" is less than 1
//! let reader = sources.get("sample.dat").await?;
//! let request = UploadRequest::new("copy.dat", reader)
//!     .with_tags(TagSet::new().with_tag("MyTag", "1"))
//!     .with_condition(r#""MyTag" < '1'"#);
//!
//! match repro.put(request).await {
//!     Ok(version) => println!("written {version:?}"),
//!     Err(e) if e.is_condition_not_met() => println!("skipped"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunked;
pub mod condition;
pub mod config;
mod container;
pub mod fault;
pub mod memory;
pub mod path;
mod payload;
pub mod reader;
mod retry;
pub mod tags;
pub mod throttle;
mod upload;
pub mod writer;

#[cfg(test)]
mod integration;

pub use condition::{ConditionEvaluator, TagCondition};
pub use config::{ContainerBuilder, ContainerConfigKey};
pub use container::Container;
pub use payload::{PayloadSource, PutPayload};
pub use reader::RetryableReader;
pub use retry::{BackoffConfig, RetryConfig};
pub use tags::TagSet;
pub use upload::{MultipartUpload, PartWriter, UploadPart};
pub use writer::{ObjectWriter, UploadRequest, WriterOptions};

use std::fmt::{Debug, Formatter};
use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::path::Path;

/// An alias for a dynamically dispatched object store implementation.
pub type DynObjectStore = dyn ObjectStore;

/// The backing store holding objects, their tags and versions
///
/// This is the boundary to a concrete storage service; its transport and
/// authentication are the implementor's concern. Implementations must
/// enforce [`PutMode`] atomically when a write is committed.
#[async_trait]
pub trait ObjectStore: std::fmt::Display + Send + Sync + Debug + 'static {
    /// Save the provided `payload` to `location`, replacing any existing object
    async fn put(&self, location: &Path, payload: PutPayload) -> Result<PutResult> {
        self.put_opts(location, payload, PutOptions::default())
            .await
    }

    /// Save the provided `payload` to `location` with the given options
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult>;

    /// Begin a multipart upload to `location`
    async fn put_multipart(&self, location: &Path) -> Result<Box<dyn MultipartUpload>> {
        self.put_multipart_opts(location, PutMultipartOpts::default())
            .await
    }

    /// Begin a multipart upload to `location` with the given options
    ///
    /// The [`PutMode`] is enforced atomically by [`MultipartUpload::complete`].
    /// Stores may additionally reject an upload whose mode is already known to
    /// be unsatisfiable, before any part is written.
    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>>;

    /// Return the object stored at `location`
    async fn get(&self, location: &Path) -> Result<GetResult> {
        self.get_opts(location, GetOptions::default()).await
    }

    /// Perform a get request with options
    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult>;

    /// Return the metadata, including tags, of the object at `location`
    async fn head(&self, location: &Path) -> Result<ObjectMeta>;

    /// Delete the object at `location`
    ///
    /// Deleting a missing object is not an error
    async fn delete(&self, location: &Path) -> Result<()>;
}

/// The metadata that describes an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// The full path to the object
    pub location: Path,
    /// The last modified time
    pub last_modified: DateTime<Utc>,
    /// The size in bytes of the object
    pub size: u64,
    /// The unique identifier for the object
    ///
    /// <https://datatracker.ietf.org/doc/html/rfc9110#name-etag>
    pub e_tag: Option<String>,
    /// A version indicator for this object
    pub version: Option<String>,
    /// The tags attached to the object
    pub tags: TagSet,
}

/// Request only a portion of an object's bytes
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GetRange {
    /// The bytes `start..end`
    Bounded(Range<u64>),
    /// All bytes from the given offset onwards
    ///
    /// An offset equal to the object size yields an empty range
    Offset(u64),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum InvalidGetRange {
    #[error("Wanted range starting at {requested}, but object was only {length} bytes long")]
    StartTooLarge { requested: u64, length: u64 },

    #[error("Range started at {start} and ended at {end}")]
    Inconsistent { start: u64, end: u64 },
}

impl GetRange {
    /// Convert to a [`Range`] within an object of `len` bytes
    pub(crate) fn as_range(&self, len: u64) -> Result<Range<u64>, InvalidGetRange> {
        match self {
            Self::Bounded(r) => {
                if r.end <= r.start {
                    Err(InvalidGetRange::Inconsistent {
                        start: r.start,
                        end: r.end,
                    })
                } else if r.start >= len {
                    Err(InvalidGetRange::StartTooLarge {
                        requested: r.start,
                        length: len,
                    })
                } else {
                    Ok(r.start..r.end.min(len))
                }
            }
            Self::Offset(o) => match *o > len {
                true => Err(InvalidGetRange::StartTooLarge {
                    requested: *o,
                    length: len,
                }),
                false => Ok(*o..len),
            },
        }
    }
}

impl From<Range<u64>> for GetRange {
    fn from(value: Range<u64>) -> Self {
        Self::Bounded(value)
    }
}

/// Options for a get request
#[derive(Debug, Default, Clone)]
pub struct GetOptions {
    /// Fail with [`Error::Precondition`] unless the object's e-tag matches
    pub if_match: Option<String>,
    /// Request a subset of the object's bytes
    pub range: Option<GetRange>,
}

impl GetOptions {
    /// Returns an error if the preconditions on this request are not satisfied
    pub fn check_preconditions(&self, meta: &ObjectMeta) -> Result<()> {
        if let Some(expected) = &self.if_match {
            if meta.e_tag.as_ref() != Some(expected) {
                return Err(Error::Precondition {
                    path: meta.location.to_string(),
                    source: format!("{expected} does not match {:?}", meta.e_tag).into(),
                });
            }
        }
        Ok(())
    }
}

/// Result for a get request
pub struct GetResult {
    /// The object's bytes, from `range.start` to `range.end`
    pub payload: BoxStream<'static, Result<Bytes>>,
    /// The [`ObjectMeta`] for this object
    pub meta: ObjectMeta,
    /// The range of bytes returned by this request
    pub range: Range<u64>,
}

impl Debug for GetResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetResult")
            .field("meta", &self.meta)
            .field("range", &self.range)
            .finish()
    }
}

impl GetResult {
    /// Collects the data into a [`Bytes`]
    pub async fn bytes(self) -> Result<Bytes> {
        let mut stream = self.payload.fuse();
        let first = match stream.next().await.transpose()? {
            Some(first) => first,
            None => return Ok(Bytes::new()),
        };

        // Avoid copying if single chunk
        match stream.next().await.transpose()? {
            None => Ok(first),
            Some(second) => {
                let len = (self.range.end - self.range.start) as usize;
                let mut buf = Vec::with_capacity(len);
                buf.extend_from_slice(&first);
                buf.extend_from_slice(&second);
                while let Some(maybe_bytes) = stream.next().await {
                    buf.extend_from_slice(&maybe_bytes?);
                }
                Ok(buf.into())
            }
        }
    }

    /// Converts this into a byte stream
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        self.payload
    }
}

/// Configure preconditions for the put operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Perform an atomic write operation, overwriting any object present at the provided path
    #[default]
    Overwrite,
    /// Perform an atomic write operation, returning [`Error::AlreadyExists`] if an
    /// object already exists at the provided path
    Create,
    /// Perform an atomic write operation if the current version of the object matches the
    /// provided [`UpdateVersion`], returning [`Error::Precondition`] otherwise
    Update(UpdateVersion),
}

/// Uniquely identifies a version of an object to update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateVersion {
    /// The unique identifier for the newly created object
    ///
    /// <https://datatracker.ietf.org/doc/html/rfc9110#name-etag>
    pub e_tag: Option<String>,
    /// A version indicator for the newly created object
    pub version: Option<String>,
}

impl From<PutResult> for UpdateVersion {
    fn from(value: PutResult) -> Self {
        Self {
            e_tag: value.e_tag,
            version: value.version,
        }
    }
}

impl From<&ObjectMeta> for UpdateVersion {
    fn from(value: &ObjectMeta) -> Self {
        Self {
            e_tag: value.e_tag.clone(),
            version: value.version.clone(),
        }
    }
}

/// Options for a put request
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Configure the [`PutMode`] for this operation
    pub mode: PutMode,
    /// The tags to attach to the written object
    pub tags: TagSet,
}

impl From<PutMode> for PutOptions {
    fn from(mode: PutMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

/// Options for [`ObjectStore::put_multipart_opts`]
#[derive(Debug, Clone, Default)]
pub struct PutMultipartOpts {
    /// Configure the [`PutMode`] enforced when the upload is completed
    pub mode: PutMode,
    /// The tags to attach to the written object
    pub tags: TagSet,
}

impl From<PutMode> for PutMultipartOpts {
    fn from(mode: PutMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

/// Result for a put request, identifying the version written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// The unique identifier for the newly created object
    ///
    /// <https://datatracker.ietf.org/doc/html/rfc9110#name-etag>
    pub e_tag: Option<String>,
    /// A version indicator for the newly created object
    pub version: Option<String>,
}

/// The version of an object produced by a successful write
pub type ObjectVersion = PutResult;

/// A specialized `Result` for tagstore errors
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized `Error` for tagstore errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A fatal error reported by a backing store
    #[error("Generic {store} error: {source}")]
    Generic {
        /// The store reporting the error
        store: &'static str,
        /// The wrapped error
        source: BoxError,
    },

    /// A failure of a single request that may succeed if retried, such as a
    /// timeout or reset connection
    #[error("Transient {store} error: {source}")]
    Transient {
        /// The store reporting the error
        store: &'static str,
        /// The wrapped error
        source: BoxError,
    },

    /// The object does not exist
    #[error("Object at location {path} not found: {source}")]
    NotFound {
        /// The path to the object
        path: String,
        /// The wrapped error
        source: BoxError,
    },

    /// The caller is not permitted to perform the operation
    #[error("Permission denied for {path}: {source}")]
    PermissionDenied {
        /// The path to the object
        path: String,
        /// The wrapped error
        source: BoxError,
    },

    /// A [`PutMode::Create`] write found an existing object
    #[error("Object at location {path} already exists: {source}")]
    AlreadyExists {
        /// The path to the object
        path: String,
        /// The wrapped error
        source: BoxError,
    },

    /// A version precondition, e.g. [`PutMode::Update`] or
    /// [`GetOptions::if_match`], did not hold
    #[error("Request precondition failure for path {path}: {source}")]
    Precondition {
        /// The path to the object
        path: String,
        /// The wrapped error
        source: BoxError,
    },

    /// A read kept failing transiently until its retry budget was exhausted
    #[error("Reading {path} failed after {retries} retries: {source}")]
    TransientReadFailure {
        /// The path to the object
        path: String,
        /// The number of retries performed
        retries: usize,
        /// The last failure
        source: Box<Error>,
    },

    /// A read failed in a way retrying cannot fix
    #[error("Reading {path} failed: {source}")]
    FatalReadFailure {
        /// The path to the object
        path: String,
        /// The failure
        source: Box<Error>,
    },

    /// A tag condition could not be parsed
    #[error("Invalid tag condition {predicate:?}: {reason}")]
    InvalidPredicateSyntax {
        /// The condition as provided
        predicate: String,
        /// What was wrong with it
        reason: String,
    },

    /// A conditional write was rejected because the destination's tags did
    /// not satisfy the condition, or changed before the write committed
    ///
    /// The object at `path` is left unchanged
    #[error("Condition {condition} not met for {path}")]
    ConditionNotMet {
        /// The path to the object
        path: String,
        /// The condition that was not met
        condition: String,
    },

    /// A [`TagSet`] exceeded the limits on tags
    #[error("Invalid tags: {source}")]
    InvalidTags {
        /// The validation failure
        #[from]
        source: tags::Error,
    },

    /// An unrecognised configuration key
    #[error("Configuration key: '{key}' is not valid for store '{store}'.")]
    UnknownConfigurationKey {
        /// The component being configured
        store: &'static str,
        /// The unrecognised key
        key: String,
    },

    /// A configuration value could not be parsed
    #[error("failed to parse \"{value}\" for configuration key \"{key}\": {reason}")]
    InvalidConfigValue {
        /// The configuration key
        key: &'static str,
        /// The value as provided
        value: String,
        /// Why it could not be parsed
        reason: String,
    },
}

impl Error {
    /// Returns true if this is a [`Error::ConditionNotMet`]
    ///
    /// A condition not being met is an expected outcome of a conditional
    /// write, callers will usually want to branch on it
    pub fn is_condition_not_met(&self) -> bool {
        matches!(self, Self::ConditionNotMet { .. })
    }

    /// Returns true if this is a [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the failed request may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

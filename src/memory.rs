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

//! An in-memory object store implementation
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use tracing::debug;

use crate::tags::TagSet;
use crate::{
    path::Path, GetOptions, GetResult, InvalidGetRange, MultipartUpload, ObjectMeta,
    ObjectStore, PutMode, PutMultipartOpts, PutOptions, PutPayload, PutResult, Result,
    UpdateVersion, UploadPart,
};

/// A specialized `Error` for in-memory object store-related errors
#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("No data in memory found. Location: {path}")]
    NoDataInMemory { path: String },

    #[error("Invalid range: {source}")]
    Range { source: InvalidGetRange },

    #[error("Object already exists at that location: {path}")]
    AlreadyExists { path: String },

    #[error("Object at location {path} not found")]
    UpdateMissing { path: String },

    #[error("ETag {expected:?} does not match {existing}")]
    ETagMismatch {
        expected: Option<String>,
        existing: String,
    },
}

impl From<Error> for crate::Error {
    fn from(source: Error) -> Self {
        match source {
            Error::NoDataInMemory { ref path } => Self::NotFound {
                path: path.into(),
                source: source.into(),
            },
            Error::AlreadyExists { ref path } => Self::AlreadyExists {
                path: path.into(),
                source: source.into(),
            },
            _ => Self::Generic {
                store: "InMemory",
                source: Box::new(source),
            },
        }
    }
}

fn precondition(location: &Path, source: Error) -> crate::Error {
    crate::Error::Precondition {
        path: location.to_string(),
        source: Box::new(source),
    }
}

/// In-memory storage suitable for testing or for opting out of using a cloud
/// storage provider.
///
/// Every write, including the completion of a multipart upload, takes effect
/// atomically under a single lock, and [`PutMode`] is checked within that
/// same critical section.
#[derive(Debug, Default)]
pub struct InMemory {
    storage: SharedStorage,
}

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    tags: TagSet,
    last_modified: DateTime<Utc>,
    e_tag: usize,
}

impl Entry {
    fn meta(&self, location: &Path) -> ObjectMeta {
        ObjectMeta {
            location: location.clone(),
            last_modified: self.last_modified,
            size: self.data.len() as u64,
            e_tag: Some(self.e_tag.to_string()),
            version: None,
            tags: self.tags.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Storage {
    next_etag: usize,
    map: BTreeMap<Path, Entry>,
}

type SharedStorage = Arc<RwLock<Storage>>;

impl Storage {
    /// Checks `mode` against the current state of `location`
    fn check(&self, location: &Path, mode: &PutMode) -> Result<()> {
        match mode {
            PutMode::Overwrite => Ok(()),
            PutMode::Create => match self.map.contains_key(location) {
                true => Err(Error::AlreadyExists {
                    path: location.to_string(),
                }
                .into()),
                false => Ok(()),
            },
            PutMode::Update(v) => match self.map.get(location) {
                // Return Precondition instead of NotFound for consistency with stores
                None => Err(precondition(
                    location,
                    Error::UpdateMissing {
                        path: location.to_string(),
                    },
                )),
                Some(e) => match Self::matches(e, v) {
                    true => Ok(()),
                    false => Err(precondition(
                        location,
                        Error::ETagMismatch {
                            expected: v.e_tag.clone(),
                            existing: e.e_tag.to_string(),
                        },
                    )),
                },
            },
        }
    }

    fn matches(entry: &Entry, v: &UpdateVersion) -> bool {
        v.e_tag.as_deref() == Some(entry.e_tag.to_string().as_str())
    }

    /// Checks `mode` and, if satisfied, writes the entry
    fn commit(
        &mut self,
        location: &Path,
        mode: &PutMode,
        data: Bytes,
        tags: TagSet,
    ) -> Result<PutResult> {
        self.check(location, mode)?;

        let e_tag = self.next_etag;
        self.next_etag += 1;
        let entry = Entry {
            data,
            tags,
            last_modified: Utc::now(),
            e_tag,
        };
        self.map.insert(location.clone(), entry);

        Ok(PutResult {
            e_tag: Some(e_tag.to_string()),
            version: None,
        })
    }
}

impl std::fmt::Display for InMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InMemory")
    }
}

#[async_trait]
impl ObjectStore for InMemory {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        self.storage
            .write()
            .commit(location, &opts.mode, payload.into(), opts.tags)
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        // Reject early if the upload could never be committed
        self.storage.read().check(location, &opts.mode)?;

        Ok(Box::new(InMemoryUpload {
            location: location.clone(),
            mode: opts.mode,
            tags: opts.tags,
            parts: vec![],
            storage: Arc::clone(&self.storage),
        }))
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        let entry = self.entry(location)?;
        let meta = entry.meta(location);
        options.check_preconditions(&meta)?;

        let (range, data) = match options.range {
            Some(range) => {
                let r = range
                    .as_range(entry.data.len() as u64)
                    .map_err(|source| Error::Range { source })?;
                (
                    r.clone(),
                    entry.data.slice(r.start as usize..r.end as usize),
                )
            }
            None => (0..entry.data.len() as u64, entry.data),
        };
        let stream = futures::stream::once(futures::future::ready(Ok(data)));

        Ok(GetResult {
            payload: stream.boxed(),
            meta,
            range,
        })
    }

    async fn head(&self, location: &Path) -> Result<ObjectMeta> {
        Ok(self.entry(location)?.meta(location))
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.storage.write().map.remove(location);
        Ok(())
    }
}

impl InMemory {
    /// Create new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of objects stored
    pub fn len(&self) -> usize {
        self.storage.read().map.len()
    }

    /// Returns true if no objects are stored
    pub fn is_empty(&self) -> bool {
        self.storage.read().map.is_empty()
    }

    fn entry(&self, location: &Path) -> Result<Entry> {
        let storage = self.storage.read();
        let value = storage
            .map
            .get(location)
            .cloned()
            .ok_or_else(|| Error::NoDataInMemory {
                path: location.to_string(),
            })?;

        Ok(value)
    }
}

#[derive(Debug)]
struct InMemoryUpload {
    location: Path,
    mode: PutMode,
    tags: TagSet,
    parts: Vec<PutPayload>,
    storage: SharedStorage,
}

#[async_trait]
impl MultipartUpload for InMemoryUpload {
    fn put_part(&mut self, payload: PutPayload) -> UploadPart {
        self.parts.push(payload);
        Box::pin(futures::future::ready(Ok(())))
    }

    async fn complete(&mut self) -> Result<PutResult> {
        let cap = self.parts.iter().map(|x| x.content_length()).sum();
        let mut buf = Vec::with_capacity(cap);
        self.parts
            .iter()
            .flat_map(PutPayload::iter)
            .for_each(|x| buf.extend_from_slice(x));
        self.parts.clear();

        let result = self.storage.write().commit(
            &self.location,
            &self.mode,
            buf.into(),
            std::mem::take(&mut self.tags),
        )?;
        debug!(location = %self.location, size = cap, e_tag = ?result.e_tag, "committed upload");
        Ok(result)
    }

    async fn abort(&mut self) -> Result<()> {
        self.parts.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::integration::*;

    use super::*;

    #[tokio::test]
    async fn in_memory_test() {
        let integration = InMemory::new();

        put_get_delete(&integration).await;
        get_opts(&integration).await;
        put_opts(&integration).await;
        multipart(&integration).await;
        multipart_race(&integration).await;
        tags_round_trip(&integration).await;
    }

    #[tokio::test]
    async fn box_test() {
        let integration: Box<dyn ObjectStore> = Box::new(InMemory::new());

        put_get_delete(integration.as_ref()).await;
        get_opts(integration.as_ref()).await;
        put_opts(integration.as_ref()).await;
    }

    #[tokio::test]
    async fn early_rejection() {
        let integration = InMemory::new();
        let location = Path::from("early");

        integration.put(&location, "a".into()).await.unwrap();

        let err = integration
            .put_multipart_opts(&location, PutMode::Create.into())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::AlreadyExists { .. }), "{err}");

        let stale = UpdateVersion {
            e_tag: Some("stale".to_string()),
            version: None,
        };
        let err = integration
            .put_multipart_opts(&location, PutMode::Update(stale).into())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Precondition { .. }), "{err}");
    }

    #[tokio::test]
    async fn dropped_upload_commits_nothing() {
        let integration = InMemory::new();
        let location = Path::from("dropped");

        let mut upload = integration.put_multipart(&location).await.unwrap();
        upload.put_part("partial".into()).await.unwrap();
        drop(upload);

        let err = integration.head(&location).await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
        assert!(integration.is_empty());
    }

    const NON_EXISTENT_NAME: &str = "nonexistentname";

    #[tokio::test]
    async fn nonexistent_location() {
        let integration = InMemory::new();

        let location = Path::from(NON_EXISTENT_NAME);

        let err = integration.get(&location).await.unwrap_err();
        if let crate::Error::NotFound { path, source } = err {
            let source_variant = source.downcast_ref::<Error>();
            assert!(
                matches!(source_variant, Some(Error::NoDataInMemory { .. }),),
                "got: {source_variant:?}"
            );
            assert_eq!(path, NON_EXISTENT_NAME);
        } else {
            panic!("unexpected error type: {err:?}");
        }
    }
}

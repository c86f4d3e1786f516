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

use tracing::debug;

use crate::path::Path;
use crate::{
    ConditionEvaluator, DynObjectStore, ObjectMeta, ObjectWriter, PutResult, Result,
    RetryConfig, RetryableReader, TagSet, UploadRequest, WriterOptions,
};

/// A namespace of objects within a backing [`ObjectStore`](crate::ObjectStore)
///
/// Keys are resolved relative to the container's name, so several containers
/// may share one backing store without their objects colliding.
///
/// Every operation is independent: a [`Container`] holds no mutable state,
/// and may be cloned and used concurrently.
#[derive(Debug, Clone)]
pub struct Container {
    name: String,
    prefix: Path,
    store: Arc<DynObjectStore>,
    evaluator: Arc<ConditionEvaluator>,
    retry: RetryConfig,
    writer: WriterOptions,
}

impl Container {
    /// Create a new [`Container`] named `name` within `store`
    pub fn new(store: Arc<DynObjectStore>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            prefix: Path::from(name.as_str()),
            name,
            store,
            evaluator: Default::default(),
            retry: Default::default(),
            writer: Default::default(),
        }
    }

    /// Set the [`RetryConfig`] used by readers returned from [`Self::get`]
    pub fn with_retry(self, retry: RetryConfig) -> Self {
        Self { retry, ..self }
    }

    /// Set the [`WriterOptions`] used by [`Self::put`]
    pub fn with_writer_options(self, writer: WriterOptions) -> Self {
        Self { writer, ..self }
    }

    /// Share a [`ConditionEvaluator`], and so its cache of parsed conditions
    pub fn with_evaluator(self, evaluator: Arc<ConditionEvaluator>) -> Self {
        Self { evaluator, ..self }
    }

    /// The name of this container
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The [`RetryConfig`] of this container
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// The [`WriterOptions`] of this container
    pub fn writer_options(&self) -> &WriterOptions {
        &self.writer
    }

    /// Returns the location of `key` within the backing store
    pub fn path(&self, key: &Path) -> Path {
        self.prefix.join(key)
    }

    /// Open the object at `key` for reading
    ///
    /// Nothing is buffered, the returned reader streams the object on demand.
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) if there is no
    /// such object.
    pub async fn get(&self, key: impl Into<Path>) -> Result<RetryableReader> {
        let location = self.path(&key.into());
        RetryableReader::open(Arc::clone(&self.store), location, &self.retry).await
    }

    /// Write `request`, returning the version written
    ///
    /// See [`ObjectWriter::put`]
    pub async fn put(&self, mut request: UploadRequest) -> Result<PutResult> {
        request.location = self.path(&request.location);
        let writer = ObjectWriter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.evaluator),
            self.writer,
        );
        writer.put(request).await
    }

    /// Stream `reader` into the object at `key`
    ///
    /// The reader may belong to any container of the same or another store.
    pub async fn copy_from(
        &self,
        reader: RetryableReader,
        key: impl Into<Path>,
        tags: TagSet,
        condition: Option<&str>,
    ) -> Result<PutResult> {
        debug!(from = %reader.location(), container = %self.name, "streaming copy");
        let mut request = UploadRequest::new(key, reader).with_tags(tags);
        request.condition = condition.map(ToString::to_string);
        self.put(request).await
    }

    /// Returns true if an object exists at `key`
    pub async fn exists(&self, key: impl Into<Path>) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns the metadata of the object at `key`
    ///
    /// [`ObjectMeta::location`] is the location within the backing store
    pub async fn head(&self, key: impl Into<Path>) -> Result<ObjectMeta> {
        self.store.head(&self.path(&key.into())).await
    }

    /// Returns the tags of the object at `key`
    pub async fn get_tags(&self, key: impl Into<Path>) -> Result<TagSet> {
        Ok(self.head(key).await?.tags)
    }

    /// Delete the object at `key`, deleting a missing object is not an error
    pub async fn delete(&self, key: impl Into<Path>) -> Result<()> {
        self.store.delete(&self.path(&key.into())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemory;
    use crate::{Error, ObjectStore};

    fn tags(value: &str) -> TagSet {
        TagSet::new().with_tag("MyTag", value)
    }

    async fn read(container: &Container, key: &str) -> Vec<u8> {
        let mut reader = container.get(key).await.unwrap();
        let mut out = vec![];
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_namespaces() {
        let store = Arc::new(InMemory::new());
        let a = Container::new(Arc::clone(&store) as _, "a");
        let b = Container::new(Arc::clone(&store) as _, "b");

        a.put(UploadRequest::new("key", "in a")).await.unwrap();
        assert!(a.exists("key").await.unwrap());
        assert!(!b.exists("key").await.unwrap());

        b.put(UploadRequest::new("key", "in b")).await.unwrap();
        assert_eq!(read(&a, "key").await, b"in a");
        assert_eq!(read(&b, "key").await, b"in b");

        let meta = store.head(&Path::from("a/key")).await.unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(a.head("key").await.unwrap().location, Path::from("a/key"));
        assert_eq!(a.name(), "a");
    }

    #[tokio::test]
    async fn test_get_missing() {
        let container = Container::new(Arc::new(InMemory::new()), "c");
        let err = container.get("missing").await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
        let err = container.get_tags("missing").await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[tokio::test]
    async fn test_delete() {
        let container = Container::new(Arc::new(InMemory::new()), "c");
        container.put(UploadRequest::new("key", "data")).await.unwrap();
        assert!(container.exists("key").await.unwrap());

        container.delete("key").await.unwrap();
        assert!(!container.exists("key").await.unwrap());

        // Deleting a missing object succeeds
        container.delete("key").await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_from() {
        let store = Arc::new(InMemory::new());
        let sources = Container::new(Arc::clone(&store) as _, "sources");
        let repro = Container::new(store, "repro");

        let request = UploadRequest::new("sample.dat", "sample").with_tags(tags("1"));
        sources.put(request).await.unwrap();
        repro
            .put(UploadRequest::new("copy.dat", "old").with_tags(tags("0")))
            .await
            .unwrap();

        let reader = sources.get("sample.dat").await.unwrap();
        assert_eq!(reader.tags(), &tags("1"));
        repro
            .copy_from(reader, "copy.dat", tags("1"), Some(r#""MyTag" < '1'"#))
            .await
            .unwrap();
        assert_eq!(read(&repro, "copy.dat").await, b"sample");
        assert_eq!(repro.get_tags("copy.dat").await.unwrap(), tags("1"));

        // Now MyTag is 1, so the same copy is rejected
        let reader = sources.get("sample.dat").await.unwrap();
        let err = repro
            .copy_from(reader, "copy.dat", tags("2"), Some(r#""MyTag" < '1'"#))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConditionNotMet { .. }), "{err}");
        assert_eq!(repro.get_tags("copy.dat").await.unwrap(), tags("1"));
    }
}

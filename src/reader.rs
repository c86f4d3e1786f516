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

//! Resumable streaming reads
//!
//! A [`RetryableReader`] streams an object sequentially. When a request
//! fails transiently, for instance because a connection was reset or a
//! chunk took longer than [`RetryConfig::request_timeout`] to arrive, the
//! reader backs off and issues a new ranged get starting at the first byte it
//! has not yet received. That get is pinned to the e-tag observed when the
//! read began, so content is never stitched together from two versions of an
//! object.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};

use crate::path::Path;
use crate::retry::Retry;
use crate::{DynObjectStore, Error, GetOptions, GetRange, Result, RetryConfig, TagSet};

const STORE: &str = "RetryableReader";

/// Awaits `fut`, failing with [`Error::Transient`] if it does not complete
/// within `timeout`
async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        None => fut.await,
        Some(t) => match tokio::time::timeout(t, fut).await {
            Ok(r) => r,
            Err(_) => Err(Error::Transient {
                store: STORE,
                source: format!("request timed out after {}", humantime::format_duration(t))
                    .into(),
            }),
        },
    }
}

/// A sequential byte stream over a stored object that transparently resumes
/// from the last delivered offset after a transient failure
///
/// Failures that retrying cannot fix, such as the object being deleted or
/// modified while the read is in progress, or a denied request, surface
/// immediately as [`Error::FatalReadFailure`]. Transient failures are retried
/// up to [`RetryConfig::max_retries`] times without progress before surfacing
/// as [`Error::TransientReadFailure`]; delivering a chunk resets the count.
///
/// The total length of the object is not exposed; consume the reader until it
/// reports end of stream.
pub struct RetryableReader {
    store: Arc<DynObjectStore>,
    location: Path,
    e_tag: Option<String>,
    tags: TagSet,
    /// Bytes received from the store, including `buffered`
    position: u64,
    end: u64,
    stream: Option<BoxStream<'static, Result<Bytes>>>,
    /// Received but not yet delivered by [`Self::read`]
    buffered: Bytes,
    retry: Retry,
    request_timeout: Option<Duration>,
    finished: bool,
}

impl std::fmt::Debug for RetryableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryableReader")
            .field("store", &self.store)
            .field("location", &self.location)
            .field("e_tag", &self.e_tag)
            .field("offset", &self.offset())
            .field("finished", &self.finished)
            .finish()
    }
}

impl RetryableReader {
    /// Open `location` for reading
    ///
    /// The first request is issued before this returns, so a missing object
    /// fails here with [`Error::NotFound`].
    pub async fn open(
        store: Arc<DynObjectStore>,
        location: Path,
        config: &RetryConfig,
    ) -> Result<Self> {
        let mut retry = Retry::new(config);
        let result = loop {
            let request = store.get_opts(&location, GetOptions::default());
            match with_timeout(config.request_timeout, request).await {
                Ok(result) => break result,
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) if e.is_transient() => match retry.next_attempt() {
                    Some(sleep) => {
                        info!(
                            "Encountered transient error ({}) opening {}, backing off for {} seconds, retry {} of {}",
                            e,
                            location,
                            sleep.as_secs_f32(),
                            retry.retries(),
                            retry.max_retries()
                        );
                        tokio::time::sleep(sleep).await;
                    }
                    None => {
                        return Err(Error::TransientReadFailure {
                            path: location.to_string(),
                            retries: retry.retries(),
                            source: Box::new(e),
                        })
                    }
                },
                Err(e) => {
                    return Err(Error::FatalReadFailure {
                        path: location.to_string(),
                        source: Box::new(e),
                    })
                }
            }
        };
        retry.reset();

        debug!(%location, e_tag = ?result.meta.e_tag, "opened reader");
        Ok(Self {
            store,
            location,
            e_tag: result.meta.e_tag,
            tags: result.meta.tags,
            position: result.range.start,
            end: result.range.end,
            stream: Some(result.payload),
            buffered: Bytes::new(),
            retry,
            request_timeout: config.request_timeout,
            finished: false,
        })
    }

    /// The location being read
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The e-tag of the version being read, if the store reports one
    pub fn e_tag(&self) -> Option<&str> {
        self.e_tag.as_deref()
    }

    /// The tags of the version being read
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// The number of bytes delivered so far
    pub fn offset(&self) -> u64 {
        self.position - self.buffered.len() as u64
    }

    /// Read into `buf`, returning the number of bytes read, or 0 at the end
    /// of the stream
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered.is_empty() {
            match self.fetch().await? {
                Some(bytes) => self.buffered = bytes,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.buffered.len());
        buf[..n].copy_from_slice(&self.buffered.split_to(n));
        Ok(n)
    }

    /// Returns the next non-empty chunk of the object, or `None` at the end
    /// of the stream
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.buffered.is_empty() {
            true => self.fetch().await,
            false => Ok(Some(std::mem::take(&mut self.buffered))),
        }
    }

    /// Converts this reader into a stream of chunks
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_chunk().await?.map(|chunk| (chunk, reader)))
        })
        .fuse()
        .boxed()
    }

    /// Release the in-flight request, if any
    pub fn close(mut self) {
        self.stream.take();
    }

    async fn fetch(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.stream.is_none() {
                self.resume().await?;
            }
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => continue,
            };

            let next = async { stream.next().await.transpose() };
            match with_timeout(self.request_timeout, next).await {
                Ok(Some(bytes)) if bytes.is_empty() => continue,
                Ok(Some(bytes)) => {
                    self.position += bytes.len() as u64;
                    self.retry.reset();
                    return Ok(Some(bytes));
                }
                Ok(None) if self.position < self.end => {
                    self.stream = None;
                    let e = Error::Transient {
                        store: STORE,
                        source: format!(
                            "response ended at offset {} of {}",
                            self.position, self.end
                        )
                        .into(),
                    };
                    self.backoff(e).await?;
                }
                Ok(None) => {
                    self.stream = None;
                    self.finished = true;
                    debug!(location = %self.location, len = self.position, "finished reading");
                    return Ok(None);
                }
                Err(e) => {
                    self.stream = None;
                    self.backoff(e).await?;
                }
            }
        }
    }

    /// Issue a get for the remainder of the object
    async fn resume(&mut self) -> Result<()> {
        loop {
            let options = GetOptions {
                if_match: self.e_tag.clone(),
                range: Some(GetRange::Offset(self.position)),
            };
            let request = self.store.get_opts(&self.location, options);
            match with_timeout(self.request_timeout, request).await {
                Ok(result) => {
                    debug!(location = %self.location, offset = self.position, "resumed read");
                    self.stream = Some(result.payload);
                    return Ok(());
                }
                Err(e) => self.backoff(e).await?,
            }
        }
    }

    /// Wait before the next attempt following `e`, or return the error to
    /// surface if `e` should not be retried
    async fn backoff(&mut self, e: Error) -> Result<()> {
        if !e.is_transient() {
            return Err(Error::FatalReadFailure {
                path: self.location.to_string(),
                source: Box::new(e),
            });
        }
        match self.retry.next_attempt() {
            Some(sleep) => {
                info!(
                    "Encountered transient error ({}) reading {} at offset {}, backing off for {} seconds, retry {} of {}",
                    e,
                    self.location,
                    self.position,
                    sleep.as_secs_f32(),
                    self.retry.retries(),
                    self.retry.max_retries()
                );
                tokio::time::sleep(sleep).await;
                Ok(())
            }
            None => Err(Error::TransientReadFailure {
                path: self.location.to_string(),
                retries: self.retry.retries(),
                source: Box::new(e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked::ChunkedStore;
    use crate::fault::{FaultConfig, FaultInjectingStore};
    use crate::memory::InMemory;
    use crate::throttle::{ThrottleConfig, ThrottledStore};
    use crate::{BackoffConfig, ObjectStore};
    use futures::TryStreamExt;

    type TestStore = FaultInjectingStore<ChunkedStore>;

    fn config(max_retries: usize) -> RetryConfig {
        RetryConfig {
            backoff: BackoffConfig {
                init_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
                base: 2.,
            },
            max_retries,
            retry_timeout: Duration::from_secs(60),
            request_timeout: Some(Duration::from_secs(1)),
        }
    }

    fn data() -> Vec<u8> {
        (0..1000_u32).map(|i| (i % 251) as u8).collect()
    }

    async fn setup(fault: FaultConfig) -> (Arc<TestStore>, Path) {
        let chunked = ChunkedStore::new(Arc::new(InMemory::new()), 100);
        let store = Arc::new(FaultInjectingStore::new(chunked, FaultConfig::default()));
        let location = Path::from("data");
        store.put(&location, data().into()).await.unwrap();
        store.config_mut(|c| *c = fault);
        (store, location)
    }

    async fn collect(reader: RetryableReader) -> Result<Vec<u8>> {
        let chunks: Vec<Bytes> = reader.into_stream().try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_stream_failures() {
        let fault = FaultConfig {
            fail_streams: 3,
            fail_stream_after: 250,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let reader = RetryableReader::open(Arc::clone(&store) as _, location, &config(3))
            .await
            .unwrap();
        assert_eq!(collect(reader).await.unwrap(), data());
        assert_eq!(store.get_requests(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_into_buffer() {
        let fault = FaultConfig {
            fail_streams: 2,
            fail_stream_after: 130,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let mut reader = RetryableReader::open(Arc::clone(&store) as _, location, &config(3))
            .await
            .unwrap();

        let mut out = vec![];
        let mut buf = [0; 64];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            assert_eq!(reader.offset(), out.len() as u64);
        }
        assert_eq!(out, data());
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let fault = FaultConfig {
            fail_streams: usize::MAX,
            fail_stream_after: 0,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let mut reader = RetryableReader::open(Arc::clone(&store) as _, location, &config(3))
            .await
            .unwrap();
        let err = reader.next_chunk().await.unwrap_err();
        match err {
            Error::TransientReadFailure {
                retries, source, ..
            } => {
                assert_eq!(retries, 3);
                assert!(source.is_transient(), "{source}");
            }
            _ => panic!("unexpected error {err}"),
        }
        assert_eq!(store.get_requests(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_retries() {
        let fault = FaultConfig {
            fail_get_requests: 2,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let reader = RetryableReader::open(Arc::clone(&store) as _, location.clone(), &config(3))
            .await
            .unwrap();
        assert_eq!(collect(reader).await.unwrap(), data());
        assert_eq!(store.get_requests(), 3);

        store.config_mut(|c| c.fail_get_requests = 10);
        let err = RetryableReader::open(Arc::clone(&store) as _, location, &config(2))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::TransientReadFailure { retries: 2, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_open_missing() {
        let (store, _) = setup(FaultConfig::default()).await;
        let err = RetryableReader::open(store, Path::from("missing"), &config(3))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_not_retried() {
        let fault = FaultConfig {
            fail_streams: 1,
            fail_stream_after: 100,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let mut reader = RetryableReader::open(Arc::clone(&store) as _, location, &config(3))
            .await
            .unwrap();
        assert_eq!(reader.next_chunk().await.unwrap().unwrap().len(), 100);

        store.config_mut(|c| c.deny_gets = true);
        let err = reader.next_chunk().await.unwrap_err();
        match err {
            Error::FatalReadFailure { source, .. } => {
                assert!(matches!(*source, Error::PermissionDenied { .. }), "{source}")
            }
            _ => panic!("unexpected error {err}"),
        }
        assert_eq!(store.get_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_denied_not_retried() {
        let fault = FaultConfig {
            deny_gets: true,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let err = RetryableReader::open(Arc::clone(&store) as _, location, &config(3))
            .await
            .unwrap_err();
        match err {
            Error::FatalReadFailure { source, .. } => {
                assert!(matches!(*source, Error::PermissionDenied { .. }), "{source}")
            }
            _ => panic!("unexpected error {err}"),
        }
        assert_eq!(store.get_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_modified_during_read() {
        let fault = FaultConfig {
            fail_streams: 1,
            fail_stream_after: 100,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let mut reader =
            RetryableReader::open(Arc::clone(&store) as _, location.clone(), &config(3))
                .await
                .unwrap();
        assert!(reader.e_tag().is_some());
        assert_eq!(reader.next_chunk().await.unwrap().unwrap().len(), 100);

        store.put(&location, "replaced".into()).await.unwrap();
        let err = reader.next_chunk().await.unwrap_err();
        match err {
            Error::FatalReadFailure { source, .. } => {
                assert!(matches!(*source, Error::Precondition { .. }), "{source}")
            }
            _ => panic!("unexpected error {err}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_during_read() {
        let fault = FaultConfig {
            fail_streams: 1,
            fail_stream_after: 100,
            ..Default::default()
        };
        let (store, location) = setup(fault).await;

        let mut reader =
            RetryableReader::open(Arc::clone(&store) as _, location.clone(), &config(3))
                .await
                .unwrap();
        reader.next_chunk().await.unwrap();

        store.delete(&location).await.unwrap();
        let err = reader.next_chunk().await.unwrap_err();
        match err {
            Error::FatalReadFailure { source, .. } => assert!(source.is_not_found(), "{source}"),
            _ => panic!("unexpected error {err}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_timeout() {
        let inner = InMemory::new();
        let location = Path::from("slow");
        inner.put(&location, data().into()).await.unwrap();
        let throttle = ThrottleConfig {
            wait_get_per_chunk: Duration::from_millis(500),
            ..Default::default()
        };
        let store = Arc::new(ThrottledStore::new(inner, throttle));

        // Slow chunks within the request timeout
        let reader = RetryableReader::open(Arc::clone(&store) as _, location.clone(), &config(2))
            .await
            .unwrap();
        assert_eq!(collect(reader).await.unwrap(), data());

        // Every chunk exceeds the request timeout
        store.config_mut(|c| c.wait_get_per_chunk = Duration::from_secs(10));
        let mut reader = RetryableReader::open(store, location, &config(2))
            .await
            .unwrap();
        let err = reader.next_chunk().await.unwrap_err();
        match err {
            Error::TransientReadFailure {
                retries, source, ..
            } => {
                assert_eq!(retries, 2);
                assert!(source.to_string().contains("timed out"), "{source}");
            }
            _ => panic!("unexpected error {err}"),
        }
    }

    #[tokio::test]
    async fn test_empty_object() {
        let store = Arc::new(InMemory::new());
        let location = Path::from("empty");
        store.put(&location, crate::PutPayload::new()).await.unwrap();

        let mut reader = RetryableReader::open(store, location, &config(3))
            .await
            .unwrap();
        let mut buf = [0; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert!(reader.next_chunk().await.unwrap().is_none());
        assert_eq!(reader.offset(), 0);
        reader.close();
    }
}

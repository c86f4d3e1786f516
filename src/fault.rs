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

//! An object store wrapper that injects failures into reads
//!
//! Used to exercise the resume and retry behaviour of
//! [`RetryableReader`](crate::RetryableReader) without a real network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::{
    path::Path, Error, GetOptions, GetResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, Result,
};

const STORE: &str = "FaultInjectingStore";

/// The failures to inject, see [`FaultInjectingStore`]
#[derive(Debug, Default, Clone, Copy)]
pub struct FaultConfig {
    /// The number of upcoming get requests to fail with [`Error::Transient`]
    /// before the underlying store is called
    pub fail_get_requests: usize,

    /// The number of upcoming successful get requests whose response stream
    /// fails with [`Error::Transient`] after yielding
    /// [`fail_stream_after`](Self::fail_stream_after) bytes
    pub fail_streams: usize,

    /// The number of bytes yielded by a failing response stream
    pub fail_stream_after: u64,

    /// Fail every get request with [`Error::PermissionDenied`]
    pub deny_gets: bool,
}

/// Store wrapper that injects failures into get requests and their response
/// streams according to a [`FaultConfig`]
///
/// All other operations are passed to the inner store unchanged.
#[derive(Debug)]
pub struct FaultInjectingStore<T> {
    inner: T,
    config: Arc<Mutex<FaultConfig>>,
    get_requests: AtomicUsize,
}

impl<T> FaultInjectingStore<T> {
    /// Create a new wrapper injecting the failures described by `config`
    pub fn new(inner: T, config: FaultConfig) -> Self {
        Self {
            inner,
            config: Arc::new(Mutex::new(config)),
            get_requests: AtomicUsize::new(0),
        }
    }

    /// Mutate config.
    pub fn config_mut<F>(&self, f: F)
    where
        F: Fn(&mut FaultConfig),
    {
        let mut guard = self.config.lock();
        f(&mut guard)
    }

    /// Return copy of current config.
    pub fn config(&self) -> FaultConfig {
        *self.config.lock()
    }

    /// The number of get requests received, including failed ones
    pub fn get_requests(&self) -> usize {
        self.get_requests.load(Ordering::SeqCst)
    }
}

impl<T: ObjectStore> std::fmt::Display for FaultInjectingStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FaultInjectingStore({})", self.inner)
    }
}

fn transient(message: &'static str) -> Error {
    Error::Transient {
        store: STORE,
        source: message.into(),
    }
}

/// Yields at most `after` bytes of `stream` and then fails
fn fail_after(
    stream: BoxStream<'static, Result<Bytes>>,
    after: u64,
) -> BoxStream<'static, Result<Bytes>> {
    futures::stream::unfold(
        (stream, after, false),
        |(mut stream, remaining, failed)| async move {
            if failed {
                return None;
            }
            if remaining == 0 {
                let err = transient("injected connection reset");
                return Some((Err(err), (stream, 0, true)));
            }
            match stream.next().await {
                None => None,
                Some(Ok(bytes)) => {
                    let take = remaining.min(bytes.len() as u64);
                    let bytes = bytes.slice(..take as usize);
                    Some((Ok(bytes), (stream, remaining - take, false)))
                }
                Some(Err(e)) => Some((Err(e), (stream, remaining, true))),
            }
        },
    )
    .fuse()
    .boxed()
}

#[async_trait]
impl<T: ObjectStore> ObjectStore for FaultInjectingStore<T> {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        self.get_requests.fetch_add(1, Ordering::SeqCst);

        let fail_stream_after = {
            let mut config = self.config.lock();
            if config.deny_gets {
                return Err(Error::PermissionDenied {
                    path: location.to_string(),
                    source: "injected permission denied".into(),
                });
            }
            if config.fail_get_requests > 0 {
                config.fail_get_requests -= 1;
                return Err(transient("injected request failure"));
            }
            match config.fail_streams {
                0 => None,
                n => {
                    config.fail_streams = n - 1;
                    Some(config.fail_stream_after)
                }
            }
        };

        let result = self.inner.get_opts(location, options).await?;
        Ok(match fail_stream_after {
            Some(after) => GetResult {
                payload: fail_after(result.payload, after),
                ..result
            },
            None => result,
        })
    }

    async fn head(&self, location: &Path) -> Result<ObjectMeta> {
        self.inner.head(location).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.inner.delete(location).await
    }
}

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

//! A [`ThrottledStore`] adding latency to the requests of a wrapped store
//!
//! Each step of a conditional, streaming write maps to one request kind: the
//! tag lookup is a `head`, each part is a part upload and the final commit is
//! a `complete`. Delaying them independently lets tests observe where time
//! is spent, and push individual reads past a request timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::{
    path::Path, GetOptions, GetResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, Result, UploadPart,
};

/// The latency of each kind of request made to a [`ThrottledStore`]
///
/// Delays are applied before the wrapped store is called, whether or not the
/// request then succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThrottleConfig {
    /// Delay of every get request, before the response starts
    pub wait_get_per_call: Duration,

    /// Delay before each chunk of a get response is yielded
    ///
    /// Errors in the response are yielded without delay
    pub wait_get_per_chunk: Duration,

    /// Delay of every head request, and so of every tag lookup
    pub wait_head_per_call: Duration,

    /// Delay of every single-request put, and of every uploaded part
    pub wait_put_per_part: Duration,

    /// Delay of every multipart commit
    pub wait_commit: Duration,

    /// Delay of every delete
    pub wait_delete_per_call: Duration,
}

async fn sleep(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await
    }
}

/// Store wrapper delaying the requests to an inner store as described by a
/// [`ThrottleConfig`]
///
/// The delays are deterministic, which makes this suitable for tests run
/// with a paused tokio clock.
#[derive(Debug)]
pub struct ThrottledStore<T> {
    inner: T,
    config: Arc<Mutex<ThrottleConfig>>,
}

impl<T> ThrottledStore<T> {
    /// Create a new wrapper delaying requests to `inner` by `config`
    pub fn new(inner: T, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config: Arc::new(Mutex::new(config)),
        }
    }

    /// Mutate config.
    pub fn config_mut<F>(&self, f: F)
    where
        F: Fn(&mut ThrottleConfig),
    {
        let mut guard = self.config.lock();
        f(&mut guard)
    }

    /// Return copy of current config.
    pub fn config(&self) -> ThrottleConfig {
        *self.config.lock()
    }
}

impl<T: ObjectStore> std::fmt::Display for ThrottledStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThrottledStore({})", self.inner)
    }
}

/// Delays each successful chunk of `stream` by `delay`
fn delay_chunks(
    stream: BoxStream<'static, Result<Bytes>>,
    delay: Duration,
) -> BoxStream<'static, Result<Bytes>> {
    if delay.is_zero() {
        return stream;
    }
    futures::stream::unfold(stream, move |mut stream| async move {
        match stream.next().await {
            Some(Ok(bytes)) => {
                sleep(delay).await;
                Some((Ok(bytes), stream))
            }
            Some(Err(e)) => Some((Err(e), stream)),
            None => None,
        }
    })
    .fuse()
    .boxed()
}

#[async_trait]
impl<T: ObjectStore> ObjectStore for ThrottledStore<T> {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        sleep(self.config().wait_put_per_part).await;
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        let upload = self.inner.put_multipart_opts(location, opts).await?;
        Ok(Box::new(ThrottledUpload {
            upload,
            config: Arc::clone(&self.config),
        }))
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        let config = self.config();
        sleep(config.wait_get_per_call).await;

        let result = self.inner.get_opts(location, options).await?;
        Ok(GetResult {
            payload: delay_chunks(result.payload, config.wait_get_per_chunk),
            ..result
        })
    }

    async fn head(&self, location: &Path) -> Result<ObjectMeta> {
        sleep(self.config().wait_head_per_call).await;
        self.inner.head(location).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        sleep(self.config().wait_delete_per_call).await;
        self.inner.delete(location).await
    }
}

/// Reads the config when each part is written, so changes apply to uploads
/// already in progress
#[derive(Debug)]
struct ThrottledUpload {
    upload: Box<dyn MultipartUpload>,
    config: Arc<Mutex<ThrottleConfig>>,
}

#[async_trait]
impl MultipartUpload for ThrottledUpload {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        let delay = self.config.lock().wait_put_per_part;
        let put = self.upload.put_part(data);
        Box::pin(async move {
            sleep(delay).await;
            put.await
        })
    }

    async fn complete(&mut self) -> Result<PutResult> {
        let delay = self.config.lock().wait_commit;
        sleep(delay).await;
        self.upload.complete().await
    }

    async fn abort(&mut self) -> Result<()> {
        self.upload.abort().await
    }
}

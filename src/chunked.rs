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

//! A [`ChunkedStore`] that can be used to test streaming behaviour
//!
//! Backing stores may return a whole object as a single chunk; wrapping them
//! in a [`ChunkedStore`] makes readers observe many small chunks instead, as
//! they would from a network transport.

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::path::Path;
use crate::{
    DynObjectStore, GetOptions, GetResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, Result,
};

/// Wraps a [`ObjectStore`] and makes its get response return chunks of at
/// most `chunk_size` bytes
///
/// Errors from the inner stream are passed through unchanged, so a transient
/// failure remains transient.
#[derive(Debug)]
pub struct ChunkedStore {
    inner: Arc<DynObjectStore>,
    chunk_size: usize, // chunks are in memory, so we use usize not u64
}

impl ChunkedStore {
    /// Creates a new [`ChunkedStore`] with the specified chunk_size
    pub fn new(inner: Arc<DynObjectStore>, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Display for ChunkedStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkedStore({})", self.inner)
    }
}

fn rechunk(
    stream: BoxStream<'static, Result<bytes::Bytes>>,
    chunk_size: usize,
) -> BoxStream<'static, Result<bytes::Bytes>> {
    futures::stream::unfold(
        (stream, BytesMut::new(), false),
        move |(mut stream, mut buffer, exhausted)| async move {
            if exhausted {
                return None;
            }
            while buffer.len() < chunk_size {
                match stream.next().await {
                    None if buffer.is_empty() => return None,
                    None => {
                        let slice = buffer.split().freeze();
                        return Some((Ok(slice), (stream, buffer, true)));
                    }
                    Some(Ok(bytes)) => buffer.put(bytes),
                    // Bytes already buffered are discarded along with the failed stream
                    Some(Err(e)) => return Some((Err(e), (stream, buffer, true))),
                }
            }
            let slice = buffer.split_to(chunk_size).freeze();
            Some((Ok(slice), (stream, buffer, false)))
        },
    )
    .fuse()
    .boxed()
}

#[async_trait]
impl ObjectStore for ChunkedStore {
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
        let r = self.inner.get_opts(location, options).await?;
        Ok(GetResult {
            payload: rechunk(r.payload, self.chunk_size),
            ..r
        })
    }

    async fn head(&self, location: &Path) -> Result<ObjectMeta> {
        self.inner.head(location).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.inner.delete(location).await
    }
}

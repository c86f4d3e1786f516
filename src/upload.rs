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

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::debug;

use crate::{PutPayload, PutResult, Result};

/// An upload part request
pub type UploadPart = BoxFuture<'static, Result<()>>;

/// A trait allowing writing an object in parts
///
/// Parts are written by calling [`MultipartUpload::put_part`] and polling the
/// returned futures to completion. Once all parts are written,
/// [`MultipartUpload::complete`] makes the entire object, along with its tags,
/// visible as a single atomic operation, enforcing the [`PutMode`] the upload
/// was created with.
///
/// An upload that is dropped or aborted before completion leaves any object
/// already stored at the destination unchanged.
///
/// [`PutMode`]: crate::PutMode
#[async_trait]
pub trait MultipartUpload: Send + std::fmt::Debug {
    /// Upload the next part
    fn put_part(&mut self, data: PutPayload) -> UploadPart;

    /// Complete the multipart upload
    ///
    /// It is implementation defined behaviour to call this before polling all
    /// [`UploadPart`] to completion, or to call it on an upload that has
    /// already completed or aborted.
    async fn complete(&mut self) -> Result<PutResult>;

    /// Abort the multipart upload, discarding any written parts
    async fn abort(&mut self) -> Result<()>;
}

/// Writes a sequence of [`Bytes`] to a [`MultipartUpload`] in parts of at
/// most `part_size` bytes
///
/// Only one part is in flight at a time and at most `part_size` bytes are
/// held between parts, so memory use is bounded regardless of the total size
/// of the object. Incoming chunks are sliced rather than copied.
#[derive(Debug)]
pub struct PartWriter {
    upload: Box<dyn MultipartUpload>,
    buffer: Vec<Bytes>,
    buffered: usize,
    part_size: usize,
    parts: usize,
    bytes_written: u64,
}

impl PartWriter {
    /// Create a new [`PartWriter`], a `part_size` of 0 is treated as 1
    pub fn new(upload: Box<dyn MultipartUpload>, part_size: usize) -> Self {
        Self {
            upload,
            buffer: vec![],
            buffered: 0,
            part_size: part_size.max(1),
            parts: 0,
            bytes_written: 0,
        }
    }

    /// Write `bytes`, uploading each part as it fills
    pub async fn put(&mut self, mut bytes: Bytes) -> Result<()> {
        while !bytes.is_empty() {
            let remaining = self.part_size - self.buffered;
            if bytes.len() < remaining {
                self.buffered += bytes.len();
                self.buffer.push(bytes);
                return Ok(());
            }

            self.buffer.push(bytes.split_to(remaining));
            self.buffered += remaining;
            self.flush_part().await?;
        }
        Ok(())
    }

    async fn flush_part(&mut self) -> Result<()> {
        let payload: PutPayload = std::mem::take(&mut self.buffer).into_iter().collect();
        let len = payload.content_length();
        self.buffered = 0;
        self.parts += 1;

        debug!(part = self.parts, len, "uploading part");
        self.upload.put_part(payload).await?;
        self.bytes_written += len as u64;
        Ok(())
    }

    /// The number of parts uploaded so far
    pub fn parts(&self) -> usize {
        self.parts
    }

    /// The number of bytes uploaded so far, excluding any buffered bytes
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Upload any buffered bytes and complete the upload
    pub async fn finish(mut self) -> Result<PutResult> {
        if self.buffered > 0 {
            self.flush_part().await?;
        }
        self.upload.complete().await
    }

    /// Abort the upload, discarding everything written so far
    pub async fn abort(mut self) -> Result<()> {
        self.buffer.clear();
        self.upload.abort().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Recorded {
        parts: Vec<Bytes>,
        completed: bool,
        aborted: bool,
    }

    #[derive(Debug, Default)]
    struct RecordingUpload(Arc<Mutex<Recorded>>);

    #[async_trait]
    impl MultipartUpload for RecordingUpload {
        fn put_part(&mut self, data: PutPayload) -> UploadPart {
            self.0.lock().parts.push(data.into());
            Box::pin(futures::future::ready(Ok(())))
        }

        async fn complete(&mut self) -> Result<PutResult> {
            self.0.lock().completed = true;
            Ok(PutResult {
                e_tag: Some("1".to_string()),
                version: None,
            })
        }

        async fn abort(&mut self) -> Result<()> {
            self.0.lock().aborted = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fixed_size_parts() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let upload = Box::new(RecordingUpload(Arc::clone(&recorded)));
        let mut writer = PartWriter::new(upload, 10);

        writer.put(Bytes::from(vec![1; 4])).await.unwrap();
        writer.put(Bytes::from(vec![2; 23])).await.unwrap();
        writer.put(Bytes::new()).await.unwrap();
        writer.put(Bytes::from(vec![3; 5])).await.unwrap();
        assert_eq!(writer.parts(), 3);
        assert_eq!(writer.bytes_written(), 30);

        writer.finish().await.unwrap();

        let recorded = recorded.lock();
        assert!(recorded.completed);
        let sizes: Vec<_> = recorded.parts.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![10, 10, 10, 2]);

        let all: Vec<u8> = recorded.parts.iter().flat_map(|b| b.to_vec()).collect();
        let mut expected = vec![1; 4];
        expected.extend(vec![2; 23]);
        expected.extend(vec![3; 5]);
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_empty_and_abort() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let upload = Box::new(RecordingUpload(Arc::clone(&recorded)));
        PartWriter::new(upload, 10).finish().await.unwrap();
        assert!(recorded.lock().parts.is_empty());
        assert!(recorded.lock().completed);

        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let upload = Box::new(RecordingUpload(Arc::clone(&recorded)));
        let mut writer = PartWriter::new(upload, 10);
        writer.put(Bytes::from_static(b"abc")).await.unwrap();
        writer.abort().await.unwrap();

        let recorded = recorded.lock();
        assert!(recorded.aborted);
        assert!(!recorded.completed);
        assert!(recorded.parts.is_empty());
    }
}

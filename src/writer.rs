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

//! Streaming, tag-conditional uploads
//!
//! An [`ObjectWriter`] streams an [`UploadRequest`] to the backing store in
//! fixed-size parts. If the request carries a [`TagCondition`], the tags of
//! the object currently at the destination are read first and the write only
//! proceeds if the condition holds. The e-tag observed at that point guards
//! the commit, so a concurrent write between evaluation and commit causes the
//! store to reject the upload rather than silently replacing the other write.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::condition::TagCondition;
use crate::path::Path;
use crate::{
    ConditionEvaluator, DynObjectStore, Error, PartWriter, PayloadSource, PutMode,
    PutMultipartOpts, PutResult, Result, TagSet,
};

/// The default size of each uploaded part
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// A request to write an object
#[derive(Debug)]
pub struct UploadRequest {
    /// The object to write
    pub location: Path,
    /// The bytes to write
    pub source: PayloadSource,
    /// The tags to attach, replacing any existing tags
    pub tags: TagSet,
    /// A predicate the destination's current tags must satisfy
    pub condition: Option<String>,
}

impl UploadRequest {
    /// Create a new unconditional [`UploadRequest`] with no tags
    pub fn new(location: impl Into<Path>, source: impl Into<PayloadSource>) -> Self {
        Self {
            location: location.into(),
            source: source.into(),
            tags: TagSet::new(),
            condition: None,
        }
    }

    /// Attach `tags` to the written object
    pub fn with_tags(self, tags: TagSet) -> Self {
        Self { tags, ..self }
    }

    /// Only write if the destination's tags satisfy `condition`, for example
    /// `"MyTag" < '1'`
    pub fn with_condition(self, condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            ..self
        }
    }
}

/// Configuration for an [`ObjectWriter`]
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// The maximum size of each part, and so the most payload bytes held in
    /// memory by a single upload
    pub part_size: usize,
    /// How many times to re-evaluate the condition and retry if the store
    /// rejects the commit because the destination changed
    ///
    /// A streamed payload is only retried if none of it has been read
    pub condition_retries: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            condition_retries: 1,
        }
    }
}

/// The payload of an upload, tracking whether it may be replayed
enum Source {
    Buffered(crate::PutPayload),
    Stream {
        stream: futures::stream::BoxStream<'static, Result<bytes::Bytes>>,
        read: bool,
    },
}

impl Source {
    fn replayable(&self) -> bool {
        match self {
            Self::Buffered(_) => true,
            Self::Stream { read, .. } => !read,
        }
    }
}

impl From<PayloadSource> for Source {
    fn from(value: PayloadSource) -> Self {
        match value {
            PayloadSource::Buffered(payload) => Self::Buffered(payload),
            PayloadSource::Stream(stream) => Self::Stream {
                stream,
                read: false,
            },
        }
    }
}

/// Returns true if `e` is a store rejecting a commit because the destination
/// changed, or was deleted, since the condition was evaluated
fn is_conflict(e: &Error) -> bool {
    matches!(e, Error::Precondition { .. })
}

/// Writes [`UploadRequest`] to an [`ObjectStore`](crate::ObjectStore)
#[derive(Debug)]
pub struct ObjectWriter {
    store: Arc<DynObjectStore>,
    evaluator: Arc<ConditionEvaluator>,
    options: WriterOptions,
}

impl ObjectWriter {
    /// Create a new [`ObjectWriter`]
    pub fn new(
        store: Arc<DynObjectStore>,
        evaluator: Arc<ConditionEvaluator>,
        options: WriterOptions,
    ) -> Self {
        Self {
            store,
            evaluator,
            options,
        }
    }

    /// The options of this writer
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Write `request`, returning the version written
    ///
    /// Fails with [`Error::ConditionNotMet`] if the request has a condition
    /// that the destination's tags do not satisfy, in which case the
    /// destination is unchanged and no payload bytes are read.
    pub async fn put(&self, request: UploadRequest) -> Result<PutResult> {
        let UploadRequest {
            location,
            source,
            tags,
            condition,
        } = request;

        tags.validate()?;
        let condition = condition
            .map(|c| self.evaluator.parse(&c))
            .transpose()?;

        let mut source = Source::from(source);
        let mut attempt = 0;
        loop {
            let mode = match &condition {
                Some(condition) => self.check(&location, condition).await?,
                None => PutMode::Overwrite,
            };

            let e = match self.write(&location, mode, tags.clone(), &mut source).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            let condition = match &condition {
                Some(condition) if is_conflict(&e) => condition,
                _ => return Err(e),
            };

            if attempt < self.options.condition_retries && source.replayable() {
                attempt += 1;
                info!(
                    "Destination {} changed before commit ({}), re-evaluating condition, retry {} of {}",
                    location, e, attempt, self.options.condition_retries
                );
                continue;
            }

            warn!(
                "Destination {} changed before commit ({}), giving up after {} retries",
                location, e, attempt
            );
            return Err(Error::ConditionNotMet {
                path: location.to_string(),
                condition: condition.to_string(),
            });
        }
    }

    /// Evaluate `condition` against the current tags at `location`, returning
    /// the [`PutMode`] that guards the commit against concurrent changes
    async fn check(&self, location: &Path, condition: &TagCondition) -> Result<PutMode> {
        let not_met = || Error::ConditionNotMet {
            path: location.to_string(),
            condition: condition.to_string(),
        };

        let meta = match self.store.head(location).await {
            Ok(meta) => meta,
            // A missing object has no tags, and a missing tag satisfies no condition
            Err(e) if e.is_not_found() => {
                debug!(%location, %condition, "condition not met, destination missing");
                return Err(not_met());
            }
            Err(e) => return Err(e),
        };

        match self.evaluator.evaluate(condition, &meta.tags) {
            true => Ok(PutMode::Update((&meta).into())),
            false => {
                debug!(%location, %condition, tags = ?meta.tags, "condition not met");
                Err(not_met())
            }
        }
    }

    async fn write(
        &self,
        location: &Path,
        mode: PutMode,
        tags: TagSet,
        source: &mut Source,
    ) -> Result<PutResult> {
        let opts = PutMultipartOpts { mode, tags };
        let upload = self.store.put_multipart_opts(location, opts).await?;
        let mut writer = PartWriter::new(upload, self.options.part_size);

        if let Err(e) = copy(&mut writer, source).await {
            if let Err(abort) = writer.abort().await {
                warn!("Failed to abort upload to {}: {}", location, abort);
            }
            return Err(e);
        }

        let parts = writer.parts();
        let result = writer.finish().await?;
        debug!(%location, parts, e_tag = ?result.e_tag, "upload committed");
        Ok(result)
    }
}

async fn copy(writer: &mut PartWriter, source: &mut Source) -> Result<()> {
    match source {
        Source::Buffered(payload) => {
            for bytes in payload.iter() {
                writer.put(bytes.clone()).await?;
            }
        }
        Source::Stream { stream, read } => {
            while let Some(bytes) = stream.next().await {
                let bytes = bytes?;
                *read |= !bytes.is_empty();
                writer.put(bytes).await?;
            }
        }
    }
    Ok(())
}

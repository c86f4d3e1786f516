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

//! Tests applicable to all [`ObjectStore`] implementations

use bytes::Bytes;

use crate::path::Path;
use crate::{
    DynObjectStore, Error, GetOptions, GetRange, PutMode, PutMultipartOpts, PutOptions,
    PutPayload, TagSet, UpdateVersion,
};

/// Tests basic read, write, head and delete behaviour
pub(crate) async fn put_get_delete(storage: &DynObjectStore) {
    let location = Path::from("test_dir/test_file.json");

    let data = Bytes::from("arbitrary data");
    storage.put(&location, data.clone().into()).await.unwrap();

    let meta = storage.head(&location).await.unwrap();
    assert_eq!(meta.size, data.len() as u64);
    assert_eq!(meta.location, location);
    assert!(meta.e_tag.is_some());
    assert!(meta.tags.is_empty());

    let read = storage.get(&location).await.unwrap();
    assert_eq!(read.meta, meta);
    assert_eq!(read.range, 0..data.len() as u64);
    assert_eq!(read.bytes().await.unwrap(), data);

    let other = Path::from("test_dir/other");
    let err = storage.head(&other).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
    let err = storage.get(&other).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    storage.delete(&location).await.unwrap();
    let err = storage.head(&location).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    // Deleting a missing object is not an error
    storage.delete(&location).await.unwrap();

    // Empty objects
    storage.put(&location, PutPayload::new()).await.unwrap();
    let read = storage.get(&location).await.unwrap();
    assert_eq!(read.meta.size, 0);
    assert!(read.bytes().await.unwrap().is_empty());
    storage.delete(&location).await.unwrap();
}

/// Tests ranged and e-tag pinned gets
pub(crate) async fn get_opts(storage: &DynObjectStore) {
    let location = Path::from("get_opts");
    let data = Bytes::from("0123456789");
    let result = storage.put(&location, data.clone().into()).await.unwrap();

    let options = GetOptions {
        range: Some(GetRange::Offset(4)),
        ..Default::default()
    };
    let read = storage.get_opts(&location, options).await.unwrap();
    assert_eq!(read.range, 4..10);
    assert_eq!(read.meta.size, 10);
    assert_eq!(read.bytes().await.unwrap(), data.slice(4..));

    let options = GetOptions {
        range: Some(GetRange::Offset(10)),
        ..Default::default()
    };
    let read = storage.get_opts(&location, options).await.unwrap();
    assert!(read.bytes().await.unwrap().is_empty());

    let options = GetOptions {
        range: Some((2..5).into()),
        ..Default::default()
    };
    let read = storage.get_opts(&location, options).await.unwrap();
    assert_eq!(read.bytes().await.unwrap(), data.slice(2..5));

    let options = GetOptions {
        range: Some(GetRange::Offset(11)),
        ..Default::default()
    };
    storage.get_opts(&location, options).await.unwrap_err();

    let options = GetOptions {
        if_match: result.e_tag.clone(),
        range: Some(GetRange::Offset(8)),
    };
    let read = storage.get_opts(&location, options).await.unwrap();
    assert_eq!(read.bytes().await.unwrap(), data.slice(8..));

    let options = GetOptions {
        if_match: Some("not-the-e-tag".to_string()),
        ..Default::default()
    };
    let err = storage.get_opts(&location, options).await.unwrap_err();
    assert!(matches!(err, Error::Precondition { .. }), "{err}");

    storage.delete(&location).await.unwrap();
}

/// Tests [`PutMode`]
pub(crate) async fn put_opts(storage: &DynObjectStore) {
    let path = Path::from("put_opts");
    let v1 = storage
        .put_opts(&path, "a".into(), PutMode::Create.into())
        .await
        .unwrap();

    let err = storage
        .put_opts(&path, "b".into(), PutMode::Create.into())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }), "{err}");

    let b = storage.get(&path).await.unwrap().bytes().await.unwrap();
    assert_eq!(b.as_ref(), b"a");

    let v2 = storage
        .put_opts(&path, "c".into(), PutMode::Update(v1.clone().into()).into())
        .await
        .unwrap();
    assert_ne!(v1.e_tag, v2.e_tag);

    let err = storage
        .put_opts(&path, "d".into(), PutMode::Update(v1.into()).into())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Precondition { .. }), "{err}");

    let b = storage.get(&path).await.unwrap().bytes().await.unwrap();
    assert_eq!(b.as_ref(), b"c");

    let missing = UpdateVersion {
        e_tag: v2.e_tag.clone(),
        version: None,
    };
    let err = storage
        .put_opts(&Path::from("missing"), "e".into(), PutMode::Update(missing).into())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Precondition { .. }), "{err}");

    storage.delete(&path).await.unwrap();
}

/// Tests multipart uploads commit atomically
pub(crate) async fn multipart(storage: &DynObjectStore) {
    let path = Path::from("multipart");
    storage.put(&path, "original".into()).await.unwrap();

    let opts = PutMultipartOpts {
        tags: TagSet::new().with_tag("part", "3"),
        ..Default::default()
    };
    let mut upload = storage.put_multipart_opts(&path, opts).await.unwrap();
    upload.put_part("one ".into()).await.unwrap();
    upload.put_part("two ".into()).await.unwrap();
    upload.put_part("three".into()).await.unwrap();

    // Nothing is visible until complete
    let b = storage.get(&path).await.unwrap().bytes().await.unwrap();
    assert_eq!(b.as_ref(), b"original");

    upload.complete().await.unwrap();
    let read = storage.get(&path).await.unwrap();
    assert_eq!(read.meta.tags.get("part"), Some("3"));
    assert_eq!(read.bytes().await.unwrap().as_ref(), b"one two three");

    // Aborted uploads leave the object unchanged
    let mut upload = storage.put_multipart(&path).await.unwrap();
    upload.put_part("discarded".into()).await.unwrap();
    upload.abort().await.unwrap();
    let b = storage.get(&path).await.unwrap().bytes().await.unwrap();
    assert_eq!(b.as_ref(), b"one two three");

    storage.delete(&path).await.unwrap();
}

/// Tests the mode of a multipart upload is enforced when it completes
pub(crate) async fn multipart_race(storage: &DynObjectStore) {
    let path = Path::from("multipart_race");
    let v1 = storage.put(&path, "v1".into()).await.unwrap();

    let mode = PutMode::Update(v1.into());
    let mut upload = storage.put_multipart_opts(&path, mode.into()).await.unwrap();
    upload.put_part("ours".into()).await.unwrap();

    // A concurrent write lands before the upload completes
    storage.put(&path, "theirs".into()).await.unwrap();

    let err = upload.complete().await.unwrap_err();
    assert!(matches!(err, Error::Precondition { .. }), "{err}");
    let b = storage.get(&path).await.unwrap().bytes().await.unwrap();
    assert_eq!(b.as_ref(), b"theirs");

    let mut upload = storage
        .put_multipart_opts(&Path::from("multipart_race_new"), PutMode::Create.into())
        .await
        .unwrap();
    upload.put_part("ours".into()).await.unwrap();
    storage
        .put(&Path::from("multipart_race_new"), "theirs".into())
        .await
        .unwrap();
    let err = upload.complete().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }), "{err}");

    storage.delete(&path).await.unwrap();
    storage.delete(&Path::from("multipart_race_new")).await.unwrap();
}

/// Tests tags are stored and replaced along with the object
pub(crate) async fn tags_round_trip(storage: &DynObjectStore) {
    let path = Path::from("tagged");
    let tags = TagSet::new().with_tag("MyTag", "1").with_tag("owner", "repro");
    let opts = PutOptions {
        tags: tags.clone(),
        ..Default::default()
    };
    storage.put_opts(&path, "data".into(), opts).await.unwrap();

    assert_eq!(storage.head(&path).await.unwrap().tags, tags);
    assert_eq!(storage.get(&path).await.unwrap().meta.tags, tags);

    // An overwrite without tags clears them
    storage.put(&path, "data".into()).await.unwrap();
    assert!(storage.head(&path).await.unwrap().tags.is_empty());

    storage.delete(&path).await.unwrap();
}

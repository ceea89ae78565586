mod common;

use std::sync::Arc;

use common::{ids, note, temp_dir};
use coursetrack_store_sqlite::{BlobStore, ATTACHMENT_DB_FILE};

#[tokio::test]
async fn save_then_load_round_trips_items() {
    let dir = temp_dir();
    let store = BlobStore::in_dir(dir.path());
    let items = vec![note("n1", "# Week 1"), note("n2", "# Week 2")];

    store
        .save("course-1", &items)
        .await
        .unwrap_or_else(|err| panic!("save: {err}"));

    let loaded = store
        .load("course-1")
        .await
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert_eq!(loaded, items);
    assert!(dir.path().join(ATTACHMENT_DB_FILE).exists());
}

#[tokio::test]
async fn unknown_owner_loads_empty() {
    let dir = temp_dir();
    let store = BlobStore::in_dir(dir.path());

    let loaded = store
        .load("nobody")
        .await
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn concurrent_first_operations_share_one_open() {
    let dir = temp_dir();
    let store = BlobStore::in_dir(dir.path());
    assert_eq!(store.open_count(), 0);

    let notes = [note("n1", "x")];
    let (a, b, c) = tokio::join!(
        store.load("a"),
        store.save("b", &notes),
        store.load("c"),
    );
    a.unwrap_or_else(|err| panic!("load a: {err}"));
    b.unwrap_or_else(|err| panic!("save b: {err}"));
    c.unwrap_or_else(|err| panic!("load c: {err}"));

    assert_eq!(store.open_count(), 1);
}

#[tokio::test]
async fn delete_of_missing_owner_is_silent() {
    let dir = temp_dir();
    let store = BlobStore::in_dir(dir.path());

    store.delete("never-saved").await;
    let loaded = store
        .load("never-saved")
        .await
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn delete_removes_only_that_owner() {
    let dir = temp_dir();
    let store = BlobStore::in_dir(dir.path());
    for owner in ["c1", "c2"] {
        store
            .save(owner, &[note(owner, "body")])
            .await
            .unwrap_or_else(|err| panic!("save {owner}: {err}"));
    }

    store.delete("c1").await;

    let all = store
        .load_all()
        .await
        .unwrap_or_else(|err| panic!("load_all: {err}"));
    assert_eq!(all.len(), 1);
    assert_eq!(all.get("c2").map(|items| ids(items)), Some(vec!["c2"]));
}

#[tokio::test]
async fn same_owner_concurrent_saves_keep_one_whole_list() {
    let dir = temp_dir();
    let store = Arc::new(BlobStore::in_dir(dir.path()));
    let first = vec![note("a1", "a"), note("a2", "a")];
    let second = vec![note("b1", "b")];

    let (left, right) = tokio::join!(store.save("c1", &first), store.save("c1", &second));
    left.unwrap_or_else(|err| panic!("save first: {err}"));
    right.unwrap_or_else(|err| panic!("save second: {err}"));

    // Last writer wins; the lists are never merged.
    let loaded = store
        .load("c1")
        .await
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert!(loaded == first || loaded == second, "unexpected merge: {:?}", ids(&loaded));
}

#[tokio::test]
async fn data_survives_close_and_reopen() {
    let dir = temp_dir();
    let store = BlobStore::in_dir(dir.path());
    store
        .save("c1", &[note("n1", "kept")])
        .await
        .unwrap_or_else(|err| panic!("save: {err}"));

    store.close();
    let loaded = store
        .load("c1")
        .await
        .unwrap_or_else(|err| panic!("load after close: {err}"));
    assert_eq!(ids(&loaded), vec!["n1"]);
    assert_eq!(store.open_count(), 2);

    let fresh = BlobStore::in_dir(dir.path());
    let loaded = fresh
        .load("c1")
        .await
        .unwrap_or_else(|err| panic!("load from fresh store: {err}"));
    assert_eq!(loaded[0].payload_bytes(), "kept".len());
}

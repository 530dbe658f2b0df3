//! Read-stream store: latest payload, termination and cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grpc_store::{Result, StoreError, StreamSnapshot, StreamStore};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

type Feed = mpsc::UnboundedSender<Result<u32>>;

/// Every stream the store opened, as the sending half the test drives.
#[derive(Clone, Default)]
struct Feeds(Arc<Mutex<Vec<(String, Feed)>>>);

impl Feeds {
    fn opened(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn latest(&self) -> Feed {
        self.0.lock().unwrap().last().unwrap().1.clone()
    }

    fn first(&self) -> Feed {
        self.0.lock().unwrap()[0].1.clone()
    }
}

fn progress_store() -> (StreamStore<String, u32>, Feeds) {
    let feeds = Feeds::default();
    let store = StreamStore::builder({
        let feeds = feeds.clone();
        move |goal_id: &String| {
            let (tx, rx) = mpsc::unbounded_channel();
            feeds.0.lock().unwrap().push((goal_id.clone(), tx));
            Ok(UnboundedReceiverStream::new(rx))
        }
    })
    .build();
    (store, feeds)
}

async fn wait_for(
    rx: &mut watch::Receiver<StreamSnapshot<u32>>,
    predicate: impl FnMut(&StreamSnapshot<u32>) -> bool,
) -> StreamSnapshot<u32> {
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for stream state")
        .unwrap()
        .clone()
}

#[tokio::test]
async fn blank_params_are_rejected() {
    let (store, feeds) = progress_store();

    assert_eq!(store.set_params(String::new()), Err(StoreError::BlankParams));

    assert!(!store.is_streaming());
    assert_eq!(store.error(), Some(StoreError::BlankParams.to_string()));
    assert_eq!(feeds.opened(), 0);
}

#[tokio::test]
async fn falsy_json_params_never_open_a_stream() {
    let opened = Arc::new(AtomicUsize::new(0));
    let store: StreamStore<Value, u32> = StreamStore::builder({
        let opened = Arc::clone(&opened);
        move |_filter: &Value| {
            opened.fetch_add(1, Ordering::SeqCst);
            let (_tx, rx) = mpsc::unbounded_channel::<Result<u32>>();
            Ok(UnboundedReceiverStream::new(rx))
        }
    })
    .build();

    for params in [
        json!({}),
        json!({ "goal_id": "", "limit": 0, "archived": false, "owner": null }),
        json!(""),
        json!(null),
    ] {
        assert_eq!(store.set_params(params), Err(StoreError::BlankParams));
    }
    assert_eq!(opened.load(Ordering::SeqCst), 0);
    assert!(!store.is_streaming());

    store.set_params(json!({ "goal_id": "g1" })).unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn data_stays_empty_until_first_payload() {
    let (store, feeds) = progress_store();
    let mut rx = store.subscribe();

    store.set_params("goal-1".to_string()).unwrap();
    assert_eq!(store.data(), None);
    assert!(store.is_loading());

    feeds.latest().send(Ok(4)).unwrap();
    wait_for(&mut rx, |s| s.data == Some(4)).await;

    store.set_params("goal-2".to_string()).unwrap();
    assert!(store.is_streaming());
    assert_eq!(store.data(), Some(4));
}

#[tokio::test]
async fn keeps_latest_payload() {
    let (store, feeds) = progress_store();
    let mut rx = store.subscribe();

    store.set_params("goal-1".to_string()).unwrap();
    assert!(store.is_streaming());
    assert!(store.is_loading());

    let feed = feeds.latest();
    feed.send(Ok(10)).unwrap();
    feed.send(Ok(20)).unwrap();

    let snapshot = wait_for(&mut rx, |s| s.data == Some(20)).await;
    assert!(snapshot.is_streaming);
    assert!(!snapshot.is_loading);
    assert!(snapshot.last_updated.is_some());
}

#[tokio::test]
async fn error_stops_streaming_and_keeps_data() {
    let (store, feeds) = progress_store();
    let mut rx = store.subscribe();
    store.set_params("goal-1".to_string()).unwrap();

    let feed = feeds.latest();
    feed.send(Ok(5)).unwrap();
    feed.send(Err(StoreError::backend("stream reset"))).unwrap();

    let snapshot = wait_for(&mut rx, |s| !s.is_streaming).await;
    assert_eq!(snapshot.data, Some(5));
    assert_eq!(snapshot.error.as_deref(), Some("stream reset"));
}

#[tokio::test]
async fn end_of_stream_stops_streaming() {
    let (store, feeds) = progress_store();
    let mut rx = store.subscribe();
    store.set_params("goal-1".to_string()).unwrap();

    let feed = feeds.latest();
    feed.send(Ok(1)).unwrap();
    drop(feed);
    feeds.0.lock().unwrap().clear();

    let snapshot = wait_for(&mut rx, |s| !s.is_streaming).await;
    assert_eq!(snapshot.data, Some(1));
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn same_params_while_streaming_is_a_no_op() {
    let (store, feeds) = progress_store();

    store.set_params("goal-1".to_string()).unwrap();
    store.set_params("goal-1".to_string()).unwrap();

    assert_eq!(feeds.opened(), 1);
}

#[tokio::test]
async fn new_params_cancel_the_previous_stream() {
    let (store, feeds) = progress_store();
    let mut rx = store.subscribe();
    store.set_params("goal-1".to_string()).unwrap();
    let old = feeds.first();

    store.set_params("goal-2".to_string()).unwrap();
    assert_eq!(feeds.opened(), 2);
    assert_eq!(store.params().as_deref(), Some("goal-2"));

    tokio::time::timeout(Duration::from_secs(1), old.closed())
        .await
        .expect("previous stream was not dropped");
    assert!(old.send(Ok(99)).is_err());

    feeds.latest().send(Ok(7)).unwrap();
    let snapshot = wait_for(&mut rx, |s| s.data.is_some()).await;
    assert_eq!(snapshot.data, Some(7));
}

#[tokio::test]
async fn stop_keeps_data_and_start_reopens() {
    let (store, feeds) = progress_store();
    let mut rx = store.subscribe();
    store.set_params("goal-1".to_string()).unwrap();
    feeds.latest().send(Ok(3)).unwrap();
    wait_for(&mut rx, |s| s.data == Some(3)).await;

    store.stop_stream();
    assert!(!store.is_streaming());
    assert_eq!(store.data(), Some(3));
    tokio::time::timeout(Duration::from_secs(1), feeds.first().closed())
        .await
        .expect("stream was not dropped on stop");

    store.start_stream().unwrap();
    store.start_stream().unwrap();
    assert!(store.is_streaming());
    assert_eq!(feeds.opened(), 2);
}

#[tokio::test]
async fn open_failure_is_recorded() {
    let store: StreamStore<String, u32> = StreamStore::builder(|_goal_id: &String| {
        Err::<UnboundedReceiverStream<Result<u32>>, _>(StoreError::Stream("no route".to_string()))
    })
    .build();

    let err = store.set_params("goal-1".to_string()).unwrap_err();

    assert_eq!(err, StoreError::Stream("no route".to_string()));
    assert!(!store.is_streaming());
    assert_eq!(store.error(), Some(err.to_string()));
}

#[cfg(feature = "emitter")]
#[tokio::test]
async fn lifecycle_events_reach_listeners() {
    use grpc_store::{LifecycleKind, StreamLifecycle};
    use std::sync::mpsc as std_mpsc;

    let (store, feeds) = progress_store();
    let (tx, events) = std_mpsc::channel();
    for kind in [LifecycleKind::Started, LifecycleKind::Error] {
        let tx = tx.clone();
        store.on(kind, move |event: StreamLifecycle| {
            let _ = tx.send(event);
        });
    }

    store.set_params("goal-1".to_string()).unwrap();
    feeds.latest().send(Err(StoreError::backend("lost"))).unwrap();

    // Listeners run on the emitter's threads; poll without blocking the runtime.
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while seen.len() < 2 && tokio::time::Instant::now() < deadline {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }

    let kinds: Vec<_> = seen.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&LifecycleKind::Started));
    assert!(kinds.contains(&LifecycleKind::Error));
    let error = seen.iter().find(|e| e.kind == LifecycleKind::Error).unwrap();
    assert_eq!(error.message.as_deref(), Some("lost"));
}

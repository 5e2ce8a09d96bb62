use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use reddit_stream::poll_stream::{spawn_stream, EngineState, StreamHandle, ERROR_BUFFER};
use reddit_stream::stream_configuration::StreamConfig;
use reddit_stream::stream_types::{fetch_fn, key_fn, FetchFn, FetchRequest, Streamable};
use reddit_stream::{CancellationToken, StreamError, StreamResult};
use serial_test::serial;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tokio_test::assert_pending;

const TICK: Duration = Duration::from_millis(10);
const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
struct Item {
    id: String,
    created: Option<DateTime<Utc>>,
}

impl Streamable for Item {
    fn id(&self) -> &str {
        &self.id
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}

fn item(id: &str) -> Item {
    Item {
        id: id.to_string(),
        created: None,
    }
}

fn timed(id: &str, secs: i64) -> Item {
    Item {
        id: id.to_string(),
        created: Utc.timestamp_opt(secs, 0).single(),
    }
}

fn page(ids: &[&str]) -> StreamResult<Vec<Item>> {
    Ok(ids.iter().map(|id| item(id)).collect())
}

type Requests = Arc<Mutex<Vec<FetchRequest>>>;

/// Fetch function answering with `pages` in order, then with empty pages.
fn scripted(pages: Vec<StreamResult<Vec<Item>>>) -> (FetchFn<Item>, Requests) {
    let pages = Arc::new(Mutex::new(VecDeque::from(pages)));
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    let fetch = fetch_fn(move |req: FetchRequest| {
        seen.lock().unwrap().push(req);
        let next = pages.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Vec::new()));
        async move { next }
    });
    (fetch, requests)
}

async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(item) = timeout(WAIT, rx.recv()).await.expect("channel never closed") {
        out.push(item);
    }
    out
}

fn ids(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

fn start(config: StreamConfig<Item>) -> StreamHandle<Item> {
    spawn_stream(CancellationToken::new(), "rust", config.interval(TICK))
}

#[tokio::test]
async fn test_delivers_new_items_in_page_order() {
    let (fetch, _) = scripted(vec![page(&["b", "a"]), page(&["d", "c", "b", "a"])]);
    let handle = start(StreamConfig::new().fetch_with(fetch).max_requests(2));

    let items = drain(handle.items).await;
    assert_eq!(ids(&items), vec!["b", "a", "d", "c"]);
}

#[tokio::test]
async fn test_first_seen_item_ends_the_page() {
    // "x" sits behind an already delivered item and is treated as old.
    let (fetch, _) = scripted(vec![page(&["b", "a"]), page(&["c", "b", "x"])]);
    let handle = start(StreamConfig::new().fetch_with(fetch).max_requests(2));

    let items = drain(handle.items).await;
    assert_eq!(ids(&items), vec!["b", "a", "c"]);
}

#[tokio::test]
async fn test_discard_initial_drops_whole_first_page() {
    let (fetch, _) = scripted(vec![page(&["c", "b", "a"]), page(&["d", "c", "b", "a"])]);
    let handle = start(
        StreamConfig::new()
            .fetch_with(fetch)
            .discard_initial(true)
            .max_requests(2),
    );

    let items = drain(handle.items).await;
    assert_eq!(ids(&items), vec!["d"]);
}

#[tokio::test]
async fn test_discard_initial_waits_for_non_empty_page() {
    let (fetch, _) = scripted(vec![page(&[]), page(&["b", "a"]), page(&["c", "b", "a"])]);
    let handle = start(
        StreamConfig::new()
            .fetch_with(fetch)
            .discard_initial(true)
            .max_requests(3),
    );

    let items = drain(handle.items).await;
    assert_eq!(ids(&items), vec!["c"]);
}

#[tokio::test]
async fn test_budget_counts_failed_fetches() {
    let (fetch, requests) = scripted(vec![
        Err(StreamError::fetch("503 Service Unavailable")),
        Err(StreamError::fetch("503 Service Unavailable")),
        page(&["never"]),
    ]);
    let handle = start(StreamConfig::new().fetch_with(fetch).max_requests(2));
    let stop = handle.stop.clone();

    let (items, errors) = tokio::join!(drain(handle.items), drain(handle.errors));

    assert!(items.is_empty());
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| matches!(e, StreamError::Fetch(_))));
    assert_eq!(requests.lock().unwrap().len(), 2);
    assert_eq!(stop.requests(), 2);
}

#[tokio::test]
async fn test_unread_errors_do_not_block_items() {
    let failures = ERROR_BUFFER + 4;
    let mut script: Vec<StreamResult<Vec<Item>>> = (0..failures)
        .map(|_| Err(StreamError::fetch("503 Service Unavailable")))
        .collect();
    script.push(page(&["a"]));
    let (fetch, requests) = scripted(script);

    let (mut items, mut errors, stop) =
        start(StreamConfig::new().fetch_with(fetch)).into_parts();

    // The error receiver stays alive but is only read once the item is in.
    let first = timeout(WAIT, items.recv()).await.expect("item never delivered");
    assert_eq!(first.map(|i| i.id), Some("a".to_string()));
    assert!(requests.lock().unwrap().len() > failures);

    let mut queued = 0;
    while errors.try_recv().is_ok() {
        queued += 1;
    }
    assert_eq!(queued, ERROR_BUFFER);
    stop.stop();
}

#[tokio::test]
async fn test_huge_interval_does_not_kill_engine() {
    let (fetch, requests) = scripted(vec![page(&["a"])]);
    let handle = spawn_stream(
        CancellationToken::new(),
        "rust",
        StreamConfig::new().fetch_with(fetch).interval(Duration::MAX),
    );

    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.stop.state(), EngineState::Running);
    assert!(requests.lock().unwrap().is_empty());

    assert!(handle.stop());
    timeout(WAIT, async {
        while handle.stop.state() != EngineState::Stopped {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine never reached Stopped");
}

#[tokio::test]
async fn test_fetch_errors_do_not_end_unbounded_stream() {
    let (fetch, _) = scripted(vec![
        Err(StreamError::fetch("timeout")),
        page(&["a"]),
        Err(StreamError::fetch("timeout")),
        page(&["b", "a"]),
    ]);
    let handle = start(StreamConfig::new().fetch_with(fetch));

    let mut stream = handle.into_stream();
    let mut got = Vec::new();
    while got.len() < 4 {
        let next = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        got.push(next.map(|i| i.id));
    }

    let oks: Vec<_> = got.iter().filter_map(|r| r.as_ref().ok()).cloned().collect();
    assert_eq!(oks, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(got.iter().filter(|r| r.is_err()).count(), 2);
}

#[tokio::test]
async fn test_cancellation_reports_and_closes() {
    let token = CancellationToken::new();
    let (fetch, _) = scripted(vec![]);
    let handle = spawn_stream(
        token.clone(),
        "rust",
        StreamConfig::new().fetch_with(fetch).interval(Duration::from_secs(60)),
    );

    token.cancel();

    let errors = drain(handle.errors).await;
    assert_eq!(errors, vec![StreamError::Cancelled]);
    assert!(drain(handle.items).await.is_empty());
    assert!(handle.stop.is_stopped());
}

#[tokio::test]
async fn test_no_fetch_until_first_interval() {
    let (fetch, requests) = scripted(vec![page(&["a"])]);
    let mut handle = spawn_stream(
        CancellationToken::new(),
        "rust",
        StreamConfig::new().fetch_with(fetch).interval(Duration::from_millis(200)),
    );

    sleep(Duration::from_millis(50)).await;
    assert!(requests.lock().unwrap().is_empty());
    assert_eq!(handle.stop.requests(), 0);
    {
        let mut recv = tokio_test::task::spawn(handle.items.recv());
        assert_pending!(recv.poll());
    }
    handle.stop();
}

#[tokio::test]
async fn test_items_as_receiver_stream() {
    let (fetch, _) = scripted(vec![page(&["c", "b", "a"]), page(&["e", "d", "c"])]);
    let handle = start(StreamConfig::new().fetch_with(fetch).max_requests(2).buffer(4));

    let (items, _errors, stop) = handle.into_parts();
    let first_four: Vec<Item> = ReceiverStream::new(items).take(4).collect().await;
    assert_eq!(ids(&first_four), vec!["c", "b", "a", "e"]);
    stop.stop();
}

#[tokio::test]
async fn test_missing_fetch_function_is_reported() {
    let handle = start(StreamConfig::new());

    let errors = drain(handle.errors).await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], StreamError::InvalidConfiguration(_)));
    assert!(drain(handle.items).await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_stop_is_idempotent_across_tasks() {
    let (fetch, _) = scripted(vec![]);
    let handle = start(StreamConfig::new().fetch_with(fetch));
    let (items, errors, stop) = handle.into_parts();

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stop() })
        })
        .collect();

    let mut performed = 0;
    for caller in callers {
        if caller.await.unwrap() {
            performed += 1;
        }
    }
    assert_eq!(performed, 1);
    assert!(!stop.stop());

    assert!(drain(items).await.is_empty());
    assert!(drain(errors).await.is_empty());

    // The engine task records its final state right after dropping the senders.
    timeout(WAIT, async {
        while stop.state() != EngineState::Stopped {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_stop_releases_blocked_send() {
    let (fetch, _) = scripted(vec![page(&["c", "b", "a"])]);
    let handle = start(StreamConfig::new().fetch_with(fetch));
    let (mut items, _errors, stop) = handle.into_parts();

    // Buffer of one: "c" is queued, the engine blocks on "b".
    let first = timeout(WAIT, items.recv()).await.unwrap();
    assert_eq!(first.map(|i| i.id).as_deref(), Some("c"));
    sleep(Duration::from_millis(30)).await;

    assert!(stop.stop());
    let rest = drain(items).await;
    assert!(rest.len() <= 1, "engine kept sending after stop: {:?}", rest);
}

#[tokio::test]
async fn test_dropping_receivers_ends_stream() {
    let (fetch, _) = scripted(vec![page(&["a"]), page(&["b", "a"])]);
    let handle = start(StreamConfig::new().fetch_with(fetch));
    let (items, _errors, stop) = handle.into_parts();
    drop(items);

    timeout(WAIT, async {
        while stop.state() != EngineState::Stopped {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_cursor_follows_newest_timestamp() {
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let script = Arc::new(Mutex::new(VecDeque::from(vec![
        vec![timed("b", 2), timed("a", 1)],
        vec![timed("c", 3), timed("b", 2), timed("a", 1)],
        vec![],
    ])));
    let seen = Arc::clone(&requests);
    let fetch = fetch_fn(move |req: FetchRequest| {
        seen.lock().unwrap().push(req);
        let next = script.lock().unwrap().pop_front().unwrap_or_default();
        async move { Ok(next) }
    });

    let handle = start(
        StreamConfig::new()
            .fetch_with(fetch)
            .start_from("z")
            .max_requests(3),
    );
    drain(handle.items).await;

    let cursors: Vec<Option<String>> = requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.cursor.clone())
        .collect();
    assert_eq!(
        cursors,
        vec![Some("z".to_string()), Some("b".to_string()), Some("c".to_string())]
    );
    assert!(requests.lock().unwrap().iter().all(|r| r.scope == "rust"));
}

#[tokio::test]
async fn test_stale_cursor_falls_back_through_high_water_mark() {
    let (fetch, requests) = scripted(vec![]);
    let handle = start(
        StreamConfig::new()
            .fetch_with(fetch)
            .high_water_mark(5, ["x", "y"])
            .stale_cursor_after(2)
            .max_requests(5),
    );
    drain(handle.items).await;

    let cursors: Vec<Option<String>> = requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.cursor.clone())
        .collect();
    let y = Some("y".to_string());
    let x = Some("x".to_string());
    assert_eq!(cursors, vec![y.clone(), y, x.clone(), x, None]);
}

#[tokio::test]
async fn test_custom_dedup_key_redelivers_changed_items() {
    let (fetch, _) = scripted(vec![
        page(&["a"]),
        Ok(vec![Item {
            id: "a".into(),
            created: Utc.timestamp_opt(5, 0).single(),
        }]),
    ]);
    let key = key_fn(|i: &Item| format!("{}@{:?}", i.id, i.created.map(|c| c.timestamp())));
    let handle = start(
        StreamConfig::new()
            .fetch_with(fetch)
            .dedup_key(key)
            .max_requests(2),
    );

    let items = drain(handle.items).await;
    assert_eq!(ids(&items), vec!["a", "a"]);
}

#[tokio::test]
async fn test_into_stream_ends_with_engine() {
    let (fetch, _) = scripted(vec![page(&["b", "a"])]);
    let handle = start(StreamConfig::new().fetch_with(fetch).max_requests(1));

    let results: Vec<_> = timeout(WAIT, handle.into_stream().collect::<Vec<_>>())
        .await
        .unwrap();
    let ids: Vec<_> = results.into_iter().map(|r| r.unwrap().id).collect();
    assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
}

#[tokio::test]
async fn test_dropping_merged_stream_stops_engine() {
    let (fetch, _) = scripted(vec![]);
    let handle = start(StreamConfig::new().fetch_with(fetch));
    let stop = handle.stop.clone();

    let stream = handle.into_stream();
    assert!(!stop.is_stopped());
    drop(stream);
    assert!(stop.is_stopped());
}

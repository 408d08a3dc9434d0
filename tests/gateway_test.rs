//! Black-box tests for the indexing gateway: producers on arbitrary
//! threads, one worker draining, completion events as the only clock.

use std::time::Duration;

use feedsearch::{
    DocTerm, IndexError, IndexModifier, ItemDocument, OperationKind, Outcome, Settings,
};
use tempfile::TempDir;

fn item(id: &str, feed: &str) -> ItemDocument {
    ItemDocument::new(id, feed, format!("title {id}"), format!("body of {id}"))
}

/// Settings tuned for tests: RAM index, short pacing so drains follow
/// enqueues promptly.
fn fast_settings() -> Settings {
    let mut settings = Settings::in_memory();
    settings.tuning.pacing_ms = 5;
    settings
}

fn wait_events(
    events: &crossbeam_channel::Receiver<feedsearch::FinishedOperation>,
    count: usize,
) -> Vec<feedsearch::FinishedOperation> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        match events.recv_timeout(Duration::from_secs(30)) {
            Ok(event) => received.push(event),
            Err(err) => panic!(
                "timed out after {} of {count} events: {err}",
                received.len()
            ),
        }
    }
    received
}

#[test]
fn add_becomes_visible_after_drain() {
    let gateway = IndexModifier::start(&fast_settings()).unwrap();
    let events = gateway.subscribe();

    gateway.add(item("https://example.org/post/1", "https://example.org/feed"), None);

    let drained = wait_events(&events, 1);
    assert_eq!(drained[0].kind, OperationKind::AddDocument);
    assert_eq!(drained[0].outcome, Outcome::Completed);

    // The event precedes the batch commit; flush makes the add visible.
    gateway.flush(false);
    assert_eq!(gateway.num_docs().unwrap(), 1);
    assert_eq!(
        gateway
            .count_term(&DocTerm::item("https://example.org/post/1"))
            .unwrap(),
        1
    );
}

#[test]
fn add_then_delete_nets_zero_hits() {
    let gateway = IndexModifier::start(&fast_settings()).unwrap();
    let events = gateway.subscribe();

    gateway.add(item("post-1", "feed-1"), None);
    gateway.delete(DocTerm::item("post-1"));

    wait_events(&events, 2);
    gateway.flush(false);
    assert_eq!(gateway.count_term(&DocTerm::item("post-1")).unwrap(), 0);
}

#[test]
fn delete_feed_removes_every_item_of_the_feed() {
    let gateway = IndexModifier::start(&fast_settings()).unwrap();
    let events = gateway.subscribe();

    gateway.add_many(
        vec![item("a", "feed-1"), item("b", "feed-1"), item("c", "feed-2")],
        None,
    );
    wait_events(&events, 1);
    gateway.flush(false);
    assert_eq!(gateway.num_docs().unwrap(), 3);

    gateway.delete_feed("feed-1");
    wait_events(&events, 1);
    gateway.flush(false);
    assert_eq!(gateway.num_docs().unwrap(), 1);
    assert_eq!(gateway.count_term(&DocTerm::feed("feed-2")).unwrap(), 1);
}

#[test]
fn repeated_add_and_flush_yields_two_hits() {
    let gateway = IndexModifier::start(&fast_settings()).unwrap();
    let events = gateway.subscribe();

    gateway.add(item("dup", "feed"), None);
    wait_events(&events, 1);
    gateway.flush(false);

    gateway.add(item("dup", "feed"), None);
    wait_events(&events, 1);
    gateway.flush(false);

    // No dedup contract at this layer.
    assert_eq!(gateway.count_term(&DocTerm::item("dup")).unwrap(), 2);
}

#[test]
fn reset_is_idempotent() {
    let gateway = IndexModifier::start(&fast_settings()).unwrap();
    let events = gateway.subscribe();

    gateway.add(item("a", "feed"), None);
    wait_events(&events, 1);
    gateway.flush(false);

    gateway.reset().unwrap();
    assert_eq!(gateway.num_docs().unwrap(), 0);
    assert_eq!(gateway.queue_len(), 0);

    gateway.reset().unwrap();
    assert_eq!(gateway.num_docs().unwrap(), 0);
}

#[test]
fn shutdown_surfaces_closed_errors_and_silences_producers() {
    let gateway = IndexModifier::start(&fast_settings()).unwrap();
    gateway.shutdown();

    assert!(matches!(gateway.num_docs(), Err(IndexError::Closed)));

    let events = gateway.subscribe();
    gateway.add(item("late", "feed"), None);
    assert_eq!(gateway.queue_len(), 0);
    assert!(
        events.recv_timeout(Duration::from_millis(200)).is_err(),
        "no completion events after shutdown"
    );
}

#[test]
fn stop_raises_no_further_events() {
    let gateway = IndexModifier::start(&fast_settings()).unwrap();
    let events = gateway.subscribe();

    for i in 0..20 {
        gateway.add(item(&format!("i{i}"), "feed"), None);
    }
    gateway.stop();

    // Let a drain that raced stop settle, then demand silence.
    std::thread::sleep(Duration::from_millis(300));
    let drained = events.try_iter().count();
    assert!(drained <= 20);
    assert!(
        events.recv_timeout(Duration::from_millis(200)).is_err(),
        "event raised after stop settled"
    );
}

#[test]
fn documents_survive_shutdown_and_reopen_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut settings = Settings::at_path(dir.path());
    settings.tuning.pacing_ms = 5;

    {
        let gateway = IndexModifier::start(&settings).unwrap();
        let events = gateway.subscribe();
        gateway.add(item("persist-me", "feed"), None);
        wait_events(&events, 1);
        gateway.shutdown();
    }

    let gateway = IndexModifier::start(&settings).unwrap();
    assert_eq!(gateway.num_docs().unwrap(), 1);
    assert_eq!(gateway.count_term(&DocTerm::item("persist-me")).unwrap(), 1);
}

#[test]
fn pacing_coalesces_sustained_bursts() {
    let mut settings = Settings::in_memory();
    settings.tuning.pacing_ms = 500;
    // Keep the buffered-docs threshold out of the way so every commit we
    // count is a drain-boundary commit.
    settings.tuning.buffered_docs = 1000;
    let gateway = std::sync::Arc::new(IndexModifier::start(&settings).unwrap());
    let events = gateway.subscribe();

    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 100;

    // Sustained trickle: enqueues keep landing while the worker is inside
    // its pacing window.
    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let gateway = std::sync::Arc::clone(&gateway);
        handles.push(std::thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                gateway.add(
                    item(&format!("p{producer}-i{i}"), &format!("feed-{producer}")),
                    None,
                );
                std::thread::sleep(Duration::from_millis(8));
            }
        }));
    }
    for handle in handles {
        handle.join().expect("producer thread must not panic");
    }

    wait_events(&events, PRODUCERS * PER_PRODUCER);

    // Producers streamed for roughly 0.8 s. With the 500 ms throttle intact
    // that is a handful of drains, not one commit per burst of enqueues.
    let commits = gateway.num_commits();
    assert!(commits >= 1);
    assert!(
        commits <= 8,
        "pacing failed to coalesce the burst: {commits} commits"
    );

    gateway.flush(false);
    assert_eq!(
        gateway.num_docs().unwrap(),
        (PRODUCERS * PER_PRODUCER) as u64
    );
}

#[test]
fn contention_smoke_eight_producers() {
    let gateway = std::sync::Arc::new(IndexModifier::start(&fast_settings()).unwrap());
    let events = gateway.subscribe();

    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 1000;

    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let gateway = std::sync::Arc::clone(&gateway);
        handles.push(std::thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                gateway.add(
                    item(&format!("p{producer}-i{i}"), &format!("feed-{producer}")),
                    None,
                );
            }
        }));
    }
    for handle in handles {
        handle.join().expect("producer thread must not panic");
    }

    wait_events(&events, PRODUCERS * PER_PRODUCER);
    gateway.flush(false);
    assert_eq!(gateway.num_docs().unwrap(), (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(gateway.queue_len(), 0);
}

//! End-to-end lifecycle scenarios against the in-memory coordinator.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use servisor::{
    Coordinator, CreateMode, MemCoordinator, Message, RunId, ServiceSupervisor, State,
    SystemMessages,
};

use common::{wait_until, EventLog, TestWorker};

fn supervisor_for(
    coord: &Arc<MemCoordinator>,
    worker: Arc<TestWorker>,
    run_id: &str,
) -> ServiceSupervisor {
    ServiceSupervisor::new(
        Arc::clone(coord) as Arc<dyn Coordinator>,
        RunId::new(run_id),
        serde_json::json!({"host": "h"}),
        worker,
    )
}

async fn create_message(coord: &Arc<MemCoordinator>, run_id: &str, id: &str, message: Message) {
    coord
        .create(
            &format!("/{run_id}/messages/{id}"),
            Some(message.encode()),
            CreateMode::Persistent,
            false,
        )
        .await
        .expect("create message node");
}

#[tokio::test]
async fn happy_path_mirrors_running_state() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::new();
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1");

    supervisor.start().await.expect("start");

    let c = Arc::clone(&coord);
    wait_until("running state published", move || {
        c.node_data("/r1/state").as_deref() == Some(&br#"{"state":"RUNNING"}"#[..])
    })
    .await;

    assert!(coord.exists("/instances/r1"));
    assert!(coord.children_of("/r1/messages").is_empty());

    let live: serde_json::Value =
        serde_json::from_slice(&coord.node_data("/instances/r1").unwrap()).unwrap();
    assert_eq!(live, serde_json::json!({"data": {"host": "h"}}));
    assert_eq!(supervisor.state(), State::Running);
}

#[tokio::test]
async fn graceful_stop_via_stop_message() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::new();
    let log = EventLog::new();
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1");
    supervisor.add_listener(log.clone());

    supervisor.start().await.expect("start");
    let c = Arc::clone(&coord);
    wait_until("worker running", move || c.exists("/r1/state")).await;

    create_message(&coord, "r1", "00000001", SystemMessages::stop()).await;

    assert_eq!(supervisor.await_terminal().await, State::Terminated);
    assert!(!coord.exists("/r1"));
    assert!(!coord.exists("/r1/messages/00000001"));
    assert!(!coord.exists("/instances/r1"));

    // The stop command is handled by the supervisor, never delivered.
    assert!(worker.received().is_empty());
    assert_eq!(
        log.entries(),
        vec!["starting", "running", "stopping", "terminated"]
    );
}

#[tokio::test]
async fn user_messages_are_delivered_in_lexical_order() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::new();
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1");

    supervisor.start().await.expect("start");
    let c = Arc::clone(&coord);
    wait_until("running state published", move || {
        c.node_data("/r1/state").as_deref() == Some(&br#"{"state":"RUNNING"}"#[..])
    })
    .await;

    create_message(&coord, "r1", "00000002", Message::user("alpha", None)).await;
    create_message(&coord, "r1", "00000003", Message::user("beta", Some(b"b".to_vec()))).await;

    let w = Arc::clone(&worker);
    wait_until("both messages delivered", move || w.received().len() == 2).await;

    let ids: Vec<String> = worker.received().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["00000002", "00000003"]);

    let c = Arc::clone(&coord);
    wait_until("message nodes deleted", move || {
        c.children_of("/r1/messages").is_empty()
    })
    .await;

    assert_eq!(supervisor.state(), State::Running);
}

#[tokio::test]
async fn failing_callback_still_deletes_the_node() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::new();
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1");

    supervisor.start().await.expect("start");
    let c = Arc::clone(&coord);
    wait_until("worker running", move || {
        c.node_data("/r1/state").as_deref() == Some(&br#"{"state":"RUNNING"}"#[..])
    })
    .await;

    create_message(&coord, "r1", "00000001", Message::user("explode", None)).await;
    create_message(&coord, "r1", "00000002", Message::user("after", None)).await;

    let w = Arc::clone(&worker);
    wait_until("both callbacks invoked", move || w.received().len() == 2).await;
    let c = Arc::clone(&coord);
    wait_until("nodes deleted despite failure", move || {
        c.children_of("/r1/messages").is_empty()
    })
    .await;
}

#[tokio::test]
async fn malformed_message_is_deleted_without_delivery() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::new();
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1");

    supervisor.start().await.expect("start");
    let c = Arc::clone(&coord);
    wait_until("worker running", move || {
        c.node_data("/r1/state").as_deref() == Some(&br#"{"state":"RUNNING"}"#[..])
    })
    .await;

    coord
        .create(
            "/r1/messages/00000001",
            Some(b"not a message".to_vec()),
            CreateMode::Persistent,
            false,
        )
        .await
        .expect("create garbage node");

    let c = Arc::clone(&coord);
    wait_until("garbage node deleted", move || {
        c.children_of("/r1/messages").is_empty()
    })
    .await;
    assert!(worker.received().is_empty());
}

#[tokio::test]
async fn worker_without_callback_discards_messages() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::without_callback();
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1");

    supervisor.start().await.expect("start");
    let c = Arc::clone(&coord);
    wait_until("worker running", move || {
        c.node_data("/r1/state").as_deref() == Some(&br#"{"state":"RUNNING"}"#[..])
    })
    .await;

    create_message(&coord, "r1", "00000001", Message::user("noop", None)).await;

    let c = Arc::clone(&coord);
    wait_until("message discarded", move || {
        c.children_of("/r1/messages").is_empty()
    })
    .await;
    assert!(worker.received().is_empty());
}

#[tokio::test]
async fn coordinator_write_failure_forces_failed() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::new();
    let log = EventLog::new();
    let finalizer_runs = Arc::new(AtomicUsize::new(0));

    let runs = Arc::clone(&finalizer_runs);
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1").with_finalizer(move || {
        runs.fetch_add(1, Ordering::SeqCst);
    });
    supervisor.add_listener(log.clone());

    supervisor.start().await.expect("start");
    let c = Arc::clone(&coord);
    wait_until("worker running", move || {
        c.node_data("/r1/state").as_deref() == Some(&br#"{"state":"RUNNING"}"#[..])
    })
    .await;

    // The STOPPING write will be the one that fails.
    coord.fail_set_data(true);
    supervisor.stop().await;

    assert_eq!(supervisor.await_terminal().await, State::Failed);

    let entries = log.entries();
    let failed = entries.last().expect("terminal notification");
    assert!(failed.starts_with("failed:"), "got {failed}");
    assert!(
        failed.contains("connection"),
        "cause should be the injected write failure, got {failed}"
    );

    // Cleanup is skipped once the coordinator-failure flag is latched.
    assert!(coord.exists("/instances/r1"));
    assert!(coord.exists("/r1/state"));

    assert_eq!(finalizer_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn finalizer_runs_once_on_clean_exit() {
    let coord = Arc::new(MemCoordinator::new());
    let worker = TestWorker::new();
    let finalizer_runs = Arc::new(AtomicUsize::new(0));

    let runs = Arc::clone(&finalizer_runs);
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1").with_finalizer(move || {
        runs.fetch_add(1, Ordering::SeqCst);
    });

    supervisor.start().await.expect("start");
    let c = Arc::clone(&coord);
    wait_until("worker running", move || c.exists("/r1/state")).await;

    supervisor.stop().await;
    assert_eq!(supervisor.await_terminal().await, State::Terminated);

    // Give any stray second invocation a chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(finalizer_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restart_resets_a_stale_namespace() {
    let coord = Arc::new(MemCoordinator::new());

    // A crashed predecessor left state and an unprocessed message behind.
    coord
        .create(
            "/r1/state",
            Some(b"stale".to_vec()),
            CreateMode::Persistent,
            true,
        )
        .await
        .expect("stale state");
    coord
        .create(
            "/r1/messages/00000009",
            Some(b"stale".to_vec()),
            CreateMode::Persistent,
            true,
        )
        .await
        .expect("stale message");

    let worker = TestWorker::new();
    let supervisor = supervisor_for(&coord, Arc::clone(&worker), "r1");
    supervisor.start().await.expect("start");

    let c = Arc::clone(&coord);
    wait_until("state reset and republished", move || {
        c.node_data("/r1/state").as_deref() == Some(&br#"{"state":"RUNNING"}"#[..])
    })
    .await;
    assert!(coord.children_of("/r1/messages").is_empty());
    assert!(worker.received().is_empty());
}

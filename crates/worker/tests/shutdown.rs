use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use jobq_core::{JobId, JobStatus, LogLevel, MemoryEcho, RunId};
use jobq_jobs::{DoneOptions, JobContext, JobDocument};
use jobq_rpc::{FnInvoker, RemoteError};
use jobq_worker::{
    JobQueue, PollInterval, QueueOptions, ShutdownHandle, ShutdownLevel, ShutdownOptions,
    UnitCallback, WorkUnit,
};
use serde_json::{json, Map, Value};

/// A server holding `total` ready jobs that leases them on request.
fn stub_server(total: usize) -> Arc<FnInvoker> {
    let handed_out = AtomicUsize::new(0);
    Arc::new(FnInvoker::new(move |method, params| match method {
        "root_getWork" => {
            let requested = params[1]["maxJobs"].as_u64().unwrap_or(1) as usize;
            let start = handed_out.load(Ordering::SeqCst);
            let count = requested.min(total - start);
            handed_out.fetch_add(count, Ordering::SeqCst);
            Ok(Value::Array((start..start + count).map(running_doc).collect()))
        }
        "root_jobDone" | "root_jobFail" => Ok(json!(true)),
        _ => Err(RemoteError::new("Bad method name")),
    }))
}

fn running_doc(n: usize) -> Value {
    let mut doc = JobDocument::new("work", Map::new());
    doc.id = Some(JobId::new(format!("job-{n}")));
    doc.run_id = Some(RunId::new(format!("run-{n}")));
    doc.status = JobStatus::Running;
    doc.to_value()
}

/// Finishes every job after `delay`, then signals the unit.
fn finish_after(delay: Duration) -> impl Fn(WorkUnit, UnitCallback) + Send + Sync + 'static {
    move |unit, callback| {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for job in unit.jobs() {
                job.done(Value::Null, DoneOptions::default()).await.unwrap();
            }
            callback.call().unwrap();
        });
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn options() -> QueueOptions {
    QueueOptions::default().with_poll_interval(PollInterval::Every(Duration::from_millis(50)))
}

#[tokio::test]
async fn soft_shutdown_finishes_buffered_work() {
    let server = stub_server(5);
    let ctx = JobContext::new("root", server.clone());
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_prefetch(4),
        finish_after(Duration::from_millis(20)),
    )
    .unwrap();

    eventually("initial fetch", || queue.length() + queue.running() == 5).await;
    queue.shutdown(ShutdownOptions::soft().quiet()).await;

    assert_eq!(server.call_count("root_jobDone"), 5);
    assert_eq!(server.call_count("root_jobFail"), 0);
    assert!(queue.idle());
}

#[tokio::test]
async fn normal_shutdown_fails_buffered_jobs_and_waits_for_running() {
    let server = stub_server(10);
    let ctx = JobContext::new("root", server.clone());
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_concurrency(2).with_prefetch(3),
        finish_after(Duration::from_millis(30)),
    )
    .unwrap();

    eventually("two running units", || queue.running() == 2 && queue.length() == 3).await;
    assert!(queue.full());
    queue.shutdown(ShutdownOptions::default().quiet()).await;

    assert_eq!(server.call_count("root_jobDone"), 2);
    assert_eq!(server.call_count("root_jobFail"), 3);
    let failures: Vec<Value> = server
        .calls()
        .into_iter()
        .filter(|(method, _)| method == "root_jobFail")
        .map(|(_, params)| params[2].clone())
        .collect();
    assert!(failures.iter().all(|e| e == &json!({"value": "Worker shutdown"})));
}

#[tokio::test]
async fn payload_batches_count_against_capacity() {
    let server = stub_server(25);
    let ctx = JobContext::new("root", server.clone());
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let seen = sizes.clone();
    let run = finish_after(Duration::from_millis(30));
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_payload(5).with_concurrency(2).with_prefetch(15),
        move |unit, callback| {
            seen.lock().unwrap().push(unit.len());
            run(unit, callback);
        },
    )
    .unwrap();

    eventually("two batches running", || queue.running() == 2 && queue.length() == 15).await;
    queue.shutdown(ShutdownOptions::default().quiet()).await;

    assert_eq!(*sizes.lock().unwrap(), vec![5, 5]);
    assert_eq!(server.call_count("root_jobDone"), 10);
    assert_eq!(server.call_count("root_jobFail"), 15);
}

#[tokio::test]
async fn hard_shutdown_fails_unsettled_running_jobs() {
    let server = stub_server(5);
    let ctx = JobContext::new("root", server.clone());
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_prefetch(4),
        |unit: WorkUnit, _callback: UnitCallback| {
            tokio::spawn(async move {
                for job in unit.jobs() {
                    job.done(Value::Null, DoneOptions::default()).await.unwrap();
                }
                // The callback is never called; hard shutdown must not wait.
            });
        },
    )
    .unwrap();

    eventually("first job settled", || server.call_count("root_jobDone") == 1).await;
    queue.shutdown(ShutdownOptions::hard().quiet()).await;

    assert_eq!(server.call_count("root_jobDone"), 1);
    assert_eq!(server.call_count("root_jobFail"), 4);
}

#[tokio::test]
async fn hard_shutdown_fails_jobs_still_running_and_leaves_the_queue_idle() {
    let server = stub_server(2);
    let ctx = JobContext::new("root", server.clone());
    let pending: Arc<Mutex<Vec<UnitCallback>>> = Arc::new(Mutex::new(Vec::new()));
    let keep = pending.clone();
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_prefetch(1),
        move |_unit: WorkUnit, callback: UnitCallback| keep.lock().unwrap().push(callback),
    )
    .unwrap();

    eventually("unit running", || queue.running() == 1 && queue.length() == 1).await;
    queue.shutdown(ShutdownOptions::hard().quiet()).await;

    assert_eq!(server.call_count("root_jobFail"), 2);
    assert_eq!(queue.running(), 0);
    assert!(queue.idle());

    // The abandoned handler finishing late changes nothing.
    let late = pending.lock().unwrap().pop().unwrap();
    assert_eq!(late.call(), Ok(()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(queue.idle());
    assert_eq!(server.call_count("root_jobFail"), 2);
    assert_eq!(server.call_count("root_getWork"), 1);
}

#[tokio::test]
async fn soft_shutdown_after_second_completion() {
    let server = stub_server(5);
    let ctx = JobContext::new("root", server.clone());
    let slot: Arc<OnceLock<JobQueue>> = Arc::new(OnceLock::new());
    let drain: Arc<Mutex<Option<ShutdownHandle>>> = Arc::new(Mutex::new(None));
    let completions = Arc::new(AtomicUsize::new(0));

    let queue_slot = slot.clone();
    let drain_slot = drain.clone();
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_prefetch(4),
        move |unit, callback| {
            let queue_slot = queue_slot.clone();
            let drain_slot = drain_slot.clone();
            let completions = completions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                for job in unit.jobs() {
                    job.done(Value::Null, DoneOptions::default()).await.unwrap();
                }
                callback.call().unwrap();
                if completions.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                    let queue = queue_slot.get().unwrap();
                    let handle = queue.shutdown(ShutdownOptions::soft().quiet());
                    *drain_slot.lock().unwrap() = Some(handle);
                }
            });
        },
    )
    .unwrap();
    assert!(slot.set(queue.clone()).is_ok());

    eventually("shutdown requested", || drain.lock().unwrap().is_some()).await;
    let handle = drain.lock().unwrap().take().unwrap();
    handle.await;

    assert_eq!(server.call_count("root_jobDone"), 5);
    assert_eq!(server.call_count("root_jobFail"), 0);
    assert!(queue.idle());
}

#[tokio::test]
async fn repeated_shutdown_returns_the_first_drain() {
    let server = stub_server(3);
    let ctx = JobContext::new("root", server.clone());
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_prefetch(2),
        finish_after(Duration::from_millis(20)),
    )
    .unwrap();

    eventually("initial fetch", || queue.length() + queue.running() == 3).await;
    let first = queue.shutdown(ShutdownOptions::soft().quiet());
    let second = queue.shutdown(ShutdownOptions::hard().quiet());
    second.await;
    assert!(first.is_complete());

    assert_eq!(server.call_count("root_jobDone"), 3);
    assert_eq!(server.call_count("root_jobFail"), 0);
}

#[tokio::test]
async fn shutdown_notices_go_to_the_echo_channel_unless_quiet() {
    let echo = Arc::new(MemoryEcho::new());
    let ctx = JobContext::new("root", stub_server(0)).with_echo(echo.clone());
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options(),
        finish_after(Duration::ZERO),
    )
    .unwrap();

    queue
        .shutdown(ShutdownOptions::default().with_level(ShutdownLevel::Normal))
        .await;

    let lines = echo.lines();
    assert!(!lines.is_empty());
    assert!(lines.iter().all(|(level, _)| *level == LogLevel::Warning));
    assert!(lines[0].1.contains("normal shutdown"));

    let quiet_echo = Arc::new(MemoryEcho::new());
    let ctx = JobContext::new("root", stub_server(0)).with_echo(quiet_echo.clone());
    let queue = JobQueue::spawn(ctx, "work", options(), finish_after(Duration::ZERO)).unwrap();
    queue.shutdown(ShutdownOptions::default().quiet()).await;
    assert!(quiet_echo.lines().is_empty());
}

/// Concurrency 2, prefetch 3, five jobs. The first unit settles and signals
/// immediately and then requests `level`; every other unit settles after a
/// delay, or never for a hard shutdown.
async fn shutdown_after_first_completion(level: ShutdownLevel) -> Arc<FnInvoker> {
    let server = stub_server(5);
    let ctx = JobContext::new("root", server.clone());
    let slot: Arc<OnceLock<JobQueue>> = Arc::new(OnceLock::new());
    let drain: Arc<Mutex<Option<ShutdownHandle>>> = Arc::new(Mutex::new(None));

    let queue_slot = slot.clone();
    let drain_slot = drain.clone();
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options().with_concurrency(2).with_prefetch(3),
        move |unit, callback| {
            let queue_slot = queue_slot.clone();
            let drain_slot = drain_slot.clone();
            tokio::spawn(async move {
                let first = unit.jobs()[0].id().map(|id| id.as_str() == "job-0") == Some(true);
                if !first {
                    if level == ShutdownLevel::Hard {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                for job in unit.jobs() {
                    job.done(Value::Null, DoneOptions::default()).await.unwrap();
                }
                callback.call().unwrap();
                if first {
                    let queue = queue_slot.get().unwrap();
                    let handle = queue.shutdown(ShutdownOptions::default().with_level(level).quiet());
                    *drain_slot.lock().unwrap() = Some(handle);
                }
            });
        },
    )
    .unwrap();
    assert!(slot.set(queue).is_ok());

    eventually("shutdown requested", || drain.lock().unwrap().is_some()).await;
    let handle = drain.lock().unwrap().take().unwrap();
    handle.wait().await;
    server
}

#[tokio::test]
async fn normal_shutdown_after_first_completion() {
    let server = shutdown_after_first_completion(ShutdownLevel::Normal).await;
    assert_eq!(server.call_count("root_jobDone"), 2);
    assert_eq!(server.call_count("root_jobFail"), 3);
}

#[tokio::test]
async fn hard_shutdown_right_after_first_completion() {
    let server = shutdown_after_first_completion(ShutdownLevel::Hard).await;
    assert_eq!(server.call_count("root_jobDone"), 1);
    assert_eq!(server.call_count("root_jobFail"), 4);
    assert_eq!(server.call_count("root_getWork"), 1);
}

#[tokio::test]
async fn soft_shutdown_after_first_completion() {
    let server = shutdown_after_first_completion(ShutdownLevel::Soft).await;
    assert_eq!(server.call_count("root_jobDone"), 5);
    assert_eq!(server.call_count("root_jobFail"), 0);
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobq_core::{JobId, JobStatus, RunId};
use jobq_jobs::{JobContext, JobDocument};
use jobq_rpc::{FnInvoker, RemoteError};
use jobq_worker::{
    JobQueue, PollInterval, QueueError, QueueOptions, ShutdownOptions, UnitCallback, WorkUnit,
};
use serde_json::{json, Map, Value};

fn running_doc(n: usize) -> Value {
    let mut doc = JobDocument::new("work", Map::new());
    doc.id = Some(JobId::new(format!("job-{n}")));
    doc.run_id = Some(RunId::new(format!("run-{n}")));
    doc.status = JobStatus::Running;
    doc.to_value()
}

fn endless_server() -> Arc<FnInvoker> {
    let next = AtomicUsize::new(0);
    Arc::new(FnInvoker::new(move |method, params| match method {
        "root_getWork" => {
            let requested = params[1]["maxJobs"].as_u64().unwrap_or(1) as usize;
            let start = next.fetch_add(requested, Ordering::SeqCst);
            Ok(Value::Array((start..start + requested).map(running_doc).collect()))
        }
        "root_jobDone" | "root_jobFail" => Ok(json!(true)),
        _ => Err(RemoteError::new("Bad method name")),
    }))
}

fn collecting() -> (Arc<Mutex<Vec<QueueError>>>, QueueOptions) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let options = QueueOptions::default()
        .with_poll_interval(PollInterval::Forever)
        .with_error_callback(move |err| sink.lock().unwrap().push(err.clone()));
    (errors, options)
}

fn ignore(_unit: WorkUnit, _callback: UnitCallback) {}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[test]
fn spawn_requires_a_runtime() {
    let ctx = JobContext::new("root", endless_server());
    let err = JobQueue::spawn(ctx, "work", QueueOptions::default(), ignore).unwrap_err();
    assert_eq!(err, QueueError::NoRuntime);
}

#[tokio::test]
async fn invalid_options_are_rejected_before_polling() {
    let server = endless_server();
    let ctx = JobContext::new("root", server.clone());

    for (types, options) in [
        (vec!["work"], QueueOptions::default().with_concurrency(0)),
        (vec!["work"], QueueOptions::default().with_payload(0)),
        (vec![], QueueOptions::default()),
        (vec![""], QueueOptions::default()),
    ] {
        let err = JobQueue::spawn(ctx.clone(), types, options, ignore).unwrap_err();
        assert!(matches!(err, QueueError::InvalidQueueOption(_)), "{err:?}");
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(server.call_count("root_getWork"), 0);
}

#[tokio::test]
async fn forever_interval_polls_only_on_trigger() {
    let server = endless_server();
    let ctx = JobContext::new("root", server.clone());
    let (_, options) = collecting();
    let queue = JobQueue::spawn(ctx, "work", options, ignore).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.call_count("root_getWork"), 0);

    queue.trigger();
    eventually("triggered fetch", || queue.running() == 1).await;
    assert_eq!(server.call_count("root_getWork"), 1);
    queue.shutdown(ShutdownOptions::hard().quiet()).await;
}

#[tokio::test]
async fn paused_queue_neither_polls_nor_dispatches() {
    let server = endless_server();
    let ctx = JobContext::new("root", server.clone());
    let (_, options) = collecting();
    let queue = JobQueue::spawn(ctx, "work", options, ignore).unwrap();

    queue.pause();
    assert!(queue.is_paused());
    queue.trigger();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.call_count("root_getWork"), 0);

    queue.resume();
    assert!(!queue.is_paused());
    eventually("fetch after resume", || queue.running() == 1).await;
    queue.shutdown(ShutdownOptions::hard().quiet()).await;
}

#[tokio::test]
async fn completion_dispatches_the_next_unit_and_polls() {
    let server = endless_server();
    let ctx = JobContext::new("root", server.clone());
    let (_, options) = collecting();
    let handed: Arc<Mutex<Vec<UnitCallback>>> = Arc::new(Mutex::new(Vec::new()));
    let keep = handed.clone();
    let queue = JobQueue::spawn(ctx, "work", options, move |_unit, callback| {
        keep.lock().unwrap().push(callback);
    })
    .unwrap();

    queue.trigger();
    eventually("first unit", || handed.lock().unwrap().len() == 1).await;
    let first = handed.lock().unwrap()[0].clone();
    first.call().unwrap();

    eventually("second unit", || handed.lock().unwrap().len() == 2).await;
    assert_eq!(server.call_count("root_getWork"), 2);
    queue.shutdown(ShutdownOptions::hard().quiet()).await;
}

#[tokio::test]
async fn repeated_callback_is_reported_and_strict_mode_errors() {
    let (errors, options) = collecting();
    let seen: Arc<Mutex<Vec<Result<(), QueueError>>>> = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let ctx = JobContext::new("root", endless_server());
    let queue = JobQueue::spawn(
        ctx,
        "work",
        options.with_callback_strict(true),
        move |_unit, callback| {
            record.lock().unwrap().push(callback.call());
            record.lock().unwrap().push(callback.call());
        },
    )
    .unwrap();

    queue.trigger();
    eventually("two callback results", || seen.lock().unwrap().len() >= 2).await;
    queue.shutdown(ShutdownOptions::hard().quiet()).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], Ok(()));
    assert!(matches!(seen[1], Err(QueueError::CallbackOveruse { .. })));
    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, QueueError::CallbackOveruse { .. })));
}

#[tokio::test]
async fn lenient_mode_reports_but_accepts_repeated_callback() {
    let (errors, options) = collecting();
    let second = Arc::new(Mutex::new(None));
    let record = second.clone();
    let ctx = JobContext::new("root", endless_server());
    let queue = JobQueue::spawn(ctx, "work", options, move |_unit, callback| {
        if record.lock().unwrap().is_none() {
            callback.call().unwrap();
            *record.lock().unwrap() = Some(callback.call());
        }
    })
    .unwrap();

    queue.trigger();
    eventually("second call", || second.lock().unwrap().is_some()).await;
    queue.shutdown(ShutdownOptions::hard().quiet()).await;

    assert_eq!(*second.lock().unwrap(), Some(Ok(())));
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fetch_failures_go_to_the_error_callback() {
    let (errors, options) = collecting();
    let server = Arc::new(FnInvoker::new(|_, _| Err(RemoteError::new("server down"))));
    let ctx = JobContext::new("root", server);
    let queue = JobQueue::spawn(ctx, "work", options, ignore).unwrap();

    queue.trigger();
    eventually("fetch error", || !errors.lock().unwrap().is_empty()).await;
    assert!(matches!(errors.lock().unwrap()[0], QueueError::Fetch(_)));
    assert!(queue.idle());
    queue.shutdown(ShutdownOptions::default().quiet()).await;
}

#[tokio::test]
async fn excess_jobs_are_reported_and_kept() {
    let (errors, options) = collecting();
    let server = Arc::new(FnInvoker::new(|method, _| match method {
        "root_getWork" => Ok(Value::Array((0..3).map(running_doc).collect())),
        _ => Ok(json!(true)),
    }));
    let ctx = JobContext::new("root", server.clone());
    let queue = JobQueue::spawn(ctx, "work", options, ignore).unwrap();

    queue.trigger();
    eventually("excess report", || !errors.lock().unwrap().is_empty()).await;
    assert_eq!(
        errors.lock().unwrap()[0],
        QueueError::ExcessJobs { requested: 1, received: 3 }
    );
    assert_eq!(queue.running(), 1);
    assert_eq!(queue.length(), 2);

    queue.shutdown(ShutdownOptions::hard().quiet()).await;
    assert_eq!(server.call_count("root_jobFail"), 3);
}

#[tokio::test]
async fn undecodable_documents_do_not_sink_the_rest_of_the_batch() {
    let (errors, options) = collecting();
    let server = Arc::new(FnInvoker::new(|method, _| match method {
        "root_getWork" => Ok(json!([running_doc(0), {"_id": "bad"}])),
        _ => Ok(json!(true)),
    }));
    let ctx = JobContext::new("root", server.clone());
    let dispatched = Arc::new(AtomicUsize::new(0));
    let seen = dispatched.clone();
    let queue = JobQueue::spawn(ctx, "work", options.with_concurrency(2), move |unit, _cb| {
        seen.fetch_add(unit.len(), Ordering::SeqCst);
    })
    .unwrap();

    queue.trigger();
    eventually("good job dispatched", || dispatched.load(Ordering::SeqCst) == 1).await;
    {
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], QueueError::Fetch(_)));
    }
    assert_eq!(queue.running(), 1);

    queue.shutdown(ShutdownOptions::hard().quiet()).await;
    assert_eq!(server.call_count("root_jobFail"), 1);
}

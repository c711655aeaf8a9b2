//! Runs a producer and a worker pool against an in-memory job server.
//!
//! `JOBQ_ROOT` names the collection, `JOBQ_DEMO_JOBS` the number of jobs to
//! submit; queue limits come from the `JOBQ_*` variables read by
//! `QueueOptions::from_env`.

use std::time::Duration;

use anyhow::Context;
use jobq_core::PriorityLevel;
use jobq_jobs::{
    DoneOptions, FailOptions, InMemoryJobServer, Job, JobContext, LogOptions, ProgressOptions,
    SaveOptions,
};
use jobq_worker::{JobQueue, QueueOptions, ShutdownOptions, UnitCallback, WorkUnit};
use serde_json::json;

const JOB_TYPE: &str = "resize";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobq_observability::init();

    let root = std::env::var("JOBQ_ROOT").unwrap_or_else(|_| {
        tracing::warn!("JOBQ_ROOT not set; using \"demo\"");
        "demo".to_string()
    });
    let total: usize = match std::env::var("JOBQ_DEMO_JOBS") {
        Ok(raw) => raw.parse().context("JOBQ_DEMO_JOBS must be a count")?,
        Err(_) => 12,
    };

    let server = InMemoryJobServer::arc(root.clone());
    let ctx = JobContext::new(root, server.clone());

    for n in 0..total {
        let mut job = Job::new(ctx.clone(), JOB_TYPE, json!({ "image": n }))?;
        let priority = if n % 4 == 0 { PriorityLevel::High } else { PriorityLevel::Normal };
        job.priority(priority)?.retry(2)?;
        job.save(SaveOptions::default()).await?;
    }
    tracing::info!(total, "jobs submitted");

    let options = QueueOptions::from_env()?.with_error_callback(|err| {
        tracing::error!(error = %err, "queue error");
    });
    let queue = JobQueue::spawn(ctx, JOB_TYPE, options, handle_unit)?;

    while server.stats().completed + server.stats().failed < total {
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.trigger();
    }

    queue.shutdown(ShutdownOptions::soft()).await;
    println!("{}", serde_json::to_string_pretty(&server.stats())?);
    Ok(())
}

fn handle_unit(unit: WorkUnit, callback: UnitCallback) {
    tokio::spawn(async move {
        for mut job in unit.into_jobs() {
            if let Err(err) = process(&mut job).await {
                tracing::warn!(job_id = ?job.id(), error = %err, "job failed");
                let reported = job
                    .fail(json!({ "message": err.to_string() }), FailOptions::default())
                    .await;
                if let Err(fail_err) = reported {
                    tracing::warn!(job_id = ?job.id(), error = %fail_err, "could not report job failure");
                }
            }
        }
        if let Err(err) = callback.call() {
            tracing::error!(error = %err, "unit callback rejected");
        }
    });
}

async fn process(job: &mut Job) -> anyhow::Result<()> {
    let image = job.data().get("image").cloned().unwrap_or_default();
    job.log(format!("resizing image {image}"), LogOptions::default())
        .await?;
    for step in 1..=4 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        job.progress(f64::from(step), 4.0, ProgressOptions::default())
            .await?;
    }
    job.done(json!({ "image": image, "width": 640 }), DoneOptions::default())
        .await?;
    Ok(())
}

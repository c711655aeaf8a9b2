//! Operations that are not tied to a single job instance.

use jobq_core::JobId;
use jobq_rpc::{reduce_or, split_long_array, RpcError};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::job::{decode_flag, Job};
use crate::options::{
    to_param, CancelOptions, GetJobOptions, GetWorkOptions, ReadyOptions, RestartOptions,
    ServerOptions,
};

/// Largest id list sent in a single remote call.
pub const MAX_IDS_PER_CALL: usize = 256;

/// Leases up to `options.max_jobs` ready jobs of the given types.
///
/// Fails if any returned document does not decode; see [`lease_work`] to
/// keep the valid part of such a batch.
pub async fn get_work<S: AsRef<str>>(
    ctx: &JobContext,
    types: &[S],
    options: GetWorkOptions,
) -> JobResult<Vec<Job>> {
    let mut leased = lease_work(ctx, types, options).await?;
    if leased.rejected.is_empty() {
        Ok(leased.jobs)
    } else {
        Err(leased.rejected.swap_remove(0))
    }
}

/// Outcome of a `getWork` call decoded document by document.
#[derive(Debug, Default)]
pub struct LeasedWork {
    pub jobs: Vec<Job>,
    /// One error per document that did not decode as a job.
    pub rejected: Vec<JobError>,
}

/// Like [`get_work`], but a malformed document only rejects itself.
pub async fn lease_work<S: AsRef<str>>(
    ctx: &JobContext,
    types: &[S],
    options: GetWorkOptions,
) -> JobResult<LeasedWork> {
    options.validate()?;
    let types: Vec<&str> = types.iter().map(AsRef::as_ref).collect();
    let value = ctx
        .call("getWork", vec![json!(types), to_param(&options)])
        .await?;
    let docs = match value {
        Value::Null => Vec::new(),
        Value::Array(docs) => docs,
        other => {
            return Err(
                RpcError::unexpected("getWork", format!("expected array, got {other}")).into(),
            );
        }
    };

    let mut leased = LeasedWork::default();
    for doc in docs {
        match Job::from_document(ctx.clone(), doc) {
            Ok(job) => leased.jobs.push(job),
            Err(err) => {
                warn!(queue = %ctx.root(), error = %err, "skipping undecodable work document");
                leased
                    .rejected
                    .push(RpcError::unexpected("getWork", err.to_string()).into());
            }
        }
    }
    Ok(leased)
}

pub async fn get_job(
    ctx: &JobContext,
    id: &JobId,
    options: GetJobOptions,
) -> JobResult<Option<Job>> {
    let value = ctx.call("getJob", vec![json!(id), to_param(&options)]).await?;
    if value.is_null() || value == Value::Bool(false) {
        return Ok(None);
    }
    Job::from_document(ctx.clone(), value)
        .map(Some)
        .map_err(|err| JobError::from(RpcError::unexpected("getJob", err.to_string())))
}

/// Fetches every job in `ids` that still exists, in batches of
/// [`MAX_IDS_PER_CALL`].
pub async fn get_jobs(
    ctx: &JobContext,
    ids: &[JobId],
    options: GetJobOptions,
) -> JobResult<Vec<Job>> {
    let mut jobs = Vec::with_capacity(ids.len());
    for chunk in split_long_array(ids, MAX_IDS_PER_CALL)? {
        let value = ctx
            .call("getJob", vec![json!(chunk), to_param(&options)])
            .await?;
        jobs.extend(decode_jobs(ctx, "getJob", value)?);
    }
    Ok(jobs)
}

fn decode_jobs(ctx: &JobContext, method: &str, value: Value) -> JobResult<Vec<Job>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(docs) => docs
            .into_iter()
            .map(|doc| {
                Job::from_document(ctx.clone(), doc)
                    .map_err(|err| JobError::from(RpcError::unexpected(method, err.to_string())))
            })
            .collect(),
        other => Err(RpcError::unexpected(method, format!("expected array, got {other}")).into()),
    }
}

/// Sends `method` once per id chunk and OR-combines the answers.
async fn multi_id_call(
    ctx: &JobContext,
    method: &'static str,
    ids: &[JobId],
    options: Option<Value>,
) -> JobResult<bool> {
    if ids.is_empty() {
        return Ok(false);
    }
    let chunks = split_long_array(ids, MAX_IDS_PER_CALL)?;
    let (tx, rx) = oneshot::channel();
    let reduced = reduce_or(
        move |result: Result<bool, RpcError>| {
            let _ = tx.send(result);
        },
        chunks.len(),
    )?;
    debug!(queue = %ctx.root(), method, ids = ids.len(), chunks = chunks.len(), "multi-id call");

    for chunk in chunks {
        let mut params = vec![json!(chunk)];
        params.extend(options.clone());
        let reduced = reduced.clone();
        ctx.call_with_callback(
            method,
            params,
            move |v| decode_flag(method, v),
            move |result| {
                if let Err(err) = reduced.invoke(result) {
                    warn!(method, error = %err, "multi-id callback misuse");
                }
            },
        );
    }

    let any = rx.await.map_err(|_| JobError::Rpc(RpcError::Dropped))??;
    Ok(any)
}

pub async fn pause_jobs(ctx: &JobContext, ids: &[JobId]) -> JobResult<bool> {
    multi_id_call(ctx, "jobPause", ids, None).await
}

pub async fn resume_jobs(ctx: &JobContext, ids: &[JobId]) -> JobResult<bool> {
    multi_id_call(ctx, "jobResume", ids, None).await
}

pub async fn ready_jobs(ctx: &JobContext, ids: &[JobId], options: ReadyOptions) -> JobResult<bool> {
    multi_id_call(ctx, "jobReady", ids, Some(to_param(&options.resolved()))).await
}

pub async fn cancel_jobs(
    ctx: &JobContext,
    ids: &[JobId],
    options: CancelOptions,
) -> JobResult<bool> {
    multi_id_call(ctx, "jobCancel", ids, Some(to_param(&options))).await
}

pub async fn restart_jobs(
    ctx: &JobContext,
    ids: &[JobId],
    options: RestartOptions,
) -> JobResult<bool> {
    multi_id_call(ctx, "jobRestart", ids, Some(to_param(&options))).await
}

pub async fn remove_jobs(ctx: &JobContext, ids: &[JobId]) -> JobResult<bool> {
    multi_id_call(ctx, "jobRemove", ids, None).await
}

async fn server_control(
    ctx: &JobContext,
    method: &'static str,
    options: ServerOptions,
) -> JobResult<bool> {
    let flag = ctx
        .call_then(method, vec![to_param(&options)], |v| decode_flag(method, v))
        .await?;
    debug!(queue = %ctx.root(), method, flag, "server control");
    Ok(flag)
}

/// Lets the server promote and hand out work again.
pub async fn start_jobs(ctx: &JobContext, options: ServerOptions) -> JobResult<bool> {
    server_control(ctx, "startJobs", options).await
}

pub async fn stop_jobs(ctx: &JobContext, options: ServerOptions) -> JobResult<bool> {
    server_control(ctx, "stopJobs", options).await
}

pub async fn start_job_server(ctx: &JobContext, options: ServerOptions) -> JobResult<bool> {
    server_control(ctx, "startJobServer", options).await
}

pub async fn shutdown_job_server(ctx: &JobContext, options: ServerOptions) -> JobResult<bool> {
    server_control(ctx, "shutdownJobServer", options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use jobq_core::RunId;
    use jobq_rpc::{FnInvoker, RemoteError};
    use serde_json::Map;

    use crate::document::JobDocument;

    fn ctx_with(invoker: FnInvoker) -> (JobContext, Arc<FnInvoker>) {
        let invoker = Arc::new(invoker);
        (JobContext::new("root", invoker.clone()), invoker)
    }

    fn running_doc(id: &str) -> Value {
        let mut doc = JobDocument::new("work", Map::new());
        doc.id = Some(JobId::from(id));
        doc.run_id = Some(RunId::from(format!("run-{id}")));
        doc.to_value()
    }

    fn ids(n: usize) -> Vec<JobId> {
        (0..n).map(|i| JobId::new(format!("id{i}"))).collect()
    }

    #[tokio::test]
    async fn get_work_decodes_jobs() {
        let (ctx, invoker) = ctx_with(FnInvoker::new(|name, params| {
            assert_eq!(name, "root_getWork");
            let max = params[1]["maxJobs"].as_u64().unwrap_or(0);
            Ok(Value::Array((0..max).map(|i| running_doc(&format!("j{i}"))).collect()))
        }));
        let jobs = get_work(
            &ctx,
            &["work"],
            GetWorkOptions { max_jobs: 3, work_timeout: Some(1000) },
        )
        .await
        .unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.run_id().is_some()));
        let (_, params) = &invoker.calls()[0];
        assert_eq!(params[0], json!(["work"]));
        assert_eq!(params[1], json!({"maxJobs": 3, "workTimeout": 1000}));
    }

    #[tokio::test]
    async fn lease_work_keeps_valid_documents_of_a_mixed_batch() {
        let (ctx, _) = ctx_with(FnInvoker::new(|_, _| {
            Ok(json!([running_doc("good"), {"_id": "bad"}]))
        }));
        let options = GetWorkOptions { max_jobs: 2, work_timeout: None };

        let leased = lease_work(&ctx, &["work"], options).await.unwrap();
        assert_eq!(leased.jobs.len(), 1);
        assert_eq!(leased.jobs[0].id(), Some(&JobId::from("good")));
        assert_eq!(leased.rejected.len(), 1);
        assert!(matches!(
            leased.rejected[0],
            JobError::Rpc(RpcError::UnexpectedResponse { .. })
        ));

        assert!(get_work(&ctx, &["work"], options).await.is_err());
    }

    #[tokio::test]
    async fn get_work_rejects_zero_timeout() {
        let (ctx, invoker) = ctx_with(FnInvoker::new(|_, _| Ok(json!([]))));
        let err = get_work(
            &ctx,
            &["work"],
            GetWorkOptions { max_jobs: 1, work_timeout: Some(0) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::InvalidWorkOption(_)));
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn get_job_and_get_jobs() {
        let (ctx, invoker) = ctx_with(FnInvoker::new(|_, params| match &params[0] {
            Value::String(id) if id == "good" => Ok(running_doc("good")),
            Value::String(_) => Ok(Value::Null),
            Value::Array(ids) => Ok(Value::Array(
                ids.iter()
                    .filter_map(Value::as_str)
                    .filter(|id| id.starts_with("id1"))
                    .map(running_doc)
                    .collect(),
            )),
            _ => Err(RemoteError::new("bad params")),
        }));

        let found = get_job(&ctx, &JobId::from("good"), GetJobOptions::default())
            .await
            .unwrap();
        assert_eq!(found.unwrap().id(), Some(&JobId::from("good")));
        assert!(get_job(&ctx, &JobId::from("bad"), GetJobOptions::default())
            .await
            .unwrap()
            .is_none());

        let jobs = get_jobs(&ctx, &ids(600), GetJobOptions::default()).await.unwrap();
        // id1, id10..id19, id100..id199
        assert_eq!(jobs.len(), 111);
        // 2 single lookups + 3 chunks
        assert_eq!(invoker.call_count("root_getJob"), 5);
    }

    #[tokio::test]
    async fn multi_id_operations_chunk_and_combine() {
        let (ctx, invoker) = ctx_with(FnInvoker::new(|_, params| {
            let any_good = params[0]
                .as_array()
                .map(|ids| ids.iter().any(|id| id == "id599"))
                .unwrap_or(false);
            Ok(json!(any_good))
        }));

        assert!(cancel_jobs(&ctx, &ids(600), CancelOptions::default()).await.unwrap());
        assert_eq!(invoker.call_count("root_jobCancel"), 3);
        assert!(invoker.calls().iter().all(|(_, p)| p.len() == 2));

        assert!(!pause_jobs(&ctx, &ids(10)).await.unwrap());
        assert_eq!(invoker.calls().last().unwrap().1.len(), 1);

        assert!(!remove_jobs(&ctx, &[]).await.unwrap());
        assert_eq!(invoker.call_count("root_jobRemove"), 0);
    }

    #[tokio::test]
    async fn multi_id_operations_surface_remote_errors() {
        let (ctx, _) = ctx_with(FnInvoker::new(|_, _| Err(RemoteError::new("nope"))));
        let err = restart_jobs(&ctx, &ids(300), RestartOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn every_multi_id_operation_uses_its_method() {
        let (ctx, invoker) = ctx_with(FnInvoker::new(|_, _| Ok(json!(true))));
        let some = ids(2);
        assert!(pause_jobs(&ctx, &some).await.unwrap());
        assert!(resume_jobs(&ctx, &some).await.unwrap());
        assert!(ready_jobs(&ctx, &some, ReadyOptions::default()).await.unwrap());
        assert!(cancel_jobs(&ctx, &some, CancelOptions::default()).await.unwrap());
        assert!(restart_jobs(&ctx, &some, RestartOptions::default()).await.unwrap());
        assert!(remove_jobs(&ctx, &some).await.unwrap());
        let names: Vec<String> = invoker.calls().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "root_jobPause",
                "root_jobResume",
                "root_jobReady",
                "root_jobCancel",
                "root_jobRestart",
                "root_jobRemove"
            ]
        );
    }

    #[tokio::test]
    async fn server_control_returns_flags() {
        let (ctx, invoker) = ctx_with(FnInvoker::new(|name, _| Ok(json!(name != "root_stopJobs"))));
        assert!(start_jobs(&ctx, ServerOptions::default()).await.unwrap());
        assert!(!stop_jobs(&ctx, ServerOptions::default()).await.unwrap());
        assert!(start_job_server(&ctx, ServerOptions::default()).await.unwrap());
        assert!(shutdown_job_server(&ctx, ServerOptions { timeout: Some(5000) })
            .await
            .unwrap());
        assert_eq!(invoker.calls()[3].1[0], json!({"timeout": 5000}));
    }
}

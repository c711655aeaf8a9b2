//! Explicit connection context shared by jobs and queues.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use jobq_core::{EchoSink, TracingEcho};
use jobq_rpc::{method_call, method_call_then, method_call_with_callback, MethodInvoker, RpcResult};
use serde_json::Value;

use crate::error::JobResult;

/// Names a job collection on a particular server connection.
///
/// Every remote method is invoked as `<root>_<method>` through `invoker`.
/// Echoed log and progress lines go to `echo`.
#[derive(Clone)]
pub struct JobContext {
    root: Arc<str>,
    invoker: Arc<dyn MethodInvoker>,
    echo: Arc<dyn EchoSink>,
}

impl JobContext {
    pub fn new(root: impl Into<String>, invoker: Arc<dyn MethodInvoker>) -> Self {
        Self {
            root: Arc::from(root.into()),
            invoker,
            echo: Arc::new(TracingEcho),
        }
    }

    pub fn with_echo(mut self, echo: Arc<dyn EchoSink>) -> Self {
        self.echo = echo;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn invoker(&self) -> &Arc<dyn MethodInvoker> {
        &self.invoker
    }

    pub fn echo(&self) -> &dyn EchoSink {
        self.echo.as_ref()
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> RpcResult<Value> {
        method_call(self.invoker.as_ref(), &self.root, method, params).await
    }

    pub async fn call_then<T, A>(&self, method: &str, params: Vec<Value>, after: A) -> RpcResult<T>
    where
        A: FnOnce(Value) -> RpcResult<T>,
    {
        method_call_then(self.invoker.as_ref(), &self.root, method, params, after).await
    }

    /// Callback entry point; see [`method_call_with_callback`].
    pub fn call_with_callback<T, A, C>(
        &self,
        method: &str,
        params: Vec<Value>,
        after: A,
        callback: C,
    ) -> tokio::task::JoinHandle<()>
    where
        T: Send + 'static,
        A: FnOnce(Value) -> RpcResult<T> + Send + 'static,
        C: FnOnce(RpcResult<T>) + Send + 'static,
    {
        method_call_with_callback(
            Arc::clone(&self.invoker),
            &self.root,
            method,
            params,
            after,
            callback,
        )
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Callback entry point for job operations.
///
/// Runs `operation` on a spawned task and delivers its outcome to `callback`
/// exactly once:
///
/// ```ignore
/// let mut job = job.clone();
/// with_callback(async move { job.cancel(CancelOptions::default()).await }, |res| { ... });
/// ```
pub fn with_callback<T, F, C>(operation: F, callback: C) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
    F: Future<Output = JobResult<T>> + Send + 'static,
    C: FnOnce(JobResult<T>) + Send + 'static,
{
    tokio::spawn(async move {
        callback(operation.await);
    })
}

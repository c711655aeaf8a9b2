//! The remote method channel seam.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error reported by the remote side of a method call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Something that can invoke a named remote method with positional params.
///
/// Implementations must be safe to share across tasks; queues and jobs hold
/// them behind an `Arc`.
#[async_trait]
pub trait MethodInvoker: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RemoteError>;
}

#[async_trait]
impl<T: MethodInvoker + ?Sized> MethodInvoker for Arc<T> {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RemoteError> {
        (**self).call(method, params).await
    }
}

type Handler = dyn Fn(&str, &[Value]) -> Result<Value, RemoteError> + Send + Sync;

/// Closure-backed invoker that records every call it sees.
///
/// Handy for stubbing the server in tests and demos.
pub struct FnInvoker {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl FnInvoker {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Method names and params in call order.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of calls made to `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(name, _)| name == method)
            .count()
    }
}

impl std::fmt::Debug for FnInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvoker")
            .field("calls", &self.calls().len())
            .finish()
    }
}

#[async_trait]
impl MethodInvoker for FnInvoker {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RemoteError> {
        let result = (self.handler)(method, &params);
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((method.to_string(), params));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_invoker_records_calls() {
        let invoker = FnInvoker::new(|method, params| match method {
            "echo" => Ok(params.first().cloned().unwrap_or(Value::Null)),
            _ => Err(RemoteError::new("no such method")),
        });

        assert_eq!(invoker.call("echo", vec![json!(3)]).await, Ok(json!(3)));
        assert!(invoker.call("nope", vec![]).await.is_err());
        assert_eq!(invoker.call_count("echo"), 1);
        assert_eq!(invoker.calls().len(), 2);
    }

    #[tokio::test]
    async fn arc_forwards_calls() {
        let invoker = Arc::new(FnInvoker::new(|_, _| Ok(Value::Bool(true))));
        let shared: Arc<dyn MethodInvoker> = invoker.clone();
        assert_eq!(shared.call("x", vec![]).await, Ok(Value::Bool(true)));
        assert_eq!(invoker.call_count("x"), 1);
    }
}

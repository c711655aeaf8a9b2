//! Remote method invocation and argument helpers.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult};
use crate::invoker::MethodInvoker;

/// Builds the wire method name: `<root>_<suffix>`.
pub fn method_name(root: &str, suffix: &str) -> String {
    format!("{root}_{suffix}")
}

/// Invokes `<root>_<suffix>` and returns the raw result.
pub async fn method_call(
    invoker: &dyn MethodInvoker,
    root: &str,
    suffix: &str,
    params: Vec<Value>,
) -> RpcResult<Value> {
    let name = method_name(root, suffix);
    debug!(method = %name, params = params.len(), "remote call");
    invoker.call(&name, params).await.map_err(|err| {
        debug!(method = %name, error = %err, "remote call failed");
        RpcError::Remote(err)
    })
}

/// Invokes `<root>_<suffix>` and maps a successful result through `after`.
///
/// `after` is skipped when the remote side reports an error.
pub async fn method_call_then<T, A>(
    invoker: &dyn MethodInvoker,
    root: &str,
    suffix: &str,
    params: Vec<Value>,
    after: A,
) -> RpcResult<T>
where
    A: FnOnce(Value) -> RpcResult<T>,
{
    let value = method_call(invoker, root, suffix, params).await?;
    after(value)
}

/// Callback flavour of [`method_call_then`].
///
/// The call runs on a spawned task; `callback` receives the outcome exactly
/// once. Requires a tokio runtime.
pub fn method_call_with_callback<T, A, C>(
    invoker: Arc<dyn MethodInvoker>,
    root: &str,
    suffix: &str,
    params: Vec<Value>,
    after: A,
    callback: C,
) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
    A: FnOnce(Value) -> RpcResult<T> + Send + 'static,
    C: FnOnce(RpcResult<T>) + Send + 'static,
{
    let root = root.to_string();
    let suffix = suffix.to_string();
    tokio::spawn(async move {
        let result = method_call_then(invoker.as_ref(), &root, &suffix, params, after).await;
        callback(result);
    })
}

/// Normalizes a trailing variadic options argument.
///
/// Zero elements yield the default options, one element is used as-is, and
/// anything longer is rejected.
pub fn options_help<O: Default, C>(
    options: Vec<O>,
    callback: Option<C>,
) -> RpcResult<(O, Option<C>)> {
    let len = options.len();
    let mut options = options.into_iter();
    match (options.next(), options.next()) {
        (None, _) => Ok((O::default(), callback)),
        (Some(opts), None) => Ok((opts, callback)),
        (Some(_), Some(_)) => {
            warn!(len, "rejected variadic options");
            Err(RpcError::InvalidOptionsOrCallback(len))
        }
    }
}

/// Splits `items` into consecutive chunks of at most `max` elements.
pub fn split_long_array<T: Clone>(items: &[T], max: usize) -> RpcResult<Vec<Vec<T>>> {
    if max == 0 {
        return Err(RpcError::InvalidChunkParams);
    }
    Ok(items.chunks(max).map(<[T]>::to_vec).collect())
}

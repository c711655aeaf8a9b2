//! `jobq-rpc`: bridge between job operations and the remote method channel.
//!
//! The channel itself is an external collaborator modelled by
//! [`MethodInvoker`]. Every remote operation is reachable through two entry
//! points:
//!
//! - [`method_call`] / [`method_call_then`]: awaitable, returning the
//!   (optionally transformed) result or the remote error
//! - [`method_call_with_callback`]: spawned on the tokio runtime, delivering
//!   the result to a callback exactly once
//!
//! The helpers [`split_long_array`] and [`reduce_callbacks`] are used to fan
//! large id lists out over several calls and fold the answers back together.

pub mod bridge;
pub mod error;
pub mod invoker;
pub mod reduce;

pub use bridge::{
    method_call, method_call_then, method_call_with_callback, method_name, options_help,
    split_long_array,
};
pub use error::{RpcError, RpcResult};
pub use invoker::{FnInvoker, MethodInvoker, RemoteError};
pub use reduce::{concat_reduce, reduce_callbacks, reduce_or, ReducedCallback};

//! Folding several callback-style results into one.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{RpcError, RpcResult};

type Reducer<T, A> = Box<dyn FnMut(A, T) -> A + Send>;
type Completion<A, E> = Box<dyn FnOnce(Result<A, E>) + Send>;

struct ReduceState<T, A, E> {
    expected: usize,
    received: usize,
    acc: Option<A>,
    reduce: Reducer<T, A>,
    callback: Option<Completion<A, E>>,
}

/// Shared callback produced by [`reduce_callbacks`].
///
/// Clone it once per pending call. The wrapped callback fires once: on the
/// first error, or with the folded value after `expected` successes.
pub struct ReducedCallback<T, A, E> {
    state: Arc<Mutex<ReduceState<T, A, E>>>,
}

impl<T, A, E> Clone for ReducedCallback<T, A, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, A, E> ReducedCallback<T, A, E> {
    /// Feeds one result in.
    ///
    /// Results arriving after an error has already been forwarded are
    /// ignored. Any result beyond `expected` successes is reported as
    /// [`RpcError::CallbackOveruse`].
    pub fn invoke(&self, result: Result<T, E>) -> RpcResult<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match result {
            Err(err) => {
                if state.received >= state.expected {
                    let expected = state.expected;
                    warn!(expected, "reduced callback invoked too many times");
                    return Err(RpcError::CallbackOveruse { expected });
                }
                if let Some(callback) = state.callback.take() {
                    state.acc = None;
                    drop(state);
                    callback(Err(err));
                }
                Ok(())
            }
            Ok(value) => {
                if state.callback.is_none() && state.received < state.expected {
                    // An earlier error already settled the outcome.
                    return Ok(());
                }
                let expected = state.expected;
                let Some(acc) = state.acc.take() else {
                    warn!(expected, "reduced callback invoked too many times");
                    return Err(RpcError::CallbackOveruse { expected });
                };
                let acc = (state.reduce)(acc, value);
                state.received += 1;
                if state.received == expected {
                    let callback = state.callback.take();
                    drop(state);
                    if let Some(callback) = callback {
                        callback(Ok(acc));
                    }
                } else {
                    state.acc = Some(acc);
                }
                Ok(())
            }
        }
    }

    /// Number of successful results folded so far.
    pub fn received(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .received
    }
}

/// Builds a callback that folds `expected` results with `reduce`, starting at
/// `initial`, and hands the final value to `callback`.
pub fn reduce_callbacks<T, A, E, C, R>(
    callback: C,
    expected: usize,
    reduce: R,
    initial: A,
) -> RpcResult<ReducedCallback<T, A, E>>
where
    C: FnOnce(Result<A, E>) + Send + 'static,
    R: FnMut(A, T) -> A + Send + 'static,
{
    if expected == 0 {
        return Err(RpcError::InvalidReduceParams("expected count must be positive"));
    }
    Ok(ReducedCallback {
        state: Arc::new(Mutex::new(ReduceState {
            expected,
            received: 0,
            acc: Some(initial),
            reduce: Box::new(reduce),
            callback: Some(Box::new(callback)),
        })),
    })
}

/// Logical OR over boolean results, the fold used by multi-id operations.
pub fn reduce_or<E, C>(callback: C, expected: usize) -> RpcResult<ReducedCallback<bool, bool, E>>
where
    C: FnOnce(Result<bool, E>) + Send + 'static,
{
    reduce_callbacks(callback, expected, |acc, value| acc || value, false)
}

/// Collects every result into a vector.
pub fn concat_reduce<T>(mut acc: Vec<T>, value: T) -> Vec<T> {
    acc.push(value);
    acc
}

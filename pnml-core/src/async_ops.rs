//! Handles an async-mode expression may return instead of a plain [`Token`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::types::Token;

type DoneCallback = Box<dyn FnOnce(&AsyncFuture) + Send>;

struct Inner {
    result: Option<Token>,
    error: Option<String>,
    done: bool,
    callbacks: Vec<DoneCallback>,
}

/// A single-set future backing an `async_result` pending op. Completion is
/// observed via [`AsyncFuture::on_done`]; the engine subscribes a callback
/// that turns completion into a `submit_async` call, mirroring
/// `enginepy/async_ops.py`'s `AsyncResult.add_done_callback`.
pub struct AsyncFuture {
    pub id: u64,
    inner: Mutex<Inner>,
}

impl AsyncFuture {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(Inner {
                result: None,
                error: None,
                done: false,
                callbacks: Vec::new(),
            }),
        })
    }

    pub fn set_result(&self, value: Token) {
        let callbacks = {
            let mut inner = self.inner.lock().unwrap();
            if inner.done {
                return;
            }
            inner.result = Some(value);
            inner.done = true;
            std::mem::take(&mut inner.callbacks)
        };
        for cb in callbacks {
            cb(self);
        }
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let callbacks = {
            let mut inner = self.inner.lock().unwrap();
            if inner.done {
                return;
            }
            inner.error = Some(error.into());
            inner.done = true;
            std::mem::take(&mut inner.callbacks)
        };
        for cb in callbacks {
            cb(self);
        }
    }

    /// Subscribes a completion callback. If the future is already done, the
    /// callback runs immediately (matching the Python source's
    /// `add_done_callback`, which fires inline when `_done` is already set).
    pub fn on_done(self: &Arc<Self>, cb: impl FnOnce(&AsyncFuture) + Send + 'static) {
        let mut inner = self.inner.lock().unwrap();
        if inner.done {
            drop(inner);
            cb(self);
        } else {
            inner.callbacks.push(Box::new(cb));
        }
    }

    pub fn result(&self) -> Option<Token> {
        self.inner.lock().unwrap().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn done(&self) -> bool {
        self.inner.lock().unwrap().done
    }
}

/// Runs `f` on the Tokio runtime and resolves the returned future with its
/// outcome. Mirrors `enginepy/async_ops.py`'s `run_async`, which spawns a
/// daemon thread to the same effect; a registered `expression` callable
/// reaches for this the same way the Python source's inscriptions call
/// `run_async(lambda: ...)` to build the `AsyncResult` they return. Panics
/// if called outside a Tokio runtime context, matching `tokio::spawn`'s own
/// contract — the host process is expected to be running one (see
/// `pnml-debugger`'s `#[tokio::main]`).
pub fn run_async<F>(id: u64, f: F) -> Arc<AsyncFuture>
where
    F: FnOnce() -> Result<Token, String> + Send + 'static,
{
    let future = AsyncFuture::new(id);
    let handle = future.clone();
    tokio::spawn(async move {
        match f() {
            Ok(value) => handle.set_result(value),
            Err(message) => handle.set_error(message),
        }
    });
    future
}

/// A host-mediated async operation: the expression returns a *description*
/// of work to do externally, and firing suspends until an external
/// `submit_async(resume_token = ..., result|error = ...)` arrives.
#[derive(Clone, Debug)]
pub struct AsyncRequest {
    pub operation_type: String,
    pub operation_params: Option<BTreeMap<String, serde_json::Value>>,
    pub ui_state: Option<serde_json::Value>,
    pub resume_token: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl AsyncRequest {
    pub fn new(operation_type: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            operation_params: None,
            ui_state: None,
            resume_token: None,
            timeout_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_done_fires_immediately_when_already_complete() {
        let future = AsyncFuture::new(1);
        future.set_result(Token::Int(7));
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        future.on_done(move |f| *seen2.lock().unwrap() = f.result());
        assert_eq!(*seen.lock().unwrap(), Some(Token::Int(7)));
    }

    #[test]
    fn set_result_after_set_error_is_a_no_op() {
        let future = AsyncFuture::new(2);
        future.set_error("boom");
        future.set_result(Token::Bool(true));
        assert_eq!(future.error().as_deref(), Some("boom"));
        assert_eq!(future.result(), None);
    }

    #[tokio::test]
    async fn run_async_resolves_the_future_on_the_tokio_runtime() {
        let future = run_async(42, || Ok(Token::String("done".to_string())));
        for _ in 0..100 {
            if future.done() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(future.done());
        assert_eq!(future.result(), Some(Token::String("done".to_string())));
    }

    #[tokio::test]
    async fn run_async_propagates_errors() {
        let future = run_async(43, || Err("network unreachable".to_string()));
        for _ in 0..100 {
            if future.done() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert_eq!(future.error().as_deref(), Some("network unreachable"));
    }
}

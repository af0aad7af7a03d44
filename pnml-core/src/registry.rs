//! The inscription callable registry (C2). A guard or expression's `code`
//! text is never interpreted; it is a lookup key into host-registered Rust
//! closures, resolved once and cached on the owning [`crate::types::Inscription`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::async_ops::{AsyncFuture, AsyncRequest};
use crate::error::InscriptionError;
use crate::types::Token;

/// What a registered callable may hand back to the engine.
pub enum CallableOutcome {
    /// A plain value, available immediately.
    Value(Token),
    /// A future that will be completed later from outside the firing call
    /// (used by `async_result`-style inscriptions).
    Future(Arc<AsyncFuture>),
    /// A description of external work; the engine suspends and waits for a
    /// matching `submit_async` by resume token.
    Request(AsyncRequest),
}

/// A resolved inscription callable. Receives the single input token moved
/// into the firing transition (or `None` for a transition with no input
/// places / a guard evaluated ahead of consumption), and returns an outcome
/// or an [`InscriptionError`] on failure.
pub trait Callable: Send + Sync {
    fn call(&self, token: Option<&Token>) -> Result<CallableOutcome, InscriptionError>;
}

impl<F> Callable for F
where
    F: Fn(Option<&Token>) -> Result<CallableOutcome, InscriptionError> + Send + Sync,
{
    fn call(&self, token: Option<&Token>) -> Result<CallableOutcome, InscriptionError> {
        self(token)
    }
}

/// A cloneable handle to a registered callable. `Inscription` caches one of
/// these in a `OnceLock` so resolution only happens on a transition's first
/// firing.
pub type RegistryFunc = Arc<dyn Callable>;

/// Builds the lookup key for a registered callable: `{net_id}_{owner_id}_{kind}`,
/// matching `build_registry_key` in `enginepy/inscription_registry.py`. `kind`
/// falls back to `"inscription"` when the PNML-YAML text omits a `kind:` field.
pub fn build_key(net_id: &str, owner_id: &str, kind: &str) -> String {
    format!("{net_id}_{owner_id}_{kind}")
}

/// Maps registry keys to callables. Unlike the Python source's module-level
/// dict, this is an explicit value: tests construct a fresh `Registry` per
/// case and an `Engine` owns one for its lifetime — there is no global
/// singleton.
#[derive(Default, Clone)]
pub struct Registry {
    entries: HashMap<String, RegistryFunc>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, func: RegistryFunc) {
        self.entries.insert(key.into(), func);
    }

    pub fn register_fn<F>(&mut self, key: impl Into<String>, func: F)
    where
        F: Fn(Option<&Token>) -> Result<CallableOutcome, InscriptionError> + Send + Sync + 'static,
    {
        self.register(key, Arc::new(func));
    }

    pub fn get(&self, key: &str) -> Option<RegistryFunc> {
        self.entries.get(key).cloned()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_key_joins_with_underscores() {
        assert_eq!(build_key("net1", "t1", "guard"), "net1_t1_guard");
    }

    #[test]
    fn register_and_get_roundtrip() {
        let mut registry = Registry::new();
        registry.register_fn("k", |_t| Ok(CallableOutcome::Value(Token::Bool(true))));
        assert!(registry.get("k").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn clear_removes_all_entries() {
        let mut registry = Registry::new();
        registry.register_fn("k", |_t| Ok(CallableOutcome::Value(Token::Null)));
        registry.clear();
        assert!(registry.get("k").is_none());
    }
}

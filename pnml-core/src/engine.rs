//! The firing engine (C3) and its pending-op table (C4).
//!
//! All of `step_once`, `submit_async`, and `enabled_transitions` are
//! serialized by a single mutex per spec §5: only one of them ever executes
//! at a time, so the marking and pending-op indexes are never observed
//! mid-mutation.

use std::collections::BTreeMap;
use std::sync::{Arc as StdArc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::InscriptionError;
use crate::registry::{CallableOutcome, Registry};
use crate::types::{InscriptionKind, Net, PendingOp, Token};

fn millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What one `step_once` call produced.
pub enum StepOutcome {
    /// No transition was enabled, or a guard blocked the only enabled one.
    None,
    /// A transition fired synchronously; carries its id.
    Fired(String),
    /// A transition suspended on an async inscription.
    Pending(PendingOp),
    /// A sync expression raised; per spec §7 the tokens already consumed
    /// from the input places are *not* restored, but no tokens are produced
    /// to the output places. Carries the failure for the caller to surface.
    Error(InscriptionError),
}

/// What invoking a transition's `expression` inscriptions produced.
enum ExpressionOutcome {
    /// No async suspension was requested; fire structurally/synchronously.
    None,
    /// An async inscription suspended (or completed immediately).
    Pending(PendingOp, Option<StdArc<crate::async_ops::AsyncFuture>>),
    /// A sync expression's callable raised.
    Error(InscriptionError),
}

struct EngineState {
    net: StdArc<Net>,
    registry: StdArc<Registry>,
    marking: BTreeMap<String, Vec<Token>>,
    pending_by_id: BTreeMap<u64, PendingOp>,
    pending_by_token: BTreeMap<String, PendingOp>,
    run_id: String,
    next_pending_id: u64,
}

/// Owns one net's marking and pending-op tables. Cheaply cloneable: internal
/// state lives behind an `Arc<Mutex<_>>` so a handle can be shared with the
/// async-future completion callbacks it registers.
#[derive(Clone)]
pub struct Engine {
    state: StdArc<Mutex<EngineState>>,
}

impl Engine {
    pub fn new(net: Net, registry: Registry) -> Self {
        let marking = net
            .places
            .iter()
            .map(|(id, place)| (id.clone(), place.initial_tokens.clone()))
            .collect();
        let run_id = format!("run-{}", millis_now());
        Self {
            state: StdArc::new(Mutex::new(EngineState {
                net: StdArc::new(net),
                registry: StdArc::new(registry),
                marking,
                pending_by_id: BTreeMap::new(),
                pending_by_token: BTreeMap::new(),
                run_id,
                next_pending_id: 1,
            })),
        }
    }

    pub fn net(&self) -> StdArc<Net> {
        self.state.lock().unwrap().net.clone()
    }

    pub fn marking(&self) -> BTreeMap<String, Vec<Token>> {
        self.state.lock().unwrap().marking.clone()
    }

    pub fn marking_of(&self, place_id: &str) -> Vec<Token> {
        self.state.lock().unwrap().marking.get(place_id).cloned().unwrap_or_default()
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().unwrap().pending_by_id.is_empty()
    }

    /// The oldest still-registered pending op, if any. Used by callers that
    /// want to announce a newly-suspended op without threading its details
    /// through the debug driver's [`crate::types::HistoryEntry`] projection.
    pub fn first_pending(&self) -> Option<PendingOp> {
        self.state.lock().unwrap().pending_by_id.iter().next().map(|(_, p)| p.clone())
    }

    /// Looks up a pending op by id (preferred) or resume token, without
    /// mutating engine state. Used by callers that need to inspect a pending
    /// op's output places before resolving it via `submit_async`.
    pub fn pending(&self, id: Option<u64>, resume_token: Option<&str>) -> Option<PendingOp> {
        let state = self.state.lock().unwrap();
        if let Some(i) = id {
            if let Some(p) = state.pending_by_id.get(&i) {
                return Some(p.clone());
            }
        }
        resume_token.and_then(|t| state.pending_by_token.get(t).cloned())
    }

    /// Enabled iff every input place of `T` has ≥1 token, and no pending op
    /// exists anywhere in the engine (execution is globally paused during
    /// async waits).
    pub fn enabled_transitions(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        if !state.pending_by_id.is_empty() {
            return Vec::new();
        }
        let (inputs, _outputs) = state.net.io_maps();
        inputs
            .into_iter()
            .filter(|(_, places)| places.iter().all(|p| state.marking.get(p).map(|t| !t.is_empty()).unwrap_or(false)))
            .map(|(tid, _)| tid)
            .collect()
    }

    /// Fires the first enabled transition (by the `BTreeMap`'s deterministic
    /// order), or returns the oldest pending op if one exists.
    pub fn step_once(&self) -> StepOutcome {
        let mut state = self.state.lock().unwrap();

        if let Some((_, pending)) = state.pending_by_id.iter().next() {
            return StepOutcome::Pending(pending.clone());
        }

        let (inputs, outputs) = state.net.io_maps();
        let enabled: Vec<String> = inputs
            .iter()
            .filter(|(_, places)| places.iter().all(|p| state.marking.get(*p).map(|t| !t.is_empty()).unwrap_or(false)))
            .map(|(tid, _)| tid.clone())
            .collect();
        let Some(tid) = enabled.into_iter().next() else {
            return StepOutcome::None;
        };

        let transition_has_inscriptions = state
            .net
            .transitions
            .get(&tid)
            .map(|t| !t.inscriptions.is_empty())
            .unwrap_or(false);

        if transition_has_inscriptions && !evaluate_guards(&state, &tid) {
            tracing::debug!(transition = %tid, "guard blocked firing");
            return StepOutcome::None;
        }

        let in_places = inputs.get(&tid).cloned().unwrap_or_default();
        let mut moved_tokens = Vec::new();
        for pid in &in_places {
            if let Some(list) = state.marking.get_mut(pid) {
                if !list.is_empty() {
                    moved_tokens.push(list.remove(0));
                }
            }
        }
        let output_places = outputs.get(&tid).cloned().unwrap_or_default();

        if transition_has_inscriptions {
            match execute_expressions(&mut state, &tid, moved_tokens.clone(), output_places.clone()) {
                ExpressionOutcome::Error(err) => {
                    tracing::debug!(transition = %tid, error = %err, "expression raised; tokens consumed, nothing produced");
                    return StepOutcome::Error(err);
                }
                ExpressionOutcome::Pending(pending, future) => {
                    if !pending.completed {
                        tracing::debug!(transition = %tid, op_id = pending.id, op_type = %pending.operation_type, "suspended on async inscription");
                        register_pending(&mut state, pending.clone());
                    } else {
                        finalize_immediate(&mut state, &pending);
                    }
                    drop(state);
                    if let Some(future) = future {
                        link_future_completion(self, future, pending.id);
                    }
                    return StepOutcome::Pending(pending);
                }
                ExpressionOutcome::None => {}
            }
        }

        tracing::trace!(transition = %tid, "fired");
        produce_tokens(&mut state, &output_places, tokens_or_from(moved_tokens, &tid));
        StepOutcome::Fired(tid)
    }

    /// Completes a pending op by id (preferred) or resume token. Unknown or
    /// already-completed ids/tokens are silently ignored — this makes
    /// duplicate or late submissions idempotent.
    pub fn submit_async(&self, id: Option<u64>, resume_token: Option<&str>, result: Option<Token>, error: Option<String>) {
        let mut state = self.state.lock().unwrap();
        let mut pending = match id.and_then(|i| state.pending_by_id.get(&i).cloned()) {
            Some(p) => p,
            None => match resume_token.and_then(|t| state.pending_by_token.get(t).cloned()) {
                Some(p) => p,
                None => {
                    tracing::debug!(?id, ?resume_token, "submit_async: no matching pending op, ignoring");
                    return;
                }
            },
        };
        pending.result = result;
        pending.error = error;
        pending.completed = true;
        finalize_resume(&mut state, &pending);
        unregister_pending(&mut state, &pending);
    }
}

fn tokens_or_from(moved_tokens: Vec<Token>, transition_id: &str) -> Vec<Token> {
    if moved_tokens.is_empty() {
        vec![Token::singleton_from(transition_id)]
    } else {
        moved_tokens
    }
}

fn produce_tokens(state: &mut EngineState, output_places: &[String], tokens: Vec<Token>) {
    for pid in output_places {
        state.marking.entry(pid.clone()).or_default().extend(tokens.clone());
    }
}

/// Resolves (and caches) every inscription's callable up front, under a
/// shared borrow — `Inscription::cache` uses interior mutability via
/// `OnceLock`, so this never needs `&mut EngineState`.
fn snapshot_inscriptions(
    state: &EngineState,
    transition_id: &str,
) -> Vec<(Option<String>, Option<InscriptionKind>, crate::types::ExecMode, Option<crate::registry::RegistryFunc>)> {
    let Some(transition) = state.net.transitions.get(transition_id) else {
        return Vec::new();
    };
    transition
        .inscriptions
        .iter()
        .map(|ins| (ins.id.clone(), ins.kind, ins.exec_mode, resolve(state, ins)))
        .collect()
}

fn evaluate_guards(state: &EngineState, transition_id: &str) -> bool {
    let Some(transition) = state.net.transitions.get(transition_id) else {
        return true;
    };
    for ins in &transition.inscriptions {
        if ins.kind != Some(InscriptionKind::Guard) {
            continue;
        }
        let Some(func) = resolve(state, ins) else {
            continue;
        };
        match func.call(None) {
            // `Token::Null` is the Rust encoding of the Python `None` a
            // guard with no explicit boolean returns; per spec §4.3 step 1
            // that is treated as `true`, not as a falsy value.
            Ok(CallableOutcome::Value(Token::Null)) => {}
            Ok(CallableOutcome::Value(v)) => {
                if !v.is_truthy() {
                    return false;
                }
            }
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    true
}

/// Resolves and invokes each `expression` inscription in declaration order,
/// returning the first that requests suspension (async). Matches
/// `enginepy/pnml_engine.py`'s `_execute_expressions`: only the first
/// async-suspending expression is honored per firing.
///
/// Per spec §7: a `sync` expression that raises propagates outward as a
/// step-level error (tokens already consumed stay consumed; nothing is
/// produced). An `async` expression whose callable raises *before* handing
/// back an outcome is treated the same as the async-immediate-error case —
/// it completes the pending op with `error` set rather than aborting the
/// step, since by this point the transition has already committed to an
/// async firing.
fn execute_expressions(
    state: &mut EngineState,
    transition_id: &str,
    moved_tokens: Vec<Token>,
    output_places: Vec<String>,
) -> ExpressionOutcome {
    let inscriptions = snapshot_inscriptions(state, transition_id);
    for (ins_id, kind, exec_mode, func) in inscriptions {
        if kind != Some(InscriptionKind::Expression) {
            continue;
        }
        let Some(func) = func else {
            continue;
        };
        let arg = moved_tokens.first();
        let outcome = match func.call(arg) {
            Ok(o) => o,
            Err(err) if exec_mode == crate::types::ExecMode::Async => {
                let id = state.next_pending_id;
                state.next_pending_id += 1;
                return ExpressionOutcome::Pending(
                    PendingOp {
                        id,
                        transition_id: transition_id.to_string(),
                        inscription_id: ins_id,
                        transition_name: Some(transition_id.to_string()),
                        description: None,
                        net_id: state.net.id.clone(),
                        run_id: state.run_id.clone(),
                        operation_type: "async_immediate".to_string(),
                        resume_token: None,
                        output_places,
                        moved_tokens,
                        metadata: None,
                        ui_state: None,
                        result: None,
                        error: Some(err.to_string()),
                        completed: true,
                    },
                    None,
                );
            }
            Err(err) => return ExpressionOutcome::Error(err),
        };
        if exec_mode != crate::types::ExecMode::Async {
            continue;
        }
        match outcome {
            CallableOutcome::Value(v) => {
                let id = state.next_pending_id;
                state.next_pending_id += 1;
                return ExpressionOutcome::Pending(
                    PendingOp {
                        id,
                        transition_id: transition_id.to_string(),
                        inscription_id: ins_id,
                        transition_name: Some(transition_id.to_string()),
                        description: None,
                        net_id: state.net.id.clone(),
                        run_id: state.run_id.clone(),
                        operation_type: "async_immediate".to_string(),
                        resume_token: None,
                        output_places,
                        moved_tokens,
                        metadata: None,
                        ui_state: None,
                        result: Some(v),
                        error: None,
                        completed: true,
                    },
                    None,
                );
            }
            CallableOutcome::Future(future) => {
                let id = future.id;
                let pending = PendingOp {
                    id,
                    transition_id: transition_id.to_string(),
                    inscription_id: ins_id,
                    transition_name: Some(transition_id.to_string()),
                    description: None,
                    net_id: state.net.id.clone(),
                    run_id: state.run_id.clone(),
                    operation_type: "async_result".to_string(),
                    resume_token: None,
                    output_places,
                    moved_tokens,
                    metadata: None,
                    ui_state: None,
                    result: None,
                    error: None,
                    completed: false,
                };
                return ExpressionOutcome::Pending(pending, Some(future));
            }
            CallableOutcome::Request(req) => {
                let id = state.next_pending_id;
                state.next_pending_id += 1;
                let resume_token = req.resume_token.clone().unwrap_or_else(|| format!("evo_async_{}", millis_now()));
                let mut metadata = BTreeMap::new();
                if let Some(timeout) = req.timeout_ms {
                    metadata.insert("timeout_ms".to_string(), serde_json::json!(timeout));
                }
                if let Some(params) = &req.operation_params {
                    metadata.insert("operationParams".to_string(), serde_json::json!(params));
                }
                return ExpressionOutcome::Pending(
                    PendingOp {
                        id,
                        transition_id: transition_id.to_string(),
                        inscription_id: ins_id,
                        transition_name: Some(transition_id.to_string()),
                        description: None,
                        net_id: state.net.id.clone(),
                        run_id: state.run_id.clone(),
                        operation_type: req.operation_type.clone(),
                        resume_token: Some(resume_token),
                        output_places,
                        moved_tokens,
                        metadata: Some(metadata),
                        ui_state: req.ui_state.clone(),
                        result: None,
                        error: None,
                        completed: false,
                    },
                    None,
                );
            }
        }
    }
    ExpressionOutcome::None
}

fn resolve(state: &EngineState, ins: &crate::types::Inscription) -> Option<crate::registry::RegistryFunc> {
    if let Some(cached) = ins.cached() {
        return Some(cached);
    }
    let func = state.registry.get(&ins.registry_key)?;
    ins.cache(func.clone());
    Some(func)
}

/// The `async_result`/`async_request` finalize path: firing a future's
/// callback or an external `submit_async` resolves the op by a fixed
/// priority — `result` wins, then `error`, then any tokens that were moved
/// out of the input places at fire time, then a synthetic fallback.
fn finalize_resume(state: &mut EngineState, pending: &PendingOp) {
    let tokens = if let Some(result) = &pending.result {
        vec![result.clone()]
    } else if let Some(error) = &pending.error {
        vec![Token::error_singleton(error)]
    } else if !pending.moved_tokens.is_empty() {
        pending.moved_tokens.clone()
    } else {
        vec![Token::singleton_from(&pending.transition_id)]
    };
    produce_tokens(state, &pending.output_places, tokens);
}

/// The `async_immediate` finalize path: unlike [`finalize_resume`], the
/// moved tokens are never discarded — the result is appended after them.
/// Spec §9 calls this out explicitly as load-bearing for S1 vs S5; see
/// DESIGN.md for why it diverges from the unified priority used above.
fn finalize_immediate(state: &mut EngineState, pending: &PendingOp) {
    let mut tokens = pending.moved_tokens.clone();
    if let Some(result) = &pending.result {
        tokens.push(result.clone());
    } else if let Some(error) = &pending.error {
        tokens.push(Token::error_singleton(error));
    }
    if tokens.is_empty() {
        tokens.push(Token::singleton_from(&pending.transition_id));
    }
    produce_tokens(state, &pending.output_places, tokens);
}

fn register_pending(state: &mut EngineState, pending: PendingOp) {
    if let Some(token) = &pending.resume_token {
        state.pending_by_token.insert(token.clone(), pending.clone());
    }
    state.pending_by_id.insert(pending.id, pending);
}

fn unregister_pending(state: &mut EngineState, pending: &PendingOp) {
    state.pending_by_id.remove(&pending.id);
    if let Some(token) = &pending.resume_token {
        state.pending_by_token.remove(token);
    }
}

/// Subscribes a future's completion to resolve this pending op through
/// `submit_async`, matching the registration side effect described in
/// spec §4.3. `step_once` calls this itself for every `async_result` pending
/// op it returns, after releasing its state lock (the callback may run
/// synchronously if the future is already done).
fn link_future_completion(engine: &Engine, future: StdArc<crate::async_ops::AsyncFuture>, pending_id: u64) {
    let engine = engine.clone();
    future.on_done(move |f| {
        engine.submit_async(Some(pending_id), None, f.result(), f.error());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn net_with_two_places() -> Net {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: "Red"
      - id: p2
        initialTokens:
          - value: "Blue"
    transition:
      - id: t1
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        parse(text).unwrap().0
    }

    #[test]
    fn step_once_moves_tokens_without_inscriptions() {
        let net = net_with_two_places();
        let engine = Engine::new(net, Registry::new());
        match engine.step_once() {
            StepOutcome::Fired(tid) => assert_eq!(tid, "t1"),
            _ => panic!("expected a fired transition"),
        }
        assert_eq!(engine.marking_of("p1"), Vec::<Token>::new());
        assert_eq!(
            engine.marking_of("p2"),
            vec![Token::String("Blue".into()), Token::String("Red".into())]
        );
    }

    #[test]
    fn enabled_transitions_is_empty_with_pending_op() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: 1
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: ins1
            kind: expression
            execMode: async
            code: "make_future"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_expression", |_t| {
            Ok(CallableOutcome::Future(crate::async_ops::AsyncFuture::new(7)))
        });
        let engine = Engine::new(net, registry);
        let outcome = engine.step_once();
        assert!(matches!(outcome, StepOutcome::Pending(ref p) if p.operation_type == "async_result" && !p.completed));
        assert!(engine.enabled_transitions().is_empty());
    }

    #[test]
    fn submit_async_is_idempotent_for_unknown_id() {
        let net = net_with_two_places();
        let engine = Engine::new(net, Registry::new());
        engine.submit_async(Some(999), None, Some(Token::Int(1)), None);
        assert!(engine.marking_of("p2").is_empty());
    }

    #[test]
    fn async_immediate_appends_result_after_moved_tokens() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: 1
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: ins1
            kind: expression
            execMode: async
            code: "immediate"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_expression", |_t| Ok(CallableOutcome::Value(Token::Int(42))));
        let engine = Engine::new(net, registry);
        let outcome = engine.step_once();
        assert!(matches!(outcome, StepOutcome::Pending(ref p) if p.completed && p.operation_type == "async_immediate"));
        assert_eq!(engine.marking_of("p2"), vec![Token::Int(1), Token::Int(42)]);
    }

    #[test]
    fn async_result_finalize_discards_moved_tokens_when_result_set() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: 1
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: ins1
            kind: expression
            execMode: async
            code: "make_future"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_expression", |_t| {
            Ok(CallableOutcome::Future(crate::async_ops::AsyncFuture::new(3)))
        });
        let engine = Engine::new(net, registry);
        let outcome = engine.step_once();
        let pending_id = match outcome {
            StepOutcome::Pending(p) => p.id,
            _ => panic!("expected pending op"),
        };
        engine.submit_async(Some(pending_id), None, Some(Token::String("done".into())), None);
        assert_eq!(engine.marking_of("p2"), vec![Token::String("done".into())]);
    }

    #[tokio::test]
    async fn s3_async_future_resumes_via_tokio_spawned_callback() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: 1
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: ins1
            kind: expression
            execMode: async
            code: "fetch_result"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_expression", |_t| {
            Ok(CallableOutcome::Future(crate::async_ops::run_async(1, || Ok(Token::String("done".to_string())))))
        });
        let engine = Engine::new(net, registry);
        // step_once itself subscribes the returned future's completion to
        // submit_async — no manual linking required by the caller.
        match engine.step_once() {
            StepOutcome::Pending(p) => assert_eq!(p.operation_type, "async_result"),
            _ => panic!("expected a pending op"),
        };
        assert!(engine.enabled_transitions().is_empty());
        for _ in 0..200 {
            if !engine.marking_of("p2").is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert_eq!(engine.marking_of("p2"), vec![Token::String("done".to_string())]);
    }

    #[test]
    fn s4_async_request_synthesizes_resume_token_and_resumes_by_token() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: 1
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: ins1
            kind: expression
            execMode: async
            code: "form"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_expression", |_t| {
            let mut req = crate::async_ops::AsyncRequest::new("form");
            req.timeout_ms = Some(1000);
            Ok(CallableOutcome::Request(req))
        });
        let engine = Engine::new(net, registry);
        let pending = match engine.step_once() {
            StepOutcome::Pending(p) => p,
            _ => panic!("expected a pending op awaiting external resume"),
        };
        assert_eq!(pending.operation_type, "form");
        assert!(!pending.completed);
        let token = pending.resume_token.clone().expect("resume token should be synthesized");
        assert!(token.starts_with("evo_async_"), "got {token}");
        assert!(engine.enabled_transitions().is_empty());

        engine.submit_async(None, Some(&token), Some(Token::Map(BTreeMap::from([("approved".to_string(), Token::Bool(true))]))), None);

        assert_eq!(
            engine.marking_of("p2"),
            vec![Token::Map(BTreeMap::from([("approved".to_string(), Token::Bool(true))]))]
        );
    }

    #[test]
    fn guard_false_leaves_marking_untouched() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: "Red"
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: g1
            kind: guard
            code: "always_false"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_guard", |_t| Ok(CallableOutcome::Value(Token::Bool(false))));
        let engine = Engine::new(net, registry);
        assert!(matches!(engine.step_once(), StepOutcome::None));
        assert_eq!(engine.marking_of("p1"), vec![Token::String("Red".into())]);
    }

    #[test]
    fn guard_returning_null_is_treated_as_passing() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: "Red"
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: g1
            kind: guard
            code: "no_explicit_boolean"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_guard", |_t| Ok(CallableOutcome::Value(Token::Null)));
        let engine = Engine::new(net, registry);
        match engine.step_once() {
            StepOutcome::Fired(tid) => assert_eq!(tid, "t1"),
            _ => panic!("a Null guard result should pass, not block, the fire"),
        }
        assert_eq!(engine.marking_of("p2"), vec![Token::String("Red".into())]);
    }

    #[test]
    fn sync_expression_error_consumes_tokens_but_produces_nothing() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: "Red"
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: e1
            kind: expression
            code: "boom"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_expression", |_t| {
            Err(crate::error::InscriptionError {
                transition_id: "t1".to_string(),
                inscription_id: "e1".to_string(),
                message: "boom".to_string(),
            })
        });
        let engine = Engine::new(net, registry);
        match engine.step_once() {
            StepOutcome::Error(err) => assert_eq!(err.message, "boom"),
            _ => panic!("expected a step-level error"),
        }
        assert!(engine.marking_of("p1").is_empty(), "token already consumed is not restored");
        assert!(engine.marking_of("p2").is_empty(), "output production is skipped on error");
    }

    #[test]
    fn async_expression_error_completes_pending_op_with_error_set() {
        let text = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: 1
      - id: p2
    transition:
      - id: t1
        inscriptions:
          - id: e1
            kind: expression
            execMode: async
            code: "boom"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#;
        let (net, _) = parse(text).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("n1_t1_expression", |_t| {
            Err(crate::error::InscriptionError {
                transition_id: "t1".to_string(),
                inscription_id: "e1".to_string(),
                message: "network unreachable".to_string(),
            })
        });
        let engine = Engine::new(net, registry);
        match engine.step_once() {
            StepOutcome::Pending(p) => {
                assert!(p.completed);
                assert_eq!(p.error.as_deref(), Some("inscription 'e1' on transition 't1' failed: network unreachable"));
            }
            _ => panic!("expected a completed pending op carrying the error"),
        }
        assert_eq!(
            engine.marking_of("p2"),
            vec![Token::Int(1), Token::error_singleton("inscription 'e1' on transition 't1' failed: network unreachable")],
            "async_immediate keeps moved tokens and appends the error, per the finalize_immediate asymmetry"
        );
    }
}

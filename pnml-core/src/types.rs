//! The PNML-YAML data model: nets, places, transitions, arcs, inscriptions,
//! and the opaque token values that flow between them.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::registry::RegistryFunc;
use serde::{Deserialize, Serialize};

/// A dynamically-typed token value. The engine never matches on a specific
/// variant except to move or print it; inscriptions receive and produce the
/// same variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, Token>),
    List(Vec<Token>),
}

impl Token {
    /// A guard returning `None` is treated as truthy by the caller before
    /// this is ever invoked; this covers the value conversion for a guard
    /// that *did* return something.
    pub fn is_truthy(&self) -> bool {
        match self {
            Token::Null => false,
            Token::Bool(b) => *b,
            Token::Int(n) => *n != 0,
            Token::Float(f) => *f != 0.0,
            Token::String(s) => !s.is_empty(),
            Token::Map(m) => !m.is_empty(),
            Token::List(l) => !l.is_empty(),
        }
    }

    pub fn singleton_from(transition_id: &str) -> Token {
        let mut m = BTreeMap::new();
        m.insert("from".to_string(), Token::String(transition_id.to_string()));
        Token::Map(m)
    }

    pub fn error_singleton(message: &str) -> Token {
        let mut m = BTreeMap::new();
        m.insert("error".to_string(), Token::String(message.to_string()));
        Token::Map(m)
    }
}

/// Whether an inscription is a boolean-valued enabling predicate or a
/// side-effecting body run at fire time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InscriptionKind {
    Guard,
    Expression,
}

impl InscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InscriptionKind::Guard => "guard",
            InscriptionKind::Expression => "expression",
        }
    }
}

/// Synchronous inscriptions return a plain [`Token`] immediately; async
/// inscriptions may additionally return an [`crate::async_ops::AsyncFuture`]
/// or [`crate::async_ops::AsyncRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    #[default]
    Sync,
    Async,
}

/// Code attached to a transition (or, structurally, an arc — though per
/// spec §9 the engine never fires arc-owned inscriptions).
#[derive(Debug)]
pub struct Inscription {
    pub id: Option<String>,
    pub language: Option<String>,
    pub kind: Option<InscriptionKind>,
    pub source: Option<String>,
    pub exec_mode: ExecMode,
    pub code: Option<String>,
    pub owner_id: String,
    pub registry_key: String,
    resolved: OnceLock<RegistryFunc>,
}

impl Inscription {
    pub fn new(owner_id: String, registry_key: String) -> Self {
        Self {
            id: None,
            language: None,
            kind: None,
            source: None,
            exec_mode: ExecMode::Sync,
            code: None,
            owner_id,
            registry_key,
            resolved: OnceLock::new(),
        }
    }

    /// Returns the cached callable, if one was already resolved.
    pub fn cached(&self) -> Option<RegistryFunc> {
        self.resolved.get().cloned()
    }

    /// Caches a resolved callable. A later call with a different value is a
    /// no-op (first resolution wins) — firing never needs to re-resolve
    /// once a key has been looked up successfully.
    pub fn cache(&self, func: RegistryFunc) {
        let _ = self.resolved.set(func);
    }
}

#[derive(Debug, Default)]
pub struct Transition {
    pub id: String,
    pub inscriptions: Vec<Inscription>,
}

impl Transition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inscriptions: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Place {
    pub id: String,
    pub initial_tokens: Vec<Token>,
}

impl Place {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            initial_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Arc {
    pub id: String,
    pub source: Option<String>,
    pub target: Option<String>,
    /// Reserved for forward compatibility; never evaluated by the engine
    /// (spec §9 Open Question: arc-owned inscriptions are parsed but not fired).
    pub inscriptions: Vec<Inscription>,
}

impl Arc {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: None,
            target: None,
            inscriptions: Vec::new(),
        }
    }
}

/// Top-level graph: places, transitions, and the arcs connecting them.
/// Owns everything exclusively; read-only after `parse` except for the
/// lazy inscription-callable cache described on [`Inscription`].
#[derive(Debug, Default)]
pub struct Net {
    pub id: Option<String>,
    pub places: BTreeMap<String, Place>,
    pub transitions: BTreeMap<String, Transition>,
    pub arcs: Vec<Arc>,
}

impl Net {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input places (arc-declaration order) and output places, keyed by
    /// transition id. An arc whose endpoints are both places, both
    /// transitions, or reference an unknown id is ignored.
    pub fn io_maps(&self) -> (BTreeMap<String, Vec<String>>, BTreeMap<String, Vec<String>>) {
        let mut inputs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut outputs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for arc in &self.arcs {
            let (Some(source), Some(target)) = (&arc.source, &arc.target) else {
                continue;
            };
            let source_is_place = self.places.contains_key(source);
            let target_is_place = self.places.contains_key(target);
            let source_is_transition = self.transitions.contains_key(source);
            let target_is_transition = self.transitions.contains_key(target);
            if source_is_place && target_is_transition {
                inputs.entry(target.clone()).or_default().push(source.clone());
            } else if source_is_transition && target_is_place {
                outputs.entry(source.clone()).or_default().push(target.clone());
            }
        }
        (inputs, outputs)
    }
}

/// A named, line-ranged place entry. Invariant:
/// `start_line <= id_line <= end_line`; entries are non-overlapping in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceIndex {
    pub id: Option<String>,
    pub id_line: usize,
    pub start_line: usize,
    pub end_line: usize,
}

/// Append-only record of one completed or pending firing, produced by the
/// debug driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: usize,
    pub transition_id: Option<String>,
    pub line: Option<usize>,
    pub produced_places: Vec<String>,
}

/// A suspended firing awaiting an external `submit_async`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingOp {
    pub id: u64,
    pub transition_id: String,
    pub inscription_id: Option<String>,
    pub transition_name: Option<String>,
    pub description: Option<String>,
    pub net_id: Option<String>,
    pub run_id: String,
    pub operation_type: String,
    pub resume_token: Option<String>,
    pub output_places: Vec<String>,
    pub moved_tokens: Vec<Token>,
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
    pub ui_state: Option<serde_json::Value>,
    pub result: Option<Token>,
    pub error: Option<String>,
    pub completed: bool,
}

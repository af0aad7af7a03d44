//! Protocol shim (C6): translates DAP-style requests/events and an
//! LSP-like `documentSymbol`/`executeCommand` surface onto the C5 debug
//! driver. Ported from `enginepy/pnml_dap.py`'s `PNMLDAPServer` and
//! `ls/server.py`'s `LSPServer`, minus the VSCode-bridge reverse-request
//! machinery (out of scope per the adapter's semantic contract).

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use pnml_core::debug::DebugDriver;
use pnml_core::engine::StepOutcome;
use pnml_core::parser::extract_place_index;
use pnml_core::registry::Registry;
use pnml_core::types::{HistoryEntry, Token};
use serde_json::{json, Value};

/// One event to emit (`(event name, body)`), queued alongside a request's
/// response so a caller driving the transport can send both in order.
pub struct ShimEffect {
    pub response: Option<Value>,
    pub events: Vec<(String, Value)>,
    pub terminate: bool,
}

impl ShimEffect {
    fn response(body: Value) -> Self {
        Self { response: Some(body), events: Vec::new(), terminate: false }
    }

    fn none() -> Self {
        Self { response: None, events: Vec::new(), terminate: false }
    }

    fn with_event(mut self, event: impl Into<String>, body: Value) -> Self {
        self.events.push((event.into(), body));
        self
    }

    fn terminated(mut self) -> Self {
        self.terminate = true;
        self
    }
}

pub struct Shim {
    driver: DebugDriver,
    registry: Registry,
    program: Option<String>,
    last_stop: Option<HistoryEntry>,
    last_stop_place: Option<String>,
    breakpoints: BTreeSet<String>,
    stopped: bool,
    documents: BTreeMap<String, String>,
    known_pending_ops: BTreeSet<u64>,
}

impl Shim {
    pub fn new(registry: Registry) -> Self {
        Self {
            driver: DebugDriver::new(),
            registry,
            program: None,
            last_stop: None,
            last_stop_place: None,
            breakpoints: BTreeSet::new(),
            stopped: false,
            documents: BTreeMap::new(),
            known_pending_ops: BTreeSet::new(),
        }
    }

    /// Emits `asyncOperationStarted` for the oldest pending op, once per id,
    /// mirroring `enginepy/pnml_dap.py`'s `_emit_pending_ops`.
    fn emit_pending_op_started(&mut self, effect: &mut ShimEffect) {
        let Some(engine) = self.driver.engine().cloned() else { return };
        let Some(op) = engine.first_pending() else {
            self.known_pending_ops.clear();
            return;
        };
        if !self.known_pending_ops.insert(op.id) {
            return;
        }
        let timeout_ms = op.metadata.as_ref().and_then(|m| m.get("timeout_ms")).cloned();
        effect.events.push((
            "asyncOperationStarted".to_string(),
            json!({
                "operationId": op.id,
                "operationType": op.operation_type,
                "resumeToken": op.resume_token,
                "transitionId": op.transition_id,
                "transitionName": op.transition_name,
                "inscriptionId": op.inscription_id,
                "netId": op.net_id,
                "runId": op.run_id,
                "timeoutMs": timeout_ms,
                "uiState": op.ui_state,
                "metadata": op.metadata,
            }),
        ));
    }

    /// `enginepy/pnml_dap.py`'s `_terminate`: announces the final marking
    /// then a `terminated` event.
    fn push_terminate_events(&self, effect: &mut ShimEffect) {
        if let Some(engine) = self.driver.engine() {
            let marking = engine.marking();
            effect.events.push((
                "output".to_string(),
                json!({"category": "stdout", "output": format!("Final marking: {marking:?}\n")}),
            ));
        }
        effect.events.push(("terminated".to_string(), json!({})));
    }

    /// Dispatches one incoming message: a DAP request (has `command`), or an
    /// LSP-style request/notification (has `method`).
    pub fn handle(&mut self, message: &Value) -> ShimEffect {
        if let Some(command) = message.get("command").and_then(Value::as_str) {
            return self.handle_dap(command, message);
        }
        if let Some(method) = message.get("method").and_then(Value::as_str) {
            return self.handle_lsp(method, message);
        }
        ShimEffect::none()
    }

    fn handle_dap(&mut self, command: &str, request: &Value) -> ShimEffect {
        match command {
            "initialize" => ShimEffect::response(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsTerminateRequest": true,
            }))
            .with_event("initialized", json!({})),
            "launch" => self.handle_launch(request),
            "setBreakpoints" => self.handle_set_breakpoints(request),
            "configurationDone" => {
                let mut effect = ShimEffect::response(json!({}));
                self.maybe_stop(&mut effect);
                effect
            }
            "continue" => self.handle_continue(),
            "next" => self.handle_next(),
            "asyncOperationSubmit" => self.handle_async_operation_submit(request),
            "threads" => ShimEffect::response(json!({"threads": [{"id": 1, "name": "main"}]})),
            "stackTrace" => ShimEffect::response(self.stack_trace()),
            "scopes" => ShimEffect::response(json!({
                "scopes": [
                    {"name": "Marking", "variablesReference": 1},
                    {"name": "History", "variablesReference": 2},
                ]
            })),
            "variables" => ShimEffect::response(self.variables(request)),
            "evaluate" => ShimEffect::response(self.evaluate(request)),
            "disconnect" | "terminate" => {
                let mut effect = ShimEffect::response(json!({}));
                self.push_terminate_events(&mut effect);
                effect.terminated()
            }
            _ => ShimEffect::response(json!({})),
        }
    }

    /// Reads and parses a program file, wiring it into the debug driver.
    /// Mirrors `enginepy/pnml_dap.py`'s `launch` handler, which reports a
    /// load failure back to the client rather than crashing the session.
    fn load_program(&mut self, path: &str) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading program file {path}"))?;
        self.driver.load(&text, self.registry.clone()).with_context(|| format!("parsing program file {path}"))?;
        Ok(())
    }

    fn handle_launch(&mut self, request: &Value) -> ShimEffect {
        let args = request.get("arguments").cloned().unwrap_or_default();
        let program = args.get("program").and_then(Value::as_str).map(|s| s.to_string());
        let no_debug = args.get("noDebug").and_then(Value::as_bool).unwrap_or(false);
        self.program = program.clone();
        let mut effect = ShimEffect::response(json!({}));
        if let Some(path) = &program {
            if let Err(err) = self.load_program(path) {
                effect = effect.with_event("output", json!({"category": "stderr", "output": format!("{err:#}\n")}));
            }
        }
        if no_debug {
            if let Some(engine) = self.driver.engine().cloned() {
                loop {
                    match engine.step_once() {
                        StepOutcome::None => break,
                        StepOutcome::Pending(p) if !p.completed => break,
                        StepOutcome::Pending(_) => continue,
                        StepOutcome::Fired(_) => continue,
                        StepOutcome::Error(err) => {
                            effect = effect.with_event("output", json!({"category": "stderr", "output": format!("{err}\n")}));
                            break;
                        }
                    }
                }
            }
            self.push_terminate_events(&mut effect);
            return effect.terminated();
        }
        effect
    }

    fn handle_set_breakpoints(&mut self, request: &Value) -> ShimEffect {
        let args = request.get("arguments").cloned().unwrap_or_default();
        let breakpoints = args.get("breakpoints").and_then(Value::as_array).cloned().unwrap_or_default();
        let lines: Vec<usize> = breakpoints
            .iter()
            .filter_map(|bp| bp.get("line").and_then(Value::as_u64))
            .map(|raw| if raw > 0 { (raw - 1) as usize } else { 0 })
            .collect();
        self.driver.set_breakpoints(&lines);
        self.breakpoints = self
            .driver
            .place_index()
            .iter()
            .filter(|p| lines.iter().any(|&l| p.start_line <= l && l <= p.end_line))
            .filter_map(|p| p.id.clone())
            .collect();
        let verified: Vec<Value> = lines.iter().map(|&l| json!({"verified": true, "line": l + 1})).collect();
        ShimEffect::response(json!({"breakpoints": verified}))
    }

    fn handle_continue(&mut self) -> ShimEffect {
        let Some(engine) = self.driver.engine().cloned() else {
            return ShimEffect::response(json!({"allThreadsContinued": true})).terminated();
        };
        let entry = self.driver.continue_run();
        let mut effect = ShimEffect::response(json!({"allThreadsContinued": true}));
        if let Some(err) = self.driver.take_last_error() {
            effect = effect.with_event("output", json!({"category": "stderr", "output": format!("{err}\n")}));
            self.last_stop = entry;
            self.stopped = true;
            return effect.with_event("stopped", json!({"reason": "pause", "threadId": 1}));
        }
        if engine.has_pending() {
            self.last_stop = entry;
            self.stopped = true;
            self.emit_pending_op_started(&mut effect);
            return effect.with_event("stopped", json!({"reason": "pause", "threadId": 1}));
        }
        if let Some(entry) = &entry {
            if entry.line.is_some() {
                self.last_stop = Some(entry.clone());
                self.stopped = true;
                return effect.with_event("stopped", json!({"reason": "breakpoint", "threadId": 1}));
            }
        }
        self.push_terminate_events(&mut effect);
        effect.terminate = true;
        effect
    }

    fn handle_next(&mut self) -> ShimEffect {
        if self.driver.engine().is_none() {
            return ShimEffect::response(json!({})).terminated();
        }
        let entry = self.driver.step_once();
        let mut effect = ShimEffect::response(json!({}));
        if let Some(err) = self.driver.take_last_error() {
            effect = effect.with_event("output", json!({"category": "stderr", "output": format!("{err}\n")}));
        }
        let Some(entry) = entry else {
            self.push_terminate_events(&mut effect);
            effect.terminate = true;
            return effect;
        };
        self.last_stop = Some(entry);
        if self.driver.engine().map(|e| e.has_pending()).unwrap_or(false) {
            self.emit_pending_op_started(&mut effect);
        }
        effect.with_event("stopped", json!({"reason": "step", "threadId": 1}))
    }

    fn handle_async_operation_submit(&mut self, request: &Value) -> ShimEffect {
        let args = request.get("arguments").cloned().unwrap_or_default();
        let op_id = args.get("operationId").and_then(Value::as_u64);
        let resume_token = args.get("resumeToken").and_then(Value::as_str).map(|s| s.to_string());
        let result = args.get("result").cloned().and_then(value_to_token);
        let error = args.get("error").and_then(Value::as_str).map(|s| s.to_string());
        let Some(engine) = self.driver.engine().cloned() else {
            return ShimEffect::response(json!({}));
        };

        let pending_before = engine.pending(op_id, resume_token.as_deref());

        engine.submit_async(op_id, resume_token.as_deref(), result.clone(), error.clone());

        let mut effect = ShimEffect::response(json!({})).with_event(
            "asyncOperationUpdated",
            json!({
                "operationId": op_id,
                "status": if error.is_none() { "completed" } else { "failed" },
                "result": result,
                "error": error,
            }),
        );

        if let Some(pending) = pending_before {
            if let Some(stop_place) = pending
                .output_places
                .iter()
                .find(|pid| self.breakpoints.contains(*pid) && !engine.marking_of(pid).is_empty())
            {
                self.last_stop_place = Some(stop_place.clone());
                self.stopped = true;
                effect = effect.with_event(
                    "stopped",
                    json!({
                        "reason": "asyncComplete",
                        "threadId": 1,
                        "place": stop_place,
                        "transitionId": pending.transition_id,
                        "resumeToken": pending.resume_token,
                    }),
                );
            }
        }
        effect
    }

    /// `enginepy/pnml_dap.py`'s `_maybe_stop`: stops before the first
    /// `continue`/step if a breakpointed place already has a token and is
    /// an input of some enabled transition.
    fn maybe_stop(&mut self, effect: &mut ShimEffect) {
        if self.stopped {
            return;
        }
        let Some(engine) = self.driver.engine().cloned() else { return };
        if self.breakpoints.is_empty() {
            return;
        }
        let net = engine.net();
        let (inputs, _outputs) = net.io_maps();
        let enabled: BTreeSet<String> = engine.enabled_transitions().into_iter().collect();
        for place_id in &self.breakpoints {
            let has_token = !engine.marking_of(place_id).is_empty();
            let is_input = enabled.iter().any(|tid| inputs.get(tid).map(|ps| ps.contains(place_id)).unwrap_or(false));
            if has_token && is_input {
                self.last_stop_place = Some(place_id.clone());
                self.stopped = true;
                effect.events.push(("stopped".to_string(), json!({"reason": "breakpoint", "threadId": 1})));
                return;
            }
        }
    }

    fn stack_trace(&self) -> Value {
        let mut frames = Vec::new();
        let source_name = self.program.as_deref().map(|p| p.rsplit('/').next().unwrap_or(p).to_string()).unwrap_or_else(|| "PNML".to_string());
        if let Some(place) = &self.last_stop_place {
            if let Some(line) = self.driver.place_index().iter().find(|p| p.id.as_deref() == Some(place)).map(|p| p.id_line) {
                frames.push(json!({"id": 1, "name": format!("Place {place}"), "line": line + 1, "column": 1, "source": {"name": source_name, "path": self.program}}));
            }
        } else if let Some(entry) = &self.last_stop {
            if let Some(line) = entry.line {
                frames.push(json!({
                    "id": 1,
                    "name": entry.transition_id.clone().unwrap_or_else(|| "PNML".to_string()),
                    "line": line + 1,
                    "column": 1,
                    "source": {"name": source_name, "path": self.program},
                }));
            }
        }
        json!({"stackFrames": frames, "totalFrames": frames.len()})
    }

    fn variables(&self, request: &Value) -> Value {
        let args = request.get("arguments").cloned().unwrap_or_default();
        let reference = args.get("variablesReference").and_then(Value::as_u64);
        let vars: Vec<Value> = match reference {
            Some(1) => {
                let Some(engine) = self.driver.engine() else { return json!({"variables": []}) };
                engine
                    .marking()
                    .into_iter()
                    .map(|(pid, tokens)| json!({"name": pid, "value": format!("{tokens:?}"), "type": "list", "variablesReference": 0}))
                    .collect()
            }
            Some(2) => self
                .driver
                .history()
                .iter()
                .map(|entry| json!({"name": format!("step {}", entry.step), "value": format!("transition {:?}", entry.transition_id), "type": "HistoryEntry", "variablesReference": 0}))
                .collect(),
            _ => Vec::new(),
        };
        json!({"variables": vars})
    }

    fn evaluate(&self, request: &Value) -> Value {
        let args = request.get("arguments").cloned().unwrap_or_default();
        let expr = args.get("expression").and_then(Value::as_str).unwrap_or("").trim().to_string();
        let mut result = String::new();
        if let Some(engine) = self.driver.engine() {
            let marking = engine.marking();
            if let Some(tokens) = marking.get(&expr) {
                result = format!("{tokens:?}");
            } else if let Some(key) = expr.strip_prefix("marking.") {
                if let Some(tokens) = marking.get(key) {
                    result = format!("{tokens:?}");
                }
            }
        }
        json!({"result": result, "variablesReference": 0})
    }

    fn handle_lsp(&mut self, method: &str, message: &Value) -> ShimEffect {
        match method {
            "initialize" => ShimEffect::response(json!({
                "capabilities": {
                    "textDocumentSync": 1,
                    "documentSymbolProvider": true,
                    "executeCommandProvider": {"commands": ["evolve.places", "evolve.setPreserveRunDirs"]},
                }
            })),
            "textDocument/didOpen" => {
                let params = message.get("params").cloned().unwrap_or_default();
                if let (Some(uri), Some(text)) = (
                    params.get("textDocument").and_then(|d| d.get("uri")).and_then(Value::as_str),
                    params.get("textDocument").and_then(|d| d.get("text")).and_then(Value::as_str),
                ) {
                    self.documents.insert(uri.to_string(), text.to_string());
                }
                ShimEffect::none()
            }
            "textDocument/didChange" => {
                let params = message.get("params").cloned().unwrap_or_default();
                let uri = params.get("textDocument").and_then(|d| d.get("uri")).and_then(Value::as_str).map(|s| s.to_string());
                let text = params.get("contentChanges").and_then(Value::as_array).and_then(|changes| changes.last()).and_then(|c| c.get("text")).and_then(Value::as_str);
                if let (Some(uri), Some(text)) = (uri, text) {
                    self.documents.insert(uri, text.to_string());
                }
                ShimEffect::none()
            }
            "textDocument/documentSymbol" => {
                let params = message.get("params").cloned().unwrap_or_default();
                let uri = params.get("textDocument").and_then(|d| d.get("uri")).and_then(Value::as_str).unwrap_or("");
                let text = self.documents.get(uri).cloned().unwrap_or_default();
                let symbols: Vec<Value> = extract_place_index(&text)
                    .into_iter()
                    .filter_map(|place| {
                        place.id.map(|id| {
                            json!({
                                "name": id,
                                "kind": 12,
                                "range": {"start": {"line": place.start_line, "character": 0}, "end": {"line": place.end_line, "character": 0}},
                                "selectionRange": {"start": {"line": place.id_line, "character": 0}, "end": {"line": place.id_line, "character": 0}},
                            })
                        })
                    })
                    .collect();
                ShimEffect::response(Value::Array(symbols))
            }
            "workspace/executeCommand" => self.handle_execute_command(message),
            _ => ShimEffect::none(),
        }
    }

    fn handle_execute_command(&mut self, message: &Value) -> ShimEffect {
        let params = message.get("params").cloned().unwrap_or_default();
        let command = params.get("command").and_then(Value::as_str).unwrap_or("");
        let arguments = params.get("arguments").and_then(Value::as_array).cloned().unwrap_or_default();
        let first_arg = arguments.first().cloned().unwrap_or_default();
        match command {
            "evolve.places" => {
                let uri = first_arg.get("uri").and_then(Value::as_str).unwrap_or("");
                let text = self.documents.get(uri).cloned().unwrap_or_default();
                let places: Vec<Value> = extract_place_index(&text)
                    .into_iter()
                    .map(|place| json!({"id": place.id, "idLine": place.id_line, "startLine": place.start_line, "endLine": place.end_line}))
                    .collect();
                ShimEffect::response(Value::Array(places))
            }
            "evolve.setPreserveRunDirs" => {
                let preserve = first_arg.get("preserve").and_then(Value::as_bool).unwrap_or(false);
                if preserve {
                    std::env::set_var("PNML_PRESERVE_RUNS", "1");
                } else {
                    std::env::remove_var("PNML_PRESERVE_RUNS");
                }
                ShimEffect::response(json!({"preserve": preserve}))
            }
            _ => ShimEffect::response(Value::Null),
        }
    }
}

fn value_to_token(value: Value) -> Option<Token> {
    serde_json::from_value(value).ok()
}

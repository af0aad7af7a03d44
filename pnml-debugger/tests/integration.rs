//! Integration tests: drive the protocol shim through a full DAP session
//! lifecycle — initialize → launch → setBreakpoints → configurationDone →
//! continue → asyncOperationSubmit → continue → disconnect — against a
//! small in-memory PNML-YAML program, the way a real debug client would.

use pnml_core::{CallableOutcome, Registry};
use pnml_debugger::shim::Shim;
use serde_json::json;

/// p1 --t1--> p2 --t2(async request)--> p3
const CHAIN_WITH_ASYNC_GATE: &str = r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: "start"
      - id: p2
      - id: p3
    transition:
      - id: t1
      - id: t2
        inscriptions:
          - id: ins1
            kind: expression
            execMode: async
            code: "await_approval"
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
      - id: a3
        source: p2
        target: t2
      - id: a4
        source: t2
        target: p3
"#;

fn registry_with_approval_gate() -> Registry {
    let mut registry = Registry::new();
    registry.register_fn("n1_t2_expression", |_t| {
        Ok(CallableOutcome::Request(pnml_core::async_ops::AsyncRequest::new("approval")))
    });
    registry
}

fn write_program(text: &str) -> tempfile_path::TempProgram {
    tempfile_path::TempProgram::new(text)
}

/// Tiny scratch-file helper so the test doesn't depend on an external crate
/// just to write one file under the OS temp dir.
mod tempfile_path {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    pub struct TempProgram {
        pub path: PathBuf,
    }

    impl TempProgram {
        pub fn new(text: &str) -> Self {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let mut path = std::env::temp_dir();
            path.push(format!("pnml-debugger-test-{}-{n}.pnml", std::process::id()));
            fs::write(&path, text).unwrap();
            Self { path }
        }
    }

    impl Drop for TempProgram {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[test]
fn full_session_stops_on_breakpoint_then_on_async_completion() {
    let program = write_program(CHAIN_WITH_ASYNC_GATE);
    let mut shim = Shim::new(registry_with_approval_gate());

    let init = shim.handle(&json!({"type": "request", "seq": 1, "command": "initialize"}));
    assert!(init.response.is_some());
    assert_eq!(init.events[0].0, "initialized");

    let launch = shim.handle(&json!({
        "type": "request", "seq": 2, "command": "launch",
        "arguments": {"program": program.path.to_str().unwrap(), "noDebug": false},
    }));
    assert!(launch.response.is_some());
    assert!(!launch.terminate);

    // Breakpoint on p2's line (line numbers here are 1-based, DAP-style).
    let p2_line = CHAIN_WITH_ASYNC_GATE.lines().position(|l| l.trim() == "- id: p2").unwrap() + 1;
    let set_bp = shim.handle(&json!({
        "type": "request", "seq": 3, "command": "setBreakpoints",
        "arguments": {"breakpoints": [{"line": p2_line}]},
    }));
    let verified = set_bp.response.unwrap();
    assert_eq!(verified["breakpoints"][0]["verified"], true);

    shim.handle(&json!({"type": "request", "seq": 4, "command": "configurationDone"}));

    // First continue: t1 fires and stops at the p2 breakpoint.
    let cont1 = shim.handle(&json!({"type": "request", "seq": 5, "command": "continue"}));
    assert_eq!(cont1.events.iter().find(|(e, _)| e == "stopped").unwrap().1["reason"], "breakpoint");

    // Second continue: t2 suspends on the async request; an
    // asyncOperationStarted event is emitted and execution pauses.
    let cont2 = shim.handle(&json!({"type": "request", "seq": 6, "command": "continue"}));
    let started = cont2.events.iter().find(|(e, _)| e == "asyncOperationStarted").unwrap();
    assert_eq!(started.1["operationType"], "approval");
    assert_eq!(cont2.events.iter().find(|(e, _)| e == "stopped").unwrap().1["reason"], "pause");

    let op_id = started.1["operationId"].as_u64().unwrap();

    // Resolve the pending op from outside — the approval came back granted.
    let submit = shim.handle(&json!({
        "type": "request", "seq": 7, "command": "asyncOperationSubmit",
        "arguments": {"operationId": op_id, "result": {"approved": true}},
    }));
    let updated = submit.events.iter().find(|(e, _)| e == "asyncOperationUpdated").unwrap();
    assert_eq!(updated.1["status"], "completed");

    // Final continue: t2's output place has no further breakpoint, so the
    // run drains to completion and terminates.
    let cont3 = shim.handle(&json!({"type": "request", "seq": 8, "command": "continue"}));
    assert!(cont3.terminate);
    assert!(cont3.events.iter().any(|(e, _)| e == "terminated"));

    let disconnect = shim.handle(&json!({"type": "request", "seq": 9, "command": "disconnect"}));
    assert!(disconnect.terminate);
}

#[test]
fn launch_no_debug_drains_to_completion_without_stopping() {
    let program = write_program(
        r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: 1
      - id: p2
    transition:
      - id: t1
    arc:
      - id: a1
        source: p1
        target: t1
      - id: a2
        source: t1
        target: p2
"#,
    );
    let mut shim = Shim::new(Registry::new());
    shim.handle(&json!({"type": "request", "seq": 1, "command": "initialize"}));
    let launch = shim.handle(&json!({
        "type": "request", "seq": 2, "command": "launch",
        "arguments": {"program": program.path.to_str().unwrap(), "noDebug": true},
    }));
    assert!(launch.terminate);
    assert!(launch.events.iter().any(|(e, _)| e == "terminated"));
}

#[test]
fn evaluate_reads_marking_by_place_id() {
    let program = write_program(
        r#"
net:
  - id: n1
    place:
      - id: p1
        initialTokens:
          - value: "hello"
    transition:
      - id: t1
    arc:
      - id: a1
        source: p1
        target: t1
"#,
    );
    let mut shim = Shim::new(Registry::new());
    shim.handle(&json!({
        "type": "request", "seq": 1, "command": "launch",
        "arguments": {"program": program.path.to_str().unwrap()},
    }));
    let eval = shim.handle(&json!({
        "type": "request", "seq": 2, "command": "evaluate",
        "arguments": {"expression": "p1"},
    }));
    let body = eval.response.unwrap();
    assert!(body["result"].as_str().unwrap().contains("hello"));
}

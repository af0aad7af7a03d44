use std::io::{stdin, stdout};

use pnml_core::Registry;
use pnml_debugger::config::Config;
use pnml_debugger::protocol::Protocol;
use pnml_debugger::shim::{Shim, ShimEffect};
use tracing_subscriber::EnvFilter;

/// Single-threaded runtime: the shim has no concurrent-client requirement,
/// it just needs a Tokio context so `tokio::spawn`-backed async expressions
/// (see `pnml_core::async_ops::run_async`) have somewhere to run.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    tracing::info!(program = ?config.program, "pnml-debugger starting");

    let input = stdin().lock();
    let output = stdout().lock();
    let mut protocol = Protocol::new(input, output);
    let mut shim = Shim::new(Registry::new());

    if let Some(program) = &config.program {
        let effect = shim.handle(&serde_json::json!({
            "type": "request",
            "seq": 0,
            "command": "launch",
            "arguments": {"program": program, "noDebug": false},
        }));
        send_effect(&mut protocol, &serde_json::json!({"seq": 0, "command": "launch"}), effect)?;
    }

    loop {
        let Some(message) = protocol.read_message()? else {
            break;
        };
        let effect = shim.handle(&message);
        if send_effect(&mut protocol, &message, effect)? {
            break;
        }
    }

    Ok(())
}

/// Sends a handled message's response (if any) followed by its queued
/// events, in order. Returns whether the adapter should stop reading.
fn send_effect<R: std::io::BufRead, W: std::io::Write>(
    protocol: &mut Protocol<R, W>,
    request: &serde_json::Value,
    effect: ShimEffect,
) -> std::io::Result<bool> {
    if let Some(body) = effect.response {
        protocol.send_response(request, body)?;
    }
    for (event, body) in effect.events {
        protocol.send_event(&event, body)?;
    }
    Ok(effect.terminate)
}

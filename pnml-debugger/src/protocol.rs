//! Minimal Content-Length-framed JSON transport, matching both the DAP wire
//! format and `enginepy/pnml_dap.py`'s `DAPProtocol`. Wire framing itself is
//! out of scope for the adapter's semantics (only the request/response/event
//! shapes are), but a transport has to exist somewhere to drive it over
//! stdio, so this one is kept intentionally small.

use std::io::{self, BufRead, Read, Write};

use pnml_core::ShimProtocolError;
use serde_json::Value;

pub struct Protocol<R, W> {
    input: R,
    output: W,
    seq: u64,
}

impl<R: BufRead, W: Write> Protocol<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output, seq: 1 }
    }

    /// Reads one `Content-Length: N\r\n\r\n<N bytes of JSON>` message, or
    /// `Ok(None)` at clean EOF.
    pub fn read_message(&mut self) -> Result<Option<Value>, ShimProtocolError> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let n = self
                .input
                .read_line(&mut line)
                .map_err(|e| ShimProtocolError(format!("read header: {e}")))?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            if let Some(value) = trimmed.strip_prefix("Content-Length:") {
                content_length = value
                    .trim()
                    .parse()
                    .ok()
                    .ok_or_else(|| ShimProtocolError(format!("bad Content-Length header: {value}")))
                    .ok();
            }
        }
        let length = content_length.ok_or_else(|| ShimProtocolError("missing Content-Length header".to_string()))?;
        let mut buf = vec![0u8; length];
        self.input
            .read_exact(&mut buf)
            .map_err(|e| ShimProtocolError(format!("read body: {e}")))?;
        let value = serde_json::from_slice(&buf).map_err(|e| ShimProtocolError(format!("invalid JSON body: {e}")))?;
        Ok(Some(value))
    }

    fn send(&mut self, payload: &Value) -> io::Result<()> {
        let raw = serde_json::to_vec(payload)?;
        write!(self.output, "Content-Length: {}\r\n\r\n", raw.len())?;
        self.output.write_all(&raw)?;
        self.output.flush()
    }

    pub fn send_response(&mut self, request: &Value, body: Value) -> io::Result<()> {
        let response = serde_json::json!({
            "type": "response",
            "seq": self.seq,
            "request_seq": request.get("seq"),
            "success": true,
            "command": request.get("command"),
            "body": body,
        });
        self.seq += 1;
        self.send(&response)
    }

    pub fn send_event(&mut self, event: &str, body: Value) -> io::Result<()> {
        let payload = serde_json::json!({
            "type": "event",
            "seq": self.seq,
            "event": event,
            "body": body,
        });
        self.seq += 1;
        self.send(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_a_single_framed_message() {
        let body = serde_json::json!({"type": "request", "command": "initialize", "seq": 1});
        let raw = serde_json::to_vec(&body).unwrap();
        let framed = format!("Content-Length: {}\r\n\r\n", raw.len());
        let mut bytes = framed.into_bytes();
        bytes.extend_from_slice(&raw);
        let mut proto = Protocol::new(Cursor::new(bytes), Vec::new());
        let msg = proto.read_message().unwrap().unwrap();
        assert_eq!(msg["command"], "initialize");
    }

    #[test]
    fn read_message_returns_none_at_eof() {
        let mut proto = Protocol::new(Cursor::new(Vec::new()), Vec::new());
        assert!(proto.read_message().unwrap().is_none());
    }

    #[test]
    fn send_response_increments_seq() {
        let mut proto = Protocol::new(Cursor::new(Vec::new()), Vec::new());
        let request = serde_json::json!({"seq": 5, "command": "initialize"});
        proto.send_response(&request, serde_json::json!({})).unwrap();
        assert_eq!(proto.seq, 2);
    }
}

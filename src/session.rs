//! Per-request credential, cancellation and trace context.

use rand::RngCore;
use std::fmt::Write;
use tokio_util::sync::CancellationToken;

/// W3C trace context carried by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub flags: u8,
}

impl TraceContext {
    /// A fresh sampled root.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut trace_id = [0u8; 16];
        let mut span_id = [0u8; 8];
        rng.fill_bytes(&mut trace_id);
        rng.fill_bytes(&mut span_id);
        Self {
            trace_id,
            span_id,
            flags: 0x01,
        }
    }

    /// Parse a `traceparent` header (`00-<trace>-<span>-<flags>`).
    ///
    /// All-zero trace or span ids are invalid per the W3C format.
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let span = parts.next()?;
        let flags = parts.next()?;
        if version != "00" || parts.next().is_some() {
            return None;
        }

        let mut trace_id = [0u8; 16];
        let mut span_id = [0u8; 8];
        decode_hex(trace, &mut trace_id)?;
        decode_hex(span, &mut span_id)?;
        let mut flag = [0u8; 1];
        decode_hex(flags, &mut flag)?;

        if trace_id == [0; 16] || span_id == [0; 8] {
            return None;
        }

        Some(Self {
            trace_id,
            span_id,
            flags: flag[0],
        })
    }

    /// Same trace, new span id.
    pub fn child(&self) -> Self {
        let mut span_id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut span_id);
        Self {
            trace_id: self.trace_id,
            span_id,
            flags: self.flags,
        }
    }

    pub fn traceparent(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            encode_hex(&self.trace_id),
            encode_hex(&self.span_id),
            self.flags
        )
    }
}

fn decode_hex(s: &str, out: &mut [u8]) -> Option<()> {
    if s.len() != out.len() * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(())
}

/// Lowercase hex, two digits per byte.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// The only path by which a credential reaches an outbound request.
///
/// One is built per MCP request and never shared between requests.
#[derive(Debug, Clone)]
pub struct Session {
    credential: String,
    cancel: CancellationToken,
    trace: TraceContext,
}

impl Session {
    pub fn new(credential: impl Into<String>, cancel: CancellationToken, trace: TraceContext) -> Self {
        Self {
            credential: credential.into(),
            cancel,
            trace,
        }
    }

    /// Build a session from what the transport saw on the wire.
    pub fn from_request(
        credential: Option<&str>,
        traceparent: Option<&str>,
        cancel: CancellationToken,
    ) -> Self {
        let trace = traceparent
            .and_then(TraceContext::parse)
            .unwrap_or_else(TraceContext::random);
        Self::new(credential.unwrap_or_default(), cancel, trace)
    }

    /// A session with no credential that is never cancelled by a caller.
    pub fn background() -> Self {
        Self::new("", CancellationToken::new(), TraceContext::random())
    }

    /// Empty when the process relies on its static credential.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traceparent_roundtrip() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let ctx = TraceContext::parse(header).unwrap();
        assert_eq!(ctx.flags, 1);
        assert_eq!(ctx.traceparent(), header);
    }

    #[test]
    fn test_traceparent_rejects() {
        assert!(TraceContext::parse("").is_none());
        assert!(TraceContext::parse("01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01").is_none());
        assert!(TraceContext::parse("00-00000000000000000000000000000000-00f067aa0ba902b7-01").is_none());
        assert!(TraceContext::parse("00-4bf92f3577b34da6-00f067aa0ba902b7-01").is_none());
        assert!(TraceContext::parse("00-4bf92f3577b34da6a3ce929d0e0e473g-00f067aa0ba902b7-01").is_none());
    }

    #[test]
    fn test_child_keeps_trace() {
        let root = TraceContext::random();
        let child = root.child();
        assert_eq!(root.trace_id, child.trace_id);
        assert_eq!(child.traceparent().len(), 55);
    }

    #[test]
    fn test_session_from_request() {
        let cancel = CancellationToken::new();
        let session = Session::from_request(
            Some("secret"),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
            cancel.clone(),
        );
        assert_eq!(session.credential(), "secret");
        assert_eq!(encode_hex(&session.trace().trace_id), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(!session.is_cancelled());
        cancel.cancel();
        assert!(session.is_cancelled());

        let session = Session::from_request(None, Some("garbage"), CancellationToken::new());
        assert_eq!(session.credential(), "");
        assert_ne!(session.trace().trace_id, [0; 16]);
    }

    #[test]
    fn test_encode_hex() {
        assert_eq!(encode_hex(&[]), "");
        assert_eq!(encode_hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}

//! Trace identity and propagated context.
//!
//! Identifiers follow the W3C Trace Context layout: a 128-bit trace id and a
//! 64-bit span id, both rendered as lowercase hex. Baggage is a flat
//! string map copied from parent to child when a span is created.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SpanError};

/// Key/value context inherited by every descendant span at creation time.
pub type Baggage = BTreeMap<String, String>;

/// 128-bit trace identifier shared by every span of one pipeline run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TraceId(u128);

impl TraceId {
    /// Generate a fresh random trace id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self)
    }
}

impl FromStr for TraceId {
    type Err = SpanError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 32 {
            return Err(SpanError::InvalidTraceparent(format!(
                "trace id must be 32 hex chars, got '{}'",
                s
            )));
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| SpanError::InvalidTraceparent(format!("trace id '{}': {}", s, e)))
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TraceId {
    type Error = SpanError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// 64-bit span identifier, unique within a tracker.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SpanId(u64);

impl SpanId {
    /// Generate a fresh random span id.
    ///
    /// The high half of a v4 UUID always carries the version nibble, so the
    /// result is never the invalid all-zero id.
    pub fn generate() -> Self {
        Self((Uuid::new_v4().as_u128() >> 64) as u64)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self)
    }
}

impl FromStr for SpanId {
    type Err = SpanError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 16 {
            return Err(SpanError::InvalidTraceparent(format!(
                "span id must be 16 hex chars, got '{}'",
                s
            )));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| SpanError::InvalidTraceparent(format!("span id '{}': {}", s, e)))
    }
}

impl From<SpanId> for String {
    fn from(id: SpanId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for SpanId {
    type Error = SpanError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Handle identifying one span inside one trace.
///
/// Handles are plain values: copying a handle never copies span state, which
/// stays owned by the tracker for the lifetime of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanRef {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanRef {
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self { trace_id, span_id }
    }
}

impl fmt::Display for SpanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}

/// Context received from (or handed to) a caller outside this process.
///
/// Used to parent a run's root span under an upstream span and to seed the
/// run's baggage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace the run should join
    pub trace_id: TraceId,
    /// Upstream span that becomes the root span's parent
    pub parent_span_id: SpanId,
    /// Whether the upstream sampled this trace
    #[serde(default = "default_sampled")]
    pub sampled: bool,
    /// Inherited baggage
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: Baggage,
}

fn default_sampled() -> bool {
    true
}

impl TraceContext {
    /// Parse a W3C `traceparent` header (`00-<trace>-<span>-<flags>`).
    pub fn from_traceparent(header: &str) -> Result<Self> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        if parts.len() != 4 {
            return Err(SpanError::InvalidTraceparent(format!(
                "expected 4 fields, got {}",
                parts.len()
            )));
        }
        if parts[0] != "00" {
            return Err(SpanError::InvalidTraceparent(format!(
                "unsupported version '{}'",
                parts[0]
            )));
        }

        let trace_id: TraceId = parts[1].parse()?;
        let parent_span_id: SpanId = parts[2].parse()?;
        if trace_id.as_u128() == 0 || parent_span_id.as_u64() == 0 {
            return Err(SpanError::InvalidTraceparent(
                "all-zero identifiers are invalid".to_string(),
            ));
        }
        let flags = u8::from_str_radix(parts[3], 16)
            .map_err(|e| SpanError::InvalidTraceparent(format!("flags '{}': {}", parts[3], e)))?;

        Ok(Self {
            trace_id,
            parent_span_id,
            sampled: flags & 0x01 == 0x01,
            baggage: Baggage::new(),
        })
    }

    /// Render the context as a W3C `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.parent_span_id, flags)
    }

    /// Attach baggage parsed from a `baggage` header.
    pub fn with_baggage_header(mut self, header: &str) -> Self {
        self.baggage.extend(decode_baggage(header));
        self
    }
}

/// Encode baggage as a W3C `baggage` header value.
pub fn encode_baggage(baggage: &Baggage) -> String {
    baggage
        .iter()
        .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode a W3C `baggage` header value.
///
/// Members without `=` and member properties (`;...`) are ignored.
pub fn decode_baggage(header: &str) -> Baggage {
    header
        .split(',')
        .filter_map(|member| {
            let member = member.split(';').next()?.trim();
            let (key, value) = member.split_once('=')?;
            let key = unescape(key.trim());
            if key.is_empty() {
                return None;
            }
            Some((key, unescape(value.trim())))
        })
        .collect()
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ',' | ';' | '=' | '%' | ' ' | '"' | '\\' => out.push_str(&format!("%{:02X}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_render_as_fixed_width_hex() {
        assert_eq!(TraceId::from(1u128).to_string().len(), 32);
        assert_eq!(SpanId::from(255u64).to_string(), "00000000000000ff");
    }

    #[test]
    fn test_generated_ids_are_nonzero() {
        for _ in 0..64 {
            assert_ne!(SpanId::generate().as_u64(), 0);
            assert_ne!(TraceId::generate().as_u128(), 0);
        }
    }

    #[test]
    fn test_traceparent_parse() {
        let ctx = TraceContext::from_traceparent(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .unwrap();
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.parent_span_id.to_string(), "00f067aa0ba902b7");
        assert!(ctx.sampled);
        assert_eq!(
            ctx.to_traceparent(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        );
    }

    #[test]
    fn test_traceparent_rejects_garbage() {
        assert!(TraceContext::from_traceparent("nonsense").is_err());
        assert!(TraceContext::from_traceparent(
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01"
        )
        .is_err());
        assert!(TraceContext::from_traceparent(
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        )
        .is_err());
    }

    #[test]
    fn test_baggage_header() {
        let baggage = decode_baggage("source_checksum=sha256%3Aabc, tenant = acme;prop=1, junk");
        assert_eq!(baggage.get("source_checksum").unwrap(), "sha256:abc");
        assert_eq!(baggage.get("tenant").unwrap(), "acme");
        assert_eq!(baggage.len(), 2);

        let mut out = Baggage::new();
        out.insert("k".to_string(), "a,b=c".to_string());
        assert_eq!(encode_baggage(&out), "k=a%2Cb%3Dc");
        assert_eq!(decode_baggage(&encode_baggage(&out)), out);
    }

    #[test]
    fn test_ids_serialize_as_hex_strings() {
        let span_ref = SpanRef::new(TraceId::from(1u128), SpanId::from(2u64));
        let json = serde_json::to_value(span_ref).unwrap();
        assert_eq!(json["span_id"], "0000000000000002");
    }
}

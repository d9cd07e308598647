//! Static logical-to-physical attribute key table.

use crate::schema::RecordKind;

/// Physical keys for one logical field.
///
/// `kind: None` entries apply to every record kind (envelope fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub kind: Option<RecordKind>,
    pub logical: &'static str,
    /// Original namespace key, absent for standardized-only fields
    pub legacy: Option<&'static str>,
    /// `gen_ai.*` key, absent for extension fields
    pub otel: Option<&'static str>,
}

const fn both(
    kind: Option<RecordKind>,
    logical: &'static str,
    otel: &'static str,
) -> FieldMapping {
    FieldMapping {
        kind,
        logical,
        legacy: Some(logical),
        otel: Some(otel),
    }
}

const fn otel_only(logical: &'static str) -> FieldMapping {
    FieldMapping {
        kind: None,
        logical,
        legacy: None,
        otel: Some(logical),
    }
}

pub const MAPPINGS: &[FieldMapping] = &[
    // Envelope / agent identity
    both(None, "agent.id", "gen_ai.agent.id"),
    both(None, "agent.name", "gen_ai.agent.name"),
    both(None, "agent.version", "gen_ai.agent.version"),
    both(None, "agent.session_id", "gen_ai.conversation.id"),
    // Handoffs are tool calls in the standardized vocabulary
    both(Some(RecordKind::Handoff), "handoff.id", "gen_ai.tool.call.id"),
    both(Some(RecordKind::Handoff), "handoff.capability_id", "gen_ai.tool.name"),
    both(
        Some(RecordKind::Handoff),
        "handoff.inputs",
        "gen_ai.tool.call.arguments",
    ),
    both(Some(RecordKind::Capability), "capability.id", "gen_ai.tool.name"),
    // No legacy equivalent
    otel_only("gen_ai.system"),
    otel_only("gen_ai.operation.name"),
    otel_only("gen_ai.request.model"),
];

/// Find the mapping for a logical field. Kind-specific entries win over
/// entries shared by all kinds.
pub fn lookup(kind: RecordKind, logical: &str) -> Option<&'static FieldMapping> {
    MAPPINGS
        .iter()
        .find(|m| m.kind == Some(kind) && m.logical == logical)
        .or_else(|| {
            MAPPINGS
                .iter()
                .find(|m| m.kind.is_none() && m.logical == logical)
        })
}

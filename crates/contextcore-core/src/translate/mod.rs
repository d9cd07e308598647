//! Dual-namespace attribute translation
//!
//! Records are built with logical field names. Before they reach a span the
//! translator maps them to physical keys: the original namespace
//! (`handoff.capability_id`), the standardized `gen_ai.*` namespace
//! (`gen_ai.tool.name`), or both during a migration window.

pub mod mapping;

use contextcore_span::Attributes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::CoreConfig;
use crate::schema::RecordKind;

pub use mapping::{lookup, FieldMapping, MAPPINGS};

/// Which physical namespaces to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitMode {
    /// Original namespace only
    Legacy,
    /// Standardized namespace only
    Otel,
    /// Both namespaces
    #[default]
    Dual,
}

impl EmitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitMode::Legacy => "legacy",
            EmitMode::Otel => "otel",
            EmitMode::Dual => "dual",
        }
    }

    pub fn emits_legacy(&self) -> bool {
        matches!(self, EmitMode::Legacy | EmitMode::Dual)
    }

    pub fn emits_otel(&self) -> bool {
        matches!(self, EmitMode::Otel | EmitMode::Dual)
    }
}

impl fmt::Display for EmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(EmitMode::Legacy),
            "otel" => Ok(EmitMode::Otel),
            "dual" => Ok(EmitMode::Dual),
            other => Err(format!(
                "unknown emit mode '{}', expected dual, legacy or otel",
                other
            )),
        }
    }
}

/// Stateless logical-to-physical attribute mapper.
///
/// The mode is fixed at construction; [`translate_with_mode`] overrides it
/// for a single call.
///
/// [`translate_with_mode`]: DualNamespaceTranslator::translate_with_mode
#[derive(Debug, Clone, Copy, Default)]
pub struct DualNamespaceTranslator {
    mode: EmitMode,
}

impl DualNamespaceTranslator {
    pub fn new(mode: EmitMode) -> Self {
        Self { mode }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.emit_mode)
    }

    pub fn mode(&self) -> EmitMode {
        self.mode
    }

    /// Translate with the configured mode.
    pub fn translate(&self, kind: RecordKind, logical: &Attributes) -> Attributes {
        self.translate_with_mode(kind, logical, self.mode)
    }

    /// Translate with an explicit mode.
    ///
    /// Unmapped fields (every `insight.*` and `guidance.*` field among them)
    /// pass through unchanged in all modes. Standardized-only fields appear
    /// only when supplied and only in `otel` or `dual` mode.
    pub fn translate_with_mode(
        &self,
        kind: RecordKind,
        logical: &Attributes,
        mode: EmitMode,
    ) -> Attributes {
        let mut physical = Attributes::new();

        for (key, value) in logical {
            for target in physical_keys(kind, key, mode) {
                physical.insert(target.to_string(), value.clone());
            }
        }

        tracing::debug!(
            record = kind.as_str(),
            mode = mode.as_str(),
            logical = logical.len(),
            physical = physical.len(),
            "Translated attributes"
        );
        physical
    }
}

/// Physical keys a logical field is emitted under in `mode`.
pub fn physical_keys<'a>(kind: RecordKind, logical: &'a str, mode: EmitMode) -> Vec<&'a str> {
    let Some(mapping) = lookup(kind, logical) else {
        return vec![logical];
    };

    match (mapping.legacy, mapping.otel) {
        (Some(legacy), Some(otel)) => {
            let mut keys = Vec::with_capacity(2);
            if mode.emits_legacy() {
                keys.push(legacy);
            }
            if mode.emits_otel() {
                keys.push(otel);
            }
            keys
        }
        (Some(legacy), None) => vec![legacy],
        (None, Some(otel)) if mode.emits_otel() => vec![otel],
        (None, Some(_)) => Vec::new(),
        (None, None) => vec![logical],
    }
}

use chrono::{DateTime, Utc};
use contextcore_span::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{insert_opt, timestamp, Record};
use crate::error::{CoreError, Result};
use crate::schema::{AttributeSchema, EvidenceType, RecordKind};

/// Reference to supporting data, embedded in an insight or capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Evidence {
    pub fn new(evidence_type: EvidenceType, reference: impl Into<String>) -> Self {
        Self {
            evidence_type,
            reference: reference.into(),
            description: None,
            query: None,
            timestamp: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Flatten under `<prefix>.type`, `<prefix>.ref`, ...
    pub fn attributes_with_prefix(&self, prefix: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(format!("{}.type", prefix), self.evidence_type.as_str().into());
        attrs.insert(format!("{}.ref", prefix), self.reference.as_str().into());
        insert_opt(
            &mut attrs,
            &format!("{}.description", prefix),
            self.description.as_deref(),
        );
        insert_opt(&mut attrs, &format!("{}.query", prefix), self.query.as_deref());
        insert_opt(
            &mut attrs,
            &format!("{}.timestamp", prefix),
            self.timestamp.as_ref().map(timestamp),
        );
        attrs
    }

    /// Flatten a list as `<prefix>.<i>.<field>` for i in 0..N.
    pub fn flatten_list(prefix: &str, items: &[Evidence]) -> Attributes {
        items
            .iter()
            .enumerate()
            .flat_map(|(i, e)| e.attributes_with_prefix(&format!("{}.{}", prefix, i)))
            .collect()
    }

    /// Rebuild a list flattened by [`Evidence::flatten_list`].
    pub fn collect_list(prefix: &str, attrs: &Attributes) -> Result<Vec<Evidence>> {
        let lead = format!("{}.", prefix);
        let mut grouped: BTreeMap<usize, Attributes> = BTreeMap::new();

        for (key, value) in attrs.range(lead.clone()..) {
            let Some(rest) = key.strip_prefix(&lead) else {
                break;
            };
            let Some((index, field)) = rest.split_once('.') else {
                continue;
            };
            let Ok(index) = index.parse::<usize>() else {
                continue;
            };
            grouped
                .entry(index)
                .or_default()
                .insert(format!("evidence.{}", field), value.clone());
        }

        grouped.into_values().map(|a| Evidence::from_attributes(&a)).collect()
    }

    fn from_attributes(attrs: &Attributes) -> Result<Self> {
        AttributeSchema::validate(RecordKind::Evidence, attrs)?;

        let text = |key: &str| attrs.get(key).and_then(AttributeValue::as_str);
        let evidence_type = text("evidence.type")
            .unwrap_or_default()
            .parse()
            .map_err(|e: String| CoreError::validation("evidence", "evidence.type", e))?;
        let timestamp = text("evidence.timestamp")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Self {
            evidence_type,
            reference: text("evidence.ref").unwrap_or_default().to_string(),
            description: text("evidence.description").map(str::to_string),
            query: text("evidence.query").map(str::to_string),
            timestamp,
        })
    }
}

impl Record for Evidence {
    fn kind(&self) -> RecordKind {
        RecordKind::Evidence
    }

    fn record_id(&self) -> &str {
        &self.reference
    }

    fn logical_attributes(&self) -> Attributes {
        self.attributes_with_prefix("evidence")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_and_collect() {
        let items = vec![
            Evidence::new(EvidenceType::Trace, "trace:4bf92f35").with_description("slow span"),
            Evidence::new(EvidenceType::LogQuery, "loki")
                .with_query("{app=\"checkout\"} |= \"timeout\""),
        ];

        let attrs = Evidence::flatten_list("insight.evidence", &items);
        assert_eq!(attrs["insight.evidence.0.type"].as_str(), Some("trace"));
        assert_eq!(attrs["insight.evidence.1.ref"].as_str(), Some("loki"));

        let rebuilt = Evidence::collect_list("insight.evidence", &attrs).unwrap();
        assert_eq!(rebuilt, items);
    }

    #[test]
    fn test_collect_ignores_unrelated_keys() {
        let mut attrs = Evidence::flatten_list("insight.evidence", &[Evidence::new(
            EvidenceType::Commit,
            "a1b2c3",
        )]);
        attrs.insert("insight.evidence_count".into(), 1i64.into());
        attrs.insert("insight.summary".into(), "x".into());

        let rebuilt = Evidence::collect_list("insight.evidence", &attrs).unwrap();
        assert_eq!(rebuilt.len(), 1);
    }

    #[test]
    fn test_empty_ref_invalid() {
        assert!(Evidence::new(EvidenceType::File, "").validate().is_err());
    }
}

use chrono::{DateTime, Utc};
use contextcore_span::Attributes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{insert_opt, new_id, timestamp, Record};
use crate::error::{CoreError, Result};
use crate::schema::{GuidanceType, Priority, RecordKind};

/// Human-to-agent direction.
///
/// Read-only to agents. Re-issuing guidance for the same scope replaces the
/// previous one (last write wins by `created_at`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guidance {
    pub id: String,
    #[serde(rename = "type")]
    pub guidance_type: GuidanceType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Path or `*`-suffixed pattern; absent means global
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Guidance {
    pub fn new(guidance_type: GuidanceType, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(CoreError::validation(
                "guidance",
                "guidance.content",
                "must be a non-empty string",
            ));
        }
        Ok(Self {
            id: new_id("gd"),
            guidance_type,
            content,
            priority: None,
            scope: None,
            expires_at: None,
            author: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scoped_to(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn created(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    /// Whether the guidance applies to `path`.
    ///
    /// A scope ending in `*` matches by prefix; any other scope matches the
    /// path itself and everything below it.
    pub fn applies_to(&self, path: &str) -> bool {
        match self.scope.as_deref() {
            None => true,
            Some(scope) => match scope.strip_suffix('*') {
                Some(prefix) => path.starts_with(prefix),
                None => {
                    path == scope
                        || path
                            .strip_prefix(scope.trim_end_matches('/'))
                            .is_some_and(|rest| rest.starts_with('/'))
                }
            },
        }
    }

    fn scope_key(&self) -> &str {
        self.scope.as_deref().unwrap_or("")
    }

    fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or(Priority::Medium)
    }
}

impl Record for Guidance {
    fn kind(&self) -> RecordKind {
        RecordKind::Guidance
    }

    fn record_id(&self) -> &str {
        &self.id
    }

    fn logical_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("guidance.id".into(), self.id.as_str().into());
        attrs.insert("guidance.type".into(), self.guidance_type.as_str().into());
        attrs.insert("guidance.content".into(), self.content.as_str().into());
        insert_opt(&mut attrs, "guidance.priority", self.priority.map(|p| p.as_str()));
        insert_opt(&mut attrs, "guidance.scope", self.scope.as_deref());
        insert_opt(
            &mut attrs,
            "guidance.expires_at",
            self.expires_at.as_ref().map(timestamp),
        );
        insert_opt(&mut attrs, "guidance.author", self.author.as_deref());
        attrs.insert("guidance.created_at".into(), timestamp(&self.created_at));
        attrs
    }
}

/// Guidance in effect for a run, one record per scope.
#[derive(Debug, Clone, Default)]
pub struct GuidanceSet {
    by_scope: HashMap<String, Guidance>,
}

impl GuidanceSet {
    /// Resolve an externally supplied set of records.
    ///
    /// Invalid records are rejected as a whole. For each scope the record
    /// with the latest `created_at` wins; ties keep the later record.
    pub fn load<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Guidance>,
    {
        let mut set = Self::default();
        for record in records {
            set.insert(record)?;
        }
        Ok(set)
    }

    /// Add one record, replacing an older one for the same scope.
    ///
    /// Returns `false` when an existing record for the scope is newer.
    pub fn insert(&mut self, guidance: Guidance) -> Result<bool> {
        guidance.validate()?;

        let key = guidance.scope_key().to_string();
        match self.by_scope.get(&key) {
            Some(current) if current.created_at > guidance.created_at => {
                tracing::debug!(
                    scope = %key,
                    kept = %current.id,
                    ignored = %guidance.id,
                    "Older guidance ignored"
                );
                Ok(false)
            }
            _ => {
                self.by_scope.insert(key, guidance);
                Ok(true)
            }
        }
    }

    pub fn get(&self, scope: Option<&str>) -> Option<&Guidance> {
        self.by_scope.get(scope.unwrap_or(""))
    }

    /// Unexpired guidance applicable to `path`, most urgent first.
    pub fn applicable(&self, path: &str, now: DateTime<Utc>) -> Vec<&Guidance> {
        let mut matches: Vec<&Guidance> = self
            .by_scope
            .values()
            .filter(|g| !g.is_expired(now) && g.applies_to(path))
            .collect();
        matches.sort_by(|a, b| {
            a.effective_priority()
                .rank()
                .cmp(&b.effective_priority().rank())
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        matches
    }

    pub fn len(&self) -> usize {
        self.by_scope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_scope.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn focus(content: &str) -> Guidance {
        Guidance::new(GuidanceType::Focus, content).unwrap()
    }

    #[test]
    fn test_scope_matching() {
        assert!(focus("x").applies_to("src/anything.rs"));

        let dir = focus("x").scoped_to("src/api");
        assert!(dir.applies_to("src/api"));
        assert!(dir.applies_to("src/api/routes.rs"));
        assert!(!dir.applies_to("src/apiary.rs"));

        let glob = focus("x").scoped_to("src/api*");
        assert!(glob.applies_to("src/apiary.rs"));
        assert!(!glob.applies_to("tests/api.rs"));
    }

    #[test]
    fn test_last_write_wins_per_scope() {
        let t0 = Utc::now();
        let old = focus("old").scoped_to("src/db").created(t0);
        let new = focus("new").scoped_to("src/db").created(t0 + Duration::seconds(1));

        // order of arrival does not matter
        let set = GuidanceSet::load(vec![new.clone(), old.clone()]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(Some("src/db")).unwrap().content, "new");

        let set = GuidanceSet::load(vec![old, new]).unwrap();
        assert_eq!(set.get(Some("src/db")).unwrap().content, "new");
    }

    #[test]
    fn test_applicable_ordering_and_expiry() {
        let now = Utc::now();
        let set = GuidanceSet::load(vec![
            focus("global").with_priority(Priority::Low),
            focus("critical api").scoped_to("src/api").with_priority(Priority::Critical),
            focus("expired").scoped_to("src/*").expiring_at(now - Duration::seconds(1)),
            focus("unrelated").scoped_to("docs"),
        ])
        .unwrap();

        let contents: Vec<_> = set
            .applicable("src/api/handler.rs", now)
            .into_iter()
            .map(|g| g.content.as_str())
            .collect();
        assert_eq!(contents, vec!["critical api", "global"]);
    }

    #[test]
    fn test_blank_content_rejected() {
        assert!(Guidance::new(GuidanceType::Constraint, "  ").is_err());
    }
}

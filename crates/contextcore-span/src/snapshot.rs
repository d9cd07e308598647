//! Serializable view of a whole trace.

use serde::{Deserialize, Serialize};

use crate::context::TraceId;
use crate::span::{Span, SpanStatus};

/// A span together with its children, in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanNode {
    #[serde(flatten)]
    pub span: Span,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SpanNode>,
}

impl SpanNode {
    /// Depth-first search by span name.
    pub fn find(&self, name: &str) -> Option<&SpanNode> {
        if self.span.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Number of spans in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(SpanNode::count).sum::<usize>()
    }
}

/// Point-in-time copy of one run's trace.
///
/// Always carries the full tree, even when the run failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSnapshot {
    pub trace_id: TraceId,
    /// True once a required stage closed with error
    pub run_failed: bool,
    pub root: SpanNode,
}

impl TraceSnapshot {
    /// A run succeeded when no required stage failed and the root closed
    /// without error.
    pub fn success(&self) -> bool {
        !self.run_failed && self.root.span.is_closed() && self.root.span.status != SpanStatus::Error
    }

    pub fn progress(&self) -> f64 {
        self.root.span.progress
    }

    pub fn find(&self, name: &str) -> Option<&SpanNode> {
        self.root.find(name)
    }

    pub fn span_count(&self) -> usize {
        self.root.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Baggage;
    use crate::span::Attributes;

    fn node(name: &str, children: Vec<SpanNode>) -> SpanNode {
        SpanNode {
            span: Span::new(TraceId::from(9u128), None, name, Attributes::new(), Baggage::new()),
            children,
        }
    }

    #[test]
    fn test_find_and_count() {
        let tree = node("run", vec![node("a", vec![node("a.1", vec![])]), node("b", vec![])]);
        assert_eq!(tree.count(), 4);
        assert!(tree.find("a.1").is_some());
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn test_open_root_is_not_success() {
        let snapshot = TraceSnapshot {
            trace_id: TraceId::from(9u128),
            run_failed: false,
            root: node("run", vec![]),
        };
        assert!(!snapshot.success());
        assert_eq!(snapshot.span_count(), 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"run_failed\":false"));
        assert!(json.contains("\"name\":\"run\""));
    }
}

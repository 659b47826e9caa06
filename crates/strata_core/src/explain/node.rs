use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use strata_error::{Result, ResultExt};

use super::explainable::ExplainEntry;

/// Explain output for a plan tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainNode {
    pub entry: ExplainEntry,
    pub children: Vec<ExplainNode>,
}

impl ExplainNode {
    pub fn new(entry: ExplainEntry, children: Vec<ExplainNode>) -> Self {
        ExplainNode { entry, children }
    }

    /// Render as one entry per line, children indented two spaces below
    /// their parent.
    pub fn format_text(&self) -> String {
        let mut buf = String::new();
        self.write_text(&mut buf, 0);
        buf
    }

    fn write_text(&self, buf: &mut String, depth: usize) {
        // Writing to a string can't fail.
        let _ = writeln!(buf, "{:indent$}{}", "", self.entry, indent = depth * 2);
        for child in &self.children {
            child.write_text(buf, depth + 1);
        }
    }

    pub fn format_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize explain output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ExplainNode {
        ExplainNode::new(
            ExplainEntry::new("Join").with_value("op", "="),
            vec![
                ExplainNode::new(ExplainEntry::new("FetchTable").with_value("table", "a"), vec![]),
                ExplainNode::new(ExplainEntry::new("FetchTable").with_value("table", "b"), vec![]),
            ],
        )
    }

    #[test]
    fn text_indents_children() {
        let expected = "Join (op = =)\n  FetchTable (table = a)\n  FetchTable (table = b)\n";
        assert_eq!(expected, tree().format_text());
    }

    #[test]
    fn json_round_trips() {
        let json = tree().format_json().unwrap();
        let parsed: ExplainNode = serde_json::from_str(&json).unwrap();
        assert_eq!(tree(), parsed);
    }
}

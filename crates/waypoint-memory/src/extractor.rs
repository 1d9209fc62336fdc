use crate::types::MemoryScope;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedItem {
    pub kind: String,
    pub content: String,
    pub confidence: f64,
    pub scope: MemoryScope,
}

/// Parses raw synthesis/task text into typed candidate memory items, one
/// per non-empty line. Lines carrying an explicit marker (`decision:`,
/// `constraint:`, `todo:`) are tagged with that kind and a higher
/// confidence; everything else is a generic `fact`.
///
/// Scope assignment: `decision`/`constraint` go to session scope, since
/// they remain relevant to later runs in the same session; `fact`/`todo`
/// stay run-scoped. The spec defines the scoring function for retrieval
/// but leaves the extractor's scope assignment to the implementation — this
/// is the interpretation used here: narrower tiers for transient items,
/// broader ones for durable ones.
pub struct MemoryExtractor;

impl MemoryExtractor {
    pub fn extract(content: &str) -> Vec<ExtractedItem> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Self::classify_line)
            .collect()
    }

    fn classify_line(line: &str) -> ExtractedItem {
        let line = line.trim_start_matches(['-', '*', '•']).trim();
        for (marker, kind, confidence, scope) in [
            ("decision:", "decision", 0.85, MemoryScope::Session),
            ("constraint:", "constraint", 0.85, MemoryScope::Session),
            ("todo:", "todo", 0.6, MemoryScope::Run),
        ] {
            if let Some(rest) = strip_marker(line, marker) {
                return ExtractedItem {
                    kind: kind.to_string(),
                    content: rest,
                    confidence,
                    scope,
                };
            }
        }
        ExtractedItem {
            kind: "fact".to_string(),
            content: line.to_string(),
            confidence: 0.6,
            scope: MemoryScope::Run,
        }
    }
}

fn strip_marker(line: &str, marker: &str) -> Option<String> {
    let lower = line.to_lowercase();
    if lower.starts_with(marker) {
        Some(line[marker.len()..].trim().to_string())
    } else {
        None
    }
}

//! Collect the keyword list to embed from ledger markers.

use std::collections::HashSet;

use hnkw_ledger::ProcessedMarker;

/// Distinct keywords across `markers`, in first-seen order.
///
/// Keywords are trimmed and empty ones dropped. Case is kept: the store keys
/// are exact-match, so "LLM" and "llm" are different keywords.
pub fn collect_keywords<'a>(markers: impl IntoIterator<Item = &'a ProcessedMarker>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for marker in markers {
        for keyword in marker.keywords() {
            let keyword = keyword.trim();
            if !keyword.is_empty() && seen.insert(keyword) {
                keywords.push(keyword.to_string());
            }
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(id: &str, llm: &[&str], dev: &[&str]) -> ProcessedMarker {
        ProcessedMarker::new(
            id,
            llm.iter().map(|s| s.to_string()).collect(),
            dev.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_collect_orders_and_dedups() {
        let markers = vec![
            marker("1", &["ai", "rag"], &["rust"]),
            marker("2", &["ai"], &["python", "rust"]),
        ];
        assert_eq!(
            collect_keywords(&markers),
            vec!["ai", "rag", "rust", "python"]
        );
    }

    #[test]
    fn test_collect_trims_and_keeps_case() {
        let markers = vec![marker("1", &[" LLM ", "", "llm", "   "], &[])];
        assert_eq!(collect_keywords(&markers), vec!["LLM", "llm"]);
    }
}

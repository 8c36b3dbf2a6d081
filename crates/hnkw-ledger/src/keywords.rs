//! Keyword list column format.
//!
//! Keyword columns hold a JSON array of strings, e.g. `["rust","llm"]`.
//! Empty and `null` fields mean "no keywords".

use crate::ledger::LedgerError;

/// Parse a serialized keyword list.
///
/// Empty, whitespace-only and `null` fields yield an empty list.
pub fn parse_keyword_list(raw: &str) -> Result<Vec<String>, LedgerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Serialize a keyword list for a ledger column.
pub fn encode_keyword_list(keywords: &[String]) -> Result<String, LedgerError> {
    Ok(serde_json::to_string(keywords)?)
}

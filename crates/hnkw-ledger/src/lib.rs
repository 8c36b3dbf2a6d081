//! Append-only completion ledger.
//!
//! The ledger is the checkpoint of the keyword-extraction stage: one CSV row
//! per story that has been processed successfully. A fresh run rebuilds its
//! resume point purely from the rows already on disk.
//!
//! - **Types**: `ProcessedMarker`, the row written for each completed story
//! - **Keywords**: the JSON list-of-strings format used in keyword columns
//! - **Ledger**: creation, header validation, reading and durable appends
//!
//! # Usage
//!
//! ```rust,no_run
//! use hnkw_ledger::{Ledger, ProcessedMarker};
//!
//! let mut ledger = Ledger::open("data/keywords.csv").unwrap();
//! let done = ledger.completed_ids().unwrap();
//!
//! if !done.contains("8863") {
//!     ledger
//!         .append(&ProcessedMarker::new("8863", vec!["llm".into()], vec!["rust".into()]))
//!         .unwrap();
//! }
//! ```

pub mod keywords;
pub mod ledger;
pub mod types;

pub use keywords::{encode_keyword_list, parse_keyword_list};
pub use ledger::{LEDGER_HEADER, Ledger, LedgerError, read_markers_at};
pub use types::ProcessedMarker;

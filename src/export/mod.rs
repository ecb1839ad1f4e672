//! Record export.
//!
//! Flat views of stored records for downstream tooling: JSON Lines for
//! programmatic processing and CSV for spreadsheets.

mod csv;
mod jsonl;

pub use csv::to_csv;
pub use jsonl::to_jsonl;

//! JSONL export.
//!
//! One complete JSON object per line; ideal for piping to `jq` or loading
//! into a document store.

use std::io::Write;

use crate::errors::Result;
use crate::store::Record;

/// Writes the records to `writer` as JSON Lines.
pub fn to_jsonl<W: Write>(records: &[Record], mut writer: W) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

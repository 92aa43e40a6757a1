use anyhow::Result;

use crate::record::Record;

pub mod combined;

/// A line-level log parser. The vhost is ingestion context (the name of the
/// folder the file came from) and is attached here, never read from the line.
pub trait LogParser {
    fn parse(&self, vhost: &str, line: &str) -> Result<Record>;
}

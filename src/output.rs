use std::fs;
use std::path::Path;

use log::info;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::errors::{Error, Result};
use crate::types::BibEntry;

/// File name used when the output is persisted instead of printed.
pub const OUTPUT_FILENAME: &str = "parsed_bibtex.json";

/// JSON array of all entries, indented by four spaces.
pub fn to_json(entries: &[BibEntry]) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    entries.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

pub fn save_json<P: AsRef<Path>>(path: P, entries: &[BibEntry]) -> Result<()> {
    let path = path.as_ref();
    let json = to_json(entries)?;
    fs::write(path, json).map_err(|source| Error::Output {
        path: path.to_path_buf(),
        source,
    })?;
    info!("saved {} entries to {}", entries.len(), path.display());
    Ok(())
}

/// One block per entry as produced by `Display for BibEntry`, separated by blank lines.
pub fn render_human(entries: &[BibEntry]) -> String {
    entries
        .iter()
        .map(BibEntry::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

/// Keys that the JSON rendering of an entry uses for itself.
pub const RESERVED_NAMES: [&str; 3] = ["entry_type", "citation_key", "resolved_doi_url"];

/// One entry in a `.bib` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BibEntry {
    /// entry type, lowercased, e.g. “article”
    pub entry_type: String,
    /// citation key, e.g. “DBLP:books/lib/Knuth97”
    pub citation_key: String,
    /// fields in source order, e.g. “author” mapped to “Donald Ervin Knuth”
    #[serde(flatten)]
    pub fields: IndexMap<String, String>,
    /// landing page the `doi` field redirected to, if it was resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_doi_url: Option<String>,
}

impl BibEntry {
    /// Generate a new, empty instance of BibEntry. Can also be called through the `Default` implementation.
    pub fn new() -> BibEntry {
        BibEntry {
            entry_type: String::new(),
            citation_key: String::new(),
            fields: IndexMap::new(),
            resolved_doi_url: None,
        }
    }

    /// Field value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(value) => Some(value.as_str()),
            None => self.fields.get(&name.to_lowercase()).map(String::as_str),
        }
    }

    pub fn doi(&self) -> Option<&str> {
        self.get("doi").map(str::trim).filter(|doi| !doi.is_empty())
    }

    /// Reduce the whitespace according to free form semantics
    /// common in markup languages. Whitespace sequences including
    /// line breaks are merged into one space. For example,
    /// “a message.  \nBest  regards” becomes “a message. Best regards”.
    pub fn reduce_whitespace(src: &str) -> String {
        let mut result = String::with_capacity(src.len());
        let mut was_whitespace = false;
        for chr in src.chars() {
            if chr.is_whitespace() {
                if !was_whitespace {
                    result.push(' ');
                }
                was_whitespace = true;
            } else {
                result.push(chr);
                was_whitespace = false;
            }
        }
        result
    }
}

impl Default for BibEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BibEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "type = {}", self.entry_type)?;
        writeln!(f, "id = {}", self.citation_key)?;
        for (name, data) in self.fields.iter() {
            writeln!(f, "\t{}\t= {}", name, Self::reduce_whitespace(data))?;
        }
        if let Some(url) = &self.resolved_doi_url {
            writeln!(f, "\tresolved DOI URL\t= {}", url)?;
        }
        Ok(())
    }
}

//! This crate turns `.bib` files into structured records and optionally
//! resolves their DOIs to the landing pages they redirect to.
//!
//! `.bib` files are popular in reference management since many resources
//! allow to export metadata in a BibTeχ file. One entry in such a file
//! can look like this:
//!
//! ```tex
//! @book{DBLP:books/aw/Knuth73a,
//!     author    = {Donald E. Knuth},
//!     title     = {The Art of Computer Programming, Volume {I:} Fundamental Algorithms,
//!                  2nd Edition},
//!     publisher = {Addison-Wesley},
//!     year      = 1973,
//!     url       = {https://www.worldcat.org/oclc/310903895},
//!     isbn      = "0201038218",
//!  }
//! ```
//!
//! In this example, we call `book` the `entry_type` and `DBLP:books/aw/Knuth73a`
//! the `citation_key`. Then we have a sequence of fields with a name (like `year`)
//! and a value (like `1973`). Values are brace delimited, quote delimited or bare.
//!
//! Parsing happens in two steps. The [`Splitter`] finds the top-level
//! entries by tracking brace depth, the [`extract`] function reads the
//! header and the fields of one entry. `@comment`, `@preamble` and
//! `@string` blocks are skipped. An entry that cannot be parsed is
//! reported and dropped, a field that cannot be parsed is reported and
//! dropped from its entry; neither stops the rest of the file.
//!
//! ```rust
//! use bibdoi::Parser;
//! use std::str::FromStr;
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     //let p = Parser::from_file("source.bib")?;
//!     let p = Parser::from_str(r#"@book{tolkien1937, author = {J. R. R. Tolkien}}"#)?;
//!     for result in p.iter() {
//!         let entry = result?;
//!         println!("type = {}", entry.entry_type);
//!         println!("id = {}", entry.citation_key);
//!         for (name, data) in entry.fields.iter() {
//!             println!("\t{}\t= {}", name, data);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! DOI resolution is a separate, best-effort pass, see [`DoiResolver`] and [`enrich`].

pub mod errors;
mod extractor;
pub mod output;
mod parser;
mod resolver;
mod splitter;
mod types;

pub use crate::errors::{Error, Result};
pub use crate::extractor::{extract, Extracted};
pub use crate::parser::{BibEntries, Bibliography, Parser};
pub use crate::resolver::{
    enrich, normalize_doi, DoiResolver, EnrichmentSummary, Resolve, ResolverConfig, MAX_RETRIES,
};
pub use crate::splitter::{EntrySpan, SpanIterator, Splitter};
pub use crate::types::BibEntry;

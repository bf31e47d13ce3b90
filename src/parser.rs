use std::convert::Infallible;
use std::path;
use std::str;

use log::{info, warn};
use rayon::prelude::*;

use crate::errors::{Error, FileAccessError, MalformedEntry, MalformedField};
use crate::extractor;
use crate::splitter;
use crate::types;

/// Parser parsing a `.bib` file allowing iteration over `BibEntry` instances
pub struct Parser {
    pub(crate) splitter: splitter::Splitter,
}

impl Parser {
    /// Use a file at some filepath as source for the parsing process.
    pub fn from_file<P: AsRef<path::Path>>(path: P) -> Result<Parser, FileAccessError> {
        let splitter = splitter::Splitter::from_file(path)?;
        Ok(Parser { splitter })
    }

    /// Use a string as source for the parsing process.
    pub fn from_string(data: String) -> Parser {
        Parser {
            splitter: splitter::Splitter::from_string(data),
        }
    }

    pub fn iter(&self) -> BibEntries<'_> {
        BibEntries {
            iter: self.splitter.iter(),
            field_errors: Vec::new(),
        }
    }

    /// Parse all entries in document order. Malformed entries and fields
    /// are logged, counted and skipped.
    pub fn parse(&self) -> Bibliography {
        let mut bibliography = Bibliography::default();
        for span in self.splitter.iter() {
            bibliography.push(span.and_then(|span| extractor::extract(&span)));
        }
        bibliography.summarize();
        bibliography
    }

    /// Like `parse`, but extracts the entries on the rayon thread pool.
    /// The result is still in document order.
    pub fn parse_parallel(&self) -> Bibliography {
        let spans: Vec<_> = self.splitter.iter().collect();
        let results: Vec<_> = spans
            .into_par_iter()
            .map(|span| span.and_then(|span| extractor::extract(&span)))
            .collect();

        let mut bibliography = Bibliography::default();
        for result in results {
            bibliography.push(result);
        }
        bibliography.summarize();
        bibliography
    }
}

impl str::FromStr for Parser {
    type Err = Infallible;

    /// Use a string as source for the parsing process.
    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(Parser::from_string(data.to_string()))
    }
}

/// Outcome of parsing an entire document.
#[derive(Debug, Default)]
pub struct Bibliography {
    pub entries: Vec<types::BibEntry>,
    pub skipped_entries: Vec<MalformedEntry>,
    pub skipped_fields: Vec<MalformedField>,
}

impl Bibliography {
    fn push(&mut self, result: Result<extractor::Extracted, MalformedEntry>) {
        match result {
            Ok(extracted) => {
                for err in extracted.field_errors {
                    warn!("skipping field: {}", err);
                    self.skipped_fields.push(err);
                }
                self.entries.push(extracted.entry);
            }
            Err(err) => {
                warn!("skipping entry: {}", err);
                self.skipped_entries.push(err);
            }
        }
    }

    fn summarize(&self) {
        info!(
            "{} entries parsed, {} entries skipped, {} fields skipped",
            self.entries.len(),
            self.skipped_entries.len(),
            self.skipped_fields.len()
        );
    }
}

/// A stateful iterator yielding one BibEntry instance after another
pub struct BibEntries<'i> {
    pub(crate) iter: splitter::SpanIterator<'i>,
    pub(crate) field_errors: Vec<MalformedField>,
}

impl<'i> BibEntries<'i> {
    /// Fields skipped in the entries yielded so far.
    pub fn field_errors(&self) -> &[MalformedField] {
        &self.field_errors
    }
}

impl<'i> Iterator for BibEntries<'i> {
    type Item = Result<types::BibEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let span = match self.iter.next()? {
            Ok(span) => span,
            Err(err) => return Some(Err(err.into())),
        };
        match extractor::extract(&span) {
            Ok(extracted) => {
                for err in extracted.field_errors.iter() {
                    warn!("skipping field: {}", err);
                }
                self.field_errors.extend(extracted.field_errors);
                Some(Ok(extracted.entry))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EntryFault, FieldFault};
    use std::error;
    use std::str::FromStr;

    #[test]
    fn test_tolkien() -> Result<(), Box<dyn error::Error>> {
        let p = Parser::from_str("@book{tolkien1937, author = {J. R. R. Tolkien}}")?;
        let mut count = 0;
        for e in p.iter() {
            let entry = e?;
            assert_eq!(entry.entry_type, "book");
            assert_eq!(entry.citation_key, "tolkien1937");
            assert_eq!(entry.get("author"), Some("J. R. R. Tolkien"));
            count += 1;
        }
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn test_taocp() -> Result<(), Box<dyn error::Error>> {
        let src = r#"@book{DBLP:books/lib/Knuth97,
  author    = {Donald Ervin Knuth},
  title     = {The art of computer programming, Volume {I:} Fundamental Algorithms,
               3rd Edition},
  publisher = {Addison-Wesley},
  year      = {1997},
  url       = {https://www.worldcat.org/oclc/312910844},
  isbn      = {0201896834},
  timestamp = {Fri, 17 Jul 2020 16:12:39 +0200},
  biburl    = {https://dblp.org/rec/books/lib/Knuth97.bib},
  bibsource = {{dblp computer science bibliography}, https://dblp.org}
}"#;
        let p = Parser::from_str(src)?;
        let mut iter = p.iter();
        let entry = iter.next().ok_or("no entry")??;
        assert_eq!(entry.entry_type, "book");
        assert_eq!(entry.citation_key, "DBLP:books/lib/Knuth97");
        assert_eq!(entry.get("year"), Some("1997"));
        assert_eq!(
            entry.get("bibsource"),
            Some("{dblp computer science bibliography}, https://dblp.org")
        );
        let names: Vec<_> = entry.fields.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["author", "title", "publisher", "year", "url", "isbn", "timestamp", "biburl", "bibsource"]
        );
        assert!(iter.next().is_none());
        Ok(())
    }

    #[test]
    fn test_entries_in_source_order() -> Result<(), Box<dyn error::Error>> {
        let src: String = (0..25)
            .map(|i| format!("@misc{{key{i},\n  title = {{Title {{{i}}}}},\n  year = {i}\n}}\n\n"))
            .collect();
        let p = Parser::from_str(&src)?;
        let bib = p.parse();
        assert_eq!(bib.entries.len(), 25);
        assert!(bib.skipped_entries.is_empty());
        for (i, entry) in bib.entries.iter().enumerate() {
            assert_eq!(entry.citation_key, format!("key{i}"));
            assert_eq!(entry.get("title"), Some(format!("Title {{{i}}}").as_str()));
        }
        Ok(())
    }

    #[test]
    fn test_malformed_trailing_entry() -> Result<(), Box<dyn error::Error>> {
        let src = "@comment{generated}\n@article{a, title = {One}}\n@article{b, title = {Two}}\n@article{c, title = {Thr";
        let bib = Parser::from_str(src)?.parse();
        let keys: Vec<_> = bib.entries.iter().map(|e| e.citation_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(bib.skipped_entries.len(), 1);
        assert_eq!(bib.skipped_entries[0].fault, EntryFault::Unterminated);
        assert_eq!(bib.skipped_entries[0].location.lineno, 3);
        Ok(())
    }

    #[test]
    fn test_bad_header_skips_only_that_entry() -> Result<(), Box<dyn error::Error>> {
        let src = "@article{title = {No key}}\n@article{ok, title = {Fine}}";
        let p = Parser::from_str(src)?;
        let results: Vec<_> = p.iter().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[0],
            Err(Error::MalformedEntry(e)) if e.fault == EntryFault::MissingComma
        ));
        assert!(matches!(&results[1], Ok(e) if e.citation_key == "ok"));
        Ok(())
    }

    #[test]
    fn test_brace_inside_quoted_title_keeps_later_fields() -> Result<(), Box<dyn error::Error>> {
        let bib = Parser::from_str("@misc{k, title = \"a } b\", year = 2020}\n@misc{n, note = {x}}")?.parse();
        assert_eq!(bib.entries.len(), 2);
        assert_eq!(bib.entries[0].get("title"), Some("a } b"));
        assert_eq!(bib.entries[0].get("year"), Some("2020"));
        assert!(bib.skipped_entries.is_empty());
        assert!(bib.skipped_fields.is_empty());
        Ok(())
    }

    #[test]
    fn test_parenthesized_entry_is_counted_as_skipped() -> Result<(), Box<dyn error::Error>> {
        let bib = Parser::from_str("@article(p, title = {P})\n@misc{ok, note = {x}}")?.parse();
        let keys: Vec<_> = bib.entries.iter().map(|e| e.citation_key.as_str()).collect();
        assert_eq!(keys, vec!["ok"]);
        assert_eq!(bib.skipped_entries.len(), 1);
        assert_eq!(bib.skipped_entries[0].fault, EntryFault::Parenthesized);
        Ok(())
    }

    #[test]
    fn test_field_errors_are_collected() -> Result<(), Box<dyn error::Error>> {
        let p = Parser::from_str("@misc{a, title}\n@misc{b, note = {x}, note = {y}}")?;
        let mut iter = p.iter();
        let entries: Vec<_> = iter.by_ref().collect::<Result<_, _>>()?;
        assert_eq!(entries.len(), 2);
        let faults: Vec<_> = iter.field_errors().iter().map(|e| e.fault.clone()).collect();
        assert_eq!(faults, vec![FieldFault::MissingAssign, FieldFault::Duplicate]);

        let bib = p.parse();
        assert_eq!(bib.skipped_fields.len(), 2);
        assert_eq!(bib.entries[1].get("note"), Some("x"));
        Ok(())
    }

    #[test]
    fn test_parallel_matches_sequential() -> Result<(), Box<dyn error::Error>> {
        let src: String = (0..200)
            .map(|i| {
                if i % 17 == 0 {
                    format!("@misc{{broken{i} title = {{x}}}}\n")
                } else {
                    format!("@misc{{k{i}, n = \"{i}\", bad}}\n")
                }
            })
            .collect();
        let p = Parser::from_str(&src)?;
        let sequential = p.parse();
        let parallel = p.parse_parallel();
        assert_eq!(sequential.entries, parallel.entries);
        assert_eq!(sequential.skipped_entries, parallel.skipped_entries);
        assert_eq!(sequential.skipped_fields, parallel.skipped_fields);
        assert_eq!(sequential.skipped_entries.len(), 12);
        assert_eq!(sequential.entries.len(), 188);
        Ok(())
    }
}

use std::convert::Infallible;
use std::fs;
use std::io;
use std::path;
use std::str;

use log::{debug, info, warn};

use crate::errors::{EntryFault, FileAccessError, Location, MalformedEntry};

/// `@`-blocks which are brace-matched like entries but carry no record.
const SKIPPED_KINDS: [&str; 3] = ["comment", "preamble", "string"];

/// The source text of one top-level entry. Remember, that a bib file
/// entry looks as follows:
///
/// ```tex
/// @Book{works:4,
///   author     = {Shakespeare, William},
///   title      = {Sonnets},
/// }
/// ```
///
/// In this case, `text` runs from the `@` up to and including the final
/// `}`, `kind` is “Book” and `location` points at the `@`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntrySpan<'s> {
    pub text: &'s str,
    pub kind: &'s str,
    pub location: Location,
}

impl<'s> EntrySpan<'s> {
    /// Wrap a standalone piece of text, e.g. to feed the extractor directly.
    pub fn new(text: &'s str) -> EntrySpan<'s> {
        let kind = text
            .trim_start()
            .strip_prefix('@')
            .and_then(|rest| rest.split('{').next())
            .map(str::trim)
            .unwrap_or("");
        EntrySpan {
            text,
            kind,
            location: Location::default(),
        }
    }
}

#[derive(Clone, Copy)]
struct Mark {
    offset: usize,
    location: Location,
}

#[derive(Clone, Copy)]
enum SplitState {
    Outside,
    ReadingType {
        at: Mark,
    },
    WaitForOpen {
        at: Mark,
        kind_end: usize,
    },
    InBody {
        at: Mark,
        kind_end: usize,
        open: Mark,
        depth: usize,
    },
    /// inside a `"..."` field value, which always sits at entry depth 1
    InQuoted {
        at: Mark,
        kind_end: usize,
        open: Mark,
        braces: usize,
    },
}

pub(crate) fn is_kind_char(chr: char) -> bool {
    chr.is_alphanumeric() || matches!(chr, '_' | '-' | ':')
}

fn kind_of(src: &str, at: Mark, kind_end: usize) -> &str {
    src[at.offset + 1..kind_end].trim()
}

fn is_skipped(kind: &str) -> bool {
    SKIPPED_KINDS.iter().any(|k| k.eq_ignore_ascii_case(kind))
}

/// `@comment` bodies are free text, quotes in them delimit nothing.
fn tracks_quotes(kind: &str) -> bool {
    !kind.eq_ignore_ascii_case("comment")
}

fn parenthesized(at: Mark, kind: &str) -> Option<MalformedEntry> {
    if is_skipped(kind) {
        debug!("ignoring parenthesized @{} block at {}", kind, at.location);
        return None;
    }
    debug!("@{} at {} is delimited by parentheses", kind, at.location);
    Some(MalformedEntry {
        fault: EntryFault::Parenthesized,
        location: at.location,
        kind: Some(kind.to_string()),
    })
}

/// Yields one `EntrySpan` after another. Unterminated entries are
/// reported once and then scanning resumes right after their opening brace.
pub struct SpanIterator<'s> {
    src: &'s str,
    offset: usize,
    location: Location,
}

impl<'s> Iterator for SpanIterator<'s> {
    type Item = Result<EntrySpan<'s>, MalformedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let src = self.src;
        loop {
            let base = self.offset;
            let mut state = SplitState::Outside;

            for (rel, chr) in src[base..].char_indices() {
                let here = Mark {
                    offset: base + rel,
                    location: self.location,
                };
                self.offset = here.offset + chr.len_utf8();
                if chr == '\n' {
                    self.location.lineno += 1;
                    self.location.colno = 0;
                } else {
                    self.location.colno += 1;
                }

                state = match state {
                    SplitState::Outside if chr == '@' => SplitState::ReadingType { at: here },
                    SplitState::Outside => SplitState::Outside,
                    SplitState::ReadingType { at } => {
                        let empty = kind_of(src, at, here.offset).is_empty();
                        if is_kind_char(chr) {
                            SplitState::ReadingType { at }
                        } else if chr.is_whitespace() && empty {
                            SplitState::ReadingType { at }
                        } else if chr.is_whitespace() {
                            SplitState::WaitForOpen {
                                at,
                                kind_end: here.offset,
                            }
                        } else if chr == '{' && !empty {
                            SplitState::InBody {
                                at,
                                kind_end: here.offset,
                                open: here,
                                depth: 1,
                            }
                        } else if chr == '(' && !empty {
                            if let Some(err) = parenthesized(at, kind_of(src, at, here.offset)) {
                                return Some(Err(err));
                            }
                            SplitState::Outside
                        } else if chr == '@' {
                            SplitState::ReadingType { at: here }
                        } else {
                            debug!("ignoring '@' at {} not starting an entry", at.location);
                            SplitState::Outside
                        }
                    }
                    SplitState::WaitForOpen { at, kind_end } => {
                        if chr.is_whitespace() {
                            SplitState::WaitForOpen { at, kind_end }
                        } else if chr == '{' {
                            SplitState::InBody {
                                at,
                                kind_end,
                                open: here,
                                depth: 1,
                            }
                        } else if chr == '(' {
                            if let Some(err) = parenthesized(at, kind_of(src, at, kind_end)) {
                                return Some(Err(err));
                            }
                            SplitState::Outside
                        } else if chr == '@' {
                            SplitState::ReadingType { at: here }
                        } else {
                            debug!("ignoring '@' at {} not starting an entry", at.location);
                            SplitState::Outside
                        }
                    }
                    SplitState::InBody {
                        at,
                        kind_end,
                        open,
                        depth,
                    } => match chr {
                        '{' => SplitState::InBody {
                            at,
                            kind_end,
                            open,
                            depth: depth + 1,
                        },
                        '}' if depth == 1 => {
                            let kind = kind_of(src, at, kind_end);
                            if !is_skipped(kind) {
                                return Some(Ok(EntrySpan {
                                    text: &src[at.offset..self.offset],
                                    kind,
                                    location: at.location,
                                }));
                            }
                            debug!("skipping @{} block at {}", kind, at.location);
                            SplitState::Outside
                        }
                        '}' => SplitState::InBody {
                            at,
                            kind_end,
                            open,
                            depth: depth - 1,
                        },
                        '"' if depth == 1 && tracks_quotes(kind_of(src, at, kind_end)) => {
                            SplitState::InQuoted {
                                at,
                                kind_end,
                                open,
                                braces: 0,
                            }
                        }
                        _ => state,
                    },
                    // same rules as the extractor: a quote nested in braces
                    // does not close, a stray '}' does not close the entry
                    SplitState::InQuoted {
                        at,
                        kind_end,
                        open,
                        braces,
                    } => match chr {
                        '{' => SplitState::InQuoted {
                            at,
                            kind_end,
                            open,
                            braces: braces + 1,
                        },
                        '}' => SplitState::InQuoted {
                            at,
                            kind_end,
                            open,
                            braces: braces.saturating_sub(1),
                        },
                        '"' if braces == 0 => SplitState::InBody {
                            at,
                            kind_end,
                            open,
                            depth: 1,
                        },
                        _ => state,
                    },
                };
            }

            if let SplitState::InBody {
                at, kind_end, open, ..
            }
            | SplitState::InQuoted {
                at, kind_end, open, ..
            } = state
            {
                // resume right after the opening brace of the broken entry
                self.offset = open.offset + 1;
                self.location = Location {
                    lineno: open.location.lineno,
                    colno: open.location.colno + 1,
                };
                let kind = kind_of(src, at, kind_end);
                if is_skipped(kind) {
                    debug!("unterminated @{} block at {}", kind, at.location);
                    continue;
                }
                return Some(Err(MalformedEntry {
                    fault: EntryFault::Unterminated,
                    location: at.location,
                    kind: Some(kind.to_string()),
                }));
            }
            return None;
        }
    }
}

/// Owns the content of a `.bib` file and splits it into entry spans.
#[derive(Clone, Debug)]
pub struct Splitter {
    src: String,
}

impl Splitter {
    /// Use a file stored at a `path` as source for the splitting process.
    pub fn from_file<P: AsRef<path::Path>>(path: P) -> Result<Splitter, FileAccessError> {
        let path = path.as_ref();
        info!("reading {}", path.display());

        let metadata = fs::metadata(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => FileAccessError::NotFound(path.to_path_buf()),
            _ => FileAccessError::Unreadable {
                path: path.to_path_buf(),
                source,
            },
        })?;
        if !metadata.is_file() {
            return Err(FileAccessError::NotAFile(path.to_path_buf()));
        }
        let is_bib = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("bib"));
        if !is_bib {
            warn!("{} does not have a .bib extension", path.display());
        }

        let mut src = fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::InvalidData => FileAccessError::NotUtf8(path.to_path_buf()),
            _ => FileAccessError::Unreadable {
                path: path.to_path_buf(),
                source,
            },
        })?;
        if src.starts_with('\u{feff}') {
            src.drain(..'\u{feff}'.len_utf8());
        }
        if src.trim().is_empty() {
            warn!("the file {} is empty", path.display());
        }
        Ok(Splitter { src })
    }

    /// Use a string as source for the splitting process.
    pub fn from_string(data: String) -> Splitter {
        Splitter { src: data }
    }

    /// Start a fresh pass over the source. Every call starts at the beginning.
    pub fn iter(&self) -> SpanIterator<'_> {
        SpanIterator {
            src: &self.src,
            offset: 0,
            location: Location::default(),
        }
    }
}

impl str::FromStr for Splitter {
    type Err = Infallible;

    /// Use a string as source for the splitting process.
    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(Splitter {
            src: data.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error;
    use std::str::FromStr;

    fn texts(s: &Splitter) -> Vec<Result<&str, MalformedEntry>> {
        s.iter().map(|r| r.map(|span| span.text)).collect()
    }

    #[test]
    fn test_tolkien() -> Result<(), Box<dyn error::Error>> {
        let s = Splitter::from_str("@book{tolkien1937, author = {J. R. R. Tolkien}}")?;
        let spans: Vec<_> = s.iter().collect::<Result<_, _>>()?;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, "book");
        assert_eq!(spans[0].text, "@book{tolkien1937, author = {J. R. R. Tolkien}}");
        assert_eq!(spans[0].location, Location { lineno: 0, colno: 0 });
        Ok(())
    }

    #[test]
    fn test_nested_braces_and_preamble_text() -> Result<(), Box<dyn error::Error>> {
        let src = "% exported by hand\n\n@article{a,\n  title = {The {Great} Escape}\n}\n@Misc {b, note = {x}}";
        let s = Splitter::from_str(src)?;
        let spans: Vec<_> = s.iter().collect::<Result<_, _>>()?;
        assert_eq!(spans.len(), 2);
        assert_eq!(
            spans[0].text,
            "@article{a,\n  title = {The {Great} Escape}\n}"
        );
        assert_eq!(spans[0].location, Location { lineno: 2, colno: 0 });
        assert_eq!(spans[1].kind, "Misc");
        assert_eq!(spans[1].location, Location { lineno: 5, colno: 0 });
        Ok(())
    }

    #[test]
    fn test_skips_non_bibliographic_blocks() -> Result<(), Box<dyn error::Error>> {
        let src = r#"@comment{jabref-meta: {groups}}
@String{acm = "ACM Press"}
@PREAMBLE{"\newcommand{\noop}[1]{}"}
@inproceedings{c, booktitle = acm}"#;
        let s = Splitter::from_str(src)?;
        let spans: Vec<_> = s.iter().collect::<Result<_, _>>()?;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, "inproceedings");
        Ok(())
    }

    #[test]
    fn test_stray_at_signs() -> Result<(), Box<dyn error::Error>> {
        let src = "contact jane@example.org or @ me\n@article{d, year = 2020}";
        let s = Splitter::from_str(src)?;
        assert_eq!(texts(&s), vec![Ok("@article{d, year = 2020}")]);
        Ok(())
    }

    #[test]
    fn test_unterminated_last_entry() -> Result<(), Box<dyn error::Error>> {
        let src = "@book{a, title = {A}}\n@book{b, title = {B}";
        let s = Splitter::from_str(src)?;
        let results: Vec<_> = s.iter().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().map(|s| s.text), Ok("@book{a, title = {A}}"));
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.fault, EntryFault::Unterminated);
        assert_eq!(err.kind.as_deref(), Some("book"));
        assert_eq!(err.location, Location { lineno: 1, colno: 0 });
        Ok(())
    }

    #[test]
    fn test_resumes_after_unterminated_entry() -> Result<(), Box<dyn error::Error>> {
        let src = "@book{a, title = {A}\n\n@book{b, title = {B}}\n";
        let s = Splitter::from_str(src)?;
        let results: Vec<_> = s.iter().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        let span = results[1].as_ref().map_err(|e| e.clone())?;
        assert_eq!(span.text, "@book{b, title = {B}}");
        assert_eq!(span.location, Location { lineno: 2, colno: 0 });
        Ok(())
    }

    #[test]
    fn test_braces_inside_quoted_values() -> Result<(), Box<dyn error::Error>> {
        let src = "@misc{k, title = \"a } b\", year = 2020}\n@misc{l, note = \"x {\"} y\"}";
        let s = Splitter::from_str(src)?;
        assert_eq!(
            texts(&s),
            vec![
                Ok("@misc{k, title = \"a } b\", year = 2020}"),
                Ok("@misc{l, note = \"x {\"} y\"}"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unclosed_quote_is_unterminated() -> Result<(), Box<dyn error::Error>> {
        let s = Splitter::from_str("@misc{k, title = \"open}\n@comment{it's \"odd}\n")?;
        let results: Vec<_> = s.iter().collect();
        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().map(|_| ()).unwrap_err();
        assert_eq!(err.fault, EntryFault::Unterminated);
        Ok(())
    }

    #[test]
    fn test_parenthesized_entries_are_reported() -> Result<(), Box<dyn error::Error>> {
        let s = Splitter::from_str("@article(paren, title = {P})\n@comment(x)\n@misc{after, a = 1}")?;
        let results: Vec<_> = s.iter().map(|r| r.map(|span| span.text)).collect();
        assert_eq!(results.len(), 2);
        let err = results[0].as_ref().map(|_| ()).unwrap_err();
        assert_eq!(err.fault, EntryFault::Parenthesized);
        assert_eq!(err.kind.as_deref(), Some("article"));
        assert_eq!(results[1], Ok("@misc{after, a = 1}"));
        Ok(())
    }

    #[test]
    fn test_iter_is_restartable() -> Result<(), Box<dyn error::Error>> {
        let s = Splitter::from_str("@a{x}\n@b{y}")?;
        assert_eq!(texts(&s), texts(&s));
        assert_eq!(s.iter().count(), 2);
        Ok(())
    }

    #[test]
    fn test_span_new() {
        let span = EntrySpan::new("@article {k, year = 1}");
        assert_eq!(span.kind, "article");
        assert_eq!(EntrySpan::new("no entry").kind, "");
    }
}

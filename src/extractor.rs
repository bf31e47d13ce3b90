//! Turns one [`EntrySpan`] into a [`BibEntry`].
//!
//! The body of an entry is a comma separated list of `name = value`
//! assignments. A value is a sequence of pieces joined by `#`, each piece
//! being `{brace delimited}`, `"quote delimited"` or a bare token like
//! `2020`. Fields which cannot be read are reported and skipped, the rest
//! of the entry is kept.

use log::debug;

use crate::errors::{EntryFault, FieldFault, Location, MalformedEntry, MalformedField};
use crate::splitter::{is_kind_char, EntrySpan};
use crate::types::{BibEntry, RESERVED_NAMES};

/// The record read from one span plus the fields that had to be skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extracted {
    pub entry: BibEntry,
    pub field_errors: Vec<MalformedField>,
}

fn is_name_char(chr: char) -> bool {
    !chr.is_whitespace() && !matches!(chr, '=' | ',' | '{' | '}' | '"' | '#' | '(' | ')')
}

fn is_bare_char(chr: char) -> bool {
    !chr.is_whitespace() && !matches!(chr, '=' | ',' | '{' | '}' | '"' | '#')
}

/// Translate a byte offset inside the span into a document location.
fn locate(span: &EntrySpan<'_>, offset: usize) -> Location {
    let before = &span.text[..offset];
    match before.rfind('\n') {
        Some(nl) => Location {
            lineno: span.location.lineno + before.matches('\n').count(),
            colno: before[nl + 1..].chars().count(),
        },
        None => Location {
            lineno: span.location.lineno,
            colno: span.location.colno + before.chars().count(),
        },
    }
}

/// Byte offset of the `}` matching the `{` at `open`. Braces inside a
/// `"..."` value at depth 1 follow the quoted value rules and leave the depth alone.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quoted: Option<usize> = None;
    for (rel, chr) in text[open..].char_indices() {
        match (quoted, chr) {
            (Some(braces), '{') => quoted = Some(braces + 1),
            (Some(braces), '}') => quoted = Some(braces.saturating_sub(1)),
            (Some(0), '"') => quoted = None,
            (Some(_), _) => {}
            (None, '"') if depth == 1 => quoted = Some(0),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + rel);
                }
            }
            (None, _) => {}
        }
    }
    None
}

struct Field<'s> {
    name: &'s str,
    value: String,
    offset: usize,
}

struct FieldFailure<'s> {
    fault: FieldFault,
    name: Option<&'s str>,
    offset: usize,
}

/// Reads the field list between `pos` and `end` (the entry's closing brace).
struct Cursor<'s> {
    text: &'s str,
    pos: usize,
    end: usize,
}

impl<'s> Cursor<'s> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..self.end].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let chr = self.peek()?;
        self.pos += chr.len_utf8();
        Some(chr)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: fn(char) -> bool) -> &'s str {
        let start = self.pos;
        while self.peek().map_or(false, pred) {
            self.bump();
        }
        &self.text[start..self.pos]
    }

    /// Content up to the brace closing an already consumed `{`.
    fn braced(&mut self) -> Option<&'s str> {
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(chr) = self.bump() {
            match chr {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&self.text[start..self.pos - 1]);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Content up to the quote closing an already consumed `"`. A quote
    /// nested in braces does not close, `\"` is no escape (write `{"}`).
    fn quoted(&mut self) -> Option<&'s str> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(chr) = self.bump() {
            match chr {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                '"' if depth == 0 => return Some(&self.text[start..self.pos - 1]),
                _ => {}
            }
        }
        None
    }

    /// Skip past the next comma outside of braces and quoted values.
    fn resync(&mut self) {
        let mut depth = 0usize;
        while let Some(chr) = self.bump() {
            match chr {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                '"' if depth == 0 => {
                    if self.quoted().is_none() {
                        return;
                    }
                }
                ',' if depth == 0 => return,
                _ => {}
            }
        }
    }

    fn value(&mut self) -> Result<String, (FieldFault, usize)> {
        let mut value = String::new();
        loop {
            self.skip_whitespace();
            let piece = self.pos;
            match self.peek() {
                Some('{') => {
                    self.bump();
                    match self.braced() {
                        Some(inner) => value.push_str(inner),
                        None => {
                            self.pos = piece + 1;
                            return Err((FieldFault::UnbalancedBraces, piece));
                        }
                    }
                }
                Some('"') => {
                    self.bump();
                    match self.quoted() {
                        Some(inner) => value.push_str(inner),
                        None => {
                            self.pos = piece + 1;
                            return Err((FieldFault::UnterminatedQuote, piece));
                        }
                    }
                }
                _ => {
                    let bare = self.take_while(is_bare_char);
                    if bare.is_empty() {
                        return Err((FieldFault::MissingValue, piece));
                    }
                    value.push_str(bare);
                }
            }
            self.skip_whitespace();
            if self.peek() == Some('#') {
                self.bump();
            } else {
                return Ok(value.trim().to_string());
            }
        }
    }

    /// Read the next `name = value` pair. `None` once the body is exhausted.
    fn field(&mut self) -> Option<Result<Field<'s>, FieldFailure<'s>>> {
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return None,
                Some(',') => {
                    self.bump();
                }
                Some(_) => break,
            }
        }

        let offset = self.pos;
        let name = self.take_while(is_name_char);
        if name.is_empty() {
            return Some(Err(FieldFailure {
                fault: FieldFault::MissingName,
                name: None,
                offset,
            }));
        }
        let failure = |fault: FieldFault, offset: usize| -> Option<Result<Field<'s>, FieldFailure<'s>>> {
            Some(Err(FieldFailure {
                fault,
                name: Some(name),
                offset,
            }))
        };

        self.skip_whitespace();
        if self.peek() != Some('=') {
            return failure(FieldFault::MissingAssign, self.pos);
        }
        self.bump();

        let value = match self.value() {
            Ok(value) => value,
            Err((fault, at)) => return failure(fault, at),
        };

        self.skip_whitespace();
        match self.peek() {
            None => {}
            Some(',') => {
                self.bump();
            }
            Some(chr) => return failure(FieldFault::UnexpectedChar(chr), self.pos),
        }
        Some(Ok(Field {
            name,
            value,
            offset,
        }))
    }
}

/// Parse one entry span. Malformed fields are collected in
/// [`Extracted::field_errors`]; a malformed header or unbalanced body
/// fails the whole entry.
pub fn extract(span: &EntrySpan<'_>) -> Result<Extracted, MalformedEntry> {
    let text = span.text;
    let fail = |fault: EntryFault, offset: usize, kind: Option<&str>| MalformedEntry {
        fault,
        location: locate(span, offset),
        kind: kind.map(str::to_string),
    };

    let start = text.len() - text.trim_start().len();
    if !text[start..].starts_with('@') {
        return Err(fail(EntryFault::MissingAt, start, None));
    }
    let open = match text[start..].find('{') {
        Some(rel) => start + rel,
        None => return Err(fail(EntryFault::MissingOpen, start, None)),
    };
    let kind = text[start + 1..open].trim();
    if kind.is_empty() {
        return Err(fail(EntryFault::EmptyType, start, None));
    }
    if let Some(bad) = kind.chars().find(|&chr| !is_kind_char(chr)) {
        return Err(fail(EntryFault::InvalidType(bad), start, None));
    }
    let close = match matching_brace(text, open) {
        Some(close) => close,
        None => return Err(fail(EntryFault::Unterminated, start, Some(kind))),
    };
    if !text[close + 1..].trim().is_empty() {
        return Err(fail(EntryFault::TrailingText, close + 1, Some(kind)));
    }

    // header: everything up to the first comma is the citation key
    let (key, fields_start) = match text[open + 1..close].find(',') {
        Some(rel) => (&text[open + 1..open + 1 + rel], open + 2 + rel),
        None => (&text[open + 1..close], close),
    };
    if key.contains('=') {
        return Err(fail(EntryFault::MissingComma, open + 1, Some(kind)));
    }

    let mut entry = BibEntry::new();
    entry.entry_type = kind.to_lowercase();
    entry.citation_key = key.trim().to_string();

    let mut field_errors = Vec::new();
    let mut cursor = Cursor {
        text,
        pos: fields_start,
        end: close,
    };
    while let Some(result) = cursor.field() {
        let failure = match result {
            Ok(field) => {
                let name = field.name.to_lowercase();
                if RESERVED_NAMES.contains(&name.as_str()) {
                    Some((FieldFault::Reserved, Some(field.name), field.offset))
                } else if entry.fields.contains_key(&name) {
                    Some((FieldFault::Duplicate, Some(field.name), field.offset))
                } else {
                    entry.fields.insert(name, field.value);
                    None
                }
            }
            Err(err) => {
                cursor.resync();
                Some((err.fault, err.name, err.offset))
            }
        };
        if let Some((fault, name, offset)) = failure {
            field_errors.push(MalformedField {
                fault,
                field: name.map(str::to_lowercase),
                entry: entry.citation_key.clone(),
                location: locate(span, offset),
            });
        }
    }

    debug!(
        "extracted @{}{{{}}} with {} fields",
        entry.entry_type,
        entry.citation_key,
        entry.fields.len()
    );
    Ok(Extracted {
        entry,
        field_errors,
    })
}

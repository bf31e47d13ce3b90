use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Position inside the source document, 0-based internally and
/// displayed 1-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub lineno: usize,
    pub colno: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} col {}", self.lineno + 1, self.colno + 1)
    }
}

/// The input file cannot be used at all. Fatal for the whole run.
#[derive(Debug, Error)]
pub enum FileAccessError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("not a file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("{} is not UTF-8 encoded, re-encode it as UTF-8", .0.display())]
    NotUtf8(PathBuf),
    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EntryFault {
    #[error("unexpected end of file while reading entry body")]
    Unterminated,
    #[error("entry does not start with '@'")]
    MissingAt,
    #[error("expecting '{{' after entry type")]
    MissingOpen,
    #[error("entries delimited by parentheses are not supported")]
    Parenthesized,
    #[error("entry type is empty")]
    EmptyType,
    #[error("invalid character '{0}' in entry type")]
    InvalidType(char),
    #[error("missing ',' between citation key and fields")]
    MissingComma,
    #[error("unexpected text after closing '}}'")]
    TrailingText,
}

/// One entry cannot be parsed. The entry is dropped, the batch continues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedEntry {
    pub fault: EntryFault,
    pub location: Location,
    pub kind: Option<String>,
}

impl fmt::Display for MalformedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed entry at {}", self.location)?;
        if let Some(kind) = &self.kind {
            write!(f, " in @{kind}")?;
        }
        write!(f, ": {}", self.fault)
    }
}

impl std::error::Error for MalformedEntry {}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FieldFault {
    #[error("missing field name")]
    MissingName,
    #[error("expecting '=' after field name")]
    MissingAssign,
    #[error("missing field value")]
    MissingValue,
    #[error("unbalanced braces in field value")]
    UnbalancedBraces,
    #[error("unterminated quoted field value")]
    UnterminatedQuote,
    #[error("unexpected character '{0}' after field value")]
    UnexpectedChar(char),
    #[error("duplicate field name")]
    Duplicate,
    #[error("field name is reserved for output")]
    Reserved,
}

/// One field inside an otherwise well-formed entry cannot be parsed.
/// The field is dropped, the entry is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedField {
    pub fault: FieldFault,
    pub field: Option<String>,
    pub entry: String,
    pub location: Location,
}

impl fmt::Display for MalformedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(name) => write!(
                f,
                "malformed field '{}' in entry '{}' at {}: {}",
                name, self.entry, self.location, self.fault
            ),
            None => write!(
                f,
                "malformed field in entry '{}' at {}: {}",
                self.entry, self.location, self.fault
            ),
        }
    }
}

impl std::error::Error for MalformedField {}

/// A DOI could not be turned into a landing-page URL.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("invalid DOI '{0}'")]
    InvalidDoi(String),
    #[error("timed out resolving DOI {0}")]
    Timeout(String),
    #[error("request for DOI {doi} failed: {source}")]
    Request {
        doi: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("DOI {0} did not redirect")]
    NoRedirect(String),
    #[error("DOI {doi} answered with status {status}")]
    Status { doi: String, status: u16 },
}

impl ResolutionError {
    pub(crate) fn from_reqwest(doi: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout(doi.to_string())
        } else {
            Self::Request {
                doi: doi.to_string(),
                source,
            }
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Request { .. })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    FileAccess(#[from] FileAccessError),
    #[error(transparent)]
    MalformedEntry(#[from] MalformedEntry),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("cannot serialize entries: {0}")]
    Json(#[from] serde_json::Error),
    #[error("serialized entries are not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("cannot write {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_message() {
        let err = MalformedEntry {
            fault: EntryFault::Unterminated,
            location: Location { lineno: 4, colno: 0 },
            kind: Some("article".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "malformed entry at line 5 col 1 in @article: unexpected end of file while reading entry body"
        );
    }

    #[test]
    fn test_field_message() {
        let err = MalformedField {
            fault: FieldFault::MissingAssign,
            field: Some("title".to_string()),
            entry: "doe2020".to_string(),
            location: Location { lineno: 0, colno: 17 },
        };
        assert_eq!(
            err.to_string(),
            "malformed field 'title' in entry 'doe2020' at line 1 col 18: expecting '=' after field name"
        );
    }
}

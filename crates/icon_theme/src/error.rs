use std::path::PathBuf;

use thiserror::Error;

/// A violation of the index file format that makes the whole theme unusable.
///
/// Recoverable problems (a malformed line, an unknown directory type, ...) never end up here,
/// they are logged and parsing continues with the next line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parsing of {} failed on line {line} (group '{}'): {kind}", .file.display(), .group.as_deref().unwrap_or("n/a"))]
pub struct ParseError {
    pub file: PathBuf,
    pub line: usize,
    pub group: Option<String>,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("first group must be 'Icon Theme'")]
    FirstGroupNotIconTheme,
    #[error("unexpected content before first header")]
    ContentBeforeHeader,
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("empty file")]
    EmptyFile,
}

#[derive(Error, Debug)]
pub enum ThemeError {
    #[error("could not read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ThemeError {
    /// Whether the theme folder simply has no index file, which is the normal case for
    /// directories like `/usr/share/pixmaps` that hold loose icons.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ThemeError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, ThemeError>;

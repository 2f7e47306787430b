//! Indexing and lookup of icons following the freedesktop.org [Icon Theme Specification].
//!
//! [Icon Theme Specification]: https://specifications.freedesktop.org/icon-theme-spec/icon-theme-spec-latest.html

mod basedirs;
pub use basedirs::*;

mod error;
pub use error::*;

mod index;
pub use index::*;

pub mod parser;

mod theme;
pub use theme::*;

use std::sync::{Arc, Mutex};

/// The current [`ThemeIndex`], shared between whoever refreshes it and whoever resolves icons.
///
/// The lock is only held to swap or clone the index, never while touching the filesystem.
#[derive(Debug, Default)]
pub struct IconThemes {
    current: Mutex<Arc<ThemeIndex>>,
}

impl IconThemes {
    /// Scan the base directories of the current environment and load all themes in them.
    pub fn load() -> Self {
        Self::from_index(ThemeIndex::scan(Arc::new(BaseDirs::from_env())))
    }

    pub fn from_index(index: ThemeIndex) -> Self {
        IconThemes { current: Mutex::new(Arc::new(index)) }
    }

    /// The current index. Callers may keep it around after a refresh, it stays valid.
    pub fn index(&self) -> Arc<ThemeIndex> {
        self.current.lock().unwrap().clone() // unwrap: mutex poisoning is okay
    }

    /// Rescan base directories and themes, replacing the current index.
    pub fn refresh(&self) {
        let index = Arc::new(ThemeIndex::scan(Arc::new(BaseDirs::from_env())));
        *self.current.lock().unwrap() = index; // unwrap: mutex poisoning is okay
    }

    pub fn resolve(&self, name: &str, size: i32, preferred_theme: Option<&str>) -> Option<ResolvedIcon> {
        self.index().resolve(name, size, preferred_theme)
    }
}

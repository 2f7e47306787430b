use std::path::Path;

use crate::{error::ThemeError, parser};

/// Size policy of a theme subdirectory, see the `Type` key of the icon theme specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryType {
    #[default]
    Fixed,
    Scalable,
    Threshold,
}

impl std::str::FromStr for DirectoryType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "Fixed" => Ok(DirectoryType::Fixed),
            "Scalable" => Ok(DirectoryType::Scalable),
            "Threshold" => Ok(DirectoryType::Threshold),
            _ => Err(()),
        }
    }
}

/// One directory of a theme, with the range of icon sizes it can serve.
///
/// `min_size <= size <= max_size` holds for every subdir produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdir {
    pub name: String,
    pub size: i32,
    pub min_size: i32,
    pub max_size: i32,
    pub scale: i32,
    pub kind: DirectoryType,
}

impl Subdir {
    pub fn contains(&self, size: i32) -> bool {
        self.min_size <= size && size <= self.max_size
    }

    /// How far `size` lies outside of the range this subdir serves, 0 if it is inside.
    pub fn size_distance(&self, size: i32) -> u32 {
        if size > self.max_size {
            size.abs_diff(self.max_size)
        } else if size < self.min_size {
            self.min_size.abs_diff(size)
        } else {
            0
        }
    }
}

/// A parsed `index.theme` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub name: String,
    pub comment: String,
    /// Themes to fall back to, in order.
    pub inherits: Vec<String>,
    /// Directory names as declared by the `Directories` key.
    pub directories: Vec<String>,
    /// Subdirectories in the order their groups appear in the file.
    pub subdirs: Vec<Subdir>,
    /// Name of the folder the theme lives in, below each base directory.
    pub dir: String,
}

impl Theme {
    /// Read `<basedir>/<folder>/index.theme`.
    pub fn load(basedir: &Path, folder: &str) -> crate::Result<Theme> {
        let path = basedir.join(folder).join("index.theme");
        let content = std::fs::read_to_string(&path).map_err(|source| ThemeError::Io { path: path.clone(), source })?;
        Ok(parser::parse_theme(&content, &path, folder)?)
    }
}

use std::path::{Path, PathBuf};

const PIXMAPS_DIR: &str = "/usr/share/pixmaps";
const DEFAULT_DATA_DIRS: &str = "/usr/local/share:/usr/share";

/// The directories that are searched for icon themes and standalone icons, in order of priority.
///
/// Only directories that exist at the time of the scan are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseDirs {
    dirs: Vec<PathBuf>,
}

impl BaseDirs {
    /// Scan the base directories defined by the current environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Scan the base directories, reading environment variables through `env`.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Self {
        let dirs = candidates(&env).into_iter().filter(|dir| dir.is_dir()).collect();
        Self::new(dirs)
    }

    /// Use the given directories as-is, dropping repeated entries.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        let mut unique: Vec<PathBuf> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        BaseDirs { dirs: unique }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// Expand a leading `~` and `$VAR`/`${VAR}` references.
///
/// Returns `None` if a referenced variable is not set, in which case the directory is skipped.
fn expand(template: &str, env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    if rest == "~" || rest.starts_with("~/") {
        out.push_str(&env("HOME")?);
        rest = &rest[1..];
    }

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, remainder) = if let Some(braced) = after.strip_prefix('{') {
            let end = braced.find('}')?;
            (&braced[..end], &braced[end + 1..])
        } else {
            let end = after.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_')).unwrap_or(after.len());
            after.split_at(end)
        };
        if name.is_empty() {
            out.push('$');
        } else {
            out.push_str(&env(name)?);
        }
        rest = remainder;
    }
    out.push_str(rest);
    Some(PathBuf::from(out))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|x| !x.is_empty())
}

/// All candidate directories in search order, before filtering out the ones that don't exist.
fn candidates(env: &impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let mut templates = vec!["$HOME/.icons".to_owned()]; // deprecated, but still around
    templates.push(match non_empty(env("XDG_DATA_HOME")) {
        Some(_) => "$XDG_DATA_HOME/icons".to_owned(),
        None => "$HOME/.local/share/icons".to_owned(),
    });
    templates.push(PIXMAPS_DIR.to_owned());

    let data_dirs = non_empty(env("XDG_DATA_DIRS")).unwrap_or_else(|| DEFAULT_DATA_DIRS.to_owned());
    templates.extend(data_dirs.split(':').filter(|x| !x.is_empty()).map(|dir| format!("{}/icons", dir)));

    templates.iter().filter_map(|template| expand(template, env)).collect()
}

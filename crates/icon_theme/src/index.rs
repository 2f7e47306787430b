use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{basedirs::BaseDirs, theme::Theme};

/// Theme every lookup falls back to, as mandated by the icon theme specification.
pub const FALLBACK_THEME: &str = "Hicolor";

/// Range returned for icons found loose in a base directory, outside of any theme.
const STANDALONE_SIZE_RANGE: (i32, i32) = (1, 512);

/// Extensions we can load, in order of preference.
const EXTENSIONS: [&str; 2] = ["svg", "png"];

/// Result of an icon lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIcon {
    pub path: PathBuf,
    /// Range of sizes the directory the icon was found in is meant to serve.
    pub min_size: i32,
    pub max_size: i32,
}

/// All themes found in a set of base directories.
///
/// The index is immutable. To pick up changes on disk, scan again and replace it.
#[derive(Debug, Clone, Default)]
pub struct ThemeIndex {
    themes: Vec<Theme>,
    basedirs: Arc<BaseDirs>,
}

impl ThemeIndex {
    pub fn new(themes: Vec<Theme>, basedirs: Arc<BaseDirs>) -> Self {
        ThemeIndex { themes, basedirs }
    }

    /// Load every theme found directly below one of the base directories.
    ///
    /// Themes that fail to parse are reported and skipped.
    pub fn scan(basedirs: Arc<BaseDirs>) -> Self {
        let mut themes = Vec::new();
        for basedir in basedirs.iter() {
            themes.extend(load_themes_in_dir(basedir));
        }

        if themes.is_empty() {
            log::info!("Warning: no icon themes loaded");
        } else {
            log::info!("Loaded icon themes: {}", themes.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", "));
        }
        ThemeIndex { themes, basedirs }
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }

    pub fn basedirs(&self) -> &Arc<BaseDirs> {
        &self.basedirs
    }

    pub fn find_theme(&self, name: &str) -> Option<&Theme> {
        self.themes.iter().find(|theme| theme.name == name)
    }

    /// Find the file for the icon `name` at `size`.
    ///
    /// The preferred theme (and what it inherits from) is searched first, then `Hicolor`, and
    /// finally the base directories themselves. Returns `None` if the icon doesn't exist anywhere.
    pub fn resolve(&self, name: &str, size: i32, preferred_theme: Option<&str>) -> Option<ResolvedIcon> {
        let mut icon = None;
        if let Some(theme) = preferred_theme {
            icon = self.resolve_in_theme(name, size, theme, &mut Vec::new());
        }
        if icon.is_none() && preferred_theme != Some(FALLBACK_THEME) {
            icon = self.resolve_in_theme(name, size, FALLBACK_THEME, &mut Vec::new());
        }
        icon.or_else(|| self.resolve_standalone(name))
    }

    fn resolve_in_theme<'a>(
        &'a self,
        name: &str,
        size: i32,
        theme_name: &str,
        visited: &mut Vec<&'a str>,
    ) -> Option<ResolvedIcon> {
        let theme = self.find_theme(theme_name)?;
        if visited.contains(&theme.name.as_str()) {
            log::debug!("icon theme '{}' inherits from itself", theme.name);
            return None;
        }
        visited.push(&theme.name);

        let theme_roots: Vec<PathBuf> =
            self.basedirs.iter().map(|basedir| basedir.join(&theme.dir)).filter(|root| root.is_dir()).collect();

        // exact match, later directories of the theme win
        for root in &theme_roots {
            for subdir in theme.subdirs.iter().rev().filter(|subdir| subdir.contains(size)) {
                if let Some(path) = find_icon_file(&root.join(&subdir.name), name) {
                    return Some(ResolvedIcon { path, min_size: subdir.min_size, max_size: subdir.max_size });
                }
            }
        }

        // closest match
        let mut icon = None;
        let mut smallest_error = u32::MAX;
        for root in &theme_roots {
            for subdir in theme.subdirs.iter().rev() {
                let error = subdir.size_distance(size);
                if error >= smallest_error {
                    continue;
                }
                if let Some(path) = find_icon_file(&root.join(&subdir.name), name) {
                    smallest_error = error;
                    icon = Some(ResolvedIcon { path, min_size: subdir.min_size, max_size: subdir.max_size });
                }
            }
        }
        if icon.is_some() {
            return icon;
        }

        theme.inherits.iter().find_map(|parent| self.resolve_in_theme(name, size, parent, visited))
    }

    fn resolve_standalone(&self, name: &str) -> Option<ResolvedIcon> {
        let (min_size, max_size) = STANDALONE_SIZE_RANGE;
        self.basedirs.iter().find_map(|basedir| find_icon_file(basedir, name)).map(|path| ResolvedIcon {
            path,
            min_size,
            max_size,
        })
    }
}

/// Look for `<dir>/<name>.svg`, then `<dir>/<name>.png`.
pub fn find_icon_file(dir: &Path, name: &str) -> Option<PathBuf> {
    EXTENSIONS.iter().map(|ext| dir.join(format!("{}.{}", name, ext))).find(|path| path.is_file())
}

fn load_themes_in_dir(basedir: &Path) -> Vec<Theme> {
    let entries = match std::fs::read_dir(basedir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("could not list {}: {}", basedir.display(), e);
            return Vec::new();
        }
    };

    let mut folders: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    folders.sort();

    folders
        .iter()
        .filter_map(|folder| match Theme::load(basedir, folder) {
            Ok(theme) => Some(theme),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                log::warn!("Failed to load theme '{}': {}", folder, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixture {
        tmp: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture { tmp: tempfile::tempdir().unwrap() }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.tmp.path().join(rel)
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let path = self.path(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            path
        }

        fn theme(&self, base: &str, folder: &str, name: &str, inherits: &str, dirs: &[(&str, &str)]) {
            let mut index = format!(
                "[Icon Theme]\nName={}\nComment=test\nInherits={}\nDirectories={}\n",
                name,
                inherits,
                dirs.iter().map(|(dir, _)| *dir).collect::<Vec<_>>().join(",")
            );
            for (dir, body) in dirs {
                index.push_str(&format!("[{}]\n{}\n", dir, body));
            }
            self.write(&format!("{}/{}/index.theme", base, folder), &index);
        }

        fn index(&self, bases: &[&str]) -> ThemeIndex {
            let dirs = bases.iter().map(|base| self.path(base)).collect();
            ThemeIndex::scan(Arc::new(BaseDirs::new(dirs)))
        }
    }

    fn resolved(path: PathBuf, min_size: i32, max_size: i32) -> Option<ResolvedIcon> {
        Some(ResolvedIcon { path, min_size, max_size })
    }

    #[test]
    fn test_exact_and_inexact_match_in_single_theme() {
        let fx = Fixture::new();
        fx.theme("t1", "Foo", "Foo", "", &[("16x16/apps", "Type=Fixed\nSize=16")]);
        let icon = fx.write("t1/Foo/16x16/apps/gedit.png", "");
        let index = fx.index(&["t1"]);

        assert_eq!(index.resolve("gedit", 16, Some("Foo")), resolved(icon.clone(), 16, 16));
        assert_eq!(index.resolve("gedit", 48, Some("Foo")), resolved(icon, 16, 16));
    }

    #[test]
    fn test_exact_match_beats_closer_inexact_match() {
        let fx = Fixture::new();
        fx.theme(
            "base",
            "Foo",
            "Foo",
            "",
            &[("wide", "Type=Scalable\nSize=64\nMinSize=16\nMaxSize=256"), ("near", "Type=Fixed\nSize=30")],
        );
        let wide = fx.write("base/Foo/wide/app.svg", "");
        fx.write("base/Foo/near/app.png", "");
        let index = fx.index(&["base"]);

        assert_eq!(index.resolve("app", 32, Some("Foo")), resolved(wide, 16, 256));
    }

    #[test]
    fn test_later_subdirs_are_searched_first() {
        let fx = Fixture::new();
        fx.theme("base", "Foo", "Foo", "", &[("a", "Size=16"), ("b", "Size=16")]);
        fx.write("base/Foo/a/app.png", "");
        let b = fx.write("base/Foo/b/app.png", "");
        let index = fx.index(&["base"]);

        assert_eq!(index.resolve("app", 16, Some("Foo")).unwrap().path, b);
    }

    #[test]
    fn test_inexact_match_picks_smallest_error() {
        let fx = Fixture::new();
        fx.theme("base", "Foo", "Foo", "", &[("16", "Size=16"), ("32", "Size=32"), ("64", "Size=64")]);
        fx.write("base/Foo/16/app.png", "");
        let best = fx.write("base/Foo/32/app.png", "");
        fx.write("base/Foo/64/app.png", "");
        let index = fx.index(&["base"]);

        assert_eq!(index.resolve("app", 40, Some("Foo")), resolved(best, 32, 32));
    }

    #[test]
    fn test_inexact_ties_keep_first_hit() {
        let fx = Fixture::new();
        fx.theme("base", "Foo", "Foo", "", &[("small", "Size=20"), ("large", "Size=40")]);
        fx.write("base/Foo/small/app.png", "");
        let large = fx.write("base/Foo/large/app.png", "");
        let index = fx.index(&["base"]);

        // both are 10 away, reverse declaration order probes "large" first
        assert_eq!(index.resolve("app", 30, Some("Foo")).unwrap().path, large);
    }

    #[test]
    fn test_svg_preferred_over_png() {
        let fx = Fixture::new();
        fx.theme("base", "Foo", "Foo", "", &[("apps", "Size=16")]);
        fx.write("base/Foo/apps/app.png", "");
        let svg = fx.write("base/Foo/apps/app.svg", "");
        let index = fx.index(&["base"]);

        assert_eq!(index.resolve("app", 16, Some("Foo")).unwrap().path, svg);
    }

    #[test]
    fn test_first_inherited_theme_wins() {
        let fx = Fixture::new();
        fx.theme("base", "child", "Child", "ParentA,ParentB", &[("apps", "Size=16")]);
        fx.theme("base", "a", "ParentA", "", &[("apps", "Size=128")]);
        fx.theme("base", "b", "ParentB", "", &[("apps", "Size=16")]);
        let from_a = fx.write("base/a/apps/app.png", "");
        fx.write("base/b/apps/app.png", "");
        let index = fx.index(&["base"]);

        assert_eq!(index.resolve("app", 16, Some("Child")), resolved(from_a, 128, 128));
    }

    #[test]
    fn test_inheritance_cycles_terminate() {
        let fx = Fixture::new();
        fx.theme("base", "a", "A", "B", &[("apps", "Size=16")]);
        fx.theme("base", "b", "B", "A", &[("apps", "Size=16")]);
        let index = fx.index(&["base"]);

        assert_eq!(index.resolve("app", 16, Some("A")), None);
    }

    #[test]
    fn test_hicolor_and_standalone_fallback() {
        let fx = Fixture::new();
        fx.theme("base", "hicolor", "Hicolor", "", &[("48x48/apps", "Size=48")]);
        let hicolor_icon = fx.write("base/hicolor/48x48/apps/term.png", "");
        let loose = fx.write("pixmaps/loose.svg", "");
        let index = fx.index(&["base", "pixmaps"]);

        assert_eq!(index.resolve("term", 48, Some("Missing")), resolved(hicolor_icon.clone(), 48, 48));
        assert_eq!(index.resolve("term", 48, None), resolved(hicolor_icon, 48, 48));
        assert_eq!(index.resolve("loose", 16, Some("Hicolor")), resolved(loose, 1, 512));
        assert_eq!(index.resolve("nothing", 16, Some("Hicolor")), None);
    }

    #[test]
    fn test_theme_spread_over_basedirs() {
        let fx = Fixture::new();
        fx.theme("first", "Foo", "Foo", "", &[("apps", "Size=16")]);
        std::fs::create_dir_all(fx.path("second/Foo/apps")).unwrap();
        let icon = fx.write("second/Foo/apps/app.png", "");
        let index = fx.index(&["first", "second"]);

        assert_eq!(index.themes().len(), 1);
        assert_eq!(index.resolve("app", 16, Some("Foo")).unwrap().path, icon);
    }

    #[test]
    fn test_broken_themes_are_skipped() {
        let fx = Fixture::new();
        fx.write("base/broken/index.theme", "[Not A Theme]\n");
        fx.theme("base", "good", "Good", "", &[("apps", "Size=16")]);
        std::fs::create_dir_all(fx.path("base/no-index")).unwrap();
        let index = fx.index(&["base"]);

        assert_eq!(index.themes().iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["Good"]);
    }
}

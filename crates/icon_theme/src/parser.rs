//! Parser for the `index.theme` format, a close relative of the desktop entry format.
//!
//! The format is line based: `[Group]` headers open a group and `Key=Value` lines belong to the
//! most recently opened one. Problems with single lines are reported and skipped, only a broken
//! file structure makes the whole theme fail.

use std::path::Path;

use crate::{
    error::{ParseError, ParseErrorKind},
    theme::{DirectoryType, Subdir, Theme},
};

const ICON_THEME_GROUP: &str = "Icon Theme";
const DEFAULT_THRESHOLD: i32 = 2;

/// A problem confined to a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Warning {
    MalformedGroupHeader,
    MalformedEntry,
    UnknownDirectoryType,
    ExpectedNumber,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Warning::MalformedGroupHeader => "malformed group header",
            Warning::MalformedEntry => "malformed key-value pair",
            Warning::UnknownDirectoryType => "ignoring unrecognized icon theme directory type",
            Warning::ExpectedNumber => "invalid value - expected a number",
        })
    }
}

enum Entry<'a> {
    Pair(&'a str, &'a str),
    /// `Key[locale]=Value`, we only look at the untranslated keys.
    Localized,
    Malformed,
}

fn is_icon_theme_group(group: &str) -> bool {
    group.eq_ignore_ascii_case(ICON_THEME_GROUP)
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|x| !x.is_empty()).map(str::to_owned).collect()
}

fn parse_group_header(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    if inner.chars().any(|c| c == '[' || c == ']' || c.is_control()) {
        None
    } else {
        Some(inner)
    }
}

fn parse_entry(line: &str) -> Entry<'_> {
    let key_end = line.find(|c: char| !(c.is_ascii_alphanumeric() || c == '-')).unwrap_or(line.len());
    let (key, rest) = line.split_at(key_end);
    let rest = rest.trim_start();
    if rest.starts_with('[') {
        Entry::Localized
    } else if let Some(value) = rest.strip_prefix('=') {
        Entry::Pair(key, value.trim_start())
    } else {
        Entry::Malformed
    }
}

#[derive(Debug)]
struct SubdirBuilder {
    name: String,
    size: Option<i32>,
    min_size: Option<i32>,
    max_size: Option<i32>,
    threshold: i32,
    scale: i32,
    kind: DirectoryType,
}

impl SubdirBuilder {
    fn new(name: &str) -> Self {
        SubdirBuilder {
            name: name.to_owned(),
            size: None,
            min_size: None,
            max_size: None,
            threshold: DEFAULT_THRESHOLD,
            scale: 1,
            kind: DirectoryType::default(),
        }
    }

    fn entry(&mut self, key: &str, value: &str) -> Result<(), Warning> {
        match key {
            "Context" => return Ok(()),
            "Type" => {
                self.kind = value.parse().map_err(|_| Warning::UnknownDirectoryType)?;
                return Ok(());
            }
            "Size" | "MaxSize" | "MinSize" | "Threshold" | "Scale" => {}
            _ => return Ok(()),
        }

        let n: i32 = value.parse().map_err(|_| Warning::ExpectedNumber)?;
        match key {
            "Size" => self.size = Some(n),
            "MaxSize" => self.max_size = Some(n),
            "MinSize" => self.min_size = Some(n),
            "Threshold" => self.threshold = n,
            _ => self.scale = n,
        }
        Ok(())
    }

    fn finish(self) -> Result<Subdir, ParseErrorKind> {
        // a size of 0 counts as no size at all
        let size = self.size.filter(|size| *size > 0).ok_or(ParseErrorKind::MissingKey("Size"))?;
        let (min_size, max_size) = match self.kind {
            DirectoryType::Fixed => (size, size),
            DirectoryType::Scalable => (self.min_size.unwrap_or(size), self.max_size.unwrap_or(size)),
            DirectoryType::Threshold => (size.saturating_sub(self.threshold), size.saturating_add(self.threshold)),
        };
        Ok(Subdir { name: self.name, size, min_size, max_size, scale: self.scale, kind: self.kind })
    }
}

#[derive(Debug, Default)]
struct ThemeBuilder {
    name: Option<String>,
    comment: Option<String>,
    inherits: Vec<String>,
    directories: Vec<String>,
    subdirs: Vec<Subdir>,
    current: Option<SubdirBuilder>,
}

impl ThemeBuilder {
    /// Called whenever `old_group` is left, either for `new_group` or for the end of the file.
    fn switch_group(&mut self, old_group: Option<&str>, new_group: Option<&str>) -> Result<(), ParseErrorKind> {
        match old_group {
            None if new_group.is_some_and(is_icon_theme_group) => {}
            None => return Err(ParseErrorKind::FirstGroupNotIconTheme),
            Some(old) if is_icon_theme_group(old) => {
                if self.name.is_none() {
                    return Err(ParseErrorKind::MissingKey("Name"));
                } else if self.comment.is_none() {
                    return Err(ParseErrorKind::MissingKey("Comment"));
                } else if self.directories.is_empty() {
                    return Err(ParseErrorKind::MissingKey("Directories"));
                }
            }
            Some(_) => {}
        }

        if let Some(subdir) = self.current.take() {
            self.subdirs.push(subdir.finish()?);
        }

        if let Some(group) = new_group {
            if self.directories.iter().any(|dir| dir == group) {
                self.current = Some(SubdirBuilder::new(group));
            }
        }
        Ok(())
    }

    fn entry(&mut self, group: &str, key: &str, value: &str) -> Result<(), Warning> {
        if is_icon_theme_group(group) {
            match key {
                "Name" => self.name = Some(value.to_owned()),
                "Comment" => self.comment = Some(value.to_owned()),
                "Inherits" => self.inherits = split_list(value),
                "Directories" => self.directories = split_list(value),
                _ => {} // ScaledDirectories, Hidden, Example
            }
            Ok(())
        } else {
            match &mut self.current {
                Some(subdir) if subdir.name == group => subdir.entry(key, value),
                _ => Ok(()),
            }
        }
    }

    fn finish(self, folder: &str) -> Theme {
        Theme {
            name: self.name.unwrap_or_default(),
            comment: self.comment.unwrap_or_default(),
            inherits: self.inherits,
            directories: self.directories,
            subdirs: self.subdirs,
            dir: folder.to_owned(),
        }
    }
}

/// Parse the contents of an `index.theme` file.
///
/// `file` is only used for diagnostics, `folder` is the name of the directory the theme lives in.
pub fn parse_theme(content: &str, file: &Path, folder: &str) -> Result<Theme, ParseError> {
    // groups in order of their last appearance, a repeated header moves its group to the back
    let mut groups: Vec<String> = Vec::new();
    let mut builder = ThemeBuilder::default();
    let mut line_no = 0;

    let fail = |kind, line, groups: &[String]| ParseError {
        file: file.to_owned(),
        line,
        group: groups.last().cloned(),
        kind,
    };

    for (idx, raw_line) in content.lines().enumerate() {
        line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let warning = if line.starts_with('[') {
            match parse_group_header(line) {
                None => Some(Warning::MalformedGroupHeader),
                Some(group) => {
                    if let Some(pos) = groups.iter().position(|g| g == group) {
                        let group = groups.remove(pos);
                        groups.push(group);
                    } else {
                        builder
                            .switch_group(groups.last().map(String::as_str), Some(group))
                            .map_err(|kind| fail(kind, line_no, &groups))?;
                        groups.push(group.to_owned());
                    }
                    None
                }
            }
        } else {
            let Some(group) = groups.last() else {
                return Err(fail(ParseErrorKind::ContentBeforeHeader, line_no, &groups));
            };
            match parse_entry(line) {
                Entry::Localized => None,
                Entry::Malformed => Some(Warning::MalformedEntry),
                Entry::Pair(key, value) => builder.entry(group, key, value).err(),
            }
        };

        if let Some(warning) = warning {
            log::info!(
                "Error during load of theme '{}' - parsing of file '{}' encountered '{}' on line {} (group '{}') - continuing",
                folder,
                file.display(),
                warning,
                line_no,
                groups.last().map(String::as_str).unwrap_or("n/a"),
            );
        }
    }

    if groups.is_empty() {
        return Err(fail(ParseErrorKind::EmptyFile, line_no, &groups));
    }
    builder.switch_group(groups.last().map(String::as_str), None).map_err(|kind| fail(kind, line_no, &groups))?;

    Ok(builder.finish(folder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(content: &str) -> Result<Theme, ParseError> {
        parse_theme(content, Path::new("/test/Foo/index.theme"), "Foo")
    }

    fn kind_of(content: &str) -> ParseErrorKind {
        parse(content).unwrap_err().kind
    }

    #[test]
    fn test_parse_full_theme() {
        let theme = parse(
            r#"
# a comment
[Icon Theme]
Name=Foo
Name[de]=Fu
Comment=A theme
Inherits=Bar,hicolor
Directories=16x16/apps,scalable/apps,48x48/apps
Hidden=false

[16x16/apps]
Context=Applications
Size=16
Type=Fixed

[scalable/apps]
Size=48
Type=Scalable
MinSize=8
MaxSize=512

[48x48/apps]
Size=48
Type=Threshold
Threshold=4
Scale=2
"#,
        )
        .unwrap();

        assert_eq!(theme.name, "Foo");
        assert_eq!(theme.comment, "A theme");
        assert_eq!(theme.inherits, vec!["Bar", "hicolor"]);
        assert_eq!(theme.dir, "Foo");
        assert_eq!(
            theme.subdirs,
            vec![
                Subdir { name: "16x16/apps".into(), size: 16, min_size: 16, max_size: 16, scale: 1, kind: DirectoryType::Fixed },
                Subdir {
                    name: "scalable/apps".into(),
                    size: 48,
                    min_size: 8,
                    max_size: 512,
                    scale: 1,
                    kind: DirectoryType::Scalable
                },
                Subdir {
                    name: "48x48/apps".into(),
                    size: 48,
                    min_size: 44,
                    max_size: 52,
                    scale: 2,
                    kind: DirectoryType::Threshold
                },
            ]
        );
    }

    #[test]
    fn test_size_ranges_contain_nominal_size() {
        let theme = parse(
            "[Icon Theme]\nName=Foo\nComment=x\nDirectories=a,b,c\n[a]\nSize=32\nType=Threshold\n[b]\nSize=24\nType=Scalable\n[c]\nSize=64\n",
        )
        .unwrap();
        assert_eq!(theme.subdirs.len(), 3);
        for subdir in &theme.subdirs {
            assert!(subdir.min_size <= subdir.size && subdir.size <= subdir.max_size, "{:?}", subdir);
        }
        assert_eq!((theme.subdirs[0].min_size, theme.subdirs[0].max_size), (30, 34));
        assert_eq!((theme.subdirs[1].min_size, theme.subdirs[1].max_size), (24, 24));
    }

    #[test]
    fn test_first_group_must_be_icon_theme() {
        assert_eq!(kind_of("[16x16]\nSize=16\n"), ParseErrorKind::FirstGroupNotIconTheme);
        assert!(parse("[icon theme]\nName=Foo\nComment=x\nDirectories=a\n").is_ok());
    }

    #[test]
    fn test_missing_theme_keys() {
        assert_eq!(kind_of("[Icon Theme]\nComment=x\nDirectories=a\n[a]\nSize=1\n"), ParseErrorKind::MissingKey("Name"));
        assert_eq!(kind_of("[Icon Theme]\nName=Foo\nDirectories=a\n"), ParseErrorKind::MissingKey("Comment"));
        assert_eq!(kind_of("[Icon Theme]\nName=Foo\nComment=x\n[a]\n"), ParseErrorKind::MissingKey("Directories"));
    }

    #[test]
    fn test_missing_size_is_fatal() {
        let err = parse("[Icon Theme]\nName=Foo\nComment=x\nDirectories=a,b\n[a]\nType=Fixed\n[b]\nSize=2\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingKey("Size"));
        assert_eq!(err.line, 7);
        assert_eq!(err.group.as_deref(), Some("a"));
    }

    #[test]
    fn test_non_positive_size_is_fatal() {
        assert_eq!(kind_of("[Icon Theme]\nName=Foo\nComment=x\nDirectories=a\n[a]\nSize=0\n"), ParseErrorKind::MissingKey("Size"));
        assert_eq!(kind_of("[Icon Theme]\nName=Foo\nComment=x\nDirectories=a\n[a]\nSize=-16\n"), ParseErrorKind::MissingKey("Size"));
    }

    #[test]
    fn test_threshold_range_saturates() {
        let theme = parse(
            "[Icon Theme]\nName=F\nComment=c\nDirectories=a\n\n[a]\nSize=2147483647\nType=Threshold\n",
        )
        .unwrap();
        assert_eq!((theme.subdirs[0].min_size, theme.subdirs[0].max_size), (i32::MAX - 2, i32::MAX));
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(kind_of(""), ParseErrorKind::EmptyFile);
        assert_eq!(kind_of("# only a comment\n\n"), ParseErrorKind::EmptyFile);
        assert_eq!(kind_of("Name=Foo\n[Icon Theme]\n"), ParseErrorKind::ContentBeforeHeader);
    }

    #[test]
    fn test_soft_errors_keep_parsing() {
        let theme = parse(
            "[Icon Theme]\nName=Foo\nComment=x\nDirectories=a\nthis line is garbage\n[broken\n[a]\nSize=abc\nType=Weird\nSize=16\n",
        )
        .unwrap();
        assert_eq!(theme.subdirs.len(), 1);
        assert_eq!(theme.subdirs[0].size, 16);
        assert_eq!(theme.subdirs[0].kind, DirectoryType::Fixed);
    }

    #[test]
    fn test_unrecognized_groups_are_skipped() {
        let theme = parse("[Icon Theme]\nName=Foo\nComment=x\nDirectories=a\n[X-Extra]\nSize=oops\n[a]\nSize=8\n").unwrap();
        assert_eq!(theme.subdirs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_duplicate_group_headers() {
        let theme = parse(
            "[Icon Theme]\nName=Foo\nComment=x\nDirectories=a,b\n[a]\nSize=16\n[b]\nSize=32\n[a]\nSize=99\n[Icon Theme]\nComment=y\n",
        )
        .unwrap();
        assert_eq!(theme.subdirs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        // keys after the repeated [a] header don't belong to the open subdir
        assert_eq!(theme.subdirs[0].size, 16);
        assert_eq!(theme.subdirs[1].size, 32);
        assert_eq!(theme.comment, "y");
    }

    #[test]
    fn test_whitespace_handling() {
        let theme = parse("  [Icon Theme]  \n  Name =  Foo  \nComment=x\nDirectories= a , b\n[a]\nSize = 16\n").unwrap();
        assert_eq!(theme.name, "Foo");
        assert_eq!(theme.directories, vec!["a", "b"]);
        assert_eq!(theme.subdirs[0].size, 16);
    }
}

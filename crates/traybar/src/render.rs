use std::path::{Path, PathBuf};

use icon_theme::IconThemes;
use tray_engine::{IconPixmap, IconPixmapSet, ItemSnapshot, Status};

/// What an item should be drawn with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemIcon {
    File(PathBuf),
    Pixmap(IconPixmap),
}

/// Pick the icon to draw for an item.
///
/// Items that need attention show their attention icon if they have one. Named icons win over
/// pixmaps as long as the name can be found somewhere.
pub fn item_icon(item: &ItemSnapshot, themes: &IconThemes, size: i32, preferred_theme: Option<&str>) -> Option<ItemIcon> {
    let props = &item.properties;
    let regular = (&props.icon_name, &props.icon_pixmap);
    let attention = (&props.attention_icon_name, &props.attention_icon_pixmap);
    let candidates: Vec<(&Option<String>, &Option<IconPixmapSet>)> =
        if props.parsed_status() == Some(Status::NeedsAttention) { vec![attention, regular] } else { vec![regular] };

    for (name, pixmaps) in candidates {
        let name = name.as_deref().filter(|name| !name.is_empty());
        if let Some(path) = name.and_then(|name| {
            find_named_icon(name, props.icon_theme_path.as_deref(), themes, size, preferred_theme)
        }) {
            return Some(ItemIcon::File(path));
        }
        if let Some(pixmaps) = pixmaps {
            return Some(ItemIcon::Pixmap(pixmaps.best_for(size).clone()));
        }
    }
    None
}

fn find_named_icon(
    name: &str,
    item_theme_path: Option<&str>,
    themes: &IconThemes,
    size: i32,
    preferred_theme: Option<&str>,
) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_owned());
    }
    if let Some(dir) = item_theme_path.filter(|dir| !dir.is_empty()) {
        if let Some(path) = icon_theme::find_icon_file(Path::new(dir), name) {
            return Some(path);
        }
    }
    themes.resolve(name, size, preferred_theme).map(|icon| icon.path)
}

/// Group items by category, keeping their order within a group. Items without a recognised
/// category go last.
pub fn sort_by_category(items: &mut [ItemSnapshot]) {
    items.sort_by_key(|item| {
        let category = item.properties.parsed_category();
        (category.is_none(), category)
    });
}

/// One line describing an item, made of `tag=value` pairs.
pub fn describe(item: &ItemSnapshot, icon: Option<&ItemIcon>) -> String {
    let mut parts: Vec<String> = item.tags().into_iter().map(|(tag, value)| format!("{}={:?}", tag, value)).collect();
    for (tag, pixmaps) in item.pixmap_tags() {
        let sizes: Vec<String> = pixmaps.iter().map(|pixmap| pixmap.size.to_string()).collect();
        parts.push(format!("{}={}", tag, sizes.join(",")));
    }
    match icon {
        Some(ItemIcon::File(path)) => parts.push(format!("icon={:?}", path.display().to_string())),
        Some(ItemIcon::Pixmap(pixmap)) => parts.push(format!("icon=pixmap:{}", pixmap.size)),
        None => parts.push("icon=none".to_owned()),
    }
    parts.join(" ")
}

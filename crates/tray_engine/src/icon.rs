use std::sync::Arc;

/// A single square bitmap from an item's `IconPixmap`-style property.
///
/// Pixels are ARGB32 in host byte order. On the wire they are big endian, see the [Icon format].
///
/// [Icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconPixmap {
    pub size: i32,
    pub pixels: Vec<u32>,
}

impl IconPixmap {
    /// Convert one `(width, height, data)` tuple from the bus.
    ///
    /// Returns None for anything that isn't a non-empty square whose data covers every pixel.
    pub fn from_wire(width: i32, height: i32, data: &[u8]) -> Option<Self> {
        if height <= 0 || width != height {
            log::debug!("dropping non-square pixmap of size {}x{}", width, height);
            return None;
        }
        let pixel_count = (width as usize) * (height as usize);
        if data.len() != pixel_count * 4 {
            log::debug!("dropping {}x{} pixmap carrying {} bytes", width, height, data.len());
            return None;
        }
        let pixels = data.chunks_exact(4).map(|px| u32::from_be_bytes([px[0], px[1], px[2], px[3]])).collect();
        Some(IconPixmap { size: width, pixels })
    }
}

/// All usable bitmaps of one item property.
///
/// Cloning is cheap and shares the pixel data, so a renderer can hold on to a set after the item
/// has replaced or dropped it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconPixmapSet(Arc<[IconPixmap]>);

impl IconPixmapSet {
    /// Build a set from the raw `a(iiay)` property value.
    ///
    /// This function returns None if and only if no pixmap survives filtering.
    pub fn from_wire(pixmaps: Vec<(i32, i32, Vec<u8>)>) -> Option<Self> {
        let total = pixmaps.len();
        let kept: Vec<_> = pixmaps.iter().filter_map(|(w, h, data)| IconPixmap::from_wire(*w, *h, data)).collect();
        if kept.len() != total {
            log::debug!("kept {} of {} pixmaps", kept.len(), total);
        }
        if kept.is_empty() {
            None
        } else {
            Some(IconPixmapSet(kept.into()))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &IconPixmap> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The pixmap closest in size to `size`. The first one wins ties.
    pub fn best_for(&self, size: i32) -> &IconPixmap {
        let mut best = &self.0[0];
        for pixmap in self.0.iter().skip(1) {
            if (pixmap.size - size).abs() < (best.size - size).abs() {
                best = pixmap;
            }
        }
        best
    }
}

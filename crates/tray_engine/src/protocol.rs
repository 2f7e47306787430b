/// Object path the watcher is served at, for both protocol variants.
pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";

/// Object path items are assumed to live at when they only tell us their bus name.
pub const ITEM_OBJECT: &str = "/StatusNotifierItem";

/// Value of the watcher's `ProtocolVersion` property.
pub const PROTOCOL_VERSION: i32 = 0;

/// The two flavours of the StatusNotifier protocol that are in use.
///
/// They are identical apart from the names: the [freedesktop.org] one is the standardised
/// version, the KDE one is what most applications actually talk.
///
/// [freedesktop.org]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// `org.freedesktop.StatusNotifier*`
    Standard,
    /// `org.kde.StatusNotifier*`
    Legacy,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Standard, Protocol::Legacy];

    fn domain(self) -> &'static str {
        match self {
            Protocol::Standard => "freedesktop",
            Protocol::Legacy => "kde",
        }
    }

    /// Well-known bus name of the watcher, which doubles as its interface name.
    pub fn watcher_name(self) -> &'static str {
        match self {
            Protocol::Standard => "org.freedesktop.StatusNotifierWatcher",
            Protocol::Legacy => "org.kde.StatusNotifierWatcher",
        }
    }

    pub fn item_interface(self) -> &'static str {
        match self {
            Protocol::Standard => "org.freedesktop.StatusNotifierItem",
            Protocol::Legacy => "org.kde.StatusNotifierItem",
        }
    }

    /// The well-known name a host of this process registers under.
    pub fn host_name(self, pid: u32) -> String {
        format!("org.{}.StatusNotifierHost-{}", self.domain(), pid)
    }

    pub fn from_watcher_name(name: &str) -> Option<Protocol> {
        Protocol::ALL.into_iter().find(|protocol| protocol.watcher_name() == name)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.domain())
    }
}

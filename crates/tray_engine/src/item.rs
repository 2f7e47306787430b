use crate::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::AbortHandle;

/// Recognised values of [`org.freedesktop.StatusNotifierItem.Status`].
///
/// [`org.freedesktop.StatusNotifierItem.Status`]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/#org.freedesktop.statusnotifieritem.status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The item doesn't convey important information to the user, it can be considered an "idle"
    /// status and is likely that visualizations will chose to hide it.
    Passive,
    /// The item is active, is more important that the item will be shown in some way to the user.
    Active,
    /// The item carries really important information for the user, such as battery charge running
    /// out and is wants to incentive the direct user intervention. Visualizations should emphasize
    /// in some way the items with NeedsAttention status.
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ParseStatusError;

impl std::str::FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "Passive" => Ok(Status::Passive),
            "Active" => Ok(Status::Active),
            "NeedsAttention" => Ok(Status::NeedsAttention),
            _ => Err(ParseStatusError),
        }
    }
}

/// Recognised values of `org.freedesktop.StatusNotifierItem.Category`, in the order trays usually
/// group them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    ApplicationStatus,
    Communications,
    SystemServices,
    Hardware,
}

impl std::str::FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "ApplicationStatus" => Ok(Category::ApplicationStatus),
            "Communications" => Ok(Category::Communications),
            "SystemServices" => Ok(Category::SystemServices),
            "Hardware" => Ok(Category::Hardware),
            _ => Err(()),
        }
    }
}

/// Where on the bus an item lives, derived from the id it was registered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAddress {
    /// The id exactly as the watcher announced it.
    pub watcher_id: String,
    pub service: String,
    pub path: String,
    pub protocol: Protocol,
}

impl ItemAddress {
    /// Parse an id as found in `RegisteredStatusNotifierItems`.
    ///
    /// The format is `{bus}{object_path}` (e.g. `:1.50/org/ayatana/NotificationItem/nm_applet`),
    /// which only the KDE watcher produces, so such items are talked to through the KDE interface.
    /// Anything else is taken to be a bare bus name using the standard interface.
    pub fn parse(id: &str) -> Self {
        match id.find('/') {
            Some(slash) => ItemAddress {
                watcher_id: id.to_owned(),
                service: id[..slash].to_owned(),
                path: id[slash..].to_owned(),
                protocol: Protocol::Legacy,
            },
            None => ItemAddress {
                watcher_id: id.to_owned(),
                service: id.to_owned(),
                path: ITEM_OBJECT.to_owned(),
                protocol: Protocol::Standard,
            },
        }
    }

    /// Unique names can be checked against a signal's sender directly.
    pub fn has_unique_service(&self) -> bool {
        self.service.starts_with(':')
    }
}

/// The item properties the tray keeps track of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Category,
    Id,
    Title,
    Status,
    IconName,
    IconPixmap,
    AttentionIconName,
    AttentionIconPixmap,
    OverlayIconName,
    OverlayIconPixmap,
    ItemIsMenu,
    Menu,
    IconThemePath,
}

/// How a property is encoded on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    ObjectPath,
    Flag,
    Pixmaps,
}

impl Property {
    /// Everything fetched when an item first appears.
    pub const INITIAL: [Property; 12] = [
        Property::Category,
        Property::Id,
        Property::Title,
        Property::Status,
        Property::IconName,
        Property::IconPixmap,
        Property::AttentionIconName,
        Property::AttentionIconPixmap,
        Property::OverlayIconName,
        Property::OverlayIconPixmap,
        Property::ItemIsMenu,
        Property::Menu,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::Category => "Category",
            Property::Id => "Id",
            Property::Title => "Title",
            Property::Status => "Status",
            Property::IconName => "IconName",
            Property::IconPixmap => "IconPixmap",
            Property::AttentionIconName => "AttentionIconName",
            Property::AttentionIconPixmap => "AttentionIconPixmap",
            Property::OverlayIconName => "OverlayIconName",
            Property::OverlayIconPixmap => "OverlayIconPixmap",
            Property::ItemIsMenu => "ItemIsMenu",
            Property::Menu => "Menu",
            Property::IconThemePath => "IconThemePath",
        }
    }

    pub fn kind(self) -> PropertyKind {
        match self {
            Property::IconPixmap | Property::AttentionIconPixmap | Property::OverlayIconPixmap => PropertyKind::Pixmaps,
            Property::ItemIsMenu => PropertyKind::Flag,
            Property::Menu => PropertyKind::ObjectPath,
            _ => PropertyKind::Text,
        }
    }
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    Flag(bool),
    Pixmaps(Option<IconPixmapSet>),
}

/// Last known property values of an item. Fields stay None until the first successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemProperties {
    pub category: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub icon_name: Option<String>,
    pub icon_pixmap: Option<IconPixmapSet>,
    pub attention_icon_name: Option<String>,
    pub attention_icon_pixmap: Option<IconPixmapSet>,
    pub overlay_icon_name: Option<String>,
    pub overlay_icon_pixmap: Option<IconPixmapSet>,
    pub item_is_menu: bool,
    pub menu: Option<String>,
    pub icon_theme_path: Option<String>,
}

impl ItemProperties {
    /// Store a freshly fetched value, replacing the previous one.
    pub fn apply(&mut self, property: Property, value: PropertyValue) -> Result<()> {
        let text = |slot: &mut Option<String>, value: PropertyValue| match value {
            PropertyValue::Text(text) => {
                *slot = Some(text);
                Ok(())
            }
            _ => Err(Error::UnexpectedValue(property.name())),
        };
        let pixmaps = |slot: &mut Option<IconPixmapSet>, value: PropertyValue| match value {
            PropertyValue::Pixmaps(set) => {
                *slot = set;
                Ok(())
            }
            _ => Err(Error::UnexpectedValue(property.name())),
        };
        match property {
            Property::Category => text(&mut self.category, value),
            Property::Id => text(&mut self.id, value),
            Property::Title => text(&mut self.title, value),
            Property::Status => text(&mut self.status, value),
            Property::IconName => text(&mut self.icon_name, value),
            Property::AttentionIconName => text(&mut self.attention_icon_name, value),
            Property::OverlayIconName => text(&mut self.overlay_icon_name, value),
            Property::Menu => text(&mut self.menu, value),
            Property::IconThemePath => text(&mut self.icon_theme_path, value),
            Property::IconPixmap => pixmaps(&mut self.icon_pixmap, value),
            Property::AttentionIconPixmap => pixmaps(&mut self.attention_icon_pixmap, value),
            Property::OverlayIconPixmap => pixmaps(&mut self.overlay_icon_pixmap, value),
            Property::ItemIsMenu => match value {
                PropertyValue::Flag(flag) => {
                    self.item_is_menu = flag;
                    Ok(())
                }
                _ => Err(Error::UnexpectedValue(property.name())),
            },
        }
    }

    pub fn parsed_status(&self) -> Option<Status> {
        self.status.as_deref()?.parse().ok()
    }

    pub fn parsed_category(&self) -> Option<Category> {
        self.category.as_deref()?.parse().ok()
    }
}

/// Item signals that invalidate cached properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemSignal {
    NewTitle,
    NewIcon,
    NewAttentionIcon,
    NewOverlayIcon,
    NewStatus,
}

impl ItemSignal {
    pub const ALL: [ItemSignal; 5] = [
        ItemSignal::NewTitle,
        ItemSignal::NewIcon,
        ItemSignal::NewAttentionIcon,
        ItemSignal::NewOverlayIcon,
        ItemSignal::NewStatus,
    ];

    pub fn member(self) -> &'static str {
        match self {
            ItemSignal::NewTitle => "NewTitle",
            ItemSignal::NewIcon => "NewIcon",
            ItemSignal::NewAttentionIcon => "NewAttentionIcon",
            ItemSignal::NewOverlayIcon => "NewOverlayIcon",
            ItemSignal::NewStatus => "NewStatus",
        }
    }
}

/// Identifies one in-flight property fetch, so late completions of superseded fetches can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u64);

impl OpId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        OpId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct PendingOp {
    op: OpId,
    handle: AbortHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Initial fetches are still outstanding.
    Populating,
    Live,
}

/// Local proxy for one registered item.
///
/// Owns every fetch and signal subscription issued on the item's behalf; dropping it cancels them.
#[derive(Debug)]
pub struct SniProxy {
    pub address: ItemAddress,
    pub properties: ItemProperties,
    /// Creation order, used to keep a stable rendering order.
    pub(crate) seq: u64,
    state: ItemState,
    pending: HashMap<Property, PendingOp>,
    subscriptions: Vec<AbortHandle>,
}

impl SniProxy {
    /// Create the proxy and start fetching and listening.
    pub fn create(address: ItemAddress, seq: u64, dispatcher: &dyn Dispatcher) -> Self {
        let mut item = SniProxy {
            address,
            properties: ItemProperties::default(),
            seq,
            state: ItemState::Populating,
            pending: HashMap::new(),
            subscriptions: Vec::new(),
        };
        for property in Property::INITIAL {
            item.fetch(property, dispatcher);
        }
        if item.address.protocol == Protocol::Legacy {
            item.fetch(Property::IconThemePath, dispatcher);
        }
        for signal in ItemSignal::ALL {
            let handle = dispatcher.subscribe(&item.address, signal);
            item.subscriptions.push(handle);
        }
        item
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Issue a fetch, superseding any fetch of the same property that's still in flight.
    pub fn fetch(&mut self, property: Property, dispatcher: &dyn Dispatcher) {
        let op = OpId::next();
        let handle = dispatcher.fetch_property(&self.address, property, op);
        if let Some(old) = self.pending.insert(property, PendingOp { op, handle }) {
            old.handle.abort();
        }
    }

    /// Handle the completion of a fetch. Returns whether anything visible changed.
    pub fn complete(&mut self, property: Property, op: OpId, result: Result<PropertyValue>) -> bool {
        match self.pending.get(&property) {
            Some(pending) if pending.op == op => {
                self.pending.remove(&property);
            }
            _ => {
                log::trace!("ignoring superseded fetch of {} for {}", property.name(), self.address.watcher_id);
                return false;
            }
        }
        self.settle();

        match result.and_then(|value| self.properties.apply(property, value)) {
            Ok(()) => true,
            Err(e) if property == Property::IconThemePath && e.is_unknown_property() => {
                log::debug!("{} has no {}", self.address.watcher_id, property.name());
                false
            }
            Err(e) => {
                log::error!("Failed to get {} of {}: {}", property.name(), self.address.watcher_id, e);
                false
            }
        }
    }

    /// React to one of the item's change signals.
    ///
    /// `status` is the payload of a `NewStatus` signal, if its sender could be verified.
    pub fn handle_signal(&mut self, signal: ItemSignal, status: Option<String>, dispatcher: &dyn Dispatcher) -> bool {
        log::debug!("{} from {}", signal.member(), self.address.watcher_id);
        let refetch: &[Property] = match signal {
            ItemSignal::NewTitle => &[Property::Title],
            ItemSignal::NewIcon if self.address.protocol == Protocol::Legacy => {
                &[Property::IconName, Property::IconPixmap, Property::IconThemePath]
            }
            ItemSignal::NewIcon => &[Property::IconName, Property::IconPixmap],
            ItemSignal::NewAttentionIcon => &[Property::AttentionIconName, Property::AttentionIconPixmap],
            ItemSignal::NewOverlayIcon => &[Property::OverlayIconName, Property::OverlayIconPixmap],
            ItemSignal::NewStatus => match status {
                Some(status) => {
                    if let Some(stale) = self.pending.remove(&Property::Status) {
                        stale.handle.abort();
                    }
                    self.settle();
                    self.properties.status = Some(status);
                    return true;
                }
                None => &[Property::Status],
            },
        };
        for property in refetch {
            self.fetch(*property, dispatcher);
        }
        false
    }

    /// An item is live once nothing is in flight anymore, and stays live from then on.
    fn settle(&mut self) {
        if self.pending.is_empty() {
            self.state = ItemState::Live;
        }
    }
}

impl Drop for SniProxy {
    fn drop(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.handle.abort();
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{Call, RecordingDispatcher};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            ItemAddress::parse(":1.50/org/ayatana/NotificationItem/nm_applet"),
            ItemAddress {
                watcher_id: ":1.50/org/ayatana/NotificationItem/nm_applet".to_owned(),
                service: ":1.50".to_owned(),
                path: "/org/ayatana/NotificationItem/nm_applet".to_owned(),
                protocol: Protocol::Legacy,
            }
        );
        assert_eq!(
            ItemAddress::parse("org.example.App"),
            ItemAddress {
                watcher_id: "org.example.App".to_owned(),
                service: "org.example.App".to_owned(),
                path: "/StatusNotifierItem".to_owned(),
                protocol: Protocol::Standard,
            }
        );
        assert!(ItemAddress::parse(":1.9/StatusNotifierItem").has_unique_service());
        assert!(!ItemAddress::parse("org.example.App").has_unique_service());
    }

    #[test]
    fn test_status_and_category() {
        assert_eq!("NeedsAttention".parse(), Ok(Status::NeedsAttention));
        assert_eq!("needsattention".parse::<Status>(), Err(ParseStatusError));
        assert_eq!("Hardware".parse(), Ok(Category::Hardware));
        let props = ItemProperties { status: Some("Active".to_owned()), ..Default::default() };
        assert_eq!(props.parsed_status(), Some(Status::Active));
        assert_eq!(props.parsed_category(), None);
    }

    #[test]
    fn test_create_fetches_and_subscribes() {
        let dispatcher = RecordingDispatcher::default();
        let item = SniProxy::create(ItemAddress::parse(":1.5/StatusNotifierItem"), 0, &dispatcher);
        assert_eq!(item.state(), ItemState::Populating);
        // legacy items additionally fetch IconThemePath
        assert_eq!(item.pending_count(), 13);
        let subscriptions = dispatcher.calls().iter().filter(|c| matches!(c, Call::Subscribe(..))).count();
        assert_eq!(subscriptions, 5);

        let dispatcher = RecordingDispatcher::default();
        let item = SniProxy::create(ItemAddress::parse("org.example.App"), 0, &dispatcher);
        assert_eq!(item.pending_count(), 12);
    }

    #[test]
    fn test_completion_and_supersession() {
        let dispatcher = RecordingDispatcher::default();
        let mut item = SniProxy::create(ItemAddress::parse("org.example.App"), 0, &dispatcher);
        let first = dispatcher.last_fetch(Property::Title).unwrap();
        item.fetch(Property::Title, &dispatcher);
        let second = dispatcher.last_fetch(Property::Title).unwrap();
        assert!(dispatcher.handle_for(first).is_aborted());

        assert!(!item.complete(Property::Title, first, Ok(PropertyValue::Text("old".to_owned()))));
        assert_eq!(item.properties.title, None);
        assert!(item.complete(Property::Title, second, Ok(PropertyValue::Text("new".to_owned()))));
        assert_eq!(item.properties.title.as_deref(), Some("new"));
        // a second completion with the same id is stale as well
        assert!(!item.complete(Property::Title, second, Ok(PropertyValue::Text("again".to_owned()))));
    }

    #[test]
    fn test_failed_fetch_keeps_old_value() {
        let dispatcher = RecordingDispatcher::default();
        let mut item = SniProxy::create(ItemAddress::parse("org.example.App"), 0, &dispatcher);
        let op = dispatcher.last_fetch(Property::IconName).unwrap();
        assert!(item.complete(Property::IconName, op, Ok(PropertyValue::Text("one".to_owned()))));

        item.handle_signal(ItemSignal::NewIcon, None, &dispatcher);
        let op = dispatcher.last_fetch(Property::IconName).unwrap();
        let failure = Err(Error::Fdo(zbus::fdo::Error::Failed("gone".to_owned())));
        assert!(!item.complete(Property::IconName, op, failure));
        assert_eq!(item.properties.icon_name.as_deref(), Some("one"));
    }

    #[test]
    fn test_live_once_populated() {
        let dispatcher = RecordingDispatcher::default();
        let mut item = SniProxy::create(ItemAddress::parse("org.example.App"), 0, &dispatcher);
        for property in Property::INITIAL {
            let op = dispatcher.last_fetch(property).unwrap();
            let missing = Err(Error::Fdo(zbus::fdo::Error::UnknownProperty(property.name().to_owned())));
            item.complete(property, op, missing);
        }
        assert_eq!(item.state(), ItemState::Live);
    }

    #[test]
    fn test_signals_refetch() {
        let dispatcher = RecordingDispatcher::default();
        let mut item = SniProxy::create(ItemAddress::parse(":1.5/StatusNotifierItem"), 0, &dispatcher);
        dispatcher.clear();

        item.handle_signal(ItemSignal::NewIcon, None, &dispatcher);
        assert_eq!(
            dispatcher.fetched_properties(),
            vec![Property::IconName, Property::IconPixmap, Property::IconThemePath]
        );
        dispatcher.clear();

        item.handle_signal(ItemSignal::NewTitle, None, &dispatcher);
        assert_eq!(dispatcher.fetched_properties(), vec![Property::Title]);
        dispatcher.clear();

        item.handle_signal(ItemSignal::NewOverlayIcon, None, &dispatcher);
        assert_eq!(dispatcher.fetched_properties(), vec![Property::OverlayIconName, Property::OverlayIconPixmap]);
    }

    #[test]
    fn test_status_signal() {
        let dispatcher = RecordingDispatcher::default();
        let mut item = SniProxy::create(ItemAddress::parse("org.example.App"), 0, &dispatcher);
        let pending_status = dispatcher.last_fetch(Property::Status).unwrap();
        dispatcher.clear();

        // a verified payload is applied as-is and beats the initial fetch
        assert!(item.handle_signal(ItemSignal::NewStatus, Some("NeedsAttention".to_owned()), &dispatcher));
        assert_eq!(item.properties.status.as_deref(), Some("NeedsAttention"));
        assert!(dispatcher.fetched_properties().is_empty());
        assert!(!item.complete(Property::Status, pending_status, Ok(PropertyValue::Text("Passive".to_owned()))));

        // an unverified one makes us ask the item
        assert!(!item.handle_signal(ItemSignal::NewStatus, None, &dispatcher));
        assert_eq!(dispatcher.fetched_properties(), vec![Property::Status]);
    }

    #[test]
    fn test_status_signal_completes_population() {
        let dispatcher = RecordingDispatcher::default();
        let mut item = SniProxy::create(ItemAddress::parse("org.example.App"), 0, &dispatcher);
        for property in Property::INITIAL.into_iter().filter(|p| *p != Property::Status) {
            let op = dispatcher.last_fetch(property).unwrap();
            let missing = Err(Error::Fdo(zbus::fdo::Error::UnknownProperty(property.name().to_owned())));
            item.complete(property, op, missing);
        }
        assert_eq!(item.state(), ItemState::Populating);
        assert_eq!(item.pending_count(), 1);

        item.handle_signal(ItemSignal::NewStatus, Some("Active".to_owned()), &dispatcher);
        assert_eq!(item.pending_count(), 0);
        assert_eq!(item.state(), ItemState::Live);
    }

    #[test]
    fn test_drop_cancels_everything() {
        let dispatcher = RecordingDispatcher::default();
        let item = SniProxy::create(ItemAddress::parse("org.example.App"), 0, &dispatcher);
        drop(item);
        assert!(dispatcher.handles().iter().all(|handle| handle.is_aborted()));
    }

    #[test]
    fn test_apply_type_mismatch() {
        let mut props = ItemProperties::default();
        assert!(props.apply(Property::Title, PropertyValue::Flag(true)).is_err());
        props.apply(Property::ItemIsMenu, PropertyValue::Flag(true)).unwrap();
        assert!(props.item_is_menu);
        props.apply(Property::IconPixmap, PropertyValue::Pixmaps(None)).unwrap();
        assert_eq!(props.icon_pixmap, None);
    }
}

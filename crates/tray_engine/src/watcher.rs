use crate::*;

use std::sync::{Arc, Mutex};

use zbus::object_server::{Interface, SignalContext};

/// Bookkeeping of one watcher: which items and hosts are registered with it.
///
/// Kept separate from the bus objects so that losing a service can be handled from the engine's
/// worker, which sees every owner change anyway.
#[derive(Debug)]
pub struct Registry {
    protocol: Protocol,
    items: Vec<String>,
    hosts: Vec<String>,
}

/// What [`Registry::service_lost`] dropped.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Lost {
    pub items: Vec<String>,
    pub hosts: usize,
}

impl Registry {
    pub fn new(protocol: Protocol) -> Self {
        Registry { protocol, items: Vec::new(), hosts: Vec::new() }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn has_hosts(&self) -> bool {
        !self.hosts.is_empty()
    }

    /// Returns false if the item was already registered.
    pub fn register_item(&mut self, id: &str) -> bool {
        if self.items.iter().any(|item| item == id) {
            return false;
        }
        self.items.push(id.to_owned());
        true
    }

    /// Returns false if the host was already registered.
    pub fn register_host(&mut self, service: &str) -> bool {
        if self.hosts.iter().any(|host| host == service) {
            return false;
        }
        self.hosts.push(service.to_owned());
        true
    }

    /// Forget everything belonging to a service that left the bus.
    ///
    /// Item ids of the KDE variant carry their object path, so there every id starting with the
    /// service's name is dropped. Otherwise only the first exact match is.
    pub fn service_lost(&mut self, service: &str) -> Lost {
        let mut lost = Lost::default();
        match self.protocol {
            Protocol::Standard => {
                if let Some(pos) = self.items.iter().position(|item| item == service) {
                    lost.items.push(self.items.remove(pos));
                }
            }
            Protocol::Legacy => {
                let (gone, kept) = std::mem::take(&mut self.items).into_iter().partition(|item| item.starts_with(service));
                self.items = kept;
                lost.items = gone;
            }
        }
        let hosts_before = self.hosts.len();
        self.hosts.retain(|host| host != service);
        lost.hosts = hosts_before - self.hosts.len();
        lost
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.hosts.clear();
    }
}

/// Turn what an item passed to `RegisterStatusNotifierItem` into the id the watcher tracks.
///
/// The KDE watcher always tracks `{bus}{object_path}`: items that only send their object path get
/// the sender's unique name prepended, and bare bus names get the default object path appended.
/// The freedesktop.org watcher keeps whatever it was given.
pub fn normalize_item_id(protocol: Protocol, service: &str, sender: Option<&str>) -> Option<String> {
    match protocol {
        Protocol::Standard => Some(service.to_owned()),
        Protocol::Legacy if service.starts_with('/') => sender.map(|sender| format!("{}{}", sender, service)),
        Protocol::Legacy => Some(format!("{}{}", service, ITEM_OBJECT)),
    }
}

/// Generates the bus object of one watcher variant. Both variants are identical apart from the
/// interface name.
macro_rules! watcher_interface {
    ($(#[$meta:meta])* $name:ident, $protocol:expr, $iface:tt) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            // Intentionally using std::sync::Mutex instead of tokio's async mutex, since we don't
            // need to hold the mutex across an await.
            //
            // See <https://docs.rs/tokio/latest/tokio/sync/struct.Mutex.html#which-kind-of-mutex-should-you-use>
            registry: Arc<Mutex<Registry>>,
        }

        #[zbus::interface(name = $iface)]
        impl $name {
            /// RegisterStatusNotifierItem method
            async fn register_status_notifier_item(
                &self,
                service: &str,
                #[zbus(header)] hdr: zbus::message::Header<'_>,
                #[zbus(signal_context)] ctxt: SignalContext<'_>,
            ) -> zbus::fdo::Result<()> {
                let sender = hdr.sender().map(|sender| sender.as_str());
                let Some(id) = normalize_item_id($protocol, service, sender) else {
                    log::warn!("unknown sender for item {}", service);
                    return Err(zbus::fdo::Error::InvalidArgs("Unknown bus address".into()));
                };

                let added = self.registry.lock().unwrap().register_item(&id); // unwrap: mutex poisoning is okay
                if !added {
                    log::debug!("new item: {} (duplicate)", id);
                    return Ok(());
                }
                log::info!("new item: {}", id);

                self.registered_status_notifier_items_changed(&ctxt).await?;
                Self::status_notifier_item_registered(&ctxt, &id).await?;
                Ok(())
            }

            /// RegisterStatusNotifierHost method
            async fn register_status_notifier_host(
                &self,
                service: &str,
                #[zbus(signal_context)] ctxt: SignalContext<'_>,
            ) -> zbus::fdo::Result<()> {
                let (added, first) = {
                    let mut registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
                    let added = registry.register_host(service);
                    (added, added && registry.hosts.len() == 1)
                };
                if !added {
                    return Ok(());
                }
                log::info!("new host: {}", service);

                if first {
                    self.is_status_notifier_host_registered_changed(&ctxt).await?;
                }
                Self::status_notifier_host_registered(&ctxt).await?;
                Ok(())
            }

            /// StatusNotifierItemRegistered signal
            #[zbus(signal)]
            async fn status_notifier_item_registered(ctxt: &SignalContext<'_>, service: &str) -> zbus::Result<()>;

            /// StatusNotifierItemUnregistered signal
            #[zbus(signal)]
            async fn status_notifier_item_unregistered(ctxt: &SignalContext<'_>, service: &str) -> zbus::Result<()>;

            /// StatusNotifierHostRegistered signal
            #[zbus(signal)]
            async fn status_notifier_host_registered(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

            /// RegisteredStatusNotifierItems property
            #[zbus(property)]
            async fn registered_status_notifier_items(&self) -> Vec<String> {
                self.registry.lock().unwrap().items().to_vec() // unwrap: mutex poisoning is okay
            }

            /// IsStatusNotifierHostRegistered property
            #[zbus(property)]
            async fn is_status_notifier_host_registered(&self) -> bool {
                self.registry.lock().unwrap().has_hosts() // unwrap: mutex poisoning is okay
            }

            /// ProtocolVersion property
            #[zbus(property)]
            fn protocol_version(&self) -> i32 {
                PROTOCOL_VERSION
            }
        }

        impl $name {
            /// Announce an item that went away, without requiring `self`.
            async fn announce_item_lost(ctxt: &SignalContext<'_>, id: &str) -> zbus::Result<()> {
                zbus::fdo::Properties::properties_changed(
                    ctxt,
                    Self::name(),
                    &std::collections::HashMap::new(),
                    &["RegisteredStatusNotifierItems"],
                )
                .await?;
                Self::status_notifier_item_unregistered(ctxt, id).await
            }

            /// Equivalent to `is_status_notifier_host_registered_invalidate`, but without requiring
            /// `self`.
            async fn is_status_notifier_host_registered_refresh(ctxt: &SignalContext<'_>) -> zbus::Result<()> {
                zbus::fdo::Properties::properties_changed(
                    ctxt,
                    Self::name(),
                    &std::collections::HashMap::new(),
                    &["IsStatusNotifierHostRegistered"],
                )
                .await
            }
        }
    };
}

watcher_interface!(
    /// An instance of [`org.freedesktop.StatusNotifierWatcher`].
    ///
    /// [`org.freedesktop.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
    StandardWatcher,
    Protocol::Standard,
    "org.freedesktop.StatusNotifierWatcher"
);

watcher_interface!(
    /// An instance of `org.kde.StatusNotifierWatcher`, which is what most items look for.
    LegacyWatcher,
    Protocol::Legacy,
    "org.kde.StatusNotifierWatcher"
);

/// A watcher that is being served on a connection.
///
/// It only tracks what tray items and trays exist, and doesn't have any logic for displaying items.
#[derive(Debug, Clone)]
pub struct Watcher {
    pub protocol: Protocol,
    pub registry: Arc<Mutex<Registry>>,
}

impl Watcher {
    /// Serve a watcher of the given variant on `con` and claim its well-known name.
    ///
    /// Fails with [`Error::WatcherNameTaken`] if somebody else already provides it.
    pub async fn attach_to(con: &zbus::Connection, protocol: Protocol) -> Result<Watcher> {
        let registry = Arc::new(Mutex::new(Registry::new(protocol)));
        let server = con.object_server();
        let added = match protocol {
            Protocol::Standard => server.at(WATCHER_OBJECT, StandardWatcher { registry: registry.clone() }).await?,
            Protocol::Legacy => server.at(WATCHER_OBJECT, LegacyWatcher { registry: registry.clone() }).await?,
        };
        if !added {
            return Err(zbus::Error::Failure(format!(
                "Object already exists at {} on this connection -- is {} already running?",
                WATCHER_OBJECT,
                protocol.watcher_name()
            ))
            .into());
        }

        let watcher = Watcher { protocol, registry };
        watcher.acquire_name(con).await?;
        Ok(watcher)
    }

    /// Claim the watcher's well-known name, without queueing up behind an existing owner.
    pub async fn acquire_name(&self, con: &zbus::Connection) -> Result<()> {
        let name = self.protocol.watcher_name();
        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
        use zbus::fdo::RequestNameReply::*;
        match con.request_name_with_flags(name, flags.into_iter().collect()).await {
            Ok(PrimaryOwner) | Ok(AlreadyOwner) => {
                log::info!("acquired {}", name);
                Ok(())
            }
            Ok(Exists) | Ok(InQueue) | Err(zbus::Error::NameTaken) => {
                Err(Error::WatcherNameTaken { name: name.to_owned() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tell listeners that an item is gone.
    pub async fn announce_item_lost(&self, con: &zbus::Connection, id: &str) -> zbus::Result<()> {
        let ctxt = SignalContext::new(con, WATCHER_OBJECT)?;
        match self.protocol {
            Protocol::Standard => StandardWatcher::announce_item_lost(&ctxt, id).await,
            Protocol::Legacy => LegacyWatcher::announce_item_lost(&ctxt, id).await,
        }
    }

    /// Tell listeners that the last host is gone.
    pub async fn announce_hosts_lost(&self, con: &zbus::Connection) -> zbus::Result<()> {
        let ctxt = SignalContext::new(con, WATCHER_OBJECT)?;
        match self.protocol {
            Protocol::Standard => StandardWatcher::is_status_notifier_host_registered_refresh(&ctxt).await,
            Protocol::Legacy => LegacyWatcher::is_status_notifier_host_registered_refresh(&ctxt).await,
        }
    }
}

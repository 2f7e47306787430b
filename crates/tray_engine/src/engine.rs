use crate::*;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{AbortHandle, Abortable};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Everything that can happen to the tray, as seen by the worker.
#[derive(Debug)]
pub enum Event {
    ItemRegistered {
        id: String,
    },
    ItemUnregistered {
        id: String,
    },
    /// Reply to the initial `RegisteredStatusNotifierItems` query of a host.
    RegisteredItems {
        protocol: Protocol,
        ids: Vec<String>,
    },
    NameOwnerChanged {
        name: String,
        old_owner: Option<String>,
        new_owner: Option<String>,
    },
    PropertyFetched {
        id: String,
        property: Property,
        op: OpId,
        result: Result<PropertyValue>,
    },
    ItemSignal {
        id: String,
        signal: ItemSignal,
        /// Verified payload of `NewStatus`.
        status: Option<String>,
    },
}

/// Side effects the tray state asks for while handling events.
///
/// Everything here runs in the background and reports back through [`Event`]s, so handling an
/// event never waits on the bus.
pub trait Dispatcher {
    fn fetch_property(&self, item: &ItemAddress, property: Property, op: OpId) -> AbortHandle;
    fn subscribe(&self, item: &ItemAddress, signal: ItemSignal) -> AbortHandle;
    fn register_host(&self, protocol: Protocol);
    fn announce_item_lost(&self, watcher: &Watcher, id: &str);
    fn announce_hosts_lost(&self, watcher: &Watcher);
    fn reacquire_watcher(&self, watcher: &Watcher);
}

/// What a renderer gets to see of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSnapshot {
    pub watcher_id: String,
    pub protocol: Protocol,
    pub properties: ItemProperties,
}

impl ItemSnapshot {
    /// The textual attributes that are set, under their output tag names.
    pub fn tags(&self) -> Vec<(&'static str, &str)> {
        let props = &self.properties;
        let mut tags = vec![("watcher-id", self.watcher_id.as_str())];
        for (tag, value) in [
            ("title", &props.title),
            ("status", &props.status),
            ("category", &props.category),
            ("icon-name", &props.icon_name),
            ("attention-icon-name", &props.attention_icon_name),
            ("overlay-icon-name", &props.overlay_icon_name),
        ] {
            if let Some(value) = value {
                tags.push((tag, value.as_str()));
            }
        }
        tags
    }

    /// The pixmap attributes that are set, under their output tag names.
    pub fn pixmap_tags(&self) -> Vec<(&'static str, &IconPixmapSet)> {
        let props = &self.properties;
        [
            ("icon-pixmap", &props.icon_pixmap),
            ("attention-icon-pixmap", &props.attention_icon_pixmap),
            ("overlay-icon-pixmap", &props.overlay_icon_pixmap),
        ]
        .into_iter()
        .filter_map(|(tag, set)| Some((tag, set.as_ref()?)))
        .collect()
    }
}

/// All state shared between the worker and renderers.
#[derive(Debug)]
pub struct TrayState {
    items: HashMap<String, SniProxy>,
    watchers: Vec<Watcher>,
    hosts: Vec<Protocol>,
    next_seq: u64,
}

impl TrayState {
    pub fn new(watchers: Vec<Watcher>, hosts: Vec<Protocol>) -> Self {
        TrayState { items: HashMap::new(), watchers, hosts, next_seq: 0 }
    }

    pub fn item(&self, id: &str) -> Option<&SniProxy> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy out every item, in the order they appeared.
    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        let mut items: Vec<_> = self.items.values().collect();
        items.sort_by_key(|item| item.seq);
        items
            .into_iter()
            .map(|item| ItemSnapshot {
                watcher_id: item.address.watcher_id.clone(),
                protocol: item.address.protocol,
                properties: item.properties.clone(),
            })
            .collect()
    }

    /// Drop all items, cancelling everything they have in flight.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Apply one event. Returns whether the tray needs to be redrawn.
    pub fn handle(&mut self, event: Event, dispatcher: &dyn Dispatcher) -> bool {
        match event {
            Event::ItemRegistered { id } => {
                self.add_item(&id, dispatcher);
                false
            }
            Event::RegisteredItems { protocol, ids } => {
                log::debug!("{} items already registered with {}", ids.len(), protocol.watcher_name());
                for id in ids {
                    self.add_item(&id, dispatcher);
                }
                false
            }
            Event::ItemUnregistered { id } => self.remove_item(&id),
            Event::NameOwnerChanged { name, old_owner, new_owner } => {
                let mut redraw = false;
                if new_owner.is_none() {
                    self.service_lost(&name, dispatcher);
                    let gone: Vec<_> = self
                        .items
                        .values()
                        .filter(|item| item.address.service == name)
                        .map(|item| item.address.watcher_id.clone())
                        .collect();
                    for id in gone {
                        redraw |= self.remove_item(&id);
                    }
                } else if old_owner.is_none() {
                    if let Some(protocol) = Protocol::from_watcher_name(&name) {
                        if self.hosts.contains(&protocol) {
                            log::info!("{} appeared", name);
                            dispatcher.register_host(protocol);
                        }
                    }
                }
                redraw
            }
            Event::PropertyFetched { id, property, op, result } => match self.items.get_mut(&id) {
                Some(item) => item.complete(property, op, result),
                None => false,
            },
            Event::ItemSignal { id, signal, status } => match self.items.get_mut(&id) {
                Some(item) => item.handle_signal(signal, status, dispatcher),
                None => false,
            },
        }
    }

    fn add_item(&mut self, id: &str, dispatcher: &dyn Dispatcher) {
        if self.items.contains_key(id) {
            log::debug!("already tracking {}", id);
            return;
        }
        log::info!("new item: {}", id);
        let item = SniProxy::create(ItemAddress::parse(id), self.next_seq, dispatcher);
        self.next_seq += 1;
        self.items.insert(id.to_owned(), item);
    }

    fn remove_item(&mut self, id: &str) -> bool {
        match self.items.remove(id) {
            Some(_) => {
                log::info!("gone item: {}", id);
                true
            }
            None => false,
        }
    }

    /// Let every watcher forget about a service that left the bus, and bring back our own
    /// watchers if it was one of them.
    fn service_lost(&mut self, service: &str, dispatcher: &dyn Dispatcher) {
        for watcher in &self.watchers {
            let (lost, hosts_left) = {
                let mut registry = watcher.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
                (registry.service_lost(service), registry.has_hosts())
            };
            for id in &lost.items {
                log::info!("{} lost item {}", watcher.protocol.watcher_name(), id);
                dispatcher.announce_item_lost(watcher, id);
            }
            if lost.hosts > 0 && !hosts_left {
                dispatcher.announce_hosts_lost(watcher);
            }

            if service == watcher.protocol.watcher_name() {
                log::warn!("lost {}, recreating the watcher", service);
                watcher.registry.lock().unwrap().clear(); // unwrap: mutex poisoning is okay
                dispatcher.reacquire_watcher(watcher);
            }
        }
    }
}

/// Handle events until cancelled. Everything that is queued up gets handled in one go, followed by
/// at most one redraw request.
pub async fn run_worker<D>(
    mut events: mpsc::UnboundedReceiver<Event>,
    state: Arc<Mutex<TrayState>>,
    dispatcher: D,
    cancel: CancellationToken,
    redraw: watch::Sender<u64>,
) where
    D: Dispatcher + Send + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let needs_redraw = {
                    let mut state = state.lock().unwrap(); // unwrap: mutex poisoning is okay
                    let mut needs_redraw = state.handle(event, &dispatcher);
                    while let Ok(event) = events.try_recv() {
                        needs_redraw |= state.handle(event, &dispatcher);
                    }
                    needs_redraw
                };
                if needs_redraw {
                    redraw.send_modify(|generation| *generation += 1);
                }
            }
        }
    }
    log::debug!("tray worker stopped");
}

/// The [`Dispatcher`] that actually talks to the bus.
#[derive(Debug, Clone)]
struct BusDispatcher {
    con: zbus::Connection,
    events: mpsc::UnboundedSender<Event>,
    hosts: Vec<(Protocol, String)>,
}

impl BusDispatcher {
    fn spawn_abortable(&self, fut: impl Future<Output = ()> + Send + 'static) -> AbortHandle {
        let (handle, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(fut, registration));
        handle
    }
}

impl Dispatcher for BusDispatcher {
    fn fetch_property(&self, item: &ItemAddress, property: Property, op: OpId) -> AbortHandle {
        let con = self.con.clone();
        let events = self.events.clone();
        let item = item.clone();
        self.spawn_abortable(async move {
            let result = dbus::get_property(&con, &item, property).await;
            let _ = events.send(Event::PropertyFetched { id: item.watcher_id, property, op, result });
        })
    }

    fn subscribe(&self, item: &ItemAddress, signal: ItemSignal) -> AbortHandle {
        let con = self.con.clone();
        let events = self.events.clone();
        let item = item.clone();
        self.spawn_abortable(async move {
            let id = item.watcher_id.clone();
            if let Err(e) = dbus::forward_item_signal(con, item, signal, events).await {
                log::error!("Failed to listen to {} of {}: {}", signal.member(), id, e);
            }
        })
    }

    fn register_host(&self, protocol: Protocol) {
        let Some((_, service)) = self.hosts.iter().find(|(p, _)| *p == protocol) else {
            return;
        };
        let con = self.con.clone();
        let events = self.events.clone();
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = host::register_with_watcher(&con, protocol, &service, &events).await {
                log::error!("Failed to register {} with {}: {}", service, protocol.watcher_name(), e);
            }
        });
    }

    fn announce_item_lost(&self, watcher: &Watcher, id: &str) {
        let con = self.con.clone();
        let watcher = watcher.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = watcher.announce_item_lost(&con, &id).await {
                log::error!("failed to signal Watcher: {}", e);
            }
        });
    }

    fn announce_hosts_lost(&self, watcher: &Watcher) {
        let con = self.con.clone();
        let watcher = watcher.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.announce_hosts_lost(&con).await {
                log::error!("failed to signal Watcher: {}", e);
            }
        });
    }

    fn reacquire_watcher(&self, watcher: &Watcher) {
        let con = self.con.clone();
        let watcher = watcher.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.acquire_name(&con).await {
                log::error!("Failed to recreate {}: {}", watcher.protocol.watcher_name(), e);
            }
        });
    }
}

/// A running tray: watchers, hosts and the item cache, kept up to date in the background.
///
/// The state lock is separate from the icon theme lock of `icon_theme::IconThemes`. Neither is
/// ever held while taking the other: [`TrayEngine::snapshot`] copies the items out before any
/// icon gets resolved, so the two can't deadlock.
#[derive(Debug)]
pub struct TrayEngine {
    con: zbus::Connection,
    state: Arc<Mutex<TrayState>>,
    hosts: Vec<Host>,
    forwarders: tokio::task::JoinSet<()>,
    worker: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
    redraw: watch::Receiver<u64>,
}

impl TrayEngine {
    /// Connect to the session bus and start serving the given protocol variants.
    pub async fn start(protocols: &[Protocol]) -> Result<TrayEngine> {
        let con = zbus::Connection::session().await?;
        Self::start_on(con, protocols).await
    }

    /// Start serving the given protocol variants on an existing connection.
    ///
    /// Any failure here means the tray can't work at all, e.g. [`Error::WatcherNameTaken`] when
    /// another tray is already running.
    pub async fn start_on(con: zbus::Connection, protocols: &[Protocol]) -> Result<TrayEngine> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut watchers = Vec::new();
        for protocol in protocols {
            watchers.push(Watcher::attach_to(&con, *protocol).await?);
        }

        let mut forwarders = tokio::task::JoinSet::new();
        forwarders.spawn({
            let con = con.clone();
            let events = events_tx.clone();
            async move {
                if let Err(e) = dbus::forward_owner_changes(con, events).await {
                    log::error!("Failed to listen to owner changes: {}", e);
                }
            }
        });

        let mut hosts = Vec::new();
        for protocol in protocols {
            hosts.push(Host::start(&con, *protocol, events_tx.clone()).await?);
        }

        let dispatcher = BusDispatcher {
            con: con.clone(),
            events: events_tx,
            hosts: hosts.iter().map(|host| (host.protocol, host.service.clone())).collect(),
        };
        let dbus = zbus::fdo::DBusProxy::new(&con).await?;
        for host in &hosts {
            let watcher = zbus::names::BusName::try_from(host.protocol.watcher_name())?;
            if dbus.name_has_owner(watcher).await? {
                dispatcher.register_host(host.protocol);
            }
        }

        let state = Arc::new(Mutex::new(TrayState::new(watchers, protocols.to_vec())));
        let (redraw_tx, redraw_rx) = watch::channel(0);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(events_rx, state.clone(), dispatcher, cancel.clone(), redraw_tx));

        Ok(TrayEngine { con, state, hosts, forwarders, worker, cancel, redraw: redraw_rx })
    }

    /// Shared handle to the item cache.
    pub fn state(&self) -> Arc<Mutex<TrayState>> {
        self.state.clone()
    }

    /// Copy out every item for rendering.
    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        self.state.lock().unwrap().snapshot() // unwrap: mutex poisoning is okay
    }

    /// A receiver whose value changes every time the tray should be redrawn.
    pub fn redraw_requests(&self) -> watch::Receiver<u64> {
        self.redraw.clone()
    }

    /// Stop the worker and every listener, and drop all items.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.worker).await {
            log::error!("tray worker failed: {}", e);
        }
        self.forwarders.shutdown().await;
        for host in self.hosts.drain(..) {
            host.release(&self.con).await;
        }
        self.state.lock().unwrap().clear(); // unwrap: mutex poisoning is okay
        log::info!("tray stopped");
    }
}

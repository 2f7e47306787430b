//! The system tray side of the [StatusNotifierItem] protocol.
//!
//! A [`TrayEngine`] serves a StatusNotifierWatcher and registers a StatusNotifierHost for every
//! protocol variant it is started with, then keeps a cache of all registered items and their
//! properties that a renderer can take [snapshots](TrayEngine::snapshot) of.
//!
//! [StatusNotifierItem]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/

pub mod dbus;

mod engine;
pub use engine::*;

mod error;
pub use error::*;

mod host;
pub use host::*;

mod icon;
pub use icon::*;

mod item;
pub use item::*;

mod protocol;
pub use protocol::*;

mod watcher;
pub use watcher::*;

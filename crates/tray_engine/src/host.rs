use crate::*;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;

/// A StatusNotifierHost, i.e. our end of one protocol variant.
///
/// It listens to its watcher's item (un)registrations and forwards them to the engine. Dropping it
/// stops the listeners.
#[derive(Debug)]
pub struct Host {
    pub protocol: Protocol,
    /// The well-known name the host is registered under.
    pub service: String,
    tasks: tokio::task::JoinSet<()>,
}

impl Host {
    /// Start listening and claim the host name.
    ///
    /// Registering with the watcher is a separate step, see [`register_with_watcher`], since the
    /// watcher may not exist yet.
    pub async fn start(con: &zbus::Connection, protocol: Protocol, events: UnboundedSender<Event>) -> Result<Host> {
        // From <https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierHost/>:
        //
        // Instances of this service are registered on the Dbus session bus, under a name on the
        // form org.freedesktop.StatusNotifierHost-id where id is an unique identifier, that keeps
        // the names unique on the bus, such as the process-id of the application or another type
        // of identifier if more that one StatusNotifierHost is registered by the same process.
        let service = protocol.host_name(std::process::id());

        let mut tasks = tokio::task::JoinSet::new();
        for (member, registered) in [("StatusNotifierItemRegistered", true), ("StatusNotifierItemUnregistered", false)] {
            let mut stream = watcher_signal_stream(con, protocol, member).await?;
            let events = events.clone();
            tasks.spawn(async move {
                while let Some(msg) = stream.next().await {
                    let id = match msg.and_then(|msg| msg.body().deserialize::<String>()) {
                        Ok(id) => id,
                        Err(e) => {
                            log::error!("Failed to read {} signal: {}", member, e);
                            continue;
                        }
                    };
                    let event = if registered { Event::ItemRegistered { id } } else { Event::ItemUnregistered { id } };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            });
        }

        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
        use zbus::fdo::RequestNameReply::*;
        match con.request_name_with_flags(service.as_str(), flags.into_iter().collect()).await? {
            PrimaryOwner | AlreadyOwner => {}
            Exists | InQueue => {
                return Err(zbus::Error::NameTaken.into());
            }
        }
        log::info!("registered host {}", service);

        Ok(Host { protocol, service, tasks })
    }

    pub async fn release(mut self, con: &zbus::Connection) {
        self.tasks.shutdown().await;
        if let Err(e) = con.release_name(self.service.as_str()).await {
            log::warn!("failed to release {}: {}", self.service, e);
        }
    }
}

async fn watcher_signal_stream(
    con: &zbus::Connection,
    protocol: Protocol,
    member: &'static str,
) -> Result<zbus::MessageStream> {
    let rule = zbus::MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .sender(protocol.watcher_name())?
        .path(WATCHER_OBJECT)?
        .interface(protocol.watcher_name())?
        .member(member)?
        .build();
    Ok(zbus::MessageStream::for_match_rule(rule, con, None).await?)
}

/// Tell the watcher about our host and queue up everything already registered with it.
pub async fn register_with_watcher(
    con: &zbus::Connection,
    protocol: Protocol,
    service: &str,
    events: &UnboundedSender<Event>,
) -> Result<()> {
    let watcher = protocol.watcher_name();
    con.call_method(Some(watcher), WATCHER_OBJECT, Some(watcher), "RegisterStatusNotifierHost", &(service,))
        .await?;

    let props = zbus::fdo::PropertiesProxy::builder(con).destination(watcher)?.path(WATCHER_OBJECT)?.build().await?;
    let value = props.get(zbus::names::InterfaceName::try_from(watcher)?, "RegisteredStatusNotifierItems").await?;
    let ids: Vec<String> = dbus::convert(value)?;
    log::debug!("{} reports {} items", watcher, ids.len());

    // the receiving end only goes away on shutdown
    let _ = events.send(Event::RegisteredItems { protocol, ids });
    Ok(())
}

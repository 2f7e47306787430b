//! Talking to other peers on the bus.

use crate::*;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

/// Decode a property value into the type we expect.
pub fn convert<T>(value: OwnedValue) -> Result<T>
where
    T: TryFrom<OwnedValue>,
    T::Error: Into<zbus::Error>,
{
    T::try_from(value).map_err(|e| Error::DbusError(e.into()))
}

/// Fetch one property of an item.
pub async fn get_property(con: &zbus::Connection, item: &ItemAddress, property: Property) -> Result<PropertyValue> {
    let props = zbus::fdo::PropertiesProxy::builder(con)
        .destination(item.service.as_str())?
        .path(item.path.as_str())?
        .build()
        .await?;
    let interface = zbus::names::InterfaceName::try_from(item.protocol.item_interface())?;
    let value = props.get(interface, property.name()).await?;

    Ok(match property.kind() {
        PropertyKind::Text => PropertyValue::Text(convert(value)?),
        PropertyKind::ObjectPath => PropertyValue::Text(convert::<OwnedObjectPath>(value)?.to_string()),
        PropertyKind::Flag => PropertyValue::Flag(convert(value)?),
        PropertyKind::Pixmaps => {
            let raw: Vec<(i32, i32, Vec<u8>)> = convert(value)?;
            let set = IconPixmapSet::from_wire(raw);
            log::debug!(
                "{} of {}: {} usable pixmaps",
                property.name(),
                item.watcher_id,
                set.as_ref().map_or(0, |set| set.len())
            );
            PropertyValue::Pixmaps(set)
        }
    })
}

/// Forward one kind of item signal to the engine until the stream ends.
///
/// The payload of `NewStatus` is only passed on when the sender can be trusted to be the item.
/// Matching on a well-known sender name can't be checked locally, so in that case the current
/// owner of the name is asked for.
pub async fn forward_item_signal(
    con: zbus::Connection,
    item: ItemAddress,
    signal: ItemSignal,
    events: UnboundedSender<Event>,
) -> Result<()> {
    let rule = zbus::MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .sender(item.service.as_str())?
        .path(item.path.as_str())?
        .interface(item.protocol.item_interface())?
        .member(signal.member())?
        .build();
    let mut stream = zbus::MessageStream::for_match_rule(rule, &con, None).await?;

    while let Some(msg) = stream.next().await {
        let msg = msg?;
        let status = if signal == ItemSignal::NewStatus && sent_by_item(&con, &item, &msg).await {
            match msg.body().deserialize::<String>() {
                Ok(status) => Some(status),
                Err(e) => {
                    log::error!("Failed to read NewStatus of {}: {}", item.watcher_id, e);
                    None
                }
            }
        } else {
            None
        };
        let event = Event::ItemSignal { id: item.watcher_id.clone(), signal, status };
        if events.send(event).is_err() {
            break;
        }
    }
    Ok(())
}

async fn sent_by_item(con: &zbus::Connection, item: &ItemAddress, msg: &zbus::Message) -> bool {
    let header = msg.header();
    let sender = header.sender().map(|sender| sender.as_str());
    if item.has_unique_service() || sender.is_none() {
        return trusted(item, None, sender);
    }
    let owner = async {
        let dbus = zbus::fdo::DBusProxy::new(con).await?;
        let name = zbus::names::BusName::try_from(item.service.as_str()).map_err(zbus::Error::from)?;
        Ok::<_, zbus::Error>(dbus.get_name_owner(name).await?)
    };
    match owner.await {
        Ok(owner) => trusted(item, Some(owner.as_str()), sender),
        Err(e) => {
            log::debug!("could not verify sender of {}: {}", item.watcher_id, e);
            false
        }
    }
}

/// Whether a signal from `sender` really comes from the item.
///
/// Items registered under a unique name are matched on it directly, otherwise the sender has to be
/// the current `owner` of the item's well-known name.
fn trusted(item: &ItemAddress, owner: Option<&str>, sender: Option<&str>) -> bool {
    if item.has_unique_service() {
        return true;
    }
    match (owner, sender) {
        (Some(owner), Some(sender)) => owner == sender,
        _ => false,
    }
}

/// Forward every `NameOwnerChanged` on the bus to the engine until the stream ends.
pub async fn forward_owner_changes(con: zbus::Connection, events: UnboundedSender<Event>) -> Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(&con).await?;
    let mut changes = dbus.receive_name_owner_changed().await?;

    while let Some(sig) = changes.next().await {
        let args = match sig.args() {
            Ok(args) => args,
            Err(e) => {
                log::error!("Failed to read NameOwnerChanged: {}", e);
                continue;
            }
        };
        let event = Event::NameOwnerChanged {
            name: args.name().to_string(),
            old_owner: Option::as_ref(args.old_owner()).map(|owner| owner.to_string()),
            new_owner: Option::as_ref(args.new_owner()).map(|owner| owner.to_string()),
        };
        if events.send(event).is_err() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trusted_sender() {
        let unique = ItemAddress::parse(":1.42/org/ayatana/NotificationItem/nm_applet");
        assert!(trusted(&unique, None, None));
        assert!(trusted(&unique, None, Some(":1.42")));

        let named = ItemAddress::parse("org.example.App");
        assert!(trusted(&named, Some(":1.7"), Some(":1.7")));
        assert!(!trusted(&named, Some(":1.7"), Some(":1.8")));
        assert!(!trusted(&named, Some(":1.7"), None));
        assert!(!trusted(&named, None, Some(":1.7")));
    }
}

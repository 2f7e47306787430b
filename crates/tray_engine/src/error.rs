use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus error: {0}")]
    DbusError(#[from] zbus::Error),
    #[error(transparent)]
    Fdo(#[from] zbus::fdo::Error),
    #[error("invalid bus or interface name")]
    Name(#[from] zbus::names::Error),
    #[error("Failed to acquire service name '{name}': another tray is already running")]
    WatcherNameTaken { name: String },
    #[error("{0} has an unexpected type")]
    UnexpectedValue(&'static str),
}

impl Error {
    /// Whether the item simply doesn't implement the requested property.
    pub fn is_unknown_property(&self) -> bool {
        match self {
            Error::Fdo(zbus::fdo::Error::UnknownProperty(_)) => true,
            Error::DbusError(zbus::Error::FDO(e)) => matches!(**e, zbus::fdo::Error::UnknownProperty(_)),
            Error::DbusError(zbus::Error::MethodError(name, ..)) => {
                name.as_str() == "org.freedesktop.DBus.Error.UnknownProperty"
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_property() {
        assert!(Error::Fdo(zbus::fdo::Error::UnknownProperty("IconThemePath".into())).is_unknown_property());
        assert!(Error::DbusError(zbus::fdo::Error::UnknownProperty("IconThemePath".into()).into()).is_unknown_property());
        assert!(!Error::Fdo(zbus::fdo::Error::Failed("boom".into())).is_unknown_property());
        assert!(!Error::WatcherNameTaken { name: "org.kde.StatusNotifierWatcher".into() }.is_unknown_property());
    }
}

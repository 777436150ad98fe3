use crate::errors::DbResult;
use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::fmt::Debug;
use std::sync::Arc;

/// Lifecycle events published by a store provider.
///
/// Listeners see every event for every database of the store and filter by
/// [`StoreEventInfo::database_name`].
///
/// ```ignore
/// let listener = StoreEventListener::new(|info| {
///     if info.event() == StoreEvents::Upgraded {
///         log::debug!("{} moved to {:?}", info.database_name(), info.new_version());
///     }
///     Ok(())
/// });
/// store.subscribe(listener)?;
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StoreEvents {
    /// A connection was opened without a version change
    Opened,
    /// A version-change transaction committed
    Upgraded,
    /// A version-change transaction was aborted
    Aborted,
    /// An open was refused because other connections stayed open
    Blocked,
    /// A connection was closed
    Closed,
    /// A database was deleted
    Deleted,
}

/// Context delivered with each [`StoreEvents`] value.
#[derive(Debug, Clone)]
pub struct StoreEventInfo {
    event: StoreEvents,
    database_name: String,
    old_version: u64,
    new_version: Option<u64>,
}

impl StoreEventInfo {
    pub fn new(
        event: StoreEvents,
        database_name: &str,
        old_version: u64,
        new_version: Option<u64>,
    ) -> Self {
        StoreEventInfo {
            event,
            database_name: database_name.to_string(),
            old_version,
            new_version,
        }
    }

    pub fn event(&self) -> StoreEvents {
        self.event
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// The raw version before the event.
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    /// The raw version after the event, `None` for deletions.
    pub fn new_version(&self) -> Option<u64> {
        self.new_version
    }
}

pub trait StoreEventCallback: Send + Sync + Fn(StoreEventInfo) -> DbResult<()> {}

impl<F> StoreEventCallback for F where F: Send + Sync + Fn(StoreEventInfo) -> DbResult<()> {}

/// A store event listener backed by a callback.
///
/// Cloning is cheap; clones share the callback.
#[derive(Clone)]
pub struct StoreEventListener {
    on_event: Arc<dyn StoreEventCallback>,
}

impl StoreEventListener {
    pub fn new(on_event: impl StoreEventCallback + 'static) -> Self {
        StoreEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<StoreEventInfo> for StoreEventListener {
    fn handle(&self, event: &Event<StoreEventInfo>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for StoreEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEventListener").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DbError, ErrorKind};
    use parking_lot::Mutex;

    #[test]
    fn test_event_info_accessors() {
        let info = StoreEventInfo::new(StoreEvents::Upgraded, "clock", 3, Some(4));
        assert_eq!(info.event(), StoreEvents::Upgraded);
        assert_eq!(info.database_name(), "clock");
        assert_eq!(info.old_version(), 3);
        assert_eq!(info.new_version(), Some(4));
    }

    #[test]
    fn test_listener_receives_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let listener = StoreEventListener::new(move |info| {
            seen_clone.lock().push(info.event());
            Ok(())
        });

        let info = StoreEventInfo::new(StoreEvents::Deleted, "clock", 2, None);
        assert!(listener.handle(&Event::new(info)).is_ok());
        assert_eq!(*seen.lock(), vec![StoreEvents::Deleted]);
    }

    #[test]
    fn test_listener_error_becomes_handler_error() {
        let listener = StoreEventListener::new(|_| {
            Err(DbError::new("listener failed", ErrorKind::InternalError))
        });
        let info = StoreEventInfo::new(StoreEvents::Opened, "clock", 1, Some(1));
        let result = listener.handle(&Event::new(info));
        assert!(matches!(result, Err(BasuError::HandlerError(_))));
    }
}

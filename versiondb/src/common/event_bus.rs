use crate::common::STORE_EVENT;
use crate::errors::{DbError, DbResult, ErrorKind};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Publishes events to registered listeners.
///
/// A thin wrapper around a `basu` event bus bound to a single event type.
/// Publishing without listeners is a no-op and does not allocate an event.
///
/// # Example
///
/// ```ignore
/// let event_bus: StoreEventBus<StoreEventInfo, StoreEventListener> = StoreEventBus::new();
/// let subscriber = event_bus.register(listener)?;
/// event_bus.publish(info)?;
/// event_bus.deregister(subscriber.unwrap())?;
/// ```
#[derive(Clone)]
pub struct StoreEventBus<E, L> {
    inner: Arc<StoreEventBusInner<E, L>>,
}

impl<E, L> Default for StoreEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> StoreEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        StoreEventBus {
            inner: Arc::new(StoreEventBusInner::new()),
        }
    }

    /// Registers an event listener with the bus.
    pub fn register(&self, listener: L) -> DbResult<Option<SubscriberRef>> {
        self.inner.register(listener)
    }

    /// Deregisters a previously registered event listener.
    pub fn deregister(&self, subscriber: SubscriberRef) -> DbResult<()> {
        self.inner.deregister(subscriber)
    }

    /// Publishes an event to all registered listeners.
    pub fn publish(&self, event: E) -> DbResult<()> {
        self.inner.publish(event)
    }

    /// Clears all registered listeners.
    pub fn close(&self) -> DbResult<()> {
        self.inner.close()
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }
}

pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct StoreEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

impl<E, L> StoreEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        StoreEventBusInner {
            event_bus: EventBus::new(),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, listener: L) -> DbResult<Option<SubscriberRef>> {
        match self.event_bus.subscribe(STORE_EVENT, Box::new(listener)) {
            Ok(subscriber) => Ok(Some(SubscriberRef::new(subscriber))),
            Err(e) => Err(Self::db_error(e)),
        }
    }

    fn deregister(&self, subscriber: SubscriberRef) -> DbResult<()> {
        self.event_bus
            .unsubscribe(STORE_EVENT, &subscriber.inner)
            .map_err(Self::db_error)
    }

    fn publish(&self, event: E) -> DbResult<()> {
        // Fast path: no listeners, no event
        if !self.has_listeners() {
            return Ok(());
        }

        let basu_event = Event::new(event);
        self.event_bus
            .publish(STORE_EVENT, &basu_event)
            .map_err(Self::db_error)
    }

    fn close(&self) -> DbResult<()> {
        self.event_bus.clear().map_err(Self::db_error)
    }

    fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(STORE_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to check listeners: {}, defaulting to false", e);
                false
            }
        }
    }

    fn db_error(e: BasuError) -> DbError {
        match e {
            BasuError::EventTypeNotFOUND => DbError::new(
                "Event bus error: no handler is registered for store events",
                ErrorKind::EventError,
            ),
            BasuError::MutexPoisoned => DbError::new(
                "Event bus error: internal mutex poisoned",
                ErrorKind::EventError,
            ),
            BasuError::HandlerError(e) => {
                let error_message = e
                    .source()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| e.to_string());
                DbError::new(
                    &format!("Event handler error: {}", error_message),
                    ErrorKind::EventError,
                )
            }
        }
    }
}

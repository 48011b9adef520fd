//! The emission value passed to listeners and interceptors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use uuid::Uuid;

use crate::definitions::{AnyValue, ItemId};

/// Payload carried by an emission.
///
/// JSON payloads are schema-checkable; opaque payloads carry live handles
/// (suppress flags, output handles) that have no JSON form.
#[derive(Clone)]
pub enum EventData {
    /// A JSON payload.
    Json(Value),
    /// A type-erased payload.
    Opaque(AnyValue),
}

impl EventData {
    /// The JSON payload, when this is one.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EventData::Json(value) => Some(value),
            EventData::Opaque(_) => None,
        }
    }

    /// The payload downcast to `T`, when opaque.
    #[must_use]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self {
            EventData::Json(_) => None,
            EventData::Opaque(any) => Arc::clone(any).downcast::<T>().ok(),
        }
    }
}

impl std::fmt::Debug for EventData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventData::Json(value) => write!(f, "Json({value})"),
            EventData::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

/// Propagation state shared by every clone of one emission.
///
/// The control token's identity is the integrity check: interceptors must
/// pass the emission through, and the manager rejects a dispatch whose
/// control token is not the one it issued.
#[derive(Debug, Default)]
pub struct EmissionControl {
    stopped: AtomicBool,
}

impl EmissionControl {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// One in-flight event emission.
///
/// `meta` and `tags` are snapshots taken from the event definition at
/// emit time; listeners may mutate their copies freely without affecting
/// the definition or sibling listeners.
#[derive(Clone)]
pub struct Emission {
    /// The emitted event.
    pub event_id: ItemId,
    /// Unique id of this emission.
    pub emission_id: Uuid,
    /// The payload.
    pub data: EventData,
    /// Snapshot of the event's metadata.
    pub meta: Value,
    /// Snapshot of the event's tag ids.
    pub tags: Vec<ItemId>,
    /// Who emitted.
    pub source: ItemId,
    pub(crate) control: Arc<EmissionControl>,
}

impl Emission {
    pub(crate) fn new(
        event_id: ItemId,
        data: EventData,
        meta: Value,
        tags: Vec<ItemId>,
        source: ItemId,
    ) -> Self {
        Self {
            event_id,
            emission_id: Uuid::new_v4(),
            data,
            meta,
            tags,
            source,
            control: Arc::new(EmissionControl::default()),
        }
    }

    /// Prevent later listeners from receiving this emission (sequential
    /// dispatch only; concurrent peers are already in flight).
    pub fn stop_propagation(&self) {
        self.control.stop();
    }

    /// Whether propagation was stopped.
    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    /// The JSON payload, when this emission carries one.
    #[must_use]
    pub fn payload_json(&self) -> Option<&Value> {
        self.data.as_json()
    }

    /// The opaque payload downcast to `T`.
    #[must_use]
    pub fn payload<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.data.downcast::<T>()
    }
}

impl std::fmt::Debug for Emission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emission")
            .field("event_id", &self.event_id)
            .field("emission_id", &self.emission_id)
            .field("source", &self.source)
            .field("stopped", &self.is_propagation_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_propagation_is_shared_across_clones() {
        let emission = Emission::new(
            "app.e".into(),
            EventData::Json(json!({"n": 1})),
            Value::Null,
            Vec::new(),
            "test".into(),
        );
        let clone = emission.clone();
        assert!(!clone.is_propagation_stopped());
        emission.stop_propagation();
        assert!(clone.is_propagation_stopped());
    }

    #[test]
    fn meta_mutations_do_not_leak_between_clones() {
        let emission = Emission::new(
            "app.e".into(),
            EventData::Json(Value::Null),
            json!({"version": 1}),
            Vec::new(),
            "test".into(),
        );
        let mut clone = emission.clone();
        clone.meta["version"] = json!(2);
        assert_eq!(emission.meta["version"], 1);
    }

    #[test]
    fn opaque_payload_downcasts() {
        struct Marker(u32);
        let emission = Emission::new(
            "app.e".into(),
            EventData::Opaque(Arc::new(Marker(7))),
            Value::Null,
            Vec::new(),
            "test".into(),
        );
        assert_eq!(emission.payload::<Marker>().unwrap().0, 7);
        assert!(emission.payload_json().is_none());
    }
}

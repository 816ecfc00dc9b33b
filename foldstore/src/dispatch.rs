//! Event application dispatch.
//!
//! A [`Dispatcher`] maps an event's type tag to a fold function that
//! advances a memento. Handlers are registered once per aggregate-type
//! definition; the tag set stays open for extension without any runtime
//! reflection. Two equivalent entry points exist:
//!
//! - typed ([`Dispatcher::apply_typed`]): the payload is already decoded,
//!   passed as `&dyn Any` and downcast by the handler registered for its
//!   tag;
//! - serialized ([`Dispatcher::apply_raw`]): the payload arrives as encoded
//!   bytes (typically captured by the token reader's `extract_with`) and is
//!   decoded by the handler before folding.
//!
//! An unknown tag is fatal to the fold: silently skipping an event would
//! silently corrupt the memento.

use crate::errors::{DecodeError, ReplayError, ReplayResult};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;

struct Handler<M> {
    raw: Box<dyn Fn(M, &[u8]) -> ReplayResult<M> + Send + Sync>,
    typed: Box<dyn Fn(M, &dyn Any) -> ReplayResult<M> + Send + Sync>,
}

/// A registry of per-event-type fold functions for one memento type.
pub struct Dispatcher<M> {
    handlers: HashMap<&'static str, Handler<M>>,
}

impl<M: 'static> Dispatcher<M> {
    /// Starts building a dispatcher.
    pub fn builder() -> DispatcherBuilder<M> {
        DispatcherBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Whether a handler is registered for `event_type`.
    pub fn recognizes(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// The registered type tags.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Folds one serialized event payload into the memento.
    ///
    /// The tag arrives as raw bytes so a stream consumer can pass a matched
    /// property-name span through without allocating a string first.
    pub fn apply_raw(&self, memento: M, event_type: &[u8], payload: &[u8]) -> ReplayResult<M> {
        let tag = std::str::from_utf8(event_type)
            .map_err(|_| ReplayError::UnrecognizedEventType(String::from_utf8_lossy(event_type).into_owned()))?;
        let handler = self
            .handlers
            .get(tag)
            .ok_or_else(|| ReplayError::UnrecognizedEventType(tag.to_string()))?;
        (handler.raw)(memento, payload)
    }

    /// Folds one already-decoded payload into the memento.
    ///
    /// The payload must be the exact type registered for `event_type`;
    /// anything else is reported as a decode failure.
    pub fn apply_typed(&self, memento: M, event_type: &str, payload: &dyn Any) -> ReplayResult<M> {
        let handler = self
            .handlers
            .get(event_type)
            .ok_or_else(|| ReplayError::UnrecognizedEventType(event_type.to_string()))?;
        (handler.typed)(memento, payload)
    }
}

impl<M> std::fmt::Debug for Dispatcher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("event_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder collecting fold handlers, one per event type tag.
pub struct DispatcherBuilder<M> {
    handlers: HashMap<&'static str, Handler<M>>,
}

impl<M: 'static> DispatcherBuilder<M> {
    /// Registers the fold function for events tagged `event_type`, whose
    /// payload decodes as `P`.
    ///
    /// Registering the same tag twice keeps the later registration.
    #[must_use]
    pub fn on<P, F>(mut self, event_type: &'static str, fold: F) -> Self
    where
        P: DeserializeOwned + serde::Serialize + Send + Sync + 'static,
        F: Fn(M, P) -> M + Clone + Send + Sync + 'static,
    {
        let raw_fold = fold.clone();
        let raw = Box::new(move |memento: M, bytes: &[u8]| {
            let payload: P = serde_json::from_slice(bytes)
                .map_err(|e| DecodeError::new(format!("payload of {event_type}"), e))?;
            Ok(raw_fold(memento, payload))
        });
        let typed = Box::new(move |memento: M, payload: &dyn Any| {
            let payload = payload.downcast_ref::<P>().ok_or_else(|| {
                ReplayError::UnrecognizedEventType(format!(
                    "{event_type} (payload is not the registered type)"
                ))
            })?;
            // Typed handlers fold a borrowed payload; P stays cheap to
            // clone because payloads are plain data carriers.
            Ok(fold(memento, serde_clone(payload)?))
        });
        self.handlers.insert(event_type, Handler { raw, typed });
        self
    }

    /// Finishes the registry.
    pub fn build(self) -> Dispatcher<M> {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Clones a payload through its serde representation.
///
/// Keeps `on` usable for payload types that are `Deserialize` but not
/// `Clone`; payloads are small, so the round-trip is off the hot path only
/// for the typed entry point.
fn serde_clone<P: DeserializeOwned + serde::Serialize>(payload: &P) -> ReplayResult<P> {
    let bytes = serde_json::to_vec(payload)
        .map_err(|e| DecodeError::new("payload re-encode", e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DecodeError::new("payload re-decode", e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ItemAdded {
        id: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ItemRemoved {
        id: String,
    }

    type Items = BTreeSet<String>;

    fn dispatcher() -> Dispatcher<Items> {
        Dispatcher::builder()
            .on("ItemAdded", |mut items: Items, event: ItemAdded| {
                items.insert(event.id);
                items
            })
            .on("ItemRemoved", |mut items: Items, event: ItemRemoved| {
                items.remove(&event.id);
                items
            })
            .build()
    }

    #[test]
    fn raw_dispatch_decodes_and_folds() {
        let d = dispatcher();
        let items = d
            .apply_raw(Items::new(), b"ItemAdded", br#"{"id":"A"}"#)
            .unwrap();
        let items = d.apply_raw(items, b"ItemAdded", br#"{"id":"B"}"#).unwrap();
        let items = d.apply_raw(items, b"ItemRemoved", br#"{"id":"A"}"#).unwrap();
        assert_eq!(items, Items::from(["B".to_string()]));
    }

    #[test]
    fn typed_dispatch_folds_decoded_payloads() {
        let d = dispatcher();
        let payload = ItemAdded {
            id: "A".to_string(),
        };
        let items = d.apply_typed(Items::new(), "ItemAdded", &payload).unwrap();
        assert_eq!(items, Items::from(["A".to_string()]));
    }

    #[test]
    fn both_entry_points_agree() {
        let d = dispatcher();
        let typed = d
            .apply_typed(
                Items::new(),
                "ItemAdded",
                &ItemAdded {
                    id: "X".to_string(),
                },
            )
            .unwrap();
        let raw = d
            .apply_raw(Items::new(), b"ItemAdded", br#"{"id":"X"}"#)
            .unwrap();
        assert_eq!(typed, raw);
    }

    #[test]
    fn unknown_tag_is_fatal_not_skipped() {
        let d = dispatcher();
        let err = d
            .apply_raw(Items::new(), b"ItemRenamed", br#"{"id":"A"}"#)
            .unwrap_err();
        assert!(matches!(err, ReplayError::UnrecognizedEventType(tag) if tag == "ItemRenamed"));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let d = dispatcher();
        let err = d
            .apply_raw(Items::new(), b"ItemAdded", br#"{"id":7}"#)
            .unwrap_err();
        assert!(matches!(err, ReplayError::Decode(_)));
    }

    #[test]
    fn wrong_typed_payload_type_is_rejected() {
        let d = dispatcher();
        let err = d
            .apply_typed(Items::new(), "ItemAdded", &42i64)
            .unwrap_err();
        assert!(matches!(err, ReplayError::UnrecognizedEventType(_)));
    }

    #[test]
    fn registry_reports_known_tags() {
        let d = dispatcher();
        assert!(d.recognizes("ItemAdded"));
        assert!(!d.recognizes("ItemRenamed"));
        assert_eq!(d.event_types().count(), 2);
    }
}

//! Events emitted by store changes.

use crate::managed::ManagedObject;

/// Events emitted when stored state changes.
///
/// These events are dispatched via a broadcast channel to subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    /// A managed object was created.
    ObjectCreated(ManagedObject),
    /// A managed object was updated (spec, status or metadata).
    ObjectUpdated {
        old: ManagedObject,
        new: ManagedObject,
    },
    /// A managed object was removed from the store.
    ObjectDeleted { kind: String, name: String },
    /// A provider config was created or replaced.
    ProviderConfigUpdated { name: String },
    /// A provider config was deleted.
    ProviderConfigDeleted { name: String },
}

impl Event {
    /// Kind of the managed object this event is about, if any.
    pub fn object_kind(&self) -> Option<&str> {
        match self {
            Event::ObjectCreated(obj) => Some(&obj.kind),
            Event::ObjectUpdated { new, .. } => Some(&new.kind),
            Event::ObjectDeleted { kind, .. } => Some(kind),
            Event::ProviderConfigUpdated { .. } | Event::ProviderConfigDeleted { .. } => None,
        }
    }

    /// Name of the object or config this event is about.
    pub fn name(&self) -> &str {
        match self {
            Event::ObjectCreated(obj) => obj.name(),
            Event::ObjectUpdated { new, .. } => new.name(),
            Event::ObjectDeleted { name, .. } => name,
            Event::ProviderConfigUpdated { name } | Event::ProviderConfigDeleted { name } => name,
        }
    }

    /// True if the change needs a reconcile: creation, a spec change, or a
    /// deletion request. Status-only writes do not.
    pub fn needs_reconcile(&self) -> bool {
        match self {
            Event::ObjectCreated(_) => true,
            Event::ObjectUpdated { old, new } => {
                old.metadata.generation != new.metadata.generation
                    || old.metadata.deletion_timestamp != new.metadata.deletion_timestamp
            }
            _ => false,
        }
    }
}

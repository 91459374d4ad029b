//! Object table: core handles to live protocol objects.
//!
//! Every proxy is created with its core [`ObjectId`] as user data, so event
//! dispatch finds the listener without consulting the protocol id.

use std::collections::HashMap;

use parking_lot::Mutex;
use wayland_backend::client::ObjectId as ProtocolId;

use cinewin_core::wire::{Interface, Listener, ObjectId};

#[derive(Clone)]
pub(crate) struct Entry {
    pub interface: Interface,
    pub version: u32,
    /// `None` between reservation and the creating request.
    pub protocol: Option<ProtocolId>,
    pub listener: Option<Listener>,
}

#[derive(Default)]
struct Table {
    next_id: u32,
    entries: HashMap<ObjectId, Entry>,
}

#[derive(Default)]
pub(crate) struct ObjectTable {
    inner: Mutex<Table>,
}

impl ObjectTable {
    /// Allocate a handle for an object about to be created. The listener
    /// is in place before the compositor can send the first event.
    pub fn reserve(&self, interface: Interface, version: u32, listener: Option<Listener>) -> ObjectId {
        let mut table = self.inner.lock();
        table.next_id += 1;
        let id = ObjectId(table.next_id);
        table.entries.insert(
            id,
            Entry {
                interface,
                version,
                protocol: None,
                listener,
            },
        );
        id
    }

    pub fn attach(&self, id: ObjectId, protocol: ProtocolId) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&id) {
            entry.protocol = Some(protocol);
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<Entry> {
        self.inner.lock().entries.get(&id).cloned()
    }

    pub fn listener(&self, id: ObjectId) -> Option<Listener> {
        self.inner.lock().entries.get(&id)?.listener.clone()
    }

    pub fn set_listener(&self, id: ObjectId, listener: Listener) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&id) {
            entry.listener = Some(listener);
        }
    }

    pub fn remove(&self, id: ObjectId) -> Option<Entry> {
        self.inner.lock().entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinewin_core::wire::listener;

    #[test]
    fn test_reserved_ids_are_unique() {
        let table = ObjectTable::default();
        let a = table.reserve(Interface::Surface, 4, None);
        let b = table.reserve(Interface::Surface, 4, None);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_listener_is_available_before_attach() {
        let table = ObjectTable::default();
        let id = table.reserve(Interface::Callback, 1, Some(listener(|_, _| {})));
        assert!(table.listener(id).is_some());
        assert!(table.get(id).and_then(|e| e.protocol).is_none());
    }

    #[test]
    fn test_removed_objects_are_forgotten() {
        let table = ObjectTable::default();
        let id = table.reserve(Interface::Region, 4, None);
        let entry = table.remove(id).unwrap();
        assert_eq!(entry.interface, Interface::Region);
        assert!(table.get(id).is_none());
        table.set_listener(id, listener(|_, _| {}));
        assert!(table.listener(id).is_none());
    }
}

//! Global discovery and binding.
//!
//! Interested parties declare what they need *before* [`Registry::bind`]:
//! singletons (bound at most once, e.g. `wl_compositor`) and dynamic
//! globals (every instance bound, e.g. `wl_output`, with add/remove
//! callbacks). Binding performs one roundtrip; required singletons that
//! were not advertised in an acceptable version fail the bind.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::{Connection, WeakConnection};
use crate::wire::{listener, Event, GlobalInfo, Interface, Listener, ObjectId, WireError};

/// A global that has been bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundGlobal {
    /// Registry name of the global.
    pub name: u32,
    pub object: ObjectId,
    pub version: u32,
}

/// Slot filled in when a requested singleton gets bound.
#[derive(Clone, Default)]
pub struct Singleton(Arc<Mutex<Option<BoundGlobal>>>);

impl Singleton {
    pub fn get(&self) -> Option<BoundGlobal> {
        *self.0.lock()
    }

    pub fn object(&self) -> Option<ObjectId> {
        self.get().map(|bound| bound.object)
    }

    pub fn is_bound(&self) -> bool {
        self.0.lock().is_some()
    }

    fn set(&self, bound: BoundGlobal) {
        *self.0.lock() = Some(bound);
    }

    fn take(&self) -> Option<BoundGlobal> {
        self.0.lock().take()
    }
}

impl std::fmt::Debug for Singleton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Singleton").field(&self.get()).finish()
    }
}

/// Called on the dispatching thread when a dynamic global was bound. The
/// handler owns the new object from then on.
pub type AddHandler = Box<dyn Fn(&Connection, BoundGlobal) + Send + Sync>;

/// Called with the registry name of a dynamic global that went away.
pub type RemoveHandler = Box<dyn Fn(u32) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("interfaces must be requested before the registry is bound")]
    AlreadyBound,

    #[error("required global {interface} is not offered by the compositor")]
    MissingRequired { interface: &'static str },

    #[error("required global {interface} offered in version {version}, need at least {min}")]
    VersionTooLow {
        interface: &'static str,
        version: u32,
        min: u32,
    },

    #[error(transparent)]
    Wire(#[from] WireError),
}

struct SingletonRequest {
    interface: Interface,
    min_version: u32,
    max_version: u32,
    required: bool,
    slot: Singleton,
    listener: Option<Listener>,
}

struct DynamicRequest {
    interface: Interface,
    min_version: u32,
    max_version: u32,
    on_add: AddHandler,
    on_remove: RemoveHandler,
}

struct Bound {
    connection: WeakConnection,
    singletons: Vec<SingletonRequest>,
    dynamics: Vec<DynamicRequest>,
    /// Registry name of each bound dynamic global → index into `dynamics`.
    bound_dynamic: Mutex<HashMap<u32, usize>>,
    /// Globals skipped because their version was too low.
    rejected: Mutex<Vec<(Interface, u32)>>,
}

impl Bound {
    fn handle_event(&self, registry: ObjectId, event: &Event) {
        match event {
            Event::Global(global) => self.on_global(registry, global),
            Event::GlobalRemove { name } => self.on_global_remove(*name),
            _ => {}
        }
    }

    fn on_global(&self, registry: ObjectId, global: &GlobalInfo) {
        let Some(interface) = Interface::global_from_name(&global.interface) else {
            return;
        };
        let Some(connection) = self.connection.upgrade() else {
            return;
        };

        if let Some(request) = self.singletons.iter().find(|r| r.interface == interface) {
            if request.slot.is_bound() {
                debug!("Ignoring additional instance of singleton {interface}");
                return;
            }
            if global.version < request.min_version {
                warn!(
                    "Not binding {interface}: offered version {} is below minimum {}",
                    global.version, request.min_version
                );
                self.rejected.lock().push((interface, global.version));
                return;
            }
            let version = global.version.min(request.max_version);
            match connection.wire().bind(
                registry,
                global.name,
                interface,
                version,
                request.listener.clone(),
            ) {
                Ok(object) => {
                    debug!("Bound {interface} version {version} as {object}");
                    request.slot.set(BoundGlobal {
                        name: global.name,
                        object,
                        version,
                    });
                }
                Err(err) => warn!("Failed to bind {interface}: {err}"),
            }
            return;
        }

        let Some((index, request)) = self
            .dynamics
            .iter()
            .enumerate()
            .find(|(_, r)| r.interface == interface)
        else {
            return;
        };
        if global.version < request.min_version {
            warn!(
                "Not binding {interface} {}: offered version {} is below minimum {}",
                global.name, global.version, request.min_version
            );
            return;
        }
        let version = global.version.min(request.max_version);
        match connection
            .wire()
            .bind(registry, global.name, interface, version, None)
        {
            Ok(object) => {
                debug!("Bound {interface} {} version {version} as {object}", global.name);
                self.bound_dynamic.lock().insert(global.name, index);
                (request.on_add)(
                    &connection,
                    BoundGlobal {
                        name: global.name,
                        object,
                        version,
                    },
                );
            }
            Err(err) => warn!("Failed to bind {interface} {}: {err}", global.name),
        }
    }

    fn on_global_remove(&self, name: u32) {
        let index = self.bound_dynamic.lock().remove(&name);
        if let Some(index) = index {
            debug!("Global {name} ({}) removed", self.dynamics[index].interface);
            (self.dynamics[index].on_remove)(name);
        }
    }
}

/// Per-subsystem view of the compositor's globals.
pub struct Registry {
    connection: Connection,
    singletons: Vec<SingletonRequest>,
    dynamics: Vec<DynamicRequest>,
    bound: Option<(ObjectId, Arc<Bound>)>,
}

impl Registry {
    pub fn new(connection: &Connection) -> Self {
        Self {
            connection: connection.clone(),
            singletons: Vec::new(),
            dynamics: Vec::new(),
            bound: None,
        }
    }

    /// Request a singleton global in versions `min..=max`.
    pub fn request_singleton(
        &mut self,
        interface: Interface,
        min_version: u32,
        max_version: u32,
        required: bool,
    ) -> Result<Singleton, RegistryError> {
        self.push_singleton(interface, min_version, max_version, required, None)
    }

    /// Like [`request_singleton`](Self::request_singleton), with a listener
    /// installed at bind time so no early event is missed.
    pub fn request_singleton_with_listener(
        &mut self,
        interface: Interface,
        min_version: u32,
        max_version: u32,
        required: bool,
        listener: Listener,
    ) -> Result<Singleton, RegistryError> {
        self.push_singleton(interface, min_version, max_version, required, Some(listener))
    }

    fn push_singleton(
        &mut self,
        interface: Interface,
        min_version: u32,
        max_version: u32,
        required: bool,
        listener: Option<Listener>,
    ) -> Result<Singleton, RegistryError> {
        if self.bound.is_some() {
            return Err(RegistryError::AlreadyBound);
        }
        let slot = Singleton::default();
        self.singletons.push(SingletonRequest {
            interface,
            min_version,
            max_version,
            required,
            slot: slot.clone(),
            listener,
        });
        Ok(slot)
    }

    /// Request every instance of `interface`.
    pub fn request(
        &mut self,
        interface: Interface,
        min_version: u32,
        max_version: u32,
        on_add: AddHandler,
        on_remove: RemoveHandler,
    ) -> Result<(), RegistryError> {
        if self.bound.is_some() {
            return Err(RegistryError::AlreadyBound);
        }
        self.dynamics.push(DynamicRequest {
            interface,
            min_version,
            max_version,
            on_add,
            on_remove,
        });
        Ok(())
    }

    /// Create the registry object, roundtrip, and verify required
    /// singletons.
    pub fn bind(&mut self) -> Result<(), RegistryError> {
        if self.bound.is_some() {
            return Err(RegistryError::AlreadyBound);
        }

        let bound = Arc::new(Bound {
            connection: self.connection.downgrade(),
            singletons: std::mem::take(&mut self.singletons),
            dynamics: std::mem::take(&mut self.dynamics),
            bound_dynamic: Mutex::new(HashMap::new()),
            rejected: Mutex::new(Vec::new()),
        });
        let handler = Arc::clone(&bound);
        let object = self
            .connection
            .wire()
            .registry(listener(move |id, event| handler.handle_event(id, event)))?;
        self.bound = Some((object, Arc::clone(&bound)));

        self.connection.roundtrip()?;

        for request in bound.singletons.iter().filter(|r| r.required) {
            if request.slot.is_bound() {
                continue;
            }
            let interface = request.interface.name();
            let rejected = bound
                .rejected
                .lock()
                .iter()
                .find(|(iface, _)| *iface == request.interface)
                .map(|&(_, version)| version);
            return Err(match rejected {
                Some(version) => RegistryError::VersionTooLow {
                    interface,
                    version,
                    min: request.min_version,
                },
                None => RegistryError::MissingRequired { interface },
            });
        }
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Destroy all bound singletons and clear their slots.
    pub fn unbind_singletons(&self) {
        let Some((_, bound)) = &self.bound else {
            return;
        };
        for request in &bound.singletons {
            if let Some(global) = request.slot.take() {
                debug!("Unbinding {}", request.interface);
                self.connection.wire().destroy(global.object);
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Some((object, _)) = self.bound.take() {
            self.connection.wire().destroy(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCompositor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_singleton_binds_clamped_version() {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::Compositor, 6);
        let connection = fake.connection();

        let mut registry = Registry::new(&connection);
        let compositor = registry
            .request_singleton(Interface::Compositor, 1, 4, true)
            .unwrap();
        registry.bind().unwrap();

        let bound = compositor.get().unwrap();
        assert_eq!(bound.version, 4);
        assert_eq!(fake.interface_of(bound.object), Some(Interface::Compositor));
    }

    #[test]
    fn test_missing_required_singleton_fails_bind() {
        let fake = FakeCompositor::new();
        let connection = fake.connection();

        let mut registry = Registry::new(&connection);
        registry
            .request_singleton(Interface::Shm, 1, 1, true)
            .unwrap();
        assert!(matches!(
            registry.bind(),
            Err(RegistryError::MissingRequired { interface: "wl_shm" })
        ));
    }

    #[test]
    fn test_version_below_minimum_is_reported() {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::Output, 1);
        let connection = fake.connection();

        let mut registry = Registry::new(&connection);
        registry
            .request_singleton(Interface::Output, 2, 3, true)
            .unwrap();
        assert!(matches!(
            registry.bind(),
            Err(RegistryError::VersionTooLow { version: 1, min: 2, .. })
        ));
    }

    #[test]
    fn test_optional_singleton_may_be_absent() {
        let fake = FakeCompositor::new();
        let connection = fake.connection();

        let mut registry = Registry::new(&connection);
        let presentation = registry
            .request_singleton(Interface::Presentation, 1, 1, false)
            .unwrap();
        registry.bind().unwrap();
        assert!(!presentation.is_bound());
    }

    #[test]
    fn test_request_after_bind_is_rejected() {
        let fake = FakeCompositor::new();
        let connection = fake.connection();

        let mut registry = Registry::new(&connection);
        registry.bind().unwrap();
        assert!(matches!(
            registry.request_singleton(Interface::Shm, 1, 1, false),
            Err(RegistryError::AlreadyBound)
        ));
    }

    #[test]
    fn test_dynamic_globals_add_and_remove() {
        let fake = FakeCompositor::new();
        let first = fake.add_global(Interface::Seat, 5);
        let connection = fake.connection();

        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new(&connection);
        {
            let added = Arc::clone(&added);
            let removed = Arc::clone(&removed);
            registry
                .request(
                    Interface::Seat,
                    1,
                    5,
                    Box::new(move |_, _| {
                        added.fetch_add(1, Ordering::SeqCst);
                    }),
                    Box::new(move |name| removed.lock().push(name)),
                )
                .unwrap();
        }
        registry.bind().unwrap();
        assert_eq!(added.load(Ordering::SeqCst), 1);

        fake.add_global(Interface::Seat, 5);
        fake.remove_global(first);
        connection.roundtrip().unwrap();

        assert_eq!(added.load(Ordering::SeqCst), 2);
        assert_eq!(*removed.lock(), vec![first]);
    }

    #[test]
    fn test_unbind_singletons_clears_slots() {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::XdgWmBase, 1);
        let connection = fake.connection();

        let mut registry = Registry::new(&connection);
        let shell = registry
            .request_singleton(Interface::XdgWmBase, 1, 1, true)
            .unwrap();
        registry.bind().unwrap();
        let object = shell.object().unwrap();

        registry.unbind_singletons();
        assert!(!shell.is_bound());
        assert!(!fake.is_alive(object));
    }
}

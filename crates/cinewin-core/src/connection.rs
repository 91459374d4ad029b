//! The process-wide compositor connection.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::wire::{Wire, WireError};

/// Shared handle to the single compositor connection.
///
/// Cloning hands out another reference to the same connection. Event
/// listeners hold a [`WeakConnection`] so the object table does not keep
/// the connection alive.
#[derive(Clone)]
pub struct Connection {
    wire: Arc<dyn Wire>,
}

impl Connection {
    pub fn new(wire: Arc<dyn Wire>) -> Self {
        Self { wire }
    }

    /// Open a connection with `connect`, failing fast if no compositor is
    /// reachable.
    pub fn open<F>(connect: F) -> Result<Self, WireError>
    where
        F: FnOnce() -> Result<Arc<dyn Wire>, WireError>,
    {
        let wire = connect()?;
        debug!("Connected to Wayland compositor");
        Ok(Self::new(wire))
    }

    pub fn wire(&self) -> &dyn Wire {
        self.wire.as_ref()
    }

    pub fn roundtrip(&self) -> Result<(), WireError> {
        self.wire.roundtrip()
    }

    pub fn flush(&self) -> Result<(), WireError> {
        self.wire.flush()
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            wire: Arc::downgrade(&self.wire),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Non-owning connection reference for use inside listeners.
#[derive(Clone)]
pub struct WeakConnection {
    wire: Weak<dyn Wire>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.wire.upgrade().map(Connection::new)
    }
}

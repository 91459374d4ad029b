//! Cinewin Wayland Backend — `wayland-client` adapter for cinewin-core.
//!
//! This crate:
//! - Owns the `wayland-client` connection, event queue and every proxy.
//! - Maps core [`ObjectId`](cinewin_core::wire::ObjectId)s to live proxies.
//! - Translates protocol events into core events on a background pump.
//! - Backs `wl_shm_pool`s with anonymous memory-mapped files.
//!
//! **No `wayland-client` types leak into `cinewin-core`.**

use std::sync::Arc;

use anyhow::{Context, Result};

mod dispatch;
mod objects;
mod protocols;
mod pump;
mod shm;
mod wire;

pub use wire::WaylandWire;

/// Connect to the compositor from the environment.
pub fn connect() -> Result<cinewin_core::Connection> {
    let connection = cinewin_core::Connection::open(|| {
        let wire = WaylandWire::connect()?;
        Ok(Arc::new(wire) as Arc<dyn cinewin_core::Wire>)
    })
    .context("Failed to connect to a Wayland compositor (is WAYLAND_DISPLAY set?)")?;
    Ok(connection)
}

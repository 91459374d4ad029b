//! Shell surfaces: the role that turns the main surface into a window.
//!
//! Four protocols are supported behind [`ShellSurface`]. The choice is made
//! once, at window creation, by [`create_shell_surface`]: stable
//! `xdg_wm_base`, then `zxdg_shell_v6`, then `wl_shell`. On webOS the
//! webOS shell is used instead of that chain. Whatever the protocol, the
//! handler sees the same `on_configure(serial, size, state)` / `on_close`
//! callbacks.

pub mod webos;
pub mod wl_shell;
pub mod xdg;

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::info;

use crate::connection::Connection;
use crate::geometry::{Point, Rect, Size};
use crate::win_system::WindowingError;
use crate::wire::{ObjectId, ToplevelState, WireError};

pub use webos::WebosShellSurface;
pub use wl_shell::WlShellSurface;
pub use xdg::{XdgShell, XdgShellSurface, XdgShellUnstableV6};

/// Smallest window size requested from the compositor.
pub const MIN_WINDOW_SIZE: Size = Size::new(300, 200);

bitflags! {
    /// Window state as last configured by the compositor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShellState: u8 {
        const MAXIMIZED  = 0b0001;
        const FULLSCREEN = 0b0010;
        const RESIZING   = 0b0100;
        const ACTIVATED  = 0b1000;
    }
}

impl ShellState {
    pub fn from_toplevel_states(states: &[ToplevelState]) -> Self {
        states.iter().fold(Self::empty(), |acc, state| {
            acc | match state {
                ToplevelState::Maximized => Self::MAXIMIZED,
                ToplevelState::Fullscreen => Self::FULLSCREEN,
                ToplevelState::Resizing => Self::RESIZING,
                ToplevelState::Activated => Self::ACTIVATED,
                ToplevelState::Other(_) => Self::empty(),
            }
        })
    }
}

impl fmt::Display for ShellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = [
            (Self::MAXIMIZED, "maximized"),
            (Self::FULLSCREEN, "fullscreen"),
            (Self::RESIZING, "resizing"),
            (Self::ACTIVATED, "activated"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join(" "))
    }
}

/// Window edge grabbed for an interactive resize.
///
/// Values match `xdg_toplevel.resize_edge` and `wl_shell_surface.resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ResizeEdge {
    #[default]
    None = 0,
    Top = 1,
    Bottom = 2,
    Left = 4,
    TopLeft = 5,
    BottomLeft = 6,
    Right = 8,
    TopRight = 9,
    BottomRight = 10,
}

impl ResizeEdge {
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// Protocol backing a [`ShellSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellProtocol {
    XdgShell,
    XdgShellUnstableV6,
    WlShell,
    WebOs,
}

impl fmt::Display for ShellProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::XdgShell => "xdg_wm_base",
            Self::XdgShellUnstableV6 => "zxdg_shell_v6",
            Self::WlShell => "wl_shell",
            Self::WebOs => "wl_webos_shell",
        })
    }
}

/// Receiver of shell events. Called on the event dispatching thread.
pub trait ShellSurfaceHandler: Send + Sync {
    /// The compositor proposes `size` (zero: no preference) and `state`.
    /// `serial` must be acknowledged once the configure was applied.
    fn on_configure(&self, serial: u32, size: Size, state: ShellState);

    /// The compositor asks the window to close.
    fn on_close(&self);
}

/// Protocol-independent window operations.
///
/// Requests describe intent; the resulting state only becomes effective
/// with the compositor's next configure.
pub trait ShellSurface: Send {
    fn protocol(&self) -> ShellProtocol;

    /// Obtain the first configure. Blocks for a roundtrip and must run
    /// before the event pump is started.
    fn initialize(&mut self) -> Result<(), WireError>;

    /// `refresh_rate` in Hz is a hint only some protocols can express.
    fn set_full_screen(&mut self, output: Option<ObjectId>, refresh_rate: f32)
        -> Result<(), WireError>;
    fn set_windowed(&mut self) -> Result<(), WireError>;
    fn set_maximized(&mut self) -> Result<(), WireError>;
    fn unset_maximized(&mut self) -> Result<(), WireError>;
    fn set_minimized(&mut self) -> Result<(), WireError>;
    fn set_window_geometry(&mut self, geometry: Rect) -> Result<(), WireError>;
    fn ack_configure(&mut self, serial: u32) -> Result<(), WireError>;
    fn start_move(&mut self, seat: ObjectId, serial: u32) -> Result<(), WireError>;
    fn start_resize(&mut self, seat: ObjectId, serial: u32, edge: ResizeEdge)
        -> Result<(), WireError>;
    fn show_context_menu(&mut self, seat: ObjectId, serial: u32, position: Point)
        -> Result<(), WireError>;
}

/// Create the shell surface for `surface` using the best protocol the
/// compositor offers.
pub fn create_shell_surface(
    connection: &Connection,
    handler: &Arc<dyn ShellSurfaceHandler>,
    surface: ObjectId,
    title: &str,
    app_id: &str,
    webos: bool,
) -> Result<Box<dyn ShellSurface>, WindowingError> {
    let handler = Arc::downgrade(handler);

    if webos {
        return match WebosShellSurface::try_create(connection, handler, surface)? {
            Some(shell) => Ok(Box::new(shell)),
            None => Err(WindowingError::NoShell),
        };
    }

    if let Some(shell) =
        XdgShell::try_create(connection, handler.clone(), surface, title, app_id)?
    {
        return Ok(Box::new(shell));
    }
    info!("xdg_wm_base is not available, trying zxdg_shell_v6");

    if let Some(shell) =
        XdgShellUnstableV6::try_create(connection, handler.clone(), surface, title, app_id)?
    {
        return Ok(Box::new(shell));
    }
    info!("zxdg_shell_v6 is not available, falling back to wl_shell");

    match WlShellSurface::try_create(connection, handler, surface, title, app_id)? {
        Some(shell) => Ok(Box::new(shell)),
        None => Err(WindowingError::NoShell),
    }
}

//! Compositor wire abstraction.
//!
//! Everything in this crate talks to the compositor through [`Wire`]. A
//! backend implements it on top of a real protocol library; tests use
//! `testing::FakeCompositor`. Requests that create objects go
//! through [`Wire::create`] so the listener for the new object is in place
//! before any of its events can be dispatched.
//!
//! Requests and events are modelled per *role*, not per interface: the
//! stable and unstable-v6 XDG interfaces share the same variants and the
//! backend picks the concrete interface from the object it is sent to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::geometry::{Point, Rect, Size};
use crate::seat::SeatCapabilities;
use crate::shell::webos::WebosState;
use crate::shell::ResizeEdge;

/// Client-side handle of a protocol object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Protocol interfaces this crate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    // ── Globals ──
    Compositor,
    Subcompositor,
    Shm,
    Output,
    Seat,
    XdgWmBase,
    ZxdgShellV6,
    WlShell,
    WebosShell,
    Presentation,
    ColorManager,

    // ── Created objects ──
    Registry,
    Surface,
    Region,
    Subsurface,
    ShmPool,
    Buffer,
    Callback,
    XdgSurface,
    XdgToplevel,
    ZxdgSurfaceV6,
    ZxdgToplevelV6,
    ShellSurface,
    WebosShellSurface,
    PresentationFeedback,
    ColorManagementSurface,
    ImageDescriptionCreator,
    ImageDescription,
    Pointer,
    Keyboard,
    Touch,
}

impl Interface {
    /// Interface name as advertised on the wire.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Compositor => "wl_compositor",
            Self::Subcompositor => "wl_subcompositor",
            Self::Shm => "wl_shm",
            Self::Output => "wl_output",
            Self::Seat => "wl_seat",
            Self::XdgWmBase => "xdg_wm_base",
            Self::ZxdgShellV6 => "zxdg_shell_v6",
            Self::WlShell => "wl_shell",
            Self::WebosShell => "wl_webos_shell",
            Self::Presentation => "wp_presentation",
            Self::ColorManager => "wp_color_manager_v1",
            Self::Registry => "wl_registry",
            Self::Surface => "wl_surface",
            Self::Region => "wl_region",
            Self::Subsurface => "wl_subsurface",
            Self::ShmPool => "wl_shm_pool",
            Self::Buffer => "wl_buffer",
            Self::Callback => "wl_callback",
            Self::XdgSurface => "xdg_surface",
            Self::XdgToplevel => "xdg_toplevel",
            Self::ZxdgSurfaceV6 => "zxdg_surface_v6",
            Self::ZxdgToplevelV6 => "zxdg_toplevel_v6",
            Self::ShellSurface => "wl_shell_surface",
            Self::WebosShellSurface => "wl_webos_shell_surface",
            Self::PresentationFeedback => "wp_presentation_feedback",
            Self::ColorManagementSurface => "wp_color_management_surface_v1",
            Self::ImageDescriptionCreator => "wp_image_description_creator_params_v1",
            Self::ImageDescription => "wp_image_description_v1",
            Self::Pointer => "wl_pointer",
            Self::Keyboard => "wl_keyboard",
            Self::Touch => "wl_touch",
        }
    }

    /// Look up a bindable global by its advertised name.
    pub fn global_from_name(name: &str) -> Option<Self> {
        const GLOBALS: [Interface; 11] = [
            Interface::Compositor,
            Interface::Subcompositor,
            Interface::Shm,
            Interface::Output,
            Interface::Seat,
            Interface::XdgWmBase,
            Interface::ZxdgShellV6,
            Interface::WlShell,
            Interface::WebosShell,
            Interface::Presentation,
            Interface::ColorManager,
        ];
        GLOBALS.into_iter().find(|iface| iface.name() == name)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A global as announced by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

/// `xdg_toplevel` state values. Unknown values are kept, not dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToplevelState {
    Maximized,
    Fullscreen,
    Resizing,
    Activated,
    Other(u32),
}

impl ToplevelState {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Maximized,
            2 => Self::Fullscreen,
            3 => Self::Resizing,
            4 => Self::Activated,
            other => Self::Other(other),
        }
    }
}

/// Scroll axis of a pointer axis event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Vertical,
    Horizontal,
}

/// Requests that create a new protocol object on `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Create {
    /// `wl_compositor.create_surface`
    Surface,
    /// `wl_compositor.create_region`
    Region,
    /// `wl_subcompositor.get_subsurface`
    Subsurface { surface: ObjectId, parent: ObjectId },
    /// `wl_shm_pool.create_buffer`, always ARGB8888
    Buffer {
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
    },
    /// `wl_surface.frame`
    Frame,
    /// `xdg_wm_base.get_xdg_surface` / `zxdg_shell_v6.get_xdg_surface`
    XdgSurface { surface: ObjectId },
    /// `xdg_surface.get_toplevel` / `zxdg_surface_v6.get_toplevel`
    Toplevel,
    /// `wl_shell.get_shell_surface` / `wl_webos_shell.get_shell_surface`
    ShellSurface { surface: ObjectId },
    /// `wp_presentation.feedback`
    Feedback { surface: ObjectId },
    /// `wp_color_manager_v1.get_surface`
    ColorSurface { surface: ObjectId },
    /// `wp_color_manager_v1.create_parametric_creator`
    ParametricCreator,
    /// `wp_image_description_creator_params_v1.create`, consumes the creator
    ImageDescription,
    /// `wl_seat.get_pointer`
    Pointer,
    /// `wl_seat.get_keyboard`
    Keyboard,
    /// `wl_seat.get_touch`
    Touch,
}

/// Chromaticity coordinates scaled by 1 000 000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chromaticity {
    pub x: i32,
    pub y: i32,
}

/// Plain requests on an existing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    // ── wl_surface ──
    Attach {
        buffer: Option<ObjectId>,
        position: Point,
    },
    Damage(Rect),
    Commit,
    SetBufferScale(i32),
    SetOpaqueRegion(Option<ObjectId>),
    SetInputRegion(Option<ObjectId>),

    // ── wl_region ──
    RegionAdd(Rect),

    // ── wl_subsurface ──
    SetPosition(Point),
    SetSync,
    SetDesync,

    // ── shell globals and shell surfaces ──
    Pong(u32),
    AckConfigure(u32),
    SetWindowGeometry(Rect),
    SetTitle(String),
    SetAppId(String),
    SetMinSize(Size),
    SetFullscreen {
        output: Option<ObjectId>,
    },
    UnsetFullscreen,
    SetMaximized,
    UnsetMaximized,
    SetMinimized,
    Move {
        seat: ObjectId,
        serial: u32,
    },
    Resize {
        seat: ObjectId,
        serial: u32,
        edge: ResizeEdge,
    },
    ShowWindowMenu {
        seat: ObjectId,
        serial: u32,
        position: Point,
    },

    // ── wl_shell_surface ──
    SetToplevel,
    /// Fullscreen with method `driver`; `framerate` in mHz.
    SetShellFullscreen {
        framerate: u32,
        output: Option<ObjectId>,
    },
    SetShellMaximized {
        output: Option<ObjectId>,
    },
    SetClass(String),

    // ── wl_webos_shell_surface ──
    SetWebosState(WebosState),
    SetWebosProperty {
        name: String,
        value: String,
    },

    // ── wp_image_description_creator_params_v1 ──
    SetTfNamed(u32),
    SetPrimariesNamed(u32),
    SetMasteringDisplayPrimaries {
        red: Chromaticity,
        green: Chromaticity,
        blue: Chromaticity,
        white: Chromaticity,
    },
    /// `min` in 0.0001 cd/m², `max` in cd/m².
    SetMasteringLuminance {
        min: u32,
        max: u32,
    },
    SetMaxCll(u32),
    SetMaxFall(u32),

    // ── wp_color_management_surface_v1 ──
    SetImageDescription {
        description: ObjectId,
        render_intent: u32,
    },
    UnsetImageDescription,

    // ── wl_pointer ──
    SetCursor {
        serial: u32,
        surface: Option<ObjectId>,
        hotspot: Point,
    },
}

/// Events delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // ── wl_registry ──
    Global(GlobalInfo),
    GlobalRemove {
        name: u32,
    },

    // ── wl_output ──
    OutputGeometry {
        position: Point,
        /// Millimetres.
        physical_size: Size,
        make: String,
        model: String,
    },
    OutputMode {
        size: Size,
        /// mHz
        refresh: i32,
        current: bool,
        preferred: bool,
    },
    OutputScale(i32),
    OutputDone,

    // ── wl_surface ──
    SurfaceEnter {
        output: ObjectId,
    },
    SurfaceLeave {
        output: ObjectId,
    },

    // ── shells ──
    Ping {
        serial: u32,
    },
    /// `xdg_surface.configure`
    SurfaceConfigure {
        serial: u32,
    },
    /// `xdg_toplevel.configure`
    ToplevelConfigure {
        size: Size,
        states: Vec<ToplevelState>,
    },
    Close,
    /// `wl_shell_surface.configure`
    ShellConfigure {
        edges: u32,
        size: Size,
    },
    WebosStateChanged(WebosState),
    WebosPositionChanged(Point),

    // ── wl_buffer / wl_callback ──
    Release,
    Done {
        data: u32,
    },

    // ── wp_presentation ──
    ClockId(u32),
    SyncOutput {
        output: ObjectId,
    },
    Presented {
        timestamp: Duration,
        /// Nanoseconds, 0 if unknown.
        refresh: u32,
        msc: u64,
        flags: u32,
    },
    Discarded,

    // ── wp_color_manager_v1 ──
    SupportedIntent(u32),
    SupportedFeature(u32),
    SupportedTfNamed(u32),
    SupportedPrimariesNamed(u32),
    ColorManagerDone,
    ImageDescriptionReady {
        identity: u32,
    },
    ImageDescriptionFailed {
        cause: u32,
        message: String,
    },

    // ── wl_seat ──
    Capabilities(SeatCapabilities),
    SeatName(String),

    // ── wl_pointer ──
    PointerEnter {
        serial: u32,
        surface: ObjectId,
        x: f64,
        y: f64,
    },
    PointerLeave {
        serial: u32,
        surface: ObjectId,
    },
    PointerMotion {
        time: u32,
        x: f64,
        y: f64,
    },
    PointerButton {
        serial: u32,
        time: u32,
        button: u32,
        pressed: bool,
    },
    PointerAxis {
        time: u32,
        axis: Axis,
        value: f64,
    },

    // ── wl_keyboard ──
    KeyboardEnter {
        serial: u32,
        surface: ObjectId,
    },
    KeyboardLeave {
        serial: u32,
        surface: ObjectId,
    },
    Key {
        serial: u32,
        time: u32,
        key: u32,
        pressed: bool,
    },
    Modifiers {
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    },

    // ── wl_touch ──
    TouchDown {
        serial: u32,
        time: u32,
        surface: ObjectId,
        id: i32,
        x: f64,
        y: f64,
    },
    TouchUp {
        serial: u32,
        time: u32,
        id: i32,
    },
    TouchMotion {
        time: u32,
        id: i32,
        x: f64,
        y: f64,
    },
    TouchCancel,
}

/// Callback receiving the events of one object.
///
/// Invoked on whichever thread dispatches events, never with a wire lock
/// held, so listeners may issue requests.
pub type Listener = Arc<dyn Fn(ObjectId, &Event) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(ObjectId, &Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Client-writable memory backing a `wl_shm_pool`.
pub trait ShmMemory: Send {
    fn as_mut_slice(&mut self) -> &mut [u8];
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A `wl_shm_pool` together with its mapping.
pub struct ShmPool {
    pub id: ObjectId,
    pub memory: Box<dyn ShmMemory>,
}

impl fmt::Debug for ShmPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmPool")
            .field("id", &self.id)
            .field("len", &self.memory.len())
            .finish()
    }
}

/// Errors reported by a [`Wire`] implementation.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("no Wayland compositor reachable: {0}")]
    NoCompositor(String),

    #[error("unknown protocol object {0}")]
    UnknownObject(ObjectId),

    #[error("{request} is not a valid request on {interface}")]
    InvalidRequest {
        interface: &'static str,
        request: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection to the compositor lost: {0}")]
    Connection(String),

    #[error("shared memory: {0}")]
    Shm(#[from] std::io::Error),

    #[error("event pump: {0}")]
    EventPump(String),
}

/// A connection to a compositor, seen as a table of objects.
pub trait Wire: Send + Sync {
    /// Create the `wl_registry`; `listener` receives global announcements.
    fn registry(&self, listener: Listener) -> Result<ObjectId, WireError>;

    /// Bind global `name` at `version`.
    fn bind(
        &self,
        registry: ObjectId,
        name: u32,
        interface: Interface,
        version: u32,
        listener: Option<Listener>,
    ) -> Result<ObjectId, WireError>;

    /// Issue an object-creating request on `parent`.
    fn create(
        &self,
        parent: ObjectId,
        request: Create,
        listener: Option<Listener>,
    ) -> Result<ObjectId, WireError>;

    fn send(&self, object: ObjectId, request: Request) -> Result<(), WireError>;

    /// Replace the listener of an existing object.
    fn set_listener(&self, object: ObjectId, listener: Listener);

    /// Destroy the object (sending its destructor request if it has one)
    /// and drop its listener. Unknown objects are ignored.
    fn destroy(&self, object: ObjectId);

    /// Negotiated version of `object`, 0 if unknown.
    fn version(&self, object: ObjectId) -> u32;

    /// Allocate `size` bytes of shared memory and wrap them in a pool.
    fn create_shm_pool(&self, shm: ObjectId, size: usize) -> Result<ShmPool, WireError>;

    /// Block until the compositor has processed every request sent so far,
    /// dispatching the resulting events.
    fn roundtrip(&self) -> Result<(), WireError>;

    fn flush(&self) -> Result<(), WireError>;

    /// Current time of the clock announced by `wp_presentation.clock_id`.
    fn clock_time(&self, clock_id: u32) -> Result<Duration, WireError>;

    /// Start dispatching events on a background thread.
    fn start_event_pump(&self) -> Result<(), WireError>;

    /// Stop the background thread; idempotent.
    fn stop_event_pump(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_lookup_only_knows_globals() {
        assert_eq!(
            Interface::global_from_name("xdg_wm_base"),
            Some(Interface::XdgWmBase)
        );
        assert_eq!(
            Interface::global_from_name("wp_color_manager_v1"),
            Some(Interface::ColorManager)
        );
        assert_eq!(Interface::global_from_name("wl_surface"), None);
        assert_eq!(Interface::global_from_name("zwp_linux_dmabuf_v1"), None);
    }

    #[test]
    fn test_toplevel_state_keeps_unknown_values() {
        assert_eq!(ToplevelState::from_raw(2), ToplevelState::Fullscreen);
        assert_eq!(ToplevelState::from_raw(9), ToplevelState::Other(9));
    }
}

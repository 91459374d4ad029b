//! The window system: one main window on one compositor connection.
//!
//! [`WinSystem`] owns the registry, the outputs, the seats and the main
//! surface with its shell role and decorations. Compositor events arrive on
//! the event pump thread; anything that changes the window size is turned
//! into a message on an internal [`Protocol`] and applied on the main
//! thread by [`WinSystem::process_messages`], which the application calls
//! once per frame (via [`WinSystem::finish_frame_presentation`]).
//!
//! Size changes are two-phase. The window system computes the new sizes,
//! posts [`AppEvent::ModeChange`] or [`AppEvent::VideoResize`] and waits;
//! the application resizes its render target and calls
//! [`WinSystem::finish_mode_change`] or [`WinSystem::finish_window_resize`],
//! which applies the pending state and acks the configure. While waiting,
//! new configures stay queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::actor::Payload;
use crate::actor::Protocol;
use crate::color::{ColorManager, VideoPicture};
use crate::config::Config;
use crate::connection::Connection;
use crate::decorator::layout::{full_surface_size, main_surface_size};
use crate::decorator::{DecorationError, DecoratorHandler, WindowDecorator};
use crate::display::{DisplaySettings, ResolutionId, ResolutionInfo};
use crate::event::{AppEvent, AppMessenger, InputEvent};
use crate::geometry::{Point, Rect, Size};
use crate::invariants::{self, InvariantError};
use crate::output::Output;
use crate::presentation::{PresentationInfo, PresentationTracker, Registration, VideoSync};
use crate::registry::{BoundGlobal, Registry, RegistryError, Singleton};
use crate::seat::{Seat, SeatHandler};
use crate::shell::{
    create_shell_surface, ResizeEdge, ShellProtocol, ShellState, ShellSurface,
    ShellSurfaceHandler, MIN_WINDOW_SIZE,
};
use crate::wire::{listener, Create, Event, Interface, Listener, ObjectId, Request, WireError};

/// Signals on the main-thread lane of the window protocol.
mod signal {
    pub const CONFIGURE: i32 = 0;
    pub const OUTPUT_HOTPLUG: i32 = 1;
    pub const BUFFER_SCALE: i32 = 2;
}

#[derive(Debug, Error)]
pub enum WindowingError {
    #[error("no supported shell protocol is available")]
    NoShell,

    #[error("the compositor advertises no outputs")]
    NoOutputs,

    #[error("the window system is not initialized")]
    NotInitialized,

    #[error("a window already exists")]
    WindowExists,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Decoration(#[from] DecorationError),
}

/// Sizes of the main window, all derived from the configured size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    /// Logical size of the main surface (without decorations).
    pub surface_size: Size,
    /// Pixel size of the render target: `surface_size * scale`.
    pub buffer_size: Size,
    /// Logical size of the whole window, decorations included.
    pub configured_size: Size,
    pub scale: i32,
}

/// Which size variables changed in one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeUpdate {
    pub surface_size_changed: bool,
    pub buffer_size_changed: bool,
    pub configured_size_changed: bool,
    pub buffer_scale_changed: bool,
}

impl SizeUpdate {
    const ALL: Self = Self {
        surface_size_changed: true,
        buffer_size_changed: true,
        configured_size_changed: true,
        buffer_scale_changed: true,
    };

    pub const fn any(self) -> bool {
        self.surface_size_changed
            || self.buffer_size_changed
            || self.configured_size_changed
            || self.buffer_scale_changed
    }
}

/// What one [`WinSystem::process_messages`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Configures that were superseded by a later one in the same batch.
    pub configures_skipped: usize,
    pub configures_applied: usize,
    pub hotplugs: usize,
    pub scale_changes: usize,
}

#[derive(Debug, Clone, Copy)]
struct ConfigureMessage {
    serial: u32,
    size: Size,
    state: ShellState,
}

/// State to apply once the application confirms a mode change.
#[derive(Debug, Clone, Copy, Default)]
struct NextState {
    must_be_acked: bool,
    configure_serial: u32,
    configured_size: Size,
    scale: i32,
    shell_state: ShellState,
}

#[derive(Debug)]
struct SizeState {
    surface_size: Size,
    buffer_size: Size,
    configured_size: Size,
    scale: i32,
    shell_state: ShellState,
    refresh_rate: f32,
    full_screen: bool,
    waiting_for_apply: bool,
    next: NextState,
    last_acked_serial: Option<u32>,
    shell_initializing: bool,
    initial_ack: Option<u32>,
    initial_set_full_screen: bool,
    last_set_output: Option<ObjectId>,
}

impl Default for SizeState {
    fn default() -> Self {
        Self {
            surface_size: Size::ZERO,
            buffer_size: Size::ZERO,
            configured_size: Size::ZERO,
            scale: 1,
            shell_state: ShellState::empty(),
            refresh_rate: 60.0,
            full_screen: false,
            waiting_for_apply: false,
            next: NextState::default(),
            last_acked_serial: None,
            shell_initializing: false,
            initial_ack: None,
            initial_set_full_screen: true,
            last_set_output: None,
        }
    }
}

/// Everything the event pump thread touches.
struct WindowShared {
    messenger: Arc<dyn AppMessenger>,
    protocol: Protocol,
    display: Arc<Mutex<DisplaySettings>>,
    presentation: PresentationTracker,
    surface: Mutex<Option<ObjectId>>,
    shell: Mutex<Option<Box<dyn ShellSurface>>>,
    decorator: RwLock<Option<Arc<WindowDecorator>>>,
    size: Mutex<SizeState>,
    outputs: Mutex<IndexMap<u32, Arc<Output>>>,
    outputs_in_preparation: Mutex<HashMap<u32, Arc<Output>>>,
    surface_outputs: Mutex<Vec<Arc<Output>>>,
    seats: Mutex<HashMap<u32, Arc<Seat>>>,
    pointer_positions: Mutex<HashMap<u32, (f64, f64)>>,
    os_cursor_visible: AtomicBool,
}

struct Globals {
    registry: Registry,
    compositor: Singleton,
    subcompositor: Singleton,
    shm: Singleton,
}

struct WindowResources {
    color: ColorManager,
    /// Keeps the seat globals bound.
    _seat_registry: Registry,
}

/// Windowing system for one main window.
pub struct WinSystem {
    connection: Connection,
    config: Config,
    shared: Arc<WindowShared>,
    globals: Option<Globals>,
    window: Option<WindowResources>,
}

impl WinSystem {
    pub fn new(connection: Connection, config: Config, messenger: Arc<dyn AppMessenger>) -> Self {
        let mut display = DisplaySettings::default();
        display.set_window_resolution(
            config.video_screen.windowed_width,
            config.video_screen.windowed_height,
        );
        let presentation = PresentationTracker::new(
            &connection,
            config.presentation.latency_window,
            config.presentation.frame_wait_timeout(),
        );
        let shared = Arc::new(WindowShared {
            messenger,
            protocol: Protocol::new("WinSystem"),
            display: Arc::new(Mutex::new(display)),
            presentation,
            surface: Mutex::new(None),
            shell: Mutex::new(None),
            decorator: RwLock::new(None),
            size: Mutex::new(SizeState::default()),
            outputs: Mutex::new(IndexMap::new()),
            outputs_in_preparation: Mutex::new(HashMap::new()),
            surface_outputs: Mutex::new(Vec::new()),
            seats: Mutex::new(HashMap::new()),
            pointer_positions: Mutex::new(HashMap::new()),
            os_cursor_visible: AtomicBool::new(false),
        });
        Self {
            connection,
            config,
            shared,
            globals: None,
            window: None,
        }
    }

    // ── Lifecycle ──

    /// Bind the globals the window system needs and learn the outputs.
    pub fn init_window_system(&mut self) -> Result<(), WindowingError> {
        if self.globals.is_some() {
            return Ok(());
        }

        let mut registry = Registry::new(&self.connection);
        let compositor = registry.request_singleton(Interface::Compositor, 1, 4, true)?;
        let subcompositor = registry.request_singleton(Interface::Subcompositor, 1, 1, false)?;
        let shm = registry.request_singleton(Interface::Shm, 1, 1, true)?;
        let presentation = registry.request_singleton_with_listener(
            Interface::Presentation,
            1,
            1,
            false,
            self.shared.presentation.presentation_listener(),
        )?;

        let weak_add = Arc::downgrade(&self.shared);
        let weak_remove = Arc::downgrade(&self.shared);
        registry.request(
            Interface::Output,
            2,
            3,
            Box::new(move |connection, bound| {
                if let Some(shared) = weak_add.upgrade() {
                    WindowShared::on_output_added(&shared, connection, bound);
                }
            }),
            Box::new(move |name| {
                if let Some(shared) = weak_remove.upgrade() {
                    shared.on_output_removed(name);
                }
            }),
        )?;
        registry.bind()?;

        if self.shared.outputs.lock().is_empty() {
            registry.unbind_singletons();
            self.shared.outputs_in_preparation.lock().clear();
            return Err(WindowingError::NoOutputs);
        }

        self.shared.presentation.set_presentation(presentation.object());
        self.globals = Some(Globals {
            registry,
            compositor,
            subcompositor,
            shm,
        });

        self.update_resolutions();
        // Outputs seen during init are already in the resolution list.
        self.shared.protocol.purge_out(signal::OUTPUT_HOTPLUG);
        self.shared.messenger.post(AppEvent::MouseActive(false));
        Ok(())
    }

    pub fn destroy_window_system(&mut self) {
        self.destroy_window();
        self.shared.protocol.purge();
        self.shared.outputs_in_preparation.lock().clear();
        self.shared.outputs.lock().clear();
        self.shared.presentation.set_presentation(None);
        if let Some(globals) = self.globals.take() {
            globals.registry.unbind_singletons();
        }
    }

    /// Create the main window and start dispatching events.
    pub fn create_window(&mut self) -> Result<(), WindowingError> {
        if self.shared.surface().is_some() {
            return Err(WindowingError::WindowExists);
        }
        let result = self.create_window_inner();
        if result.is_err() {
            self.destroy_window();
        }
        result
    }

    fn create_window_inner(&mut self) -> Result<(), WindowingError> {
        let globals = self.globals.as_ref().ok_or(WindowingError::NotInitialized)?;
        let compositor = globals
            .compositor
            .object()
            .ok_or(WindowingError::NotInitialized)?;
        let subcompositor = globals.subcompositor.object();
        let shm = globals.shm.object();

        let surface = self.connection.wire().create(
            compositor,
            Create::Surface,
            Some(self.shared.surface_listener()),
        )?;
        *self.shared.surface.lock() = Some(surface);

        let webos = self.config.platform.webos;
        let decorator_handler: Arc<dyn DecoratorHandler> = self.shared.clone();
        let decorator = WindowDecorator::new(
            &self.connection,
            Arc::downgrade(&decorator_handler),
            surface,
            compositor,
            subcompositor,
            shm,
            self.config.window.decorations && !webos,
        );
        *self.shared.decorator.write() = Some(decorator);

        let full_screen = self.config.video_screen.fullscreen;
        let res = {
            let display = self.shared.display.lock();
            if full_screen {
                display.desktop().clone()
            } else {
                display.window().clone()
            }
        };
        let mut shell_state = ShellState::ACTIVATED;
        shell_state.set(ShellState::FULLSCREEN, full_screen);
        {
            let mut size = self.shared.size.lock();
            *size = SizeState {
                shell_state,
                full_screen,
                refresh_rate: res.refresh_rate,
                ..SizeState::default()
            };
            let scale = size.scale;
            self.shared.update_size_variables(
                &mut size,
                Size::new(res.width, res.height),
                scale,
                shell_state,
                false,
            );
        }

        let shell_handler: Arc<dyn ShellSurfaceHandler> = self.shared.clone();
        let mut shell = create_shell_surface(
            &self.connection,
            &shell_handler,
            surface,
            &self.config.window.title,
            &self.config.window.app_id,
            webos,
        )?;
        info!("Using {} shell", shell.protocol());

        if full_screen {
            let output = self
                .shared
                .find_output_by_name(&self.config.video_screen.monitor);
            let object = output.as_ref().map(|o| o.object());
            self.shared.size.lock().last_set_output = object;
            shell.set_full_screen(object, res.refresh_rate)?;
            if let Some(output) = output {
                let scale = output.scale();
                let mut size = self.shared.size.lock();
                self.shared.update_size_variables(
                    &mut size,
                    Size::new(res.width, res.height) / scale,
                    scale,
                    shell_state,
                    false,
                );
            }
        }

        self.shared.size.lock().shell_initializing = true;
        let initialized = shell.initialize();
        let initial_ack = {
            let mut size = self.shared.size.lock();
            size.shell_initializing = false;
            size.initial_ack.take()
        };
        initialized?;
        if let Some(serial) = initial_ack {
            shell.ack_configure(serial)?;
            self.shared.size.lock().last_acked_serial = Some(serial);
        }
        *self.shared.shell.lock() = Some(shell);

        self.apply_size_update(SizeUpdate::ALL, true);

        let (buffer_size, refresh_rate, full_screen) = {
            let size = self.shared.size.lock();
            (size.buffer_size, size.refresh_rate, size.full_screen)
        };
        {
            let mut display = self.shared.display.lock();
            if full_screen {
                let output = display.desktop().output.clone();
                let pixel_ratio = display.desktop().pixel_ratio;
                display.update_desktop_resolution(
                    buffer_size.width,
                    buffer_size.height,
                    refresh_rate,
                    &output,
                );
                if let Some(desktop) = display.get_mut(ResolutionId::Desktop) {
                    desktop.pixel_ratio = pixel_ratio;
                }
            } else {
                display.set_window_resolution(buffer_size.width, buffer_size.height);
            }
        }

        // Before the pump starts, so capabilities are complete when HDR is
        // first requested.
        let color = ColorManager::new(&self.connection, surface, self.config.video_screen.hdr_enabled)?;

        let mut seat_registry = Registry::new(&self.connection);
        let weak_add = Arc::downgrade(&self.shared);
        let weak_remove = Arc::downgrade(&self.shared);
        seat_registry.request(
            Interface::Seat,
            1,
            5,
            Box::new(move |connection, bound| {
                if let Some(shared) = weak_add.upgrade() {
                    WindowShared::on_seat_added(&shared, connection, bound);
                }
            }),
            Box::new(move |name| {
                if let Some(shared) = weak_remove.upgrade() {
                    shared.on_seat_removed(name);
                }
            }),
        )?;
        seat_registry.bind()?;
        if self.shared.seats.lock().is_empty() {
            warn!("No seat available, there will be no input");
        }

        self.window = Some(WindowResources {
            color,
            _seat_registry: seat_registry,
        });

        self.connection.wire().start_event_pump()?;
        self.shared.size.lock().initial_set_full_screen = true;
        info!("Window created");
        Ok(())
    }

    /// Tear the window down. The event pump is stopped first so no
    /// callback runs against a half-destroyed window.
    pub fn destroy_window(&mut self) {
        let wire = self.connection.wire();
        wire.stop_event_pump();

        drop(self.shared.shell.lock().take());
        drop(self.window.take());
        self.shared.seats.lock().clear();
        self.shared.pointer_positions.lock().clear();
        drop(self.shared.decorator.write().take());
        self.shared.surface_outputs.lock().clear();
        if let Some(surface) = self.shared.surface.lock().take() {
            wire.destroy(surface);
            debug!("Window destroyed");
        }
        let mut size = self.shared.size.lock();
        size.waiting_for_apply = false;
        size.last_set_output = None;
        size.last_acked_serial = None;
    }

    // ── Message processing ──

    /// Apply what the event pump queued. Configures within one batch are
    /// coalesced: only the last one is applied. Nothing is consumed while a
    /// mode change is waiting for the application.
    pub fn process_messages(&self) -> ProcessStats {
        let mut stats = ProcessStats::default();
        if self.shared.size.lock().waiting_for_apply {
            return stats;
        }

        let mut last_configure: Option<ConfigureMessage> = None;
        let mut new_scale = self.shared.size.lock().scale;

        while let Some(mut message) = self.shared.protocol.receive_out_message() {
            match message.signal {
                signal::CONFIGURE => {
                    if let Some(configure) = message.take_payload().downcast::<ConfigureMessage>() {
                        if last_configure.replace(configure).is_some() {
                            stats.configures_skipped += 1;
                        }
                    }
                }
                signal::OUTPUT_HOTPLUG => {
                    stats.hotplugs += 1;
                    self.handle_output_hotplug();
                }
                signal::BUFFER_SCALE => {
                    if !self.can_set_buffer_scale() {
                        continue;
                    }
                    if let Ok(bytes) = <[u8; 4]>::try_from(message.payload.bytes()) {
                        new_scale = i32::from_le_bytes(bytes);
                    }
                }
                other => warn!("Unhandled window system message {other}"),
            }
        }

        let (scale, configured_size, shell_state) = {
            let size = self.shared.size.lock();
            (size.scale, size.configured_size, size.shell_state)
        };

        if let Some(configure) = last_configure {
            stats.configures_applied += 1;
            if stats.configures_skipped > 0 {
                debug!("Skipped {} configure event(s)", stats.configures_skipped);
            }
            debug!(
                "Configure serial {}: size {} state {}",
                configure.serial, configure.size, configure.state
            );
            if new_scale != scale {
                stats.scale_changes += 1;
            }

            let size = if !configure.size.is_zero() {
                configure.size
            } else if configure.state.contains(ShellState::FULLSCREEN) {
                configured_size
            } else {
                let windowed = {
                    let display = self.shared.display.lock();
                    Size::new(display.window().width, display.window().height)
                };
                let surface = windowed / new_scale.max(1);
                self.shared
                    .calculate_full_surface_size(surface, configure.state)
            };
            self.set_resolution_internal(
                size,
                new_scale,
                configure.state,
                true,
                true,
                configure.serial,
            );
        } else if new_scale != scale {
            stats.scale_changes += 1;
            info!("Buffer scale changed to {new_scale}");
            self.set_resolution_internal(configured_size, new_scale, shell_state, true, false, 0);
        }

        stats
    }

    fn handle_output_hotplug(&self) {
        debug!("Output hotplug, re-reading resolutions");
        self.update_resolutions();
        self.shared.messenger.post(AppEvent::OutputsChanged);

        let desktop = self.shared.display.lock().desktop().clone();
        let Some(output) = self.shared.find_output_by_name(&desktop.output) else {
            return;
        };
        let object = output.object();
        let switch = {
            let mut size = self.shared.size.lock();
            if size.full_screen && size.last_set_output != Some(object) {
                size.last_set_output = Some(object);
                true
            } else {
                false
            }
        };
        if switch {
            info!("Moving fullscreen window to output \"{}\"", desktop.output);
            self.shared
                .with_shell(|shell| shell.set_full_screen(Some(object), desktop.refresh_rate));
        }
    }

    // ── Size state machine ──

    fn set_resolution_internal(
        &self,
        size: Size,
        scale: i32,
        shell_state: ShellState,
        size_includes_decoration: bool,
        must_be_acked: bool,
        configure_serial: u32,
    ) {
        let sizes =
            self.shared
                .calculate_sizes(size, scale, shell_state, size_includes_decoration);
        let full_screen = shell_state.contains(ShellState::FULLSCREEN);
        let output_refresh = self.shared.max_surface_refresh_rate();

        let mut state = self.shared.size.lock();
        let refresh_rate = output_refresh.unwrap_or(state.refresh_rate);
        state.next = NextState {
            must_be_acked,
            configure_serial,
            configured_size: sizes.configured_size,
            scale,
            shell_state,
        };

        let changed = (refresh_rate - state.refresh_rate).abs() > f32::EPSILON
            || sizes.buffer_size != state.buffer_size
            || full_screen != state.full_screen;
        if !changed {
            drop(state);
            trace!("Resolution unchanged, applying directly");
            self.apply_next_state();
            return;
        }

        let Size { width, height } = sizes.buffer_size;
        let event = {
            let mut display = self.shared.display.lock();
            if !full_screen {
                if state.full_screen {
                    display.set_window_resolution(width, height);
                    AppEvent::ModeChange {
                        resolution: ResolutionId::Window,
                    }
                } else {
                    AppEvent::VideoResize { width, height }
                }
            } else {
                let resolution = display
                    .find_matching(width, height, refresh_rate)
                    .unwrap_or_else(|| {
                        let output = display.desktop().output.clone();
                        let mut custom = ResolutionInfo::new(width, height, refresh_rate, &output);
                        custom.pixel_ratio = display.desktop().pixel_ratio;
                        display.add_custom(custom)
                    });
                AppEvent::ModeChange { resolution }
            }
        };
        info!(
            "Resolution change to {} @ {refresh_rate:.3} Hz fullscreen={full_screen}, waiting for the application",
            sizes.buffer_size
        );
        state.waiting_for_apply = true;
        drop(state);
        self.shared.messenger.post(event);
    }

    /// The application switched to resolution `id`.
    pub fn finish_mode_change(&self, id: ResolutionId) {
        let res = {
            let mut display = self.shared.display.lock();
            display.set_current(id);
            display.get(id).cloned()
        };
        {
            let mut size = self.shared.size.lock();
            if let Some(res) = res {
                size.full_screen = res.full_screen;
                size.refresh_rate = res.refresh_rate;
            }
            size.waiting_for_apply = false;
        }
        self.apply_next_state();
    }

    /// The application resized its windowed render target.
    pub fn finish_window_resize(&self) {
        self.shared.size.lock().waiting_for_apply = false;
        self.apply_next_state();
    }

    fn apply_next_state(&self) {
        let (update, state_changed, next) = {
            let mut size = self.shared.size.lock();
            let next = size.next;
            let state_changed = size.shell_state != next.shell_state;
            size.shell_state = next.shell_state;
            let update = self.shared.update_size_variables(
                &mut size,
                next.configured_size,
                next.scale,
                next.shell_state,
                true,
            );
            (update, state_changed, next)
        };
        self.apply_size_update(update, state_changed);
        if next.must_be_acked {
            self.ack_configure(next.configure_serial);
        }

        #[cfg(debug_assertions)]
        if let Err(e) = self.validate_invariants() {
            warn!("Invariant violation after applying size change: {}", e);
        }
    }

    /// Validate the size invariants. See `invariants` module.
    pub fn validate_invariants(&self) -> Result<(), InvariantError> {
        let decorations_active = self
            .shared
            .decorator()
            .is_some_and(|decorator| decorator.is_decoration_active(self.shell_state()));
        invariants::validate(&self.sizes(), decorations_active)
    }

    fn apply_size_update(&self, update: SizeUpdate, state_changed: bool) {
        let Some(surface) = self.shared.surface() else {
            return;
        };
        let (surface_size, scale, shell_state) = {
            let size = self.shared.size.lock();
            (size.surface_size, size.scale, size.shell_state)
        };
        let wire = self.connection.wire();

        if update.buffer_scale_changed && self.can_set_buffer_scale() {
            debug!("Setting buffer scale to {scale}");
            if let Err(err) = wire.send(surface, Request::SetBufferScale(scale)) {
                warn!("Failed to set buffer scale: {err}");
            }
        }

        if update.surface_size_changed {
            if let Err(err) = self.set_opaque_region(surface, surface_size) {
                warn!("Failed to set opaque region: {err}");
            }
        }

        let decorator = self.shared.decorator();
        if let Some(decorator) = &decorator {
            if let Err(err) = decorator.set_state(surface_size, scale, shell_state) {
                warn!("Failed to update decorations: {err}");
            }
        }

        if update.configured_size_changed || state_changed {
            let geometry = decorator.map_or_else(
                || Rect::from_parts(Point::ORIGIN, surface_size),
                |d| d.window_geometry(surface_size, shell_state),
            );
            self.shared
                .with_shell(|shell| shell.set_window_geometry(geometry));
        }
    }

    fn set_opaque_region(&self, surface: ObjectId, size: Size) -> Result<(), WireError> {
        let Some(compositor) = self.globals.as_ref().and_then(|g| g.compositor.object()) else {
            return Ok(());
        };
        let wire = self.connection.wire();
        let region = wire.create(compositor, Create::Region, None)?;
        let result = wire
            .send(region, Request::RegionAdd(Rect::from_parts(Point::ORIGIN, size)))
            .and_then(|()| wire.send(surface, Request::SetOpaqueRegion(Some(region))));
        wire.destroy(region);
        result
    }

    /// Ack `serial` unless it was the last one acked.
    fn ack_configure(&self, serial: u32) {
        {
            let mut size = self.shared.size.lock();
            if size.last_acked_serial == Some(serial) {
                return;
            }
            size.last_acked_serial = Some(serial);
        }
        debug!("Acking configure serial {serial}");
        self.shared.with_shell(|shell| shell.ack_configure(serial));
    }

    fn can_set_buffer_scale(&self) -> bool {
        self.shared
            .surface()
            .is_some_and(|surface| self.connection.wire().version(surface) >= 3)
    }

    /// Resolution change requested by the application. Returns whether
    /// the application should switch immediately; `false` means a
    /// [`AppEvent::ModeChange`] or [`AppEvent::VideoResize`] will follow
    /// once the compositor answers.
    fn set_resolution_external(&self, full_screen: bool, res: &ResolutionInfo) -> bool {
        let (must_honor, currently_full_screen) = {
            let size = self.shared.size.lock();
            let must_honor = size.waiting_for_apply
                || size
                    .shell_state
                    .intersects(ShellState::MAXIMIZED | ShellState::FULLSCREEN)
                || full_screen;
            (must_honor, size.shell_state.contains(ShellState::FULLSCREEN))
        };
        info!(
            "Application switching to {}x{} @ {:.3} Hz fullscreen={full_screen}",
            res.width, res.height, res.refresh_rate
        );

        if full_screen {
            let output = self
                .shared
                .find_output_by_name(&res.output)
                .map(|o| o.object());
            let send = {
                let mut size = self.shared.size.lock();
                if !currently_full_screen || size.last_set_output != output {
                    size.last_set_output = output;
                    true
                } else {
                    false
                }
            };
            if send {
                info!("Requesting fullscreen on output \"{}\"", res.output);
                self.shared
                    .with_shell(|shell| shell.set_full_screen(output, res.refresh_rate));
            } else {
                debug!("Already fullscreen on the requested output");
            }
        } else if currently_full_screen {
            info!("Requesting windowed mode");
            self.shared.with_shell(|shell| shell.set_windowed());
        }

        if !must_honor {
            let update = {
                let mut size = self.shared.size.lock();
                let scale = size.scale;
                let shell_state = size.shell_state;
                self.shared.update_size_variables(
                    &mut size,
                    Size::new(res.width, res.height) / scale,
                    scale,
                    shell_state,
                    false,
                )
            };
            self.apply_size_update(update, false);
        }

        let initial = std::mem::replace(&mut self.shared.size.lock().initial_set_full_screen, false);
        !must_honor || initial
    }

    /// Switch to `res`, fullscreen or windowed.
    pub fn set_full_screen(&self, full_screen: bool, res: &ResolutionInfo) -> bool {
        self.set_resolution_external(full_screen, res)
    }

    /// Resize the window to the windowed resolution.
    pub fn resize_window(&self) -> bool {
        let res = self.shared.display.lock().window().clone();
        self.set_resolution_external(false, &res)
    }

    // ── Outputs ──

    /// Rebuild the resolution list from the output the user picked (or
    /// the one we are fullscreen on, or the first one).
    pub fn update_resolutions(&self) {
        let user_output = &self.config.video_screen.monitor;
        let last_set = self.shared.size.lock().last_set_output;
        let output = {
            let outputs = self.shared.outputs.lock();
            outputs
                .values()
                .find(|o| o.user_friendly_name() == *user_output)
                .or_else(|| last_set.and_then(|obj| outputs.values().find(|o| o.object() == obj)))
                .or_else(|| outputs.values().next())
                .cloned()
        };
        let Some(output) = output else {
            self.shared.display.lock().clear_custom();
            return;
        };

        let info = output.info();
        let name = info.user_friendly_name();
        info!(
            "User wanted output \"{user_output}\", we now have \"{name}\" size {} mm with {} mode(s)",
            info.physical_size,
            info.modes.len()
        );

        let mut display = self.shared.display.lock();
        display.clear_custom();
        for mode in &info.modes {
            let pixel_ratio = info.pixel_ratio_for_mode(mode);
            info!(
                "- {} @{:.3} Hz pixel ratio {pixel_ratio:.3}{}",
                mode.size,
                mode.refresh_rate(),
                if mode.current { " current" } else { "" }
            );
            let mut res = ResolutionInfo::new(mode.size.width, mode.size.height, mode.refresh_rate(), &name);
            res.pixel_ratio = pixel_ratio;
            if mode.current {
                if let Some(desktop) = display.get_mut(ResolutionId::Desktop) {
                    *desktop = res;
                }
            } else {
                display.add_custom(res);
            }
        }
    }

    /// User-friendly names of all outputs, in announcement order.
    pub fn get_connected_outputs(&self) -> Vec<String> {
        self.shared
            .outputs
            .lock()
            .values()
            .map(|o| o.user_friendly_name())
            .collect()
    }

    // ── Frame presentation ──

    pub fn prepare_frame_presentation(&self) -> Result<(), WireError> {
        match self.shared.surface() {
            Some(surface) => self.shared.presentation.prepare_frame(surface),
            None => Ok(()),
        }
    }

    /// Called after the frame was submitted: applies queued window
    /// messages.
    pub fn finish_frame_presentation(&self) -> ProcessStats {
        self.shared.presentation.finish_frame();
        self.process_messages()
    }

    /// Average presentation latency, if the compositor reports it.
    pub fn display_latency_ms(&self) -> Option<f32> {
        self.shared
            .presentation
            .has_presentation()
            .then(|| self.shared.presentation.display_latency_ms())
    }

    pub fn frame_latency_adjustment_ms(&self) -> f32 {
        self.shared.presentation.frame_latency_adjustment_ms()
    }

    /// Refresh rate of the output frames were last presented on.
    pub fn sync_output_refresh_rate(&self) -> Option<f32> {
        let object = self.shared.presentation.sync_output()?;
        self.shared
            .find_output_by_object(object)?
            .current_mode()
            .map(|mode| mode.refresh_rate())
    }

    pub fn register_on_presentation_feedback<F>(&self, handler: F) -> Registration
    where
        F: Fn(&PresentationInfo) + Send + Sync + 'static,
    {
        self.shared.presentation.register_feedback_handler(handler)
    }

    /// Vblank source for video playback, if the compositor can drive one.
    pub fn video_sync<F>(&self, on_vblanks: F) -> Option<VideoSync>
    where
        F: Fn(u64, Duration) + Send + Sync + 'static,
    {
        if self.shared.surface().is_some() && self.shared.presentation.has_presentation() {
            info!("Using presentation feedback for video sync");
            Some(VideoSync::new(&self.shared.presentation, on_vblanks))
        } else {
            info!("No supported method for video sync found");
            None
        }
    }

    // ── Misc ──

    /// Request HDR metadata for the main surface. Returns whether a
    /// description was requested.
    pub fn set_hdr(&self, picture: &VideoPicture) -> bool {
        let Some(window) = &self.window else {
            return false;
        };
        match window.color.set_hdr(picture) {
            Ok(requested) => requested,
            Err(err) => {
                warn!("Failed to set HDR metadata: {err}");
                false
            }
        }
    }

    pub fn minimize(&self) {
        self.shared.with_shell(|shell| shell.set_minimized());
    }

    /// Whether the cursor is left visible over the main surface.
    pub fn show_os_mouse(&self, show: bool) {
        self.shared.os_cursor_visible.store(show, Ordering::Relaxed);
    }

    /// Whether any seat has a pointer.
    pub fn has_cursor(&self) -> bool {
        self.shared
            .seats
            .lock()
            .values()
            .any(|seat| seat.capabilities().contains(crate::seat::SeatCapabilities::POINTER))
    }

    pub fn sizes(&self) -> Sizes {
        let size = self.shared.size.lock();
        Sizes {
            surface_size: size.surface_size,
            buffer_size: size.buffer_size,
            configured_size: size.configured_size,
            scale: size.scale,
        }
    }

    pub fn shell_state(&self) -> ShellState {
        self.shared.size.lock().shell_state
    }

    pub fn is_full_screen(&self) -> bool {
        self.shared.size.lock().full_screen
    }

    pub fn refresh_rate(&self) -> f32 {
        self.shared.size.lock().refresh_rate
    }

    pub fn is_waiting_for_apply(&self) -> bool {
        self.shared.size.lock().waiting_for_apply
    }

    pub fn shell_protocol(&self) -> Option<ShellProtocol> {
        self.shared.shell.lock().as_ref().map(|shell| shell.protocol())
    }

    pub fn surface(&self) -> Option<ObjectId> {
        self.shared.surface()
    }

    pub fn decorator(&self) -> Option<Arc<WindowDecorator>> {
        self.shared.decorator()
    }

    pub fn display_settings(&self) -> Arc<Mutex<DisplaySettings>> {
        Arc::clone(&self.shared.display)
    }

    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for WinSystem {
    fn drop(&mut self) {
        self.destroy_window_system();
    }
}

impl std::fmt::Debug for WinSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinSystem")
            .field("initialized", &self.globals.is_some())
            .field("surface", &self.shared.surface())
            .field("sizes", &self.sizes())
            .finish_non_exhaustive()
    }
}

impl WindowShared {
    fn surface(&self) -> Option<ObjectId> {
        *self.surface.lock()
    }

    fn decorator(&self) -> Option<Arc<WindowDecorator>> {
        self.decorator.read().clone()
    }

    /// Run `f` on the shell surface, logging failures.
    fn with_shell<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn ShellSurface) -> Result<(), WireError>,
    {
        let mut shell = self.shell.lock();
        if let Some(shell) = shell.as_deref_mut() {
            if let Err(err) = f(shell) {
                warn!("Shell surface request failed: {err}");
            }
        }
    }

    fn calculate_full_surface_size(&self, surface_size: Size, state: ShellState) -> Size {
        match self.decorator() {
            Some(decorator) => decorator.calculate_full_surface_size(surface_size, state),
            None => surface_size,
        }
    }

    fn calculate_sizes(
        &self,
        size: Size,
        scale: i32,
        state: ShellState,
        includes_decoration: bool,
    ) -> Sizes {
        let decorations_active = self
            .decorator()
            .is_some_and(|decorator| decorator.is_decoration_active(state));
        calculate_sizes(size, scale, includes_decoration, decorations_active)
    }

    fn update_size_variables(
        &self,
        state: &mut SizeState,
        size: Size,
        scale: i32,
        shell_state: ShellState,
        includes_decoration: bool,
    ) -> SizeUpdate {
        let sizes = self.calculate_sizes(size, scale, shell_state, includes_decoration);
        let update = SizeUpdate {
            surface_size_changed: sizes.surface_size != state.surface_size,
            buffer_size_changed: sizes.buffer_size != state.buffer_size,
            configured_size_changed: sizes.configured_size != state.configured_size,
            buffer_scale_changed: sizes.scale != state.scale,
        };
        state.surface_size = sizes.surface_size;
        state.buffer_size = sizes.buffer_size;
        state.configured_size = sizes.configured_size;
        state.scale = sizes.scale;
        if update.any() {
            debug!(
                "Sizes: surface {} buffer {} configured {} scale {}",
                sizes.surface_size, sizes.buffer_size, sizes.configured_size, sizes.scale
            );
        }
        update
    }

    // ── Outputs ──

    fn on_output_added(shared: &Arc<Self>, connection: &Connection, bound: BoundGlobal) {
        let weak = Arc::downgrade(shared);
        let output = Output::new(
            bound.name,
            bound.object,
            connection.downgrade(),
            Box::new(move |name| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_output_done(name);
                }
            }),
        );
        connection.wire().set_listener(bound.object, output.listener());
        shared
            .outputs_in_preparation
            .lock()
            .insert(bound.name, output);
    }

    fn on_output_done(&self, name: u32) {
        let prepared = self.outputs_in_preparation.lock().remove(&name);
        if let Some(output) = prepared {
            info!("Output \"{}\" is ready", output.user_friendly_name());
            self.outputs.lock().insert(name, output);
            self.protocol
                .send_out_message(signal::OUTPUT_HOTPLUG, Payload::Empty);
        }
        self.update_buffer_scale();
    }

    fn on_output_removed(&self, name: u32) {
        self.outputs_in_preparation.lock().remove(&name);
        let removed = self.outputs.lock().shift_remove(&name);
        if let Some(output) = removed {
            info!("Output \"{}\" removed", output.user_friendly_name());
            self.surface_outputs
                .lock()
                .retain(|o| !Arc::ptr_eq(o, &output));
            self.update_buffer_scale();
            self.update_touch_dpi();
        }
    }

    fn find_output_by_name(&self, name: &str) -> Option<Arc<Output>> {
        self.outputs
            .lock()
            .values()
            .find(|o| o.user_friendly_name() == name)
            .cloned()
    }

    fn find_output_by_object(&self, object: ObjectId) -> Option<Arc<Output>> {
        self.outputs
            .lock()
            .values()
            .find(|o| o.object() == object)
            .cloned()
    }

    fn surface_listener(self: &Arc<Self>) -> Listener {
        let weak = Arc::downgrade(self);
        listener(move |_, event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match event {
                Event::SurfaceEnter { output } => shared.on_surface_enter(*output),
                Event::SurfaceLeave { output } => shared.on_surface_leave(*output),
                _ => {}
            }
        })
    }

    fn on_surface_enter(&self, object: ObjectId) {
        let Some(output) = self.find_output_by_object(object) else {
            warn!("Entered output {object} that is not known");
            return;
        };
        debug!("Window entered output \"{}\"", output.user_friendly_name());
        {
            let mut surface_outputs = self.surface_outputs.lock();
            if !surface_outputs.iter().any(|o| Arc::ptr_eq(o, &output)) {
                surface_outputs.push(output);
            }
        }
        self.update_buffer_scale();
        self.update_touch_dpi();
    }

    fn on_surface_leave(&self, object: ObjectId) {
        let removed = {
            let mut surface_outputs = self.surface_outputs.lock();
            let before = surface_outputs.len();
            surface_outputs.retain(|o| o.object() != object);
            before != surface_outputs.len()
        };
        if removed {
            debug!("Window left output {object}");
            self.update_buffer_scale();
            self.update_touch_dpi();
        }
    }

    /// Queue the largest scale of the outputs the window is on.
    fn update_buffer_scale(&self) {
        let scale = self.surface_outputs.lock().iter().map(|o| o.scale()).max();
        if let Some(scale) = scale {
            trace!("Surface outputs want buffer scale {scale}");
            self.protocol
                .send_out_message(signal::BUFFER_SCALE, Payload::from_bytes(&scale.to_le_bytes()));
        }
    }

    fn update_touch_dpi(&self) {
        let dpis: Vec<f32> = self
            .surface_outputs
            .lock()
            .iter()
            .filter_map(|o| o.dpi())
            .collect();
        if dpis.is_empty() {
            return;
        }
        let average = dpis.iter().sum::<f32>() / dpis.len() as f32;
        debug!("Touch DPI is now {average:.1}");
        self.messenger.post(AppEvent::TouchDpi(average));
    }

    fn max_surface_refresh_rate(&self) -> Option<f32> {
        self.surface_outputs
            .lock()
            .iter()
            .filter_map(|o| o.current_mode())
            .map(|mode| mode.refresh_rate())
            .reduce(f32::max)
    }

    // ── Seats ──

    fn on_seat_added(shared: &Arc<Self>, connection: &Connection, bound: BoundGlobal) {
        let handler: Arc<dyn SeatHandler> = shared.clone();
        let seat = Seat::new(
            bound.name,
            bound.object,
            connection.downgrade(),
            Arc::downgrade(&handler),
        );
        connection.wire().set_listener(bound.object, seat.listener());
        debug!("Seat {} added", bound.name);
        shared.seats.lock().insert(bound.name, seat);
    }

    fn on_seat_removed(&self, name: u32) {
        if self.seats.lock().remove(&name).is_some() {
            debug!("Seat {name} removed");
        }
        self.pointer_positions.lock().remove(&name);
    }

    fn on_decoration_event(&self, decorator: &WindowDecorator, seat: &Seat, surface: ObjectId, event: &Event) {
        let seat_object = seat.object();
        match *event {
            Event::PointerEnter { serial, x, y, .. } => {
                self.hide_cursor_on(seat, serial);
                decorator.on_pointer_enter(seat_object, surface, x, y);
            }
            Event::PointerLeave { .. } => decorator.on_pointer_leave(seat_object),
            Event::PointerMotion { x, y, .. } => decorator.on_pointer_motion(seat_object, x, y),
            Event::PointerButton {
                serial,
                time,
                button,
                pressed,
            } => decorator.on_pointer_button(seat_object, serial, time, button, pressed),
            Event::TouchDown { serial, x, y, .. } => {
                decorator.on_touch_down(seat_object, serial, surface, x, y);
            }
            _ => {}
        }
    }

    fn hide_cursor_on(&self, seat: &Seat, serial: u32) {
        if self.os_cursor_visible.load(Ordering::Relaxed) {
            return;
        }
        if let Err(err) = seat.hide_cursor(serial) {
            warn!("Failed to hide cursor: {err}");
        }
    }

    fn on_main_surface_event(&self, seat: &Seat, event: &Event) {
        let id = seat.global_name();
        let scale = f64::from(self.size.lock().scale);
        let input = match *event {
            Event::PointerEnter { serial, x, y, .. } => {
                self.hide_cursor_on(seat, serial);
                self.messenger.post(AppEvent::MouseActive(true));
                self.pointer_positions
                    .lock()
                    .insert(id, (x * scale, y * scale));
                Some(InputEvent::PointerMotion {
                    x: x * scale,
                    y: y * scale,
                })
            }
            Event::PointerLeave { .. } => {
                self.pointer_positions.lock().remove(&id);
                self.messenger.post(AppEvent::MouseActive(false));
                None
            }
            Event::PointerMotion { x, y, .. } => {
                self.pointer_positions
                    .lock()
                    .insert(id, (x * scale, y * scale));
                Some(InputEvent::PointerMotion {
                    x: x * scale,
                    y: y * scale,
                })
            }
            Event::PointerButton {
                button, pressed, ..
            } => {
                let (x, y) = self
                    .pointer_positions
                    .lock()
                    .get(&id)
                    .copied()
                    .unwrap_or_default();
                Some(InputEvent::PointerButton {
                    button,
                    pressed,
                    x,
                    y,
                })
            }
            Event::PointerAxis { axis, value, .. } => Some(InputEvent::PointerAxis { axis, value }),
            Event::KeyboardEnter { .. } => {
                self.messenger.post(AppEvent::FocusChanged(true));
                None
            }
            Event::KeyboardLeave { .. } => {
                self.messenger.post(AppEvent::FocusChanged(false));
                None
            }
            Event::Key { key, pressed, .. } => Some(InputEvent::Key { key, pressed }),
            Event::Modifiers {
                depressed,
                latched,
                locked,
                ..
            } => Some(InputEvent::Modifiers {
                depressed,
                latched,
                locked,
            }),
            Event::TouchDown { id: touch, x, y, .. } => Some(InputEvent::TouchDown {
                id: touch,
                x: x * scale,
                y: y * scale,
            }),
            Event::TouchMotion { id: touch, x, y, .. } => Some(InputEvent::TouchMotion {
                id: touch,
                x: x * scale,
                y: y * scale,
            }),
            Event::TouchUp { id: touch, .. } => Some(InputEvent::TouchUp { id: touch }),
            Event::TouchCancel => Some(InputEvent::TouchCancel),
            _ => None,
        };
        if let Some(event) = input {
            self.messenger.post(AppEvent::Input { seat: id, event });
        }
    }
}

impl ShellSurfaceHandler for WindowShared {
    fn on_configure(&self, serial: u32, size: Size, state: ShellState) {
        let mut size_state = self.size.lock();
        if size_state.shell_initializing {
            debug!("Initial configure serial {serial}: size {size} state {state}");
            size_state.shell_state = state;
            let scale = size_state.scale;
            if size.is_zero() {
                let surface = size_state.surface_size;
                self.update_size_variables(&mut size_state, surface, scale, state, false);
            } else {
                self.update_size_variables(&mut size_state, size, scale, state, true);
            }
            size_state.initial_ack = Some(serial);
            return;
        }
        drop(size_state);
        self.protocol.send_out_message(
            signal::CONFIGURE,
            Payload::boxed(ConfigureMessage {
                serial,
                size,
                state,
            }),
        );
    }

    fn on_close(&self) {
        info!("Compositor asked the window to close");
        self.messenger.post(AppEvent::Quit);
    }
}

impl SeatHandler for WindowShared {
    fn on_device_event(&self, seat: &Seat, surface: ObjectId, event: &Event) {
        if let Some(decorator) = self.decorator() {
            if decorator.is_decoration_surface(surface) {
                self.on_decoration_event(&decorator, seat, surface, event);
                return;
            }
        }
        if Some(surface) == self.surface() {
            self.on_main_surface_event(seat, event);
        }
    }
}

impl DecoratorHandler for WindowShared {
    fn on_window_move(&self, seat: ObjectId, serial: u32) {
        self.with_shell(|shell| shell.start_move(seat, serial));
    }

    fn on_window_resize(&self, seat: ObjectId, serial: u32, edge: ResizeEdge) {
        self.with_shell(|shell| shell.start_resize(seat, serial, edge));
    }

    fn on_window_show_context_menu(&self, seat: ObjectId, serial: u32, position: Point) {
        self.with_shell(|shell| shell.show_context_menu(seat, serial, position));
    }

    fn on_window_minimize(&self) {
        self.with_shell(|shell| shell.set_minimized());
    }

    fn on_window_maximize(&self) {
        let maximized = self.size.lock().shell_state.contains(ShellState::MAXIMIZED);
        if maximized {
            self.with_shell(|shell| shell.unset_maximized());
        } else {
            self.with_shell(|shell| shell.set_maximized());
        }
    }

    fn on_window_close(&self) {
        self.on_close();
    }
}

/// Derive all window sizes from `size`, which is the full window size if
/// `includes_decoration`, else the main surface size. The window never
/// gets smaller than [`MIN_WINDOW_SIZE`].
pub fn calculate_sizes(
    size: Size,
    scale: i32,
    includes_decoration: bool,
    decorations_active: bool,
) -> Sizes {
    let full = if includes_decoration {
        size
    } else {
        full_surface_size(size, decorations_active)
    };
    let configured_size = clamp_min_size(full);
    let surface_size = main_surface_size(configured_size, decorations_active);
    Sizes {
        surface_size,
        buffer_size: surface_size * scale,
        configured_size,
        scale,
    }
}

fn clamp_min_size(size: Size) -> Size {
    Size::new(
        size.width.max(MIN_WINDOW_SIZE.width),
        size.height.max(MIN_WINDOW_SIZE.height),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorator::layout::{border_geometry, button_layout, decoration_inset, SurfaceIndex};
    use crate::decorator::BTN_LEFT;
    use crate::seat::SeatCapabilities;
    use crate::testing::{FakeCompositor, FakeOutput, RecordingMessenger};
    use crate::wire::ToplevelState;
    use pretty_assertions::assert_eq;

    struct Fixture {
        fake: Arc<FakeCompositor>,
        messenger: Arc<RecordingMessenger>,
        win: WinSystem,
    }

    fn fixture_with(fake: Arc<FakeCompositor>, config: Config) -> Fixture {
        let messenger = RecordingMessenger::new();
        let mut win = WinSystem::new(fake.connection(), config, messenger.clone());
        win.init_window_system().unwrap();
        win.create_window().unwrap();
        messenger.take();
        Fixture {
            fake,
            messenger,
            win,
        }
    }

    fn windowed() -> Fixture {
        fixture_with(FakeCompositor::desktop(), Config::default())
    }

    fn acks(fake: &FakeCompositor) -> Vec<u32> {
        fake.requests_of(Interface::XdgSurface)
            .into_iter()
            .filter_map(|r| match r {
                Request::AckConfigure(serial) => Some(serial),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_windowed_window_uses_window_resolution() {
        let f = windowed();
        let sizes = f.win.sizes();
        assert_eq!(sizes.surface_size, Size::new(1280, 720));
        assert_eq!(sizes.buffer_size, Size::new(1280, 720));
        assert_eq!(sizes.configured_size, Size::new(1280, 720) + decoration_inset());
        assert_eq!(f.win.shell_protocol(), Some(ShellProtocol::XdgShell));
        assert!(f.fake.pump_running());
        assert_eq!(acks(&f.fake).len(), 1);
    }

    #[test]
    fn test_configures_are_coalesced() {
        let f = windowed();
        f.fake.configure_toplevel(Size::new(800, 600), &[ToplevelState::Activated]);
        f.fake.configure_toplevel(Size::new(900, 700), &[ToplevelState::Activated]);
        let last = f
            .fake
            .configure_toplevel(Size::new(1010, 843), &[ToplevelState::Activated])
            .unwrap();

        let stats = f.win.process_messages();
        assert_eq!(stats.configures_skipped, 2);
        assert_eq!(stats.configures_applied, 1);
        assert_eq!(
            f.messenger.take(),
            vec![AppEvent::VideoResize {
                width: 1000,
                height: 800
            }]
        );
        assert!(f.win.is_waiting_for_apply());

        f.win.finish_window_resize();
        assert_eq!(f.win.sizes().surface_size, Size::new(1000, 800));
        assert_eq!(acks(&f.fake).last(), Some(&last));
    }

    #[test]
    fn test_nothing_consumed_while_waiting_for_apply() {
        let f = windowed();
        f.fake.configure_toplevel(Size::new(810, 643), &[ToplevelState::Activated]);
        f.win.process_messages();
        f.messenger.take();

        f.fake.configure_toplevel(Size::new(910, 743), &[ToplevelState::Activated]);
        assert_eq!(f.win.process_messages(), ProcessStats::default());

        f.win.finish_window_resize();
        let stats = f.win.process_messages();
        assert_eq!(stats.configures_applied, 1);
        assert_eq!(
            f.messenger.take(),
            vec![AppEvent::VideoResize {
                width: 900,
                height: 700
            }]
        );
    }

    #[test]
    fn test_unchanged_configure_is_acked_directly() {
        let f = windowed();
        let configured = f.win.sizes().configured_size;
        let serial = f
            .fake
            .configure_toplevel(configured, &[ToplevelState::Activated])
            .unwrap();
        f.win.process_messages();
        assert!(f.messenger.take().is_empty());
        assert!(!f.win.is_waiting_for_apply());
        assert_eq!(acks(&f.fake).last(), Some(&serial));
    }

    #[test]
    fn test_ack_is_idempotent() {
        let f = windowed();
        let before = acks(&f.fake).len();
        f.win.ack_configure(77);
        f.win.ack_configure(77);
        assert_eq!(acks(&f.fake).len(), before + 1);
    }

    #[test]
    fn test_small_configure_is_clamped() {
        let f = windowed();
        f.fake.configure_toplevel(Size::new(50, 40), &[ToplevelState::Activated]);
        f.win.process_messages();
        f.win.finish_window_resize();
        assert_eq!(f.win.sizes().configured_size, MIN_WINDOW_SIZE);
        assert_eq!(
            f.win.sizes().surface_size,
            MIN_WINDOW_SIZE.saturating_sub(decoration_inset())
        );
    }

    #[test]
    fn test_fullscreen_configure_changes_mode() {
        let f = windowed();
        f.fake
            .configure_toplevel(Size::new(1920, 1080), &[ToplevelState::Fullscreen]);
        f.win.process_messages();
        assert_eq!(
            f.messenger.take(),
            vec![AppEvent::ModeChange {
                resolution: ResolutionId::Desktop
            }]
        );
        f.win.finish_mode_change(ResolutionId::Desktop);
        assert!(f.win.is_full_screen());
        assert_eq!(f.win.sizes().surface_size, Size::new(1920, 1080));
    }

    #[test]
    fn test_leaving_fullscreen_switches_to_window_resolution() {
        let mut config = Config::default();
        config.video_screen.fullscreen = true;
        let f = fixture_with(FakeCompositor::desktop(), config);
        assert!(f.win.is_full_screen());
        assert!(f.win.shell_state().contains(ShellState::FULLSCREEN));
        assert_eq!(f.win.sizes().surface_size, Size::new(1920, 1080));

        f.fake.configure_toplevel(Size::new(1010, 843), &[ToplevelState::Activated]);
        f.win.process_messages();
        assert_eq!(
            f.messenger.take(),
            vec![AppEvent::ModeChange {
                resolution: ResolutionId::Window
            }]
        );
        f.win.finish_mode_change(ResolutionId::Window);
        assert!(!f.win.is_full_screen());
        let display = f.win.display_settings();
        assert_eq!(display.lock().window().width, 1000);
    }

    #[test]
    fn test_zero_size_unfullscreen_adopts_window_resolution() {
        let mut config = Config::default();
        config.video_screen.fullscreen = true;
        let f = fixture_with(FakeCompositor::desktop(), config);
        assert_eq!(f.win.sizes().buffer_size, Size::new(1920, 1080));

        f.fake.configure_toplevel(Size::ZERO, &[ToplevelState::Activated]);
        f.win.process_messages();
        assert_eq!(
            f.messenger.take(),
            vec![AppEvent::ModeChange {
                resolution: ResolutionId::Window
            }]
        );
        f.win.finish_mode_change(ResolutionId::Window);

        assert!(!f.win.is_full_screen());
        assert_eq!(f.win.sizes().buffer_size, Size::new(1280, 720));
        let display = f.win.display_settings();
        let window = display.lock().window().clone();
        assert_eq!((window.width, window.height), (1280, 720));
    }

    #[test]
    fn test_fullscreen_on_configured_monitor() {
        let mut config = Config::default();
        config.video_screen.fullscreen = true;
        config.video_screen.monitor = "Acme Vision 24".to_owned();
        let fake = FakeCompositor::desktop();
        let f = fixture_with(fake, config);
        let output = f.fake.objects_of(Interface::Output)[0];
        assert!(f
            .fake
            .requests_of(Interface::XdgToplevel)
            .contains(&Request::SetFullscreen {
                output: Some(output)
            }));
    }

    #[test]
    fn test_scale_change_resizes_buffer() {
        let fake = FakeCompositor::desktop();
        let hidpi = fake.add_output(
            FakeOutput::new("Acme", "Retina", Size::new(2560, 1440), 60_000).with_scale(2),
        );
        let f = fixture_with(fake, Config::default());
        let surface = f.win.surface().unwrap();

        f.fake.enter_output(surface, hidpi);
        let stats = f.win.process_messages();
        assert_eq!(stats.scale_changes, 1);
        assert!(f.win.is_waiting_for_apply());
        f.win.finish_window_resize();

        let sizes = f.win.sizes();
        assert_eq!(sizes.scale, 2);
        assert_eq!(sizes.buffer_size, sizes.surface_size * 2);
        assert!(f
            .fake
            .requests_on(surface)
            .contains(&Request::SetBufferScale(2)));
    }

    #[test]
    fn test_entering_output_posts_touch_dpi() {
        let f = windowed();
        let surface = f.win.surface().unwrap();
        let output_name = 5;
        assert!(f.fake.bound_object(output_name).is_some());
        f.fake.enter_output(surface, output_name);
        let dpi = f
            .messenger
            .take()
            .into_iter()
            .find_map(|e| match e {
                AppEvent::TouchDpi(dpi) => Some(dpi),
                _ => None,
            })
            .unwrap();
        assert!((dpi - 80.98).abs() < 0.1, "dpi {dpi}");
    }

    #[test]
    fn test_close_posts_quit() {
        let f = windowed();
        let toplevel = f.fake.objects_of(Interface::XdgToplevel)[0];
        f.fake.emit(toplevel, Event::Close);
        assert_eq!(f.messenger.take(), vec![AppEvent::Quit]);
    }

    #[test]
    fn test_hotplug_rebuilds_resolutions() {
        let f = windowed();
        f.fake.add_output(FakeOutput::new(
            "Other",
            "Panel",
            Size::new(2560, 1440),
            144_000,
        ));
        f.win.connection().roundtrip().unwrap();
        let stats = f.win.process_messages();
        assert_eq!(stats.hotplugs, 1);
        assert!(f.messenger.take().contains(&AppEvent::OutputsChanged));
        assert_eq!(
            f.win.get_connected_outputs(),
            vec!["Acme Vision 24".to_owned(), "Other Panel".to_owned()]
        );
    }

    #[test]
    fn test_hotplug_moves_fullscreen_once() {
        let mut config = Config::default();
        config.video_screen.fullscreen = true;
        config.video_screen.monitor = "Beta Screen".to_owned();
        let f = fixture_with(FakeCompositor::desktop(), config);

        let beta = f.fake.add_output(FakeOutput::new(
            "Beta",
            "Screen",
            Size::new(1920, 1080),
            60_000,
        ));
        f.win.connection().roundtrip().unwrap();
        f.win.process_messages();
        let beta_object = f.fake.bound_object(beta);

        f.fake.add_output(FakeOutput::new(
            "Gamma",
            "Screen",
            Size::new(1280, 1024),
            75_000,
        ));
        f.win.connection().roundtrip().unwrap();
        f.win.process_messages();

        let moves = f
            .fake
            .requests_of(Interface::XdgToplevel)
            .into_iter()
            .filter(|r| *r == Request::SetFullscreen { output: beta_object })
            .count();
        assert_eq!(moves, 1);
    }

    #[test]
    fn test_external_resize_when_floating_is_immediate() {
        let f = windowed();
        let mut res = f.win.display_settings().lock().window().clone();
        res.width = 1024;
        res.height = 768;
        assert!(f.win.set_full_screen(false, &res));
        assert_eq!(f.win.sizes().surface_size, Size::new(1024, 768));
    }

    #[test]
    fn test_external_fullscreen_waits_for_compositor() {
        let f = windowed();
        // Consume the initial-call grace.
        f.win.resize_window();
        let desktop = f.win.display_settings().lock().desktop().clone();
        assert!(!f.win.set_full_screen(true, &desktop));
        let output = f.fake.objects_of(Interface::Output)[0];
        assert!(f
            .fake
            .requests_of(Interface::XdgToplevel)
            .contains(&Request::SetFullscreen {
                output: Some(output)
            }));
    }

    #[test]
    fn test_main_surface_input_is_scaled() {
        let fake = FakeCompositor::desktop();
        fake.add_seat(SeatCapabilities::POINTER | SeatCapabilities::KEYBOARD);
        let f = fixture_with(fake, Config::default());
        let surface = f.win.surface().unwrap();
        let pointer = f.fake.objects_of(Interface::Pointer)[0];
        let keyboard = f.fake.objects_of(Interface::Keyboard)[0];
        assert!(f.win.has_cursor());

        f.fake.emit(
            pointer,
            Event::PointerEnter {
                serial: 3,
                surface,
                x: 10.0,
                y: 20.0,
            },
        );
        f.fake.emit(
            pointer,
            Event::PointerButton {
                serial: 4,
                time: 0,
                button: BTN_LEFT,
                pressed: true,
            },
        );
        f.fake.emit(keyboard, Event::KeyboardEnter { serial: 5, surface });

        let events = f.messenger.take();
        assert!(events.contains(&AppEvent::MouseActive(true)));
        assert!(events.contains(&AppEvent::FocusChanged(true)));
        assert!(events.iter().any(|e| matches!(
            e,
            AppEvent::Input {
                event: InputEvent::PointerButton { x, y, pressed: true, .. },
                ..
            } if (*x - 10.0).abs() < f64::EPSILON && (*y - 20.0).abs() < f64::EPSILON
        )));
        assert!(f.fake.requests_on(pointer).contains(&Request::SetCursor {
            serial: 3,
            surface: None,
            hotspot: Point::ORIGIN,
        }));
    }

    #[test]
    fn test_visible_cursor_is_not_hidden() {
        let fake = FakeCompositor::desktop();
        fake.add_seat(SeatCapabilities::POINTER);
        let f = fixture_with(fake, Config::default());
        f.win.show_os_mouse(true);
        let surface = f.win.surface().unwrap();
        let pointer = f.fake.objects_of(Interface::Pointer)[0];
        f.fake.emit(
            pointer,
            Event::PointerEnter {
                serial: 3,
                surface,
                x: 0.0,
                y: 0.0,
            },
        );
        assert!(f.fake.requests_on(pointer).is_empty());
    }

    #[test]
    fn test_close_button_posts_quit() {
        let fake = FakeCompositor::desktop();
        fake.add_seat(SeatCapabilities::POINTER);
        let f = fixture_with(fake, Config::default());
        let decorator = f.win.decorator().unwrap();
        let top = decorator.border_surfaces()[0];
        let top_size = border_geometry(SurfaceIndex::Top, f.win.sizes().surface_size).size;
        let (_, close) = button_layout(top_size)[0];
        let pointer = f.fake.objects_of(Interface::Pointer)[0];

        f.fake.emit(
            pointer,
            Event::PointerEnter {
                serial: 1,
                surface: top,
                x: f64::from(close.origin.x + 2),
                y: f64::from(close.origin.y + 2),
            },
        );
        f.fake.emit(
            pointer,
            Event::PointerButton {
                serial: 2,
                time: 10,
                button: BTN_LEFT,
                pressed: true,
            },
        );
        assert_eq!(f.messenger.take(), vec![AppEvent::Quit]);
    }

    #[test]
    fn test_no_shell_is_an_error() {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::Compositor, 4);
        fake.add_global(Interface::Shm, 1);
        fake.add_output(FakeOutput::new("A", "B", Size::new(800, 600), 60_000));
        let mut win = WinSystem::new(fake.connection(), Config::default(), RecordingMessenger::new());
        win.init_window_system().unwrap();
        assert!(matches!(win.create_window(), Err(WindowingError::NoShell)));
        assert!(win.surface().is_none());
        assert!(fake.objects_of(Interface::Surface).is_empty());
    }

    #[test]
    fn test_no_outputs_is_an_error() {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::Compositor, 4);
        fake.add_global(Interface::Shm, 1);
        fake.add_global(Interface::XdgWmBase, 2);
        let mut win = WinSystem::new(fake.connection(), Config::default(), RecordingMessenger::new());
        assert!(matches!(
            win.init_window_system(),
            Err(WindowingError::NoOutputs)
        ));
    }

    #[test]
    fn test_create_window_requires_init() {
        let fake = FakeCompositor::desktop();
        let mut win = WinSystem::new(fake.connection(), Config::default(), RecordingMessenger::new());
        assert!(matches!(
            win.create_window(),
            Err(WindowingError::NotInitialized)
        ));
    }

    #[test]
    fn test_destroy_stops_pump_and_releases_surface() {
        let mut f = windowed();
        let surface = f.win.surface().unwrap();
        f.win.destroy_window();
        assert!(!f.fake.pump_running());
        assert!(!f.fake.is_alive(surface));
        assert!(f.fake.objects_of(Interface::Subsurface).is_empty());
        assert!(f.win.shell_protocol().is_none());
    }

    #[test]
    fn test_display_latency_needs_presentation() {
        let f = windowed();
        assert_eq!(f.win.display_latency_ms(), None);
        assert!(f.win.video_sync(|_, _| {}).is_none());
    }
}

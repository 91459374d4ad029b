//! Client-side window decorations.
//!
//! When the window is not fullscreen and the compositor offers
//! subsurfaces, the decorator draws a border, a title bar and three
//! buttons into four subsurfaces placed around the main surface. All
//! four buffers live in a single shared-memory pool that is reallocated
//! whenever the size, scale or activity of the decorations changes; plain
//! repaints (focus or hover changes) reuse it.
//!
//! A buffer belongs to the compositor from attach until its release event.
//! Repaints requested while any buffer is still held are deferred until the
//! last one comes back.

pub mod draw;
pub mod layout;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace, warn};

use self::draw::{
    buffer_len, paint_border, paint_button, Canvas, DrawError, BUTTON_COLOR_ACTIVE,
    BUTTON_COLOR_INACTIVE, BYTES_PER_PIXEL,
};
use self::layout::{border_geometry, button_layout, hit_test, window_geometry, ButtonKind, Hit, SurfaceIndex};
use crate::connection::Connection;
use crate::geometry::{Point, Rect, Size};
use crate::shell::{ResizeEdge, ShellState};
use crate::wire::{listener, Create, Event, ObjectId, Request, ShmPool, WireError};

pub use self::layout::{decoration_inset, full_surface_size, main_surface_size};

/// Linux input event codes.
pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;

/// Two title bar clicks closer than this maximize the window.
pub const DOUBLE_CLICK_TIME_MS: u32 = 500;

#[derive(Debug, Error)]
pub enum DecorationError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Draw(#[from] DrawError),

    #[error("decoration pool of {0} bytes is too large")]
    PoolTooLarge(usize),
}

/// Window operations triggered from the decorations.
pub trait DecoratorHandler: Send + Sync {
    fn on_window_move(&self, seat: ObjectId, serial: u32);
    fn on_window_resize(&self, seat: ObjectId, serial: u32, edge: ResizeEdge);
    /// `position` is relative to the window geometry.
    fn on_window_show_context_menu(&self, seat: ObjectId, serial: u32, position: Point);
    fn on_window_minimize(&self);
    fn on_window_maximize(&self);
    fn on_window_close(&self);
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Move { seat: ObjectId, serial: u32 },
    Resize { seat: ObjectId, serial: u32, edge: ResizeEdge },
    ContextMenu { seat: ObjectId, serial: u32, position: Point },
    Minimize,
    Maximize,
    Close,
}

#[derive(Debug, Clone, Copy)]
struct BufferSlot {
    id: ObjectId,
    offset: usize,
    len: usize,
}

#[derive(Debug)]
struct BorderSurface {
    index: SurfaceIndex,
    surface: ObjectId,
    subsurface: ObjectId,
    geometry: Rect,
    buffer: Option<BufferSlot>,
}

#[derive(Debug, Clone, Copy)]
struct PointerFocus {
    index: SurfaceIndex,
    position: Point,
}

struct DecoratorState {
    main_size: Size,
    scale: i32,
    window_state: ShellState,
    active: bool,
    surfaces: Vec<BorderSurface>,
    buttons: Vec<(ButtonKind, Rect)>,
    pool: Option<ShmPool>,
    repaint_deferred: bool,
    pointers: HashMap<ObjectId, PointerFocus>,
    hovered: Option<ButtonKind>,
    last_title_click: Option<u32>,
}

pub struct WindowDecorator {
    connection: Connection,
    handler: Weak<dyn DecoratorHandler>,
    weak_self: Weak<WindowDecorator>,
    main_surface: ObjectId,
    compositor: ObjectId,
    subcompositor: Option<ObjectId>,
    shm: Option<ObjectId>,
    enabled: bool,
    state: Mutex<DecoratorState>,
    pending_buffers: Mutex<HashSet<ObjectId>>,
}

impl WindowDecorator {
    /// Decorations are drawn only if `enabled` and both `subcompositor`
    /// and `shm` are available.
    pub fn new(
        connection: &Connection,
        handler: Weak<dyn DecoratorHandler>,
        main_surface: ObjectId,
        compositor: ObjectId,
        subcompositor: Option<ObjectId>,
        shm: Option<ObjectId>,
        enabled: bool,
    ) -> Arc<Self> {
        let enabled = enabled && subcompositor.is_some() && shm.is_some();
        if !enabled {
            debug!("Client-side decorations disabled");
        }
        Arc::new_cyclic(|weak_self| Self {
            connection: connection.clone(),
            handler,
            weak_self: weak_self.clone(),
            main_surface,
            compositor,
            subcompositor,
            shm,
            enabled,
            state: Mutex::new(DecoratorState {
                main_size: Size::ZERO,
                scale: 1,
                window_state: ShellState::empty(),
                active: false,
                surfaces: Vec::new(),
                buttons: Vec::new(),
                pool: None,
                repaint_deferred: false,
                pointers: HashMap::new(),
                hovered: None,
                last_title_click: None,
            }),
            pending_buffers: Mutex::new(HashSet::new()),
        })
    }

    /// Whether decorations are drawn in `state`.
    pub fn is_decoration_active(&self, state: ShellState) -> bool {
        self.enabled && !state.contains(ShellState::FULLSCREEN)
    }

    pub fn calculate_main_surface_size(&self, full_size: Size, state: ShellState) -> Size {
        main_surface_size(full_size, self.is_decoration_active(state))
    }

    pub fn calculate_full_surface_size(&self, main_size: Size, state: ShellState) -> Size {
        full_surface_size(main_size, self.is_decoration_active(state))
    }

    /// Window geometry relative to the main surface.
    pub fn window_geometry(&self, main_size: Size, state: ShellState) -> Rect {
        window_geometry(main_size, self.is_decoration_active(state))
    }

    /// Apply a new main surface size, buffer scale and window state.
    pub fn set_state(
        &self,
        main_size: Size,
        scale: i32,
        window_state: ShellState,
    ) -> Result<(), DecorationError> {
        let active = self.is_decoration_active(window_state);
        let mut state = self.state.lock();
        let reallocate =
            main_size != state.main_size || scale != state.scale || active != state.active;
        let repaint = window_state != state.window_state;
        state.main_size = main_size;
        state.scale = scale;
        state.window_state = window_state;
        state.active = active;

        if reallocate {
            debug!("Decorations {main_size} @{scale}x active={active}, reallocating");
            self.reset_locked(&mut state, true)
        } else if repaint {
            self.repaint_locked(&mut state)
        } else {
            Ok(())
        }
    }

    /// Recreate the border surfaces, optionally with new buffers, and
    /// repaint.
    pub fn reset(&self, reallocate: bool) -> Result<(), DecorationError> {
        let mut state = self.state.lock();
        self.reset_locked(&mut state, reallocate)
    }

    pub fn repaint(&self) -> Result<(), DecorationError> {
        let mut state = self.state.lock();
        self.repaint_locked(&mut state)
    }

    /// Whether `surface` is one of the border surfaces.
    pub fn is_decoration_surface(&self, surface: ObjectId) -> bool {
        self.state
            .lock()
            .surfaces
            .iter()
            .any(|border| border.surface == surface)
    }

    /// Number of buffers currently held by the compositor.
    pub fn pending_buffer_count(&self) -> usize {
        self.pending_buffers.lock().len()
    }

    pub fn border_surfaces(&self) -> Vec<ObjectId> {
        self.state.lock().surfaces.iter().map(|b| b.surface).collect()
    }

    /// Buffer release from the compositor.
    pub fn on_buffer_release(&self, buffer: ObjectId) {
        let now_idle = {
            let mut pending = self.pending_buffers.lock();
            pending.remove(&buffer) && pending.is_empty()
        };
        if !now_idle {
            return;
        }
        let mut state = self.state.lock();
        if state.repaint_deferred {
            trace!("Running deferred decoration repaint");
            if let Err(err) = self.repaint_locked(&mut state) {
                warn!("Deferred decoration repaint failed: {err}");
            }
        }
    }

    fn reset_locked(
        &self,
        state: &mut DecoratorState,
        reallocate: bool,
    ) -> Result<(), DecorationError> {
        if !state.active || state.main_size.is_zero() {
            self.destroy_surfaces(state);
            return Ok(());
        }
        if state.surfaces.is_empty() {
            self.create_surfaces(state)?;
        }

        let wire = self.connection.wire();
        for border in &mut state.surfaces {
            border.geometry = border_geometry(border.index, state.main_size);
            wire.send(border.subsurface, Request::SetPosition(border.geometry.origin))?;
            wire.send(border.surface, Request::SetBufferScale(state.scale))?;
        }
        state.buttons = state
            .surfaces
            .iter()
            .find(|b| b.index == SurfaceIndex::Top)
            .map(|top| button_layout(top.geometry.size))
            .unwrap_or_default();

        if reallocate || state.pool.is_none() {
            self.destroy_buffers(state);
            self.allocate_buffers(state)?;
        }
        self.repaint_locked(state)
    }

    fn create_surfaces(&self, state: &mut DecoratorState) -> Result<(), DecorationError> {
        let Some(subcompositor) = self.subcompositor else {
            return Ok(());
        };
        let wire = self.connection.wire();
        for index in SurfaceIndex::ALL {
            let surface = wire.create(self.compositor, Create::Surface, None)?;
            let subsurface = wire.create(
                subcompositor,
                Create::Subsurface {
                    surface,
                    parent: self.main_surface,
                },
                None,
            )?;
            state.surfaces.push(BorderSurface {
                index,
                surface,
                subsurface,
                geometry: border_geometry(index, state.main_size),
                buffer: None,
            });
        }
        debug!("Created decoration surfaces");
        Ok(())
    }

    fn allocate_buffers(&self, state: &mut DecoratorState) -> Result<(), DecorationError> {
        let Some(shm) = self.shm else {
            return Ok(());
        };
        let scale = state.scale;
        let total: usize = state
            .surfaces
            .iter()
            .map(|b| buffer_len(b.geometry.size, scale))
            .sum();
        let wire = self.connection.wire();
        let pool = wire.create_shm_pool(shm, total)?;

        let mut offset = 0;
        for border in &mut state.surfaces {
            let size = border.geometry.size * scale;
            let len = buffer_len(border.geometry.size, scale);
            let weak_self = self.weak_self.clone();
            let id = wire.create(
                pool.id,
                Create::Buffer {
                    offset: i32::try_from(offset)
                        .map_err(|_| DecorationError::PoolTooLarge(total))?,
                    width: size.width,
                    height: size.height,
                    stride: size.width * BYTES_PER_PIXEL as i32,
                },
                Some(listener(move |buffer, event| {
                    if matches!(event, Event::Release) {
                        if let Some(decorator) = weak_self.upgrade() {
                            decorator.on_buffer_release(buffer);
                        }
                    }
                })),
            )?;
            border.buffer = Some(BufferSlot { id, offset, len });
            offset += len;
        }
        debug!("Allocated {total} bytes of decoration buffers");
        state.pool = Some(pool);
        Ok(())
    }

    fn destroy_buffers(&self, state: &mut DecoratorState) {
        let wire = self.connection.wire();
        let mut pending = self.pending_buffers.lock();
        for border in &mut state.surfaces {
            if let Some(buffer) = border.buffer.take() {
                pending.remove(&buffer.id);
                wire.destroy(buffer.id);
            }
        }
        if let Some(pool) = state.pool.take() {
            wire.destroy(pool.id);
        }
        state.repaint_deferred = false;
    }

    fn destroy_surfaces(&self, state: &mut DecoratorState) {
        if state.surfaces.is_empty() {
            return;
        }
        self.destroy_buffers(state);
        let wire = self.connection.wire();
        for border in state.surfaces.drain(..) {
            wire.destroy(border.subsurface);
            wire.destroy(border.surface);
        }
        state.buttons.clear();
        state.pointers.clear();
        state.hovered = None;
        debug!("Destroyed decoration surfaces");
    }

    fn repaint_locked(&self, state: &mut DecoratorState) -> Result<(), DecorationError> {
        if state.surfaces.is_empty() || state.pool.is_none() {
            return Ok(());
        }
        if !self.pending_buffers.lock().is_empty() {
            trace!("Decoration buffers still held by compositor, deferring repaint");
            state.repaint_deferred = true;
            return Ok(());
        }
        state.repaint_deferred = false;

        let color = if state.window_state.contains(ShellState::ACTIVATED) {
            BUTTON_COLOR_ACTIVE
        } else {
            BUTTON_COLOR_INACTIVE
        };
        let restore = state.window_state.contains(ShellState::MAXIMIZED);
        let scale = state.scale;
        let hovered = state.hovered;
        let wire = self.connection.wire();

        let DecoratorState {
            surfaces,
            buttons,
            pool,
            ..
        } = state;
        let Some(pool) = pool.as_mut() else {
            return Ok(());
        };
        let memory = pool.memory.as_mut_slice();

        for border in surfaces.iter() {
            let Some(buffer) = border.buffer else {
                continue;
            };
            let Some(slice) = memory.get_mut(buffer.offset..buffer.offset + buffer.len) else {
                return Err(DrawError::BufferTooSmall {
                    len: buffer.len,
                    size: border.geometry.size,
                    scale,
                }
                .into());
            };
            let mut canvas = Canvas::new(slice, border.geometry.size, scale)?;
            paint_border(&mut canvas, border.index)?;
            if border.index == SurfaceIndex::Top {
                for &(kind, rect) in buttons.iter() {
                    paint_button(&mut canvas, kind, rect, color, hovered == Some(kind), restore)?;
                }
            }

            wire.send(
                border.surface,
                Request::Attach {
                    buffer: Some(buffer.id),
                    position: Point::ORIGIN,
                },
            )?;
            wire.send(
                border.surface,
                Request::Damage(Rect::from_parts(Point::ORIGIN, border.geometry.size)),
            )?;
            wire.send(border.surface, Request::Commit)?;
            self.pending_buffers.lock().insert(buffer.id);
        }
        trace!("Repainted decorations");
        Ok(())
    }

    // ── Input ──

    pub fn on_pointer_enter(&self, seat: ObjectId, surface: ObjectId, x: f64, y: f64) {
        let mut state = self.state.lock();
        let Some(index) = state
            .surfaces
            .iter()
            .find(|b| b.surface == surface)
            .map(|b| b.index)
        else {
            return;
        };
        state.pointers.insert(
            seat,
            PointerFocus {
                index,
                position: Point::from_fractional(x, y),
            },
        );
        self.update_hover(&mut state);
    }

    pub fn on_pointer_leave(&self, seat: ObjectId) {
        let mut state = self.state.lock();
        if state.pointers.remove(&seat).is_some() {
            self.update_hover(&mut state);
        }
    }

    pub fn on_pointer_motion(&self, seat: ObjectId, x: f64, y: f64) {
        let mut state = self.state.lock();
        let Some(focus) = state.pointers.get_mut(&seat) else {
            return;
        };
        focus.position = Point::from_fractional(x, y);
        self.update_hover(&mut state);
    }

    pub fn on_pointer_button(
        &self,
        seat: ObjectId,
        serial: u32,
        time: u32,
        button: u32,
        pressed: bool,
    ) {
        if !pressed {
            return;
        }
        let action = {
            let mut state = self.state.lock();
            let Some(focus) = state.pointers.get(&seat).copied() else {
                return;
            };
            match button {
                BTN_LEFT => Self::left_click(&mut state, seat, serial, Some(time), focus),
                BTN_RIGHT
                    if focus.index == SurfaceIndex::Top
                        && Self::surface_hit(&state, focus) == Some(Hit::TitleBar) =>
                {
                    let geometry = window_geometry(state.main_size, true);
                    Self::surface_origin(&state, focus.index).map(|origin| Action::ContextMenu {
                        seat,
                        serial,
                        position: origin + focus.position - geometry.origin,
                    })
                }
                _ => None,
            }
        };
        if let Some(action) = action {
            self.dispatch(action);
        }
    }

    /// A touch point landing on a border surface acts like a left click.
    pub fn on_touch_down(&self, seat: ObjectId, serial: u32, surface: ObjectId, x: f64, y: f64) {
        let action = {
            let mut state = self.state.lock();
            let Some(index) = state
                .surfaces
                .iter()
                .find(|b| b.surface == surface)
                .map(|b| b.index)
            else {
                return;
            };
            let focus = PointerFocus {
                index,
                position: Point::from_fractional(x, y),
            };
            Self::left_click(&mut state, seat, serial, None, focus)
        };
        if let Some(action) = action {
            self.dispatch(action);
        }
    }

    fn surface_origin(state: &DecoratorState, index: SurfaceIndex) -> Option<Point> {
        state
            .surfaces
            .iter()
            .find(|b| b.index == index)
            .map(|b| b.geometry.origin)
    }

    fn surface_hit(state: &DecoratorState, focus: PointerFocus) -> Option<Hit> {
        let border = state.surfaces.iter().find(|b| b.index == focus.index)?;
        Some(hit_test(
            focus.index,
            border.geometry.size,
            focus.position,
            &state.buttons,
        ))
    }

    fn left_click(
        state: &mut DecoratorState,
        seat: ObjectId,
        serial: u32,
        time: Option<u32>,
        focus: PointerFocus,
    ) -> Option<Action> {
        match Self::surface_hit(state, focus)? {
            Hit::Button(ButtonKind::Minimize) => Some(Action::Minimize),
            Hit::Button(ButtonKind::Maximize) => Some(Action::Maximize),
            Hit::Button(ButtonKind::Close) => Some(Action::Close),
            Hit::Resize(edge) => Some(Action::Resize { seat, serial, edge }),
            Hit::TitleBar => {
                let double_click = match (time, state.last_title_click) {
                    (Some(now), Some(last)) => now.wrapping_sub(last) < DOUBLE_CLICK_TIME_MS,
                    _ => false,
                };
                if double_click {
                    state.last_title_click = None;
                    Some(Action::Maximize)
                } else {
                    state.last_title_click = time;
                    Some(Action::Move { seat, serial })
                }
            }
        }
    }

    fn update_hover(&self, state: &mut DecoratorState) {
        let hovered = state.pointers.values().find_map(|&focus| {
            match Self::surface_hit(state, focus)? {
                Hit::Button(kind) => Some(kind),
                _ => None,
            }
        });
        if hovered != state.hovered {
            state.hovered = hovered;
            if let Err(err) = self.repaint_locked(state) {
                warn!("Decoration repaint after hover change failed: {err}");
            }
        }
    }

    fn dispatch(&self, action: Action) {
        let Some(handler) = self.handler.upgrade() else {
            return;
        };
        debug!("Decoration action {action:?}");
        match action {
            Action::Move { seat, serial } => handler.on_window_move(seat, serial),
            Action::Resize { seat, serial, edge } => handler.on_window_resize(seat, serial, edge),
            Action::ContextMenu {
                seat,
                serial,
                position,
            } => handler.on_window_show_context_menu(seat, serial, position),
            Action::Minimize => handler.on_window_minimize(),
            Action::Maximize => handler.on_window_maximize(),
            Action::Close => handler.on_window_close(),
        }
    }
}

impl Drop for WindowDecorator {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        self.destroy_surfaces(&mut state);
    }
}

impl std::fmt::Debug for WindowDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WindowDecorator")
            .field("enabled", &self.enabled)
            .field("active", &state.active)
            .field("main_size", &state.main_size)
            .field("scale", &state.scale)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testing::FakeCompositor;
    use crate::wire::Interface;

    #[derive(Default)]
    struct Actions(Mutex<Vec<String>>);

    impl DecoratorHandler for Actions {
        fn on_window_move(&self, _seat: ObjectId, serial: u32) {
            self.0.lock().push(format!("move {serial}"));
        }
        fn on_window_resize(&self, _seat: ObjectId, _serial: u32, edge: ResizeEdge) {
            self.0.lock().push(format!("resize {edge:?}"));
        }
        fn on_window_show_context_menu(&self, _seat: ObjectId, _serial: u32, position: Point) {
            self.0.lock().push(format!("menu {position}"));
        }
        fn on_window_minimize(&self) {
            self.0.lock().push("minimize".into());
        }
        fn on_window_maximize(&self) {
            self.0.lock().push("maximize".into());
        }
        fn on_window_close(&self) {
            self.0.lock().push("close".into());
        }
    }

    struct Fixture {
        fake: Arc<FakeCompositor>,
        actions: Arc<Actions>,
        decorator: Arc<WindowDecorator>,
        _registry: Registry,
    }

    fn fixture() -> Fixture {
        let fake = FakeCompositor::desktop();
        let connection = fake.connection();
        let mut registry = Registry::new(&connection);
        let compositor = registry.request_singleton(Interface::Compositor, 1, 4, true).unwrap();
        let subcompositor = registry
            .request_singleton(Interface::Subcompositor, 1, 1, false)
            .unwrap();
        let shm = registry.request_singleton(Interface::Shm, 1, 1, false).unwrap();
        registry.bind().unwrap();
        let compositor = compositor.object().unwrap();
        let main_surface = connection.wire().create(compositor, Create::Surface, None).unwrap();

        let actions = Arc::new(Actions::default());
        let handler: Arc<dyn DecoratorHandler> = actions.clone();
        let decorator = WindowDecorator::new(
            &connection,
            Arc::downgrade(&handler),
            main_surface,
            compositor,
            subcompositor.object(),
            shm.object(),
            true,
        );
        Fixture {
            fake,
            actions,
            decorator,
            _registry: registry,
        }
    }

    fn release_all(fake: &FakeCompositor) {
        for buffer in fake.objects_of(Interface::Buffer) {
            fake.emit(buffer, Event::Release);
        }
    }

    #[test]
    fn test_decorations_inactive_in_fullscreen() {
        let f = fixture();
        assert!(f.decorator.is_decoration_active(ShellState::ACTIVATED));
        assert!(!f.decorator.is_decoration_active(ShellState::FULLSCREEN));
        let main = Size::new(800, 600);
        assert_eq!(
            f.decorator.calculate_full_surface_size(main, ShellState::FULLSCREEN),
            main
        );
        assert_eq!(
            f.decorator.calculate_main_surface_size(
                f.decorator.calculate_full_surface_size(main, ShellState::empty()),
                ShellState::empty()
            ),
            main
        );
    }

    #[test]
    fn test_set_state_creates_and_paints_four_surfaces() {
        let f = fixture();
        f.decorator
            .set_state(Size::new(800, 600), 1, ShellState::ACTIVATED)
            .unwrap();
        assert_eq!(f.decorator.border_surfaces().len(), 4);
        assert_eq!(f.fake.objects_of(Interface::Subsurface).len(), 4);
        assert_eq!(f.fake.objects_of(Interface::Buffer).len(), 4);
        assert_eq!(f.decorator.pending_buffer_count(), 4);

        let top = f.decorator.border_surfaces()[0];
        let requests = f.fake.requests_on(top);
        assert!(requests.contains(&Request::SetBufferScale(1)));
        assert_eq!(requests.last(), Some(&Request::Commit));
    }

    #[test]
    fn test_fullscreen_removes_decorations() {
        let f = fixture();
        f.decorator
            .set_state(Size::new(800, 600), 1, ShellState::ACTIVATED)
            .unwrap();
        f.decorator
            .set_state(Size::new(1920, 1080), 1, ShellState::FULLSCREEN)
            .unwrap();
        assert!(f.decorator.border_surfaces().is_empty());
        assert!(f.fake.objects_of(Interface::Subsurface).is_empty());
        assert!(f.fake.objects_of(Interface::Buffer).is_empty());
    }

    #[test]
    fn test_repaint_waits_for_buffer_release() {
        let f = fixture();
        f.decorator
            .set_state(Size::new(800, 600), 1, ShellState::ACTIVATED)
            .unwrap();
        let top = f.decorator.border_surfaces()[0];
        let commits = |fake: &FakeCompositor| {
            fake.requests_on(top)
                .iter()
                .filter(|r| **r == Request::Commit)
                .count()
        };
        assert_eq!(commits(&f.fake), 1);

        // Focus change only repaints, and has to wait for the compositor.
        f.decorator
            .set_state(Size::new(800, 600), 1, ShellState::empty())
            .unwrap();
        assert_eq!(commits(&f.fake), 1);
        assert_eq!(f.fake.objects_of(Interface::Buffer).len(), 4);

        release_all(&f.fake);
        assert_eq!(commits(&f.fake), 2);
    }

    #[test]
    fn test_scale_change_reallocates() {
        let f = fixture();
        f.decorator
            .set_state(Size::new(800, 600), 1, ShellState::ACTIVATED)
            .unwrap();
        let before = f.fake.objects_of(Interface::Buffer);
        f.decorator
            .set_state(Size::new(800, 600), 2, ShellState::ACTIVATED)
            .unwrap();
        let after = f.fake.objects_of(Interface::Buffer);
        assert_eq!(after.len(), 4);
        assert!(before.iter().all(|b| !after.contains(b)));
        assert_eq!(f.decorator.pending_buffer_count(), 4);
    }

    #[test]
    fn test_button_click_and_title_bar_double_click() {
        let f = fixture();
        f.decorator
            .set_state(Size::new(800, 600), 1, ShellState::ACTIVATED)
            .unwrap();
        let top = f.decorator.border_surfaces()[0];
        let seat = ObjectId(999);
        let close = button_layout(border_geometry(SurfaceIndex::Top, Size::new(800, 600)).size)[0].1;

        f.decorator.on_pointer_enter(
            seat,
            top,
            f64::from(close.x() + 2),
            f64::from(close.y() + 2),
        );
        f.decorator.on_pointer_button(seat, 1, 100, BTN_LEFT, true);

        f.decorator.on_pointer_motion(seat, 400.0, 30.0);
        f.decorator.on_pointer_button(seat, 2, 1000, BTN_LEFT, true);
        f.decorator.on_pointer_button(seat, 3, 1200, BTN_LEFT, true);
        f.decorator.on_pointer_button(seat, 4, 5000, BTN_RIGHT, true);

        f.decorator.on_pointer_motion(seat, 2.0, 2.0);
        f.decorator.on_pointer_button(seat, 5, 9000, BTN_LEFT, true);

        assert_eq!(
            f.actions.0.lock().clone(),
            vec![
                "close".to_owned(),
                "move 2".to_owned(),
                "maximize".to_owned(),
                "menu 390,20".to_owned(),
                "resize TopLeft".to_owned(),
            ]
        );
    }

    #[test]
    fn test_hover_repaints_top_surface() {
        let f = fixture();
        f.decorator
            .set_state(Size::new(800, 600), 1, ShellState::ACTIVATED)
            .unwrap();
        release_all(&f.fake);
        let top = f.decorator.border_surfaces()[0];
        let before = f.fake.requests_on(top).len();
        let minimize = button_layout(border_geometry(SurfaceIndex::Top, Size::new(800, 600)).size)[2].1;
        f.decorator.on_pointer_enter(
            ObjectId(7),
            top,
            f64::from(minimize.x() + 1),
            f64::from(minimize.y() + 1),
        );
        assert!(f.fake.requests_on(top).len() > before);
    }

    #[test]
    fn test_disabled_without_subcompositor() {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::Compositor, 4);
        let connection = fake.connection();
        let handler: Arc<dyn DecoratorHandler> = Arc::new(Actions::default());
        let decorator = WindowDecorator::new(
            &connection,
            Arc::downgrade(&handler),
            ObjectId(1),
            ObjectId(2),
            None,
            None,
            true,
        );
        assert!(!decorator.is_decoration_active(ShellState::ACTIVATED));
        decorator
            .set_state(Size::new(640, 480), 1, ShellState::ACTIVATED)
            .unwrap();
        assert!(decorator.border_surfaces().is_empty());
    }
}

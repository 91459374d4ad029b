//! webOS shell.
//!
//! Windows on webOS are always fullscreen-capable app windows; the
//! compositor reports one of four window states and has no notion of
//! serials, interactive moves or window geometry.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{ResizeEdge, ShellProtocol, ShellState, ShellSurface, ShellSurfaceHandler};
use crate::connection::Connection;
use crate::geometry::{Point, Rect, Size};
use crate::registry::Registry;
use crate::win_system::WindowingError;
use crate::wire::{listener, Create, Event, Interface, ObjectId, Request, WireError};

/// Window state of a `wl_webos_shell_surface`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum WebosState {
    #[default]
    Default = 0,
    Minimized = 1,
    Maximized = 2,
    Fullscreen = 3,
}

impl WebosState {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Default),
            1 => Some(Self::Minimized),
            2 => Some(Self::Maximized),
            3 => Some(Self::Fullscreen),
            _ => None,
        }
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Equivalent state bitset. Every state except minimized counts as
    /// focused.
    pub fn shell_state(self) -> ShellState {
        match self {
            Self::Default => ShellState::ACTIVATED,
            Self::Minimized => ShellState::empty(),
            Self::Maximized => ShellState::ACTIVATED | ShellState::MAXIMIZED,
            Self::Fullscreen => ShellState::ACTIVATED | ShellState::FULLSCREEN,
        }
    }
}

/// Properties that let the app handle the remote's back and exit keys.
const ACCESS_POLICY_PROPERTIES: [&str; 2] = [
    "_WEBOS_ACCESS_POLICY_KEYS_BACK",
    "_WEBOS_ACCESS_POLICY_KEYS_EXIT",
];

pub struct WebosShellSurface {
    connection: Connection,
    registry: Registry,
    shell_surface: ObjectId,
    state: Arc<Mutex<ShellState>>,
    handler: Weak<dyn ShellSurfaceHandler>,
}

impl WebosShellSurface {
    pub fn try_create(
        connection: &Connection,
        handler: Weak<dyn ShellSurfaceHandler>,
        surface: ObjectId,
    ) -> Result<Option<Self>, WindowingError> {
        let mut registry = Registry::new(connection);
        let shell = registry.request_singleton(Interface::WebosShell, 1, 1, false)?;
        registry.bind()?;
        let Some(shell) = shell.object() else {
            return Ok(None);
        };

        let state = Arc::new(Mutex::new(ShellState::ACTIVATED));
        let shell_listener = {
            let state = Arc::clone(&state);
            let handler = handler.clone();
            listener(move |_, event| match event {
                Event::WebosStateChanged(webos_state) => {
                    let new_state = webos_state.shell_state();
                    *state.lock() = new_state;
                    debug!("webOS state changed to {webos_state:?} [{new_state}]");
                    if let Some(handler) = handler.upgrade() {
                        handler.on_configure(0, Size::ZERO, new_state);
                    }
                }
                Event::WebosPositionChanged(position) => {
                    debug!("webOS window moved to {position}");
                }
                Event::Close => {
                    if let Some(handler) = handler.upgrade() {
                        handler.on_close();
                    }
                }
                _ => {}
            })
        };

        let wire = connection.wire();
        let shell_surface =
            wire.create(shell, Create::ShellSurface { surface }, Some(shell_listener))?;
        for name in ACCESS_POLICY_PROPERTIES {
            wire.send(
                shell_surface,
                Request::SetWebosProperty {
                    name: name.to_owned(),
                    value: "true".to_owned(),
                },
            )?;
        }

        Ok(Some(Self {
            connection: connection.clone(),
            registry,
            shell_surface,
            state,
            handler,
        }))
    }

    fn set_state(&self, state: WebosState) -> Result<(), WireError> {
        self.connection
            .wire()
            .send(self.shell_surface, Request::SetWebosState(state))
    }
}

impl ShellSurface for WebosShellSurface {
    fn protocol(&self) -> ShellProtocol {
        ShellProtocol::WebOs
    }

    fn initialize(&mut self) -> Result<(), WireError> {
        self.connection.roundtrip()?;
        let state = *self.state.lock();
        if let Some(handler) = self.handler.upgrade() {
            handler.on_configure(0, Size::ZERO, state);
        }
        Ok(())
    }

    fn set_full_screen(
        &mut self,
        _output: Option<ObjectId>,
        _refresh_rate: f32,
    ) -> Result<(), WireError> {
        self.set_state(WebosState::Fullscreen)?;
        self.state.lock().insert(ShellState::FULLSCREEN);
        Ok(())
    }

    fn set_windowed(&mut self) -> Result<(), WireError> {
        self.set_state(WebosState::Default)?;
        self.state.lock().remove(ShellState::FULLSCREEN);
        Ok(())
    }

    fn set_maximized(&mut self) -> Result<(), WireError> {
        self.set_state(WebosState::Maximized)
    }

    fn unset_maximized(&mut self) -> Result<(), WireError> {
        self.set_state(WebosState::Default)
    }

    fn set_minimized(&mut self) -> Result<(), WireError> {
        self.set_state(WebosState::Minimized)
    }

    fn set_window_geometry(&mut self, _geometry: Rect) -> Result<(), WireError> {
        Ok(())
    }

    fn ack_configure(&mut self, _serial: u32) -> Result<(), WireError> {
        Ok(())
    }

    fn start_move(&mut self, _seat: ObjectId, _serial: u32) -> Result<(), WireError> {
        Ok(())
    }

    fn start_resize(
        &mut self,
        _seat: ObjectId,
        _serial: u32,
        _edge: ResizeEdge,
    ) -> Result<(), WireError> {
        Ok(())
    }

    fn show_context_menu(
        &mut self,
        _seat: ObjectId,
        _serial: u32,
        _position: Point,
    ) -> Result<(), WireError> {
        Ok(())
    }
}

impl Drop for WebosShellSurface {
    fn drop(&mut self) {
        self.connection.wire().destroy(self.shell_surface);
        self.registry.unbind_singletons();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCompositor;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ShellState>>);

    impl ShellSurfaceHandler for Recorder {
        fn on_configure(&self, serial: u32, size: Size, state: ShellState) {
            assert_eq!(serial, 0);
            assert_eq!(size, Size::ZERO);
            self.0.lock().push(state);
        }

        fn on_close(&self) {}
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(WebosState::from_raw(3), Some(WebosState::Fullscreen));
        assert_eq!(WebosState::from_raw(4), None);
        assert!(WebosState::Minimized.shell_state().is_empty());
        assert!(WebosState::Maximized
            .shell_state()
            .contains(ShellState::MAXIMIZED));
    }

    #[test]
    fn test_access_policy_and_state_changes() {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::Compositor, 4);
        fake.add_global(Interface::WebosShell, 1);
        let connection = fake.connection();
        let mut registry = Registry::new(&connection);
        let compositor = registry
            .request_singleton(Interface::Compositor, 1, 4, true)
            .unwrap();
        registry.bind().unwrap();
        let surface = connection
            .wire()
            .create(compositor.object().unwrap(), Create::Surface, None)
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ShellSurfaceHandler> = recorder.clone();
        let mut shell =
            WebosShellSurface::try_create(&connection, Arc::downgrade(&handler), surface)
                .unwrap()
                .unwrap();
        let shell_surface = fake.objects_of(Interface::WebosShellSurface)[0];
        assert_eq!(
            fake.requests_on(shell_surface),
            vec![
                Request::SetWebosProperty {
                    name: "_WEBOS_ACCESS_POLICY_KEYS_BACK".into(),
                    value: "true".into(),
                },
                Request::SetWebosProperty {
                    name: "_WEBOS_ACCESS_POLICY_KEYS_EXIT".into(),
                    value: "true".into(),
                },
            ]
        );

        shell.initialize().unwrap();
        fake.emit(shell_surface, Event::WebosStateChanged(WebosState::Fullscreen));
        assert_eq!(
            recorder.0.lock().clone(),
            vec![
                ShellState::ACTIVATED,
                ShellState::ACTIVATED | ShellState::FULLSCREEN
            ]
        );
    }
}

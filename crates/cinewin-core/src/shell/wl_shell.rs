//! Legacy `wl_shell` fallback.
//!
//! `wl_shell_surface` has no serials and no state in its configure event,
//! so configures are reported with serial 0 and the state we last asked
//! for. Acknowledging is a no-op; minimizing, window geometry and the
//! window menu do not exist on this protocol.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{ResizeEdge, ShellProtocol, ShellState, ShellSurface, ShellSurfaceHandler};
use crate::connection::Connection;
use crate::geometry::{Point, Rect, Size};
use crate::registry::Registry;
use crate::win_system::WindowingError;
use crate::wire::{listener, Create, Event, Interface, ObjectId, Request, WireError};

pub struct WlShellSurface {
    connection: Connection,
    registry: Registry,
    shell_surface: ObjectId,
    state: Arc<Mutex<ShellState>>,
    handler: Weak<dyn ShellSurfaceHandler>,
}

impl WlShellSurface {
    pub fn try_create(
        connection: &Connection,
        handler: Weak<dyn ShellSurfaceHandler>,
        surface: ObjectId,
        title: &str,
        class: &str,
    ) -> Result<Option<Self>, WindowingError> {
        let mut registry = Registry::new(connection);
        let shell = registry.request_singleton(Interface::WlShell, 1, 1, false)?;
        registry.bind()?;
        let Some(shell) = shell.object() else {
            return Ok(None);
        };

        let state = Arc::new(Mutex::new(ShellState::ACTIVATED));
        let shell_listener = {
            let state = Arc::clone(&state);
            let handler = handler.clone();
            let weak_connection = connection.downgrade();
            listener(move |object, event| match event {
                Event::Ping { serial } => {
                    if let Some(connection) = weak_connection.upgrade() {
                        let _ = connection.wire().send(object, Request::Pong(*serial));
                    }
                }
                Event::ShellConfigure { size, .. } => {
                    let state = *state.lock();
                    debug!("wl_shell configure: {size} [{state}]");
                    if let Some(handler) = handler.upgrade() {
                        handler.on_configure(0, *size, state);
                    }
                }
                _ => {}
            })
        };

        let wire = connection.wire();
        let shell_surface =
            wire.create(shell, Create::ShellSurface { surface }, Some(shell_listener))?;
        wire.send(shell_surface, Request::SetClass(class.to_owned()))?;
        wire.send(shell_surface, Request::SetTitle(title.to_owned()))?;
        wire.send(shell_surface, Request::SetToplevel)?;

        Ok(Some(Self {
            connection: connection.clone(),
            registry,
            shell_surface,
            state,
            handler,
        }))
    }

    fn send(&self, request: Request) -> Result<(), WireError> {
        self.connection.wire().send(self.shell_surface, request)
    }
}

impl ShellSurface for WlShellSurface {
    fn protocol(&self) -> ShellProtocol {
        ShellProtocol::WlShell
    }

    fn initialize(&mut self) -> Result<(), WireError> {
        self.connection.roundtrip()?;
        // There is no initial configure on wl_shell; synthesize one so the
        // window system sees the same startup sequence as on XDG.
        let state = *self.state.lock();
        if let Some(handler) = self.handler.upgrade() {
            handler.on_configure(0, Size::ZERO, state);
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_full_screen(
        &mut self,
        output: Option<ObjectId>,
        refresh_rate: f32,
    ) -> Result<(), WireError> {
        self.send(Request::SetShellFullscreen {
            framerate: (refresh_rate * 1000.0).round() as u32,
            output,
        })?;
        self.state.lock().insert(ShellState::FULLSCREEN);
        Ok(())
    }

    fn set_windowed(&mut self) -> Result<(), WireError> {
        self.send(Request::SetToplevel)?;
        self.state.lock().remove(ShellState::FULLSCREEN);
        Ok(())
    }

    fn set_maximized(&mut self) -> Result<(), WireError> {
        self.send(Request::SetShellMaximized { output: None })?;
        self.state.lock().insert(ShellState::MAXIMIZED);
        Ok(())
    }

    fn unset_maximized(&mut self) -> Result<(), WireError> {
        self.send(Request::SetToplevel)?;
        self.state.lock().remove(ShellState::MAXIMIZED);
        Ok(())
    }

    fn set_minimized(&mut self) -> Result<(), WireError> {
        Ok(())
    }

    fn set_window_geometry(&mut self, _geometry: Rect) -> Result<(), WireError> {
        Ok(())
    }

    fn ack_configure(&mut self, _serial: u32) -> Result<(), WireError> {
        Ok(())
    }

    fn start_move(&mut self, seat: ObjectId, serial: u32) -> Result<(), WireError> {
        self.send(Request::Move { seat, serial })
    }

    fn start_resize(
        &mut self,
        seat: ObjectId,
        serial: u32,
        edge: ResizeEdge,
    ) -> Result<(), WireError> {
        self.send(Request::Resize { seat, serial, edge })
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

impl Drop for WlShellSurface {
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
    struct Recorder(Mutex<Vec<(u32, Size, ShellState)>>);

    impl ShellSurfaceHandler for Recorder {
        fn on_configure(&self, serial: u32, size: Size, state: ShellState) {
            self.0.lock().push((serial, size, state));
        }

        fn on_close(&self) {}
    }

    fn create() -> (Arc<FakeCompositor>, Arc<Recorder>, WlShellSurface) {
        let fake = FakeCompositor::new();
        fake.add_global(Interface::Compositor, 4);
        fake.add_global(Interface::WlShell, 1);
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
        let shell = WlShellSurface::try_create(&connection, Arc::downgrade(&handler), surface, "t", "c")
            .unwrap()
            .unwrap();
        (fake, recorder, shell)
    }

    #[test]
    fn test_initialize_synthesizes_configure_with_serial_zero() {
        let (_fake, recorder, mut shell) = create();
        shell.initialize().unwrap();
        assert_eq!(
            recorder.0.lock().clone(),
            vec![(0, Size::ZERO, ShellState::ACTIVATED)]
        );
    }

    #[test]
    fn test_ack_sends_nothing() {
        let (fake, _recorder, mut shell) = create();
        fake.clear_requests();
        shell.ack_configure(5).unwrap();
        shell.set_minimized().unwrap();
        assert!(fake.requests().is_empty());
    }

    #[test]
    fn test_fullscreen_uses_millihertz_and_updates_state() {
        let (fake, recorder, mut shell) = create();
        shell.set_full_screen(None, 59.94).unwrap();
        let shell_surface = fake.objects_of(Interface::ShellSurface)[0];
        assert!(fake.requests_on(shell_surface).contains(&Request::SetShellFullscreen {
            framerate: 59_940,
            output: None,
        }));

        fake.emit(
            shell_surface,
            Event::ShellConfigure {
                edges: 0,
                size: Size::new(1920, 1080),
            },
        );
        let (serial, size, state) = recorder.0.lock()[0];
        assert_eq!(serial, 0);
        assert_eq!(size, Size::new(1920, 1080));
        assert!(state.contains(ShellState::FULLSCREEN));
    }
}

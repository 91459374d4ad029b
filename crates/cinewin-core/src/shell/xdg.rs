//! XDG shell, stable and unstable v6.
//!
//! Both versions have the same request and event set; they differ in the
//! global and object interfaces only, which the [`XdgFlavor`] parameter
//! selects. Toplevel configures are buffered until the `xdg_surface`
//! configure carrying the serial arrives.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{ResizeEdge, ShellProtocol, ShellState, ShellSurface, ShellSurfaceHandler, MIN_WINDOW_SIZE};
use crate::connection::Connection;
use crate::geometry::{Point, Rect, Size};
use crate::registry::Registry;
use crate::win_system::WindowingError;
use crate::wire::{listener, Create, Event, Interface, ObjectId, Request, WireError};

/// Selects stable or unstable-v6 XDG shell.
pub trait XdgFlavor: Send + Sync + 'static {
    const PROTOCOL: ShellProtocol;
    const SHELL: Interface;
}

#[derive(Debug)]
pub struct Stable;

impl XdgFlavor for Stable {
    const PROTOCOL: ShellProtocol = ShellProtocol::XdgShell;
    const SHELL: Interface = Interface::XdgWmBase;
}

#[derive(Debug)]
pub struct UnstableV6;

impl XdgFlavor for UnstableV6 {
    const PROTOCOL: ShellProtocol = ShellProtocol::XdgShellUnstableV6;
    const SHELL: Interface = Interface::ZxdgShellV6;
}

pub type XdgShell = XdgShellSurface<Stable>;
pub type XdgShellUnstableV6 = XdgShellSurface<UnstableV6>;

#[derive(Debug, Default, Clone, Copy)]
struct PendingConfigure {
    size: Size,
    state: ShellState,
}

/// Toplevel window on an XDG shell.
pub struct XdgShellSurface<F: XdgFlavor> {
    connection: Connection,
    registry: Registry,
    surface: ObjectId,
    xdg_surface: ObjectId,
    toplevel: ObjectId,
    _flavor: PhantomData<F>,
}

impl<F: XdgFlavor> XdgShellSurface<F> {
    /// Bind the shell global and give `surface` the toplevel role.
    /// `Ok(None)` if the compositor does not offer this shell.
    pub fn try_create(
        connection: &Connection,
        handler: Weak<dyn ShellSurfaceHandler>,
        surface: ObjectId,
        title: &str,
        app_id: &str,
    ) -> Result<Option<Self>, WindowingError> {
        let mut registry = Registry::new(connection);
        let weak_connection = connection.downgrade();
        let shell = registry.request_singleton_with_listener(
            F::SHELL,
            1,
            1,
            false,
            listener(move |shell, event| {
                if let Event::Ping { serial } = event {
                    if let Some(connection) = weak_connection.upgrade() {
                        // The only failure is a dead connection, reported elsewhere.
                        let _ = connection.wire().send(shell, Request::Pong(*serial));
                    }
                }
            }),
        )?;
        registry.bind()?;
        let Some(shell) = shell.object() else {
            return Ok(None);
        };

        let pending = Arc::new(Mutex::new(PendingConfigure::default()));

        let toplevel_listener = {
            let pending = Arc::clone(&pending);
            let handler = handler.clone();
            listener(move |_, event| match event {
                Event::ToplevelConfigure { size, states } => {
                    *pending.lock() = PendingConfigure {
                        size: *size,
                        state: ShellState::from_toplevel_states(states),
                    };
                }
                Event::Close => {
                    if let Some(handler) = handler.upgrade() {
                        handler.on_close();
                    }
                }
                _ => {}
            })
        };
        let surface_listener = listener(move |_, event| {
            if let Event::SurfaceConfigure { serial } = event {
                let configure = *pending.lock();
                debug!(
                    "{} configure {serial}: {} [{}]",
                    F::PROTOCOL,
                    configure.size,
                    configure.state
                );
                if let Some(handler) = handler.upgrade() {
                    handler.on_configure(*serial, configure.size, configure.state);
                }
            }
        });

        let wire = connection.wire();
        let xdg_surface = wire.create(
            shell,
            Create::XdgSurface { surface },
            Some(surface_listener),
        )?;
        let toplevel = wire.create(xdg_surface, Create::Toplevel, Some(toplevel_listener))?;
        wire.send(toplevel, Request::SetAppId(app_id.to_owned()))?;
        wire.send(toplevel, Request::SetTitle(title.to_owned()))?;
        wire.send(toplevel, Request::SetMinSize(MIN_WINDOW_SIZE))?;

        Ok(Some(Self {
            connection: connection.clone(),
            registry,
            surface,
            xdg_surface,
            toplevel,
            _flavor: PhantomData,
        }))
    }

    fn send_toplevel(&self, request: Request) -> Result<(), WireError> {
        self.connection.wire().send(self.toplevel, request)
    }
}

impl<F: XdgFlavor> ShellSurface for XdgShellSurface<F> {
    fn protocol(&self) -> ShellProtocol {
        F::PROTOCOL
    }

    fn initialize(&mut self) -> Result<(), WireError> {
        // The compositor answers the first role commit with a configure.
        self.connection.wire().send(self.surface, Request::Commit)?;
        self.connection.roundtrip()
    }

    fn set_full_screen(
        &mut self,
        output: Option<ObjectId>,
        _refresh_rate: f32,
    ) -> Result<(), WireError> {
        self.send_toplevel(Request::SetFullscreen { output })
    }

    fn set_windowed(&mut self) -> Result<(), WireError> {
        self.send_toplevel(Request::UnsetFullscreen)
    }

    fn set_maximized(&mut self) -> Result<(), WireError> {
        self.send_toplevel(Request::SetMaximized)
    }

    fn unset_maximized(&mut self) -> Result<(), WireError> {
        self.send_toplevel(Request::UnsetMaximized)
    }

    fn set_minimized(&mut self) -> Result<(), WireError> {
        self.send_toplevel(Request::SetMinimized)
    }

    fn set_window_geometry(&mut self, geometry: Rect) -> Result<(), WireError> {
        self.connection
            .wire()
            .send(self.xdg_surface, Request::SetWindowGeometry(geometry))
    }

    fn ack_configure(&mut self, serial: u32) -> Result<(), WireError> {
        self.connection
            .wire()
            .send(self.xdg_surface, Request::AckConfigure(serial))
    }

    fn start_move(&mut self, seat: ObjectId, serial: u32) -> Result<(), WireError> {
        self.send_toplevel(Request::Move { seat, serial })
    }

    fn start_resize(
        &mut self,
        seat: ObjectId,
        serial: u32,
        edge: ResizeEdge,
    ) -> Result<(), WireError> {
        self.send_toplevel(Request::Resize { seat, serial, edge })
    }

    fn show_context_menu(
        &mut self,
        seat: ObjectId,
        serial: u32,
        position: Point,
    ) -> Result<(), WireError> {
        self.send_toplevel(Request::ShowWindowMenu {
            seat,
            serial,
            position,
        })
    }
}

impl<F: XdgFlavor> Drop for XdgShellSurface<F> {
    fn drop(&mut self) {
        let wire = self.connection.wire();
        wire.destroy(self.toplevel);
        wire.destroy(self.xdg_surface);
        self.registry.unbind_singletons();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCompositor;
    use crate::wire::ToplevelState;

    #[derive(Default)]
    struct Recorder {
        configures: Mutex<Vec<(u32, Size, ShellState)>>,
        closed: Mutex<bool>,
    }

    impl ShellSurfaceHandler for Recorder {
        fn on_configure(&self, serial: u32, size: Size, state: ShellState) {
            self.configures.lock().push((serial, size, state));
        }

        fn on_close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn setup() -> (Arc<FakeCompositor>, Connection, ObjectId, Arc<Recorder>) {
        let fake = FakeCompositor::desktop();
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
        (fake, connection, surface, Arc::new(Recorder::default()))
    }

    fn weak(recorder: &Arc<Recorder>) -> Weak<dyn ShellSurfaceHandler> {
        let handler: Arc<dyn ShellSurfaceHandler> = recorder.clone();
        Arc::downgrade(&handler)
    }

    #[test]
    fn test_initialize_delivers_first_configure() {
        let (fake, connection, surface, recorder) = setup();
        fake.set_initial_configure(
            Size::new(1024, 768),
            vec![ToplevelState::Activated, ToplevelState::Maximized],
        );
        let mut shell = XdgShell::try_create(&connection, weak(&recorder), surface, "t", "a")
            .unwrap()
            .unwrap();
        shell.initialize().unwrap();

        let configures = recorder.configures.lock().clone();
        assert_eq!(configures.len(), 1);
        let (_, size, state) = configures[0];
        assert_eq!(size, Size::new(1024, 768));
        assert_eq!(state, ShellState::ACTIVATED | ShellState::MAXIMIZED);
    }

    #[test]
    fn test_toplevel_role_setup_requests() {
        let (fake, connection, surface, recorder) = setup();
        let _shell = XdgShell::try_create(&connection, weak(&recorder), surface, "Title", "app")
            .unwrap()
            .unwrap();
        let toplevel = fake.objects_of(Interface::XdgToplevel)[0];
        assert_eq!(
            fake.requests_on(toplevel),
            vec![
                Request::SetAppId("app".into()),
                Request::SetTitle("Title".into()),
                Request::SetMinSize(MIN_WINDOW_SIZE),
            ]
        );
    }

    #[test]
    fn test_ping_is_answered() {
        let (fake, connection, surface, recorder) = setup();
        let _shell = XdgShell::try_create(&connection, weak(&recorder), surface, "t", "a")
            .unwrap()
            .unwrap();
        let wm_base = fake.objects_of(Interface::XdgWmBase)[0];
        fake.emit(wm_base, Event::Ping { serial: 77 });
        assert_eq!(fake.requests_on(wm_base), vec![Request::Pong(77)]);
    }

    #[test]
    fn test_close_reaches_handler() {
        let (fake, connection, surface, recorder) = setup();
        let _shell = XdgShell::try_create(&connection, weak(&recorder), surface, "t", "a")
            .unwrap()
            .unwrap();
        fake.emit(fake.objects_of(Interface::XdgToplevel)[0], Event::Close);
        assert!(*recorder.closed.lock());
    }

    #[test]
    fn test_unstable_shell_absent_on_desktop_fake() {
        let (_fake, connection, surface, recorder) = setup();
        let shell =
            XdgShellUnstableV6::try_create(&connection, weak(&recorder), surface, "t", "a").unwrap();
        assert!(shell.is_none());
    }

    #[test]
    fn test_drop_releases_role_objects() {
        let (fake, connection, surface, recorder) = setup();
        let shell = XdgShell::try_create(&connection, weak(&recorder), surface, "t", "a")
            .unwrap()
            .unwrap();
        let toplevel = fake.objects_of(Interface::XdgToplevel)[0];
        drop(shell);
        assert!(!fake.is_alive(toplevel));
        assert!(fake.objects_of(Interface::XdgWmBase).is_empty());
    }
}

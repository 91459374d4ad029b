//! [`Wire`] implementation over a `wayland-client` connection.

use std::fmt::Debug;
use std::io;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use wayland_backend::client::ObjectId as ProtocolId;
use wayland_client::protocol::{
    wl_buffer::WlBuffer, wl_compositor::WlCompositor, wl_keyboard::WlKeyboard,
    wl_output::WlOutput, wl_pointer::WlPointer, wl_region::WlRegion, wl_registry::WlRegistry,
    wl_seat::WlSeat, wl_shell::WlShell, wl_shell_surface, wl_shell_surface::WlShellSurface,
    wl_shm, wl_shm::WlShm, wl_shm_pool::WlShmPool, wl_subcompositor::WlSubcompositor,
    wl_subsurface::WlSubsurface, wl_surface::WlSurface, wl_touch::WlTouch,
};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle};
use wayland_protocols::wp::color_management::v1::client::{
    wp_color_management_surface_v1::WpColorManagementSurfaceV1,
    wp_color_manager_v1::{self, WpColorManagerV1},
    wp_image_description_creator_params_v1::WpImageDescriptionCreatorParamsV1,
    wp_image_description_v1::WpImageDescriptionV1,
};
use wayland_protocols::wp::presentation_time::client::wp_presentation::WpPresentation;
use wayland_protocols::xdg::shell::client::{
    xdg_surface::XdgSurface, xdg_toplevel, xdg_toplevel::XdgToplevel, xdg_wm_base::XdgWmBase,
};
use wayland_protocols::xdg::shell::zv6::client::{
    zxdg_shell_v6::ZxdgShellV6, zxdg_surface_v6::ZxdgSurfaceV6, zxdg_toplevel_v6,
    zxdg_toplevel_v6::ZxdgToplevelV6,
};

use cinewin_core::wire::{
    Create, Interface, Listener, ObjectId, Request, ShmPool, Wire, WireError,
};

use crate::dispatch::Dispatcher;
use crate::objects::ObjectTable;
use crate::protocols::webos_shell::{
    wl_webos_shell::WlWebosShell, wl_webos_shell_surface::WlWebosShellSurface,
};
use crate::pump::{self, EventPump, QueueState};
use crate::shm::MappedFile;

/// A compositor connection seen through the core's object model.
pub struct WaylandWire {
    connection: Connection,
    handle: QueueHandle<Dispatcher>,
    queue: Arc<Mutex<QueueState>>,
    objects: Arc<ObjectTable>,
    pump: Mutex<Option<EventPump>>,
}

impl WaylandWire {
    /// Connect to the compositor named by `WAYLAND_DISPLAY`.
    pub fn connect() -> Result<Self, WireError> {
        let connection =
            Connection::connect_to_env().map_err(|e| WireError::NoCompositor(e.to_string()))?;
        info!("Connected to Wayland display");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: Connection) -> Self {
        let objects = Arc::new(ObjectTable::default());
        let queue = connection.new_event_queue();
        let handle = queue.handle();
        Self {
            queue: Arc::new(Mutex::new(QueueState {
                queue,
                dispatcher: Dispatcher::new(Arc::clone(&objects)),
            })),
            connection,
            handle,
            objects,
            pump: Mutex::new(None),
        }
    }

    /// Typed proxy for a live object.
    fn proxy<I: Proxy>(&self, id: ObjectId) -> Result<I, WireError> {
        let protocol = self
            .objects
            .get(id)
            .and_then(|entry| entry.protocol)
            .ok_or(WireError::UnknownObject(id))?;
        I::from_id(&self.connection, protocol).map_err(|_| WireError::UnknownObject(id))
    }

    fn optional<I: Proxy>(&self, id: Option<ObjectId>) -> Result<Option<I>, WireError> {
        id.map(|id| self.proxy(id)).transpose()
    }

    fn bind_as<I>(&self, registry: &WlRegistry, name: u32, version: u32, id: ObjectId) -> ProtocolId
    where
        I: Proxy + 'static,
        Dispatcher: Dispatch<I, ObjectId>,
    {
        registry.bind::<I, ObjectId, Dispatcher>(name, version, &self.handle, id).id()
    }

    fn bind_global(
        &self,
        registry: &WlRegistry,
        name: u32,
        interface: Interface,
        version: u32,
        id: ObjectId,
    ) -> Result<ProtocolId, WireError> {
        let protocol = match interface {
            Interface::Compositor => self.bind_as::<WlCompositor>(registry, name, version, id),
            Interface::Subcompositor => self.bind_as::<WlSubcompositor>(registry, name, version, id),
            Interface::Shm => self.bind_as::<WlShm>(registry, name, version, id),
            Interface::Output => self.bind_as::<WlOutput>(registry, name, version, id),
            Interface::Seat => self.bind_as::<WlSeat>(registry, name, version, id),
            Interface::XdgWmBase => self.bind_as::<XdgWmBase>(registry, name, version, id),
            Interface::ZxdgShellV6 => self.bind_as::<ZxdgShellV6>(registry, name, version, id),
            Interface::WlShell => self.bind_as::<WlShell>(registry, name, version, id),
            Interface::WebosShell => self.bind_as::<WlWebosShell>(registry, name, version, id),
            Interface::Presentation => self.bind_as::<WpPresentation>(registry, name, version, id),
            Interface::ColorManager => self.bind_as::<WpColorManagerV1>(registry, name, version, id),
            other => {
                return Err(WireError::InvalidRequest {
                    interface: Interface::Registry.name(),
                    request: format!("bind {other}"),
                })
            }
        };
        Ok(protocol)
    }

    fn create_proxy(
        &self,
        parent: ObjectId,
        parent_interface: Interface,
        request: &Create,
        id: ObjectId,
    ) -> Result<ProtocolId, WireError> {
        let qh = &self.handle;
        let protocol = match (parent_interface, request) {
            (Interface::Compositor, Create::Surface) => {
                self.proxy::<WlCompositor>(parent)?.create_surface(qh, id).id()
            }
            (Interface::Compositor, Create::Region) => {
                self.proxy::<WlCompositor>(parent)?.create_region(qh, id).id()
            }
            (Interface::Subcompositor, Create::Subsurface { surface, parent: main }) => self
                .proxy::<WlSubcompositor>(parent)?
                .get_subsurface(&self.proxy(*surface)?, &self.proxy(*main)?, qh, id)
                .id(),
            (
                Interface::ShmPool,
                Create::Buffer {
                    offset,
                    width,
                    height,
                    stride,
                },
            ) => self
                .proxy::<WlShmPool>(parent)?
                .create_buffer(*offset, *width, *height, *stride, wl_shm::Format::Argb8888, qh, id)
                .id(),
            (Interface::Surface, Create::Frame) => {
                self.proxy::<WlSurface>(parent)?.frame(qh, id).id()
            }
            (Interface::XdgWmBase, Create::XdgSurface { surface }) => self
                .proxy::<XdgWmBase>(parent)?
                .get_xdg_surface(&self.proxy(*surface)?, qh, id)
                .id(),
            (Interface::ZxdgShellV6, Create::XdgSurface { surface }) => self
                .proxy::<ZxdgShellV6>(parent)?
                .get_xdg_surface(&self.proxy(*surface)?, qh, id)
                .id(),
            (Interface::XdgSurface, Create::Toplevel) => {
                self.proxy::<XdgSurface>(parent)?.get_toplevel(qh, id).id()
            }
            (Interface::ZxdgSurfaceV6, Create::Toplevel) => {
                self.proxy::<ZxdgSurfaceV6>(parent)?.get_toplevel(qh, id).id()
            }
            (Interface::WlShell, Create::ShellSurface { surface }) => self
                .proxy::<WlShell>(parent)?
                .get_shell_surface(&self.proxy(*surface)?, qh, id)
                .id(),
            (Interface::WebosShell, Create::ShellSurface { surface }) => self
                .proxy::<WlWebosShell>(parent)?
                .get_shell_surface(&self.proxy(*surface)?, qh, id)
                .id(),
            (Interface::Presentation, Create::Feedback { surface }) => self
                .proxy::<WpPresentation>(parent)?
                .feedback(&self.proxy(*surface)?, qh, id)
                .id(),
            (Interface::ColorManager, Create::ColorSurface { surface }) => self
                .proxy::<WpColorManagerV1>(parent)?
                .get_surface(&self.proxy(*surface)?, qh, id)
                .id(),
            (Interface::ColorManager, Create::ParametricCreator) => self
                .proxy::<WpColorManagerV1>(parent)?
                .create_parametric_creator(qh, id)
                .id(),
            (Interface::ImageDescriptionCreator, Create::ImageDescription) => {
                let description = self
                    .proxy::<WpImageDescriptionCreatorParamsV1>(parent)?
                    .create(qh, id)
                    .id();
                self.objects.remove(parent);
                description
            }
            (Interface::Seat, Create::Pointer) => self.proxy::<WlSeat>(parent)?.get_pointer(qh, id).id(),
            (Interface::Seat, Create::Keyboard) => {
                self.proxy::<WlSeat>(parent)?.get_keyboard(qh, id).id()
            }
            (Interface::Seat, Create::Touch) => self.proxy::<WlSeat>(parent)?.get_touch(qh, id).id(),
            _ => return Err(invalid(parent_interface, request)),
        };
        Ok(protocol)
    }

    fn send_request(
        &self,
        object: ObjectId,
        interface: Interface,
        request: Request,
    ) -> Result<(), WireError> {
        match interface {
            Interface::Surface => self.send_surface(object, request),
            Interface::Region => match request {
                Request::RegionAdd(rect) => {
                    self.proxy::<WlRegion>(object)?.add(
                        rect.origin.x,
                        rect.origin.y,
                        rect.size.width,
                        rect.size.height,
                    );
                    Ok(())
                }
                other => Err(invalid(interface, &other)),
            },
            Interface::Subsurface => {
                let subsurface = self.proxy::<WlSubsurface>(object)?;
                match request {
                    Request::SetPosition(position) => subsurface.set_position(position.x, position.y),
                    Request::SetSync => subsurface.set_sync(),
                    Request::SetDesync => subsurface.set_desync(),
                    other => return Err(invalid(interface, &other)),
                }
                Ok(())
            }
            Interface::XdgWmBase => match request {
                Request::Pong(serial) => {
                    self.proxy::<XdgWmBase>(object)?.pong(serial);
                    Ok(())
                }
                other => Err(invalid(interface, &other)),
            },
            Interface::ZxdgShellV6 => match request {
                Request::Pong(serial) => {
                    self.proxy::<ZxdgShellV6>(object)?.pong(serial);
                    Ok(())
                }
                other => Err(invalid(interface, &other)),
            },
            Interface::XdgSurface => {
                let surface = self.proxy::<XdgSurface>(object)?;
                match request {
                    Request::AckConfigure(serial) => surface.ack_configure(serial),
                    Request::SetWindowGeometry(rect) => surface.set_window_geometry(
                        rect.origin.x,
                        rect.origin.y,
                        rect.size.width,
                        rect.size.height,
                    ),
                    other => return Err(invalid(interface, &other)),
                }
                Ok(())
            }
            Interface::ZxdgSurfaceV6 => {
                let surface = self.proxy::<ZxdgSurfaceV6>(object)?;
                match request {
                    Request::AckConfigure(serial) => surface.ack_configure(serial),
                    Request::SetWindowGeometry(rect) => surface.set_window_geometry(
                        rect.origin.x,
                        rect.origin.y,
                        rect.size.width,
                        rect.size.height,
                    ),
                    other => return Err(invalid(interface, &other)),
                }
                Ok(())
            }
            Interface::XdgToplevel => self.send_xdg_toplevel(object, request),
            Interface::ZxdgToplevelV6 => self.send_zxdg_toplevel(object, request),
            Interface::ShellSurface => self.send_shell_surface(object, request),
            Interface::WebosShellSurface => {
                let surface = self.proxy::<WlWebosShellSurface>(object)?;
                match request {
                    Request::SetWebosState(state) => surface.set_state(state.raw()),
                    Request::SetWebosProperty { name, value } => surface.set_property(name, value),
                    other => return Err(invalid(interface, &other)),
                }
                Ok(())
            }
            Interface::ImageDescriptionCreator => self.send_creator(object, request),
            Interface::ColorManagementSurface => {
                let surface = self.proxy::<WpColorManagementSurfaceV1>(object)?;
                match request {
                    Request::SetImageDescription {
                        description,
                        render_intent,
                    } => {
                        let intent = named::<wp_color_manager_v1::RenderIntent>(
                            interface,
                            "render intent",
                            render_intent,
                        )?;
                        surface.set_image_description(
                            &self.proxy::<WpImageDescriptionV1>(description)?,
                            intent,
                        );
                    }
                    Request::UnsetImageDescription => surface.unset_image_description(),
                    other => return Err(invalid(interface, &other)),
                }
                Ok(())
            }
            Interface::Pointer => match request {
                Request::SetCursor {
                    serial,
                    surface,
                    hotspot,
                } => {
                    let surface = self.optional::<WlSurface>(surface)?;
                    self.proxy::<WlPointer>(object)?.set_cursor(
                        serial,
                        surface.as_ref(),
                        hotspot.x,
                        hotspot.y,
                    );
                    Ok(())
                }
                other => Err(invalid(interface, &other)),
            },
            _ => Err(invalid(interface, &request)),
        }
    }

    fn send_surface(&self, object: ObjectId, request: Request) -> Result<(), WireError> {
        let surface = self.proxy::<WlSurface>(object)?;
        match request {
            Request::Attach { buffer, position } => {
                let buffer = self.optional::<WlBuffer>(buffer)?;
                surface.attach(buffer.as_ref(), position.x, position.y);
            }
            Request::Damage(rect) => {
                surface.damage(rect.origin.x, rect.origin.y, rect.size.width, rect.size.height);
            }
            Request::Commit => surface.commit(),
            Request::SetBufferScale(scale) => surface.set_buffer_scale(scale),
            Request::SetOpaqueRegion(region) => {
                surface.set_opaque_region(self.optional::<WlRegion>(region)?.as_ref());
            }
            Request::SetInputRegion(region) => {
                surface.set_input_region(self.optional::<WlRegion>(region)?.as_ref());
            }
            other => return Err(invalid(Interface::Surface, &other)),
        }
        Ok(())
    }

    fn send_xdg_toplevel(&self, object: ObjectId, request: Request) -> Result<(), WireError> {
        let toplevel = self.proxy::<XdgToplevel>(object)?;
        match request {
            Request::SetTitle(title) => toplevel.set_title(title),
            Request::SetAppId(app_id) => toplevel.set_app_id(app_id),
            Request::SetMinSize(size) => toplevel.set_min_size(size.width, size.height),
            Request::SetFullscreen { output } => {
                toplevel.set_fullscreen(self.optional::<WlOutput>(output)?.as_ref());
            }
            Request::UnsetFullscreen => toplevel.unset_fullscreen(),
            Request::SetMaximized => toplevel.set_maximized(),
            Request::UnsetMaximized => toplevel.unset_maximized(),
            Request::SetMinimized => toplevel.set_minimized(),
            Request::Move { seat, serial } => toplevel._move(&self.proxy::<WlSeat>(seat)?, serial),
            Request::Resize { seat, serial, edge } => {
                let edge =
                    named::<xdg_toplevel::ResizeEdge>(Interface::XdgToplevel, "edge", edge.raw())?;
                toplevel.resize(&self.proxy::<WlSeat>(seat)?, serial, edge);
            }
            Request::ShowWindowMenu {
                seat,
                serial,
                position,
            } => toplevel.show_window_menu(&self.proxy::<WlSeat>(seat)?, serial, position.x, position.y),
            other => return Err(invalid(Interface::XdgToplevel, &other)),
        }
        Ok(())
    }

    fn send_zxdg_toplevel(&self, object: ObjectId, request: Request) -> Result<(), WireError> {
        let toplevel = self.proxy::<ZxdgToplevelV6>(object)?;
        match request {
            Request::SetTitle(title) => toplevel.set_title(title),
            Request::SetAppId(app_id) => toplevel.set_app_id(app_id),
            Request::SetMinSize(size) => toplevel.set_min_size(size.width, size.height),
            Request::SetFullscreen { output } => {
                toplevel.set_fullscreen(self.optional::<WlOutput>(output)?.as_ref());
            }
            Request::UnsetFullscreen => toplevel.unset_fullscreen(),
            Request::SetMaximized => toplevel.set_maximized(),
            Request::UnsetMaximized => toplevel.unset_maximized(),
            Request::SetMinimized => toplevel.set_minimized(),
            Request::Move { seat, serial } => toplevel._move(&self.proxy::<WlSeat>(seat)?, serial),
            Request::Resize { seat, serial, edge } => {
                let edge = named::<zxdg_toplevel_v6::ResizeEdge>(
                    Interface::ZxdgToplevelV6,
                    "edge",
                    edge.raw(),
                )?;
                toplevel.resize(&self.proxy::<WlSeat>(seat)?, serial, edge);
            }
            Request::ShowWindowMenu {
                seat,
                serial,
                position,
            } => toplevel.show_window_menu(&self.proxy::<WlSeat>(seat)?, serial, position.x, position.y),
            other => return Err(invalid(Interface::ZxdgToplevelV6, &other)),
        }
        Ok(())
    }

    fn send_shell_surface(&self, object: ObjectId, request: Request) -> Result<(), WireError> {
        let surface = self.proxy::<WlShellSurface>(object)?;
        match request {
            Request::Pong(serial) => surface.pong(serial),
            Request::SetTitle(title) => surface.set_title(title),
            Request::SetClass(class) => surface.set_class(class),
            Request::SetToplevel => surface.set_toplevel(),
            Request::SetShellFullscreen { framerate, output } => surface.set_fullscreen(
                wl_shell_surface::FullscreenMethod::Driver,
                framerate,
                self.optional::<WlOutput>(output)?.as_ref(),
            ),
            Request::SetShellMaximized { output } => {
                surface.set_maximized(self.optional::<WlOutput>(output)?.as_ref());
            }
            Request::Move { seat, serial } => surface._move(&self.proxy::<WlSeat>(seat)?, serial),
            Request::Resize { seat, serial, edge } => surface.resize(
                &self.proxy::<WlSeat>(seat)?,
                serial,
                wl_shell_surface::Resize::from_bits_truncate(edge.raw()),
            ),
            other => return Err(invalid(Interface::ShellSurface, &other)),
        }
        Ok(())
    }

    fn send_creator(&self, object: ObjectId, request: Request) -> Result<(), WireError> {
        use wp_color_manager_v1::{Primaries, TransferFunction};

        let interface = Interface::ImageDescriptionCreator;
        let creator = self.proxy::<WpImageDescriptionCreatorParamsV1>(object)?;
        match request {
            Request::SetTfNamed(tf) => {
                creator.set_tf_named(named::<TransferFunction>(interface, "transfer function", tf)?);
            }
            Request::SetPrimariesNamed(primaries) => {
                creator.set_primaries_named(named::<Primaries>(interface, "primaries", primaries)?);
            }
            Request::SetMasteringDisplayPrimaries {
                red,
                green,
                blue,
                white,
            } => creator.set_mastering_display_primaries(
                red.x, red.y, green.x, green.y, blue.x, blue.y, white.x, white.y,
            ),
            Request::SetMasteringLuminance { min, max } => creator.set_mastering_luminance(min, max),
            Request::SetMaxCll(max_cll) => creator.set_max_cll(max_cll),
            Request::SetMaxFall(max_fall) => creator.set_max_fall(max_fall),
            other => return Err(invalid(interface, &other)),
        }
        Ok(())
    }

    /// Send the destructor of `interface`, if it has one at `version`.
    fn send_destructor(&self, object: ObjectId, interface: Interface, version: u32) -> Result<(), WireError> {
        match interface {
            Interface::Subcompositor => self.proxy::<WlSubcompositor>(object)?.destroy(),
            Interface::Output if version >= 3 => self.proxy::<WlOutput>(object)?.release(),
            Interface::Seat if version >= 5 => self.proxy::<WlSeat>(object)?.release(),
            Interface::XdgWmBase => self.proxy::<XdgWmBase>(object)?.destroy(),
            Interface::ZxdgShellV6 => self.proxy::<ZxdgShellV6>(object)?.destroy(),
            Interface::Presentation => self.proxy::<WpPresentation>(object)?.destroy(),
            Interface::ColorManager => self.proxy::<WpColorManagerV1>(object)?.destroy(),
            Interface::Surface => self.proxy::<WlSurface>(object)?.destroy(),
            Interface::Region => self.proxy::<WlRegion>(object)?.destroy(),
            Interface::Subsurface => self.proxy::<WlSubsurface>(object)?.destroy(),
            Interface::ShmPool => self.proxy::<WlShmPool>(object)?.destroy(),
            Interface::Buffer => self.proxy::<WlBuffer>(object)?.destroy(),
            Interface::XdgSurface => self.proxy::<XdgSurface>(object)?.destroy(),
            Interface::XdgToplevel => self.proxy::<XdgToplevel>(object)?.destroy(),
            Interface::ZxdgSurfaceV6 => self.proxy::<ZxdgSurfaceV6>(object)?.destroy(),
            Interface::ZxdgToplevelV6 => self.proxy::<ZxdgToplevelV6>(object)?.destroy(),
            Interface::ColorManagementSurface => {
                self.proxy::<WpColorManagementSurfaceV1>(object)?.destroy();
            }
            Interface::ImageDescription => self.proxy::<WpImageDescriptionV1>(object)?.destroy(),
            Interface::Pointer if version >= 3 => self.proxy::<WlPointer>(object)?.release(),
            Interface::Keyboard if version >= 3 => self.proxy::<WlKeyboard>(object)?.release(),
            Interface::Touch if version >= 3 => self.proxy::<WlTouch>(object)?.release(),
            // No destructor request: the proxy just goes away.
            _ => {}
        }
        Ok(())
    }
}

impl Wire for WaylandWire {
    fn registry(&self, listener: Listener) -> Result<ObjectId, WireError> {
        let id = self.objects.reserve(Interface::Registry, 1, Some(listener));
        let registry = self.connection.display().get_registry(&self.handle, id);
        self.objects.attach(id, registry.id());
        pump::flush(&self.connection)?;
        Ok(id)
    }

    fn bind(
        &self,
        registry: ObjectId,
        name: u32,
        interface: Interface,
        version: u32,
        listener: Option<Listener>,
    ) -> Result<ObjectId, WireError> {
        let wl_registry = self.proxy::<WlRegistry>(registry)?;
        let id = self.objects.reserve(interface, version, listener);
        match self.bind_global(&wl_registry, name, interface, version, id) {
            Ok(protocol) => {
                self.objects.attach(id, protocol);
                debug!("Bound {interface} v{version} (global {name}) as {id}");
                Ok(id)
            }
            Err(err) => {
                self.objects.remove(id);
                Err(err)
            }
        }
    }

    fn create(
        &self,
        parent: ObjectId,
        request: Create,
        listener: Option<Listener>,
    ) -> Result<ObjectId, WireError> {
        let entry = self.objects.get(parent).ok_or(WireError::UnknownObject(parent))?;
        let interface =
            created_interface(entry.interface, &request).ok_or_else(|| invalid(entry.interface, &request))?;
        let id = self.objects.reserve(interface, entry.version, listener);
        match self.create_proxy(parent, entry.interface, &request, id) {
            Ok(protocol) => {
                self.objects.attach(id, protocol);
                trace!("Created {interface} {id} on {parent}");
                Ok(id)
            }
            Err(err) => {
                self.objects.remove(id);
                Err(err)
            }
        }
    }

    fn send(&self, object: ObjectId, request: Request) -> Result<(), WireError> {
        let entry = self.objects.get(object).ok_or(WireError::UnknownObject(object))?;
        trace!("{} {object} <- {request:?}", entry.interface);
        self.send_request(object, entry.interface, request)?;
        pump::flush(&self.connection)
    }

    fn set_listener(&self, object: ObjectId, listener: Listener) {
        self.objects.set_listener(object, listener);
    }

    fn destroy(&self, object: ObjectId) {
        let Some(entry) = self.objects.get(object) else {
            return;
        };
        if let Err(err) = self.send_destructor(object, entry.interface, entry.version) {
            warn!("Could not destroy {} {object}: {err}", entry.interface);
        }
        self.objects.remove(object);
        if let Err(err) = pump::flush(&self.connection) {
            warn!("Flush after destroying {object} failed: {err}");
        }
    }

    fn version(&self, object: ObjectId) -> u32 {
        self.objects.get(object).map_or(0, |entry| entry.version)
    }

    fn create_shm_pool(&self, shm: ObjectId, size: usize) -> Result<ShmPool, WireError> {
        let wl_shm = self.proxy::<WlShm>(shm)?;
        let pool_size = i32::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "shm pool too large"))?;
        let memory = MappedFile::allocate(size)?;
        let version = self.version(shm);
        let id = self.objects.reserve(Interface::ShmPool, version, None);
        let pool = wl_shm.create_pool(memory.file().as_fd(), pool_size, &self.handle, id);
        self.objects.attach(id, pool.id());
        debug!("Created {size} byte shm pool {id}");
        Ok(ShmPool {
            id,
            memory: Box::new(memory),
        })
    }

    fn roundtrip(&self) -> Result<(), WireError> {
        self.queue.lock().roundtrip().map(|_| ())
    }

    fn flush(&self) -> Result<(), WireError> {
        pump::flush(&self.connection)
    }

    fn clock_time(&self, clock_id: u32) -> Result<Duration, WireError> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `now` is a valid out-pointer for the duration of the call.
        #[allow(unsafe_code)]
        let ret = unsafe { libc::clock_gettime(clock_id as libc::clockid_t, &mut now) };
        if ret != 0 {
            return Err(WireError::Protocol(format!(
                "clock {clock_id}: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(Duration::new(now.tv_sec as u64, now.tv_nsec as u32))
    }

    fn start_event_pump(&self) -> Result<(), WireError> {
        let mut pump = self.pump.lock();
        if pump.is_none() {
            *pump = Some(EventPump::start(self.connection.clone(), Arc::clone(&self.queue))?);
        }
        Ok(())
    }

    fn stop_event_pump(&self) {
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.stop();
        }
    }
}

impl Drop for WaylandWire {
    fn drop(&mut self) {
        self.stop_event_pump();
        if !self.objects.is_empty() {
            debug!("Dropping connection with {} live objects", self.objects.len());
        }
    }
}

impl std::fmt::Debug for WaylandWire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaylandWire")
            .field("objects", &self.objects.len())
            .field("pump_running", &self.pump.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Interface of the object `request` creates on a `parent` object.
fn created_interface(parent: Interface, request: &Create) -> Option<Interface> {
    let created = match (parent, request) {
        (Interface::Compositor, Create::Surface) => Interface::Surface,
        (Interface::Compositor, Create::Region) => Interface::Region,
        (Interface::Subcompositor, Create::Subsurface { .. }) => Interface::Subsurface,
        (Interface::ShmPool, Create::Buffer { .. }) => Interface::Buffer,
        (Interface::Surface, Create::Frame) => Interface::Callback,
        (Interface::XdgWmBase, Create::XdgSurface { .. }) => Interface::XdgSurface,
        (Interface::ZxdgShellV6, Create::XdgSurface { .. }) => Interface::ZxdgSurfaceV6,
        (Interface::XdgSurface, Create::Toplevel) => Interface::XdgToplevel,
        (Interface::ZxdgSurfaceV6, Create::Toplevel) => Interface::ZxdgToplevelV6,
        (Interface::WlShell, Create::ShellSurface { .. }) => Interface::ShellSurface,
        (Interface::WebosShell, Create::ShellSurface { .. }) => Interface::WebosShellSurface,
        (Interface::Presentation, Create::Feedback { .. }) => Interface::PresentationFeedback,
        (Interface::ColorManager, Create::ColorSurface { .. }) => Interface::ColorManagementSurface,
        (Interface::ColorManager, Create::ParametricCreator) => Interface::ImageDescriptionCreator,
        (Interface::ImageDescriptionCreator, Create::ImageDescription) => Interface::ImageDescription,
        (Interface::Seat, Create::Pointer) => Interface::Pointer,
        (Interface::Seat, Create::Keyboard) => Interface::Keyboard,
        (Interface::Seat, Create::Touch) => Interface::Touch,
        _ => return None,
    };
    Some(created)
}

fn invalid(interface: Interface, request: &impl Debug) -> WireError {
    WireError::InvalidRequest {
        interface: interface.name(),
        request: format!("{request:?}"),
    }
}

/// Convert a raw protocol enum value the compositor advertised.
fn named<T: TryFrom<u32>>(interface: Interface, what: &str, raw: u32) -> Result<T, WireError> {
    T::try_from(raw).map_err(|_| WireError::InvalidRequest {
        interface: interface.name(),
        request: format!("unknown {what} {raw}"),
    })
}

//! In-process compositor double.
//!
//! [`FakeCompositor`] implements [`Wire`] by keeping an object table and a
//! log of every request. Events are queued and delivered on
//! [`Wire::roundtrip`], or immediately through [`FakeCompositor::emit`]
//! which plays the part of the event pump thread. It behaves like a
//! minimal but well-mannered compositor:
//!
//! * every advertised global is announced to each new registry;
//! * `wl_output` binds receive geometry, modes, scale and `done`;
//! * the first commit of a surface with an XDG toplevel role triggers a
//!   configure sequence;
//! * `wp_presentation` announces clock 1, color managers announce their
//!   configured capabilities, seats announce their capabilities.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::event::{AppEvent, AppMessenger};
use crate::geometry::{Point, Size};
use crate::seat::SeatCapabilities;
use crate::wire::{
    Create, Event, GlobalInfo, Interface, Listener, ObjectId, Request, ShmMemory, ShmPool,
    ToplevelState, Wire, WireError,
};

/// Description of an output announced on bind.
#[derive(Debug, Clone)]
pub struct FakeOutput {
    pub position: Point,
    pub physical_size: Size,
    pub make: String,
    pub model: String,
    pub scale: i32,
    /// `(size, refresh in mHz, current, preferred)`
    pub modes: Vec<(Size, i32, bool, bool)>,
}

impl FakeOutput {
    pub fn new(make: &str, model: &str, size: Size, refresh: i32) -> Self {
        Self {
            position: Point::ORIGIN,
            physical_size: Size::new(600, 340),
            make: make.to_owned(),
            model: model.to_owned(),
            scale: 1,
            modes: vec![(size, refresh, true, true)],
        }
    }

    #[must_use]
    pub const fn with_scale(mut self, scale: i32) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub const fn at(mut self, position: Point) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub const fn with_physical_size(mut self, physical_size: Size) -> Self {
        self.physical_size = physical_size;
        self
    }

    fn events(&self) -> Vec<Event> {
        let mut events = vec![Event::OutputGeometry {
            position: self.position,
            physical_size: self.physical_size,
            make: self.make.clone(),
            model: self.model.clone(),
        }];
        events.extend(
            self.modes
                .iter()
                .map(|&(size, refresh, current, preferred)| Event::OutputMode {
                    size,
                    refresh,
                    current,
                    preferred,
                }),
        );
        events.push(Event::OutputScale(self.scale));
        events.push(Event::OutputDone);
        events
    }
}

/// Capabilities announced by a fake `wp_color_manager_v1`.
#[derive(Debug, Clone, Default)]
pub struct FakeColorSupport {
    pub intents: Vec<u32>,
    pub features: Vec<u32>,
    pub transfer_functions: Vec<u32>,
    pub primaries: Vec<u32>,
}

/// One logged request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub object: ObjectId,
    pub interface: Interface,
    pub request: Request,
}

#[derive(Debug, Clone)]
struct FakeObject {
    interface: Interface,
    version: u32,
    alive: bool,
    global: Option<u32>,
}

#[derive(Debug, Clone)]
struct XdgRole {
    xdg_surface: ObjectId,
    toplevel: Option<ObjectId>,
    configured: bool,
    /// Fullscreen requested before the first commit, with its output.
    fullscreen: Option<Option<ObjectId>>,
}

struct FakeState {
    next_id: u32,
    next_global: u32,
    serial: u32,
    globals: Vec<GlobalInfo>,
    outputs: HashMap<u32, FakeOutput>,
    seats: HashMap<u32, SeatCapabilities>,
    color_support: HashMap<u32, FakeColorSupport>,
    objects: HashMap<ObjectId, FakeObject>,
    listeners: HashMap<ObjectId, Listener>,
    registries: Vec<ObjectId>,
    roles: HashMap<ObjectId, XdgRole>,
    queue: VecDeque<(ObjectId, Event)>,
    requests: Vec<RecordedRequest>,
    initial_configure: (Size, Vec<ToplevelState>),
    fail_image_descriptions: bool,
    clock: Duration,
    pump_running: bool,
    roundtrips: usize,
}

/// Scriptable [`Wire`] implementation for tests.
pub struct FakeCompositor {
    state: Mutex<FakeState>,
}

impl FakeCompositor {
    /// A compositor that advertises nothing.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                next_id: 1,
                next_global: 1,
                serial: 0,
                globals: Vec::new(),
                outputs: HashMap::new(),
                seats: HashMap::new(),
                color_support: HashMap::new(),
                objects: HashMap::new(),
                listeners: HashMap::new(),
                registries: Vec::new(),
                roles: HashMap::new(),
                queue: VecDeque::new(),
                requests: Vec::new(),
                initial_configure: (Size::ZERO, vec![ToplevelState::Activated]),
                fail_image_descriptions: false,
                clock: Duration::from_secs(1),
                pump_running: false,
                roundtrips: 0,
            }),
        })
    }

    /// A typical desktop compositor: compositor v4, subcompositor, shm,
    /// `xdg_wm_base`, and one 1920x1080@60 output.
    pub fn desktop() -> Arc<Self> {
        let fake = Self::new();
        fake.add_global(Interface::Compositor, 4);
        fake.add_global(Interface::Subcompositor, 1);
        fake.add_global(Interface::Shm, 1);
        fake.add_global(Interface::XdgWmBase, 2);
        fake.add_output(FakeOutput::new(
            "Acme",
            "Vision 24",
            Size::new(1920, 1080),
            60_000,
        ));
        fake
    }

    pub fn connection(self: &Arc<Self>) -> Connection {
        Connection::new(Arc::clone(self) as Arc<dyn Wire>)
    }

    // ── Scripting ──

    /// Advertise a global; returns its registry name.
    pub fn add_global(&self, interface: Interface, version: u32) -> u32 {
        let mut state = self.state.lock();
        let name = state.next_global;
        state.next_global += 1;
        let info = GlobalInfo {
            name,
            interface: interface.name().to_owned(),
            version,
        };
        let registries = state.registries.clone();
        for registry in registries {
            state.queue.push_back((registry, Event::Global(info.clone())));
        }
        state.globals.push(info);
        name
    }

    /// Advertise a `wl_output` (version 3).
    pub fn add_output(&self, output: FakeOutput) -> u32 {
        let name = self.add_global(Interface::Output, 3);
        self.state.lock().outputs.insert(name, output);
        name
    }

    pub fn add_seat(&self, capabilities: SeatCapabilities) -> u32 {
        let name = self.add_global(Interface::Seat, 5);
        self.state.lock().seats.insert(name, capabilities);
        name
    }

    pub fn add_color_manager(&self, support: FakeColorSupport) -> u32 {
        let name = self.add_global(Interface::ColorManager, 1);
        self.state.lock().color_support.insert(name, support);
        name
    }

    /// Withdraw a global; registries learn about it on the next roundtrip.
    pub fn remove_global(&self, name: u32) {
        let mut state = self.state.lock();
        state.globals.retain(|g| g.name != name);
        let registries = state.registries.clone();
        for registry in registries {
            state
                .queue
                .push_back((registry, Event::GlobalRemove { name }));
        }
    }

    /// Size and states sent with the first toplevel configure.
    pub fn set_initial_configure(&self, size: Size, states: Vec<ToplevelState>) {
        self.state.lock().initial_configure = (size, states);
    }

    /// Make image description creation fail.
    pub fn fail_image_descriptions(&self, fail: bool) {
        self.state.lock().fail_image_descriptions = fail;
    }

    pub fn advance_clock(&self, by: Duration) {
        self.state.lock().clock += by;
    }

    /// Deliver `event` to `object` right away, as the pump thread would.
    pub fn emit(&self, object: ObjectId, event: Event) {
        let listener = {
            let state = self.state.lock();
            if !state.objects.get(&object).is_some_and(|o| o.alive) {
                return;
            }
            state.listeners.get(&object).cloned()
        };
        if let Some(listener) = listener {
            listener(object, &event);
        }
    }

    /// Queue `event` for delivery at the next roundtrip.
    pub fn queue(&self, object: ObjectId, event: Event) {
        self.state.lock().queue.push_back((object, event));
    }

    /// Send a full configure sequence to the most recent live toplevel and
    /// return its serial.
    pub fn configure_toplevel(&self, size: Size, states: &[ToplevelState]) -> Option<u32> {
        let (xdg_surface, toplevel, serial) = {
            let mut state = self.state.lock();
            let role = state
                .roles
                .values()
                .filter(|role| {
                    role.toplevel
                        .is_some_and(|t| state.objects.get(&t).is_some_and(|o| o.alive))
                })
                .max_by_key(|role| role.xdg_surface)?
                .clone();
            state.serial += 1;
            (role.xdg_surface, role.toplevel?, state.serial)
        };
        self.emit(
            toplevel,
            Event::ToplevelConfigure {
                size,
                states: states.to_vec(),
            },
        );
        self.emit(xdg_surface, Event::SurfaceConfigure { serial });
        Some(serial)
    }

    /// Tell `surface` it entered the output advertised as `output_name`.
    pub fn enter_output(&self, surface: ObjectId, output_name: u32) {
        if let Some(output) = self.bound_object(output_name) {
            self.emit(surface, Event::SurfaceEnter { output });
        }
    }

    pub fn leave_output(&self, surface: ObjectId, output_name: u32) {
        if let Some(output) = self.bound_object(output_name) {
            self.emit(surface, Event::SurfaceLeave { output });
        }
    }

    // ── Inspection ──

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_on(&self, object: ObjectId) -> Vec<Request> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.object == object)
            .map(|r| r.request.clone())
            .collect()
    }

    pub fn requests_of(&self, interface: Interface) -> Vec<Request> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.interface == interface)
            .map(|r| r.request.clone())
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Live objects of `interface`, oldest first.
    pub fn objects_of(&self, interface: Interface) -> Vec<ObjectId> {
        let state = self.state.lock();
        let mut objects: Vec<ObjectId> = state
            .objects
            .iter()
            .filter(|(_, o)| o.alive && o.interface == interface)
            .map(|(&id, _)| id)
            .collect();
        objects.sort_unstable();
        objects
    }

    pub fn interface_of(&self, object: ObjectId) -> Option<Interface> {
        self.state.lock().objects.get(&object).map(|o| o.interface)
    }

    pub fn is_alive(&self, object: ObjectId) -> bool {
        self.state
            .lock()
            .objects
            .get(&object)
            .is_some_and(|o| o.alive)
    }

    /// Most recent live object bound to global `name`.
    pub fn bound_object(&self, name: u32) -> Option<ObjectId> {
        self.state
            .lock()
            .objects
            .iter()
            .filter(|(_, o)| o.alive && o.global == Some(name))
            .map(|(&id, _)| id)
            .max()
    }

    pub fn pump_running(&self) -> bool {
        self.state.lock().pump_running
    }

    pub fn roundtrips(&self) -> usize {
        self.state.lock().roundtrips
    }

    // ── Internals ──

    fn insert_object(
        state: &mut FakeState,
        interface: Interface,
        version: u32,
        global: Option<u32>,
        listener: Option<Listener>,
    ) -> ObjectId {
        let id = ObjectId(state.next_id);
        state.next_id += 1;
        state.objects.insert(
            id,
            FakeObject {
                interface,
                version,
                alive: true,
                global,
            },
        );
        if let Some(listener) = listener {
            state.listeners.insert(id, listener);
        }
        id
    }

    fn live(state: &FakeState, object: ObjectId) -> Result<&FakeObject, WireError> {
        state
            .objects
            .get(&object)
            .filter(|o| o.alive)
            .ok_or(WireError::UnknownObject(object))
    }

    /// Logical size of the current mode of `output`, or of the first
    /// advertised output when none is named.
    fn output_logical_size(state: &FakeState, output: Option<ObjectId>) -> Option<Size> {
        let name = match output {
            Some(object) => state.objects.get(&object)?.global?,
            None => *state.outputs.keys().min()?,
        };
        let output = state.outputs.get(&name)?;
        let (size, ..) = output
            .modes
            .iter()
            .find(|mode| mode.2)
            .or_else(|| output.modes.first())?;
        Some(*size / output.scale.max(1))
    }

    fn created_interface(parent: Interface, request: &Create) -> Option<Interface> {
        use Interface as I;
        Some(match (parent, request) {
            (I::Compositor, Create::Surface) => I::Surface,
            (I::Compositor, Create::Region) => I::Region,
            (I::Subcompositor, Create::Subsurface { .. }) => I::Subsurface,
            (I::ShmPool, Create::Buffer { .. }) => I::Buffer,
            (I::Surface, Create::Frame) => I::Callback,
            (I::XdgWmBase, Create::XdgSurface { .. }) => I::XdgSurface,
            (I::ZxdgShellV6, Create::XdgSurface { .. }) => I::ZxdgSurfaceV6,
            (I::XdgSurface, Create::Toplevel) => I::XdgToplevel,
            (I::ZxdgSurfaceV6, Create::Toplevel) => I::ZxdgToplevelV6,
            (I::WlShell, Create::ShellSurface { .. }) => I::ShellSurface,
            (I::WebosShell, Create::ShellSurface { .. }) => I::WebosShellSurface,
            (I::Presentation, Create::Feedback { .. }) => I::PresentationFeedback,
            (I::ColorManager, Create::ColorSurface { .. }) => I::ColorManagementSurface,
            (I::ColorManager, Create::ParametricCreator) => I::ImageDescriptionCreator,
            (I::ImageDescriptionCreator, Create::ImageDescription) => I::ImageDescription,
            (I::Seat, Create::Pointer) => I::Pointer,
            (I::Seat, Create::Keyboard) => I::Keyboard,
            (I::Seat, Create::Touch) => I::Touch,
            _ => return None,
        })
    }

    fn events_on_bind(state: &FakeState, interface: Interface, name: u32) -> Vec<Event> {
        match interface {
            Interface::Output => state
                .outputs
                .get(&name)
                .map(FakeOutput::events)
                .unwrap_or_default(),
            Interface::Presentation => vec![Event::ClockId(1)],
            Interface::Seat => {
                let capabilities = state.seats.get(&name).copied().unwrap_or_default();
                vec![
                    Event::SeatName(format!("seat{name}")),
                    Event::Capabilities(capabilities),
                ]
            }
            Interface::ColorManager => {
                let support = state.color_support.get(&name).cloned().unwrap_or_default();
                let mut events = Vec::new();
                events.extend(support.intents.iter().map(|&v| Event::SupportedIntent(v)));
                events.extend(support.features.iter().map(|&v| Event::SupportedFeature(v)));
                events.extend(
                    support
                        .transfer_functions
                        .iter()
                        .map(|&v| Event::SupportedTfNamed(v)),
                );
                events.extend(
                    support
                        .primaries
                        .iter()
                        .map(|&v| Event::SupportedPrimariesNamed(v)),
                );
                events.push(Event::ColorManagerDone);
                events
            }
            _ => Vec::new(),
        }
    }
}

struct VecMemory(Vec<u8>);

impl ShmMemory for VecMemory {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

impl Wire for FakeCompositor {
    fn registry(&self, listener: Listener) -> Result<ObjectId, WireError> {
        let mut state = self.state.lock();
        let id = Self::insert_object(&mut state, Interface::Registry, 1, None, Some(listener));
        state.registries.push(id);
        let globals = state.globals.clone();
        for global in globals {
            state.queue.push_back((id, Event::Global(global)));
        }
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
        let mut state = self.state.lock();
        Self::live(&state, registry)?;
        let advertised = state
            .globals
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| WireError::Protocol(format!("bind to unknown global {name}")))?;
        if advertised.interface != interface.name() || version > advertised.version {
            return Err(WireError::Protocol(format!(
                "bad bind of global {name} as {interface} v{version}"
            )));
        }
        let id = Self::insert_object(&mut state, interface, version, Some(name), listener);
        for event in Self::events_on_bind(&state, interface, name) {
            state.queue.push_back((id, event));
        }
        Ok(id)
    }

    fn create(
        &self,
        parent: ObjectId,
        request: Create,
        listener: Option<Listener>,
    ) -> Result<ObjectId, WireError> {
        let mut state = self.state.lock();
        let parent_object = Self::live(&state, parent)?.clone();
        let interface = Self::created_interface(parent_object.interface, &request).ok_or_else(
            || WireError::InvalidRequest {
                interface: parent_object.interface.name(),
                request: format!("{request:?}"),
            },
        )?;
        let id = Self::insert_object(
            &mut state,
            interface,
            parent_object.version,
            None,
            listener,
        );

        match request {
            Create::XdgSurface { surface } => {
                state.roles.insert(
                    surface,
                    XdgRole {
                        xdg_surface: id,
                        toplevel: None,
                        configured: false,
                        fullscreen: None,
                    },
                );
            }
            Create::Toplevel => {
                if let Some(role) = state.roles.values_mut().find(|r| r.xdg_surface == parent) {
                    role.toplevel = Some(id);
                }
            }
            Create::ImageDescription => {
                if let Some(creator) = state.objects.get_mut(&parent) {
                    creator.alive = false;
                }
                state.listeners.remove(&parent);
                let event = if state.fail_image_descriptions {
                    Event::ImageDescriptionFailed {
                        cause: 1,
                        message: "unsupported".to_owned(),
                    }
                } else {
                    Event::ImageDescriptionReady { identity: id.0 }
                };
                state.queue.push_back((id, event));
            }
            _ => {}
        }
        Ok(id)
    }

    fn send(&self, object: ObjectId, request: Request) -> Result<(), WireError> {
        let mut state = self.state.lock();
        let interface = Self::live(&state, object)?.interface;

        if matches!(interface, Interface::XdgToplevel | Interface::ZxdgToplevelV6) {
            let requested = match &request {
                Request::SetFullscreen { output } => Some(Some(*output)),
                Request::UnsetFullscreen => Some(None),
                _ => None,
            };
            if let Some(requested) = requested {
                if let Some(role) = state
                    .roles
                    .values_mut()
                    .find(|r| r.toplevel == Some(object) && !r.configured)
                {
                    role.fullscreen = requested;
                }
            }
        }

        if interface == Interface::Surface && request == Request::Commit {
            let pending = state.roles.get_mut(&object).and_then(|role| {
                if role.configured {
                    return None;
                }
                role.configured = true;
                role.toplevel
                    .map(|toplevel| (role.xdg_surface, toplevel, role.fullscreen))
            });
            if let Some((xdg_surface, toplevel, fullscreen)) = pending {
                let (mut size, mut states) = state.initial_configure.clone();
                if let Some(output) = fullscreen {
                    if size.is_zero() {
                        size = Self::output_logical_size(&state, output).unwrap_or(size);
                    }
                    if !states.contains(&ToplevelState::Fullscreen) {
                        states.push(ToplevelState::Fullscreen);
                    }
                }
                state.serial += 1;
                let serial = state.serial;
                state
                    .queue
                    .push_back((toplevel, Event::ToplevelConfigure { size, states }));
                state
                    .queue
                    .push_back((xdg_surface, Event::SurfaceConfigure { serial }));
            }
        }

        state.requests.push(RecordedRequest {
            object,
            interface,
            request,
        });
        Ok(())
    }

    fn set_listener(&self, object: ObjectId, listener: Listener) {
        self.state.lock().listeners.insert(object, listener);
    }

    fn destroy(&self, object: ObjectId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.objects.get_mut(&object) {
            entry.alive = false;
        }
        state.listeners.remove(&object);
        state.registries.retain(|&r| r != object);
    }

    fn version(&self, object: ObjectId) -> u32 {
        self.state
            .lock()
            .objects
            .get(&object)
            .map_or(0, |o| o.version)
    }

    fn create_shm_pool(&self, shm: ObjectId, size: usize) -> Result<ShmPool, WireError> {
        let mut state = self.state.lock();
        Self::live(&state, shm)?;
        let id = Self::insert_object(&mut state, Interface::ShmPool, 1, None, None);
        Ok(ShmPool {
            id,
            memory: Box::new(VecMemory(vec![0; size])),
        })
    }

    fn roundtrip(&self) -> Result<(), WireError> {
        self.state.lock().roundtrips += 1;
        loop {
            let next = self.state.lock().queue.pop_front();
            let Some((object, event)) = next else {
                return Ok(());
            };
            self.emit(object, event);
        }
    }

    fn flush(&self) -> Result<(), WireError> {
        Ok(())
    }

    fn clock_time(&self, _clock_id: u32) -> Result<Duration, WireError> {
        Ok(self.state.lock().clock)
    }

    fn start_event_pump(&self) -> Result<(), WireError> {
        self.state.lock().pump_running = true;
        Ok(())
    }

    fn stop_event_pump(&self) {
        self.state.lock().pump_running = false;
    }
}

/// [`AppMessenger`] that keeps every posted event.
#[derive(Default)]
pub struct RecordingMessenger {
    events: Mutex<Vec<AppEvent>>,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<AppEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl AppMessenger for RecordingMessenger {
    fn post(&self, event: AppEvent) {
        self.events.lock().push(event);
    }
}

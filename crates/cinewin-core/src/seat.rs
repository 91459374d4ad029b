//! Seats and their input devices.
//!
//! A [`Seat`] creates and releases its pointer, keyboard and touch devices
//! as the compositor changes its capabilities, and tracks which surface
//! each device is focused on. Device events are handed to a
//! [`SeatHandler`] together with that surface so the handler can route
//! them to the main surface or to the decorations.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::connection::WeakConnection;
use crate::geometry::Point;
use crate::wire::{listener, Create, Event, Listener, ObjectId, Request, WireError};

bitflags! {
    /// `wl_seat.capabilities`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SeatCapabilities: u32 {
        const POINTER  = 1;
        const KEYBOARD = 2;
        const TOUCH    = 4;
    }
}

/// Receiver of device events.
pub trait SeatHandler: Send + Sync {
    /// `surface` is the surface the device is focused on; for leave events
    /// it is the surface that was left.
    fn on_device_event(&self, seat: &Seat, surface: ObjectId, event: &Event);
}

#[derive(Debug, Default)]
struct Devices {
    name: String,
    capabilities: SeatCapabilities,
    pointer: Option<ObjectId>,
    keyboard: Option<ObjectId>,
    touch: Option<ObjectId>,
    pointer_focus: Option<ObjectId>,
    keyboard_focus: Option<ObjectId>,
    touch_focus: HashMap<i32, ObjectId>,
}

/// One bound `wl_seat`.
pub struct Seat {
    global_name: u32,
    object: ObjectId,
    connection: WeakConnection,
    handler: Weak<dyn SeatHandler>,
    weak_self: Weak<Seat>,
    devices: Mutex<Devices>,
}

impl Seat {
    pub fn new(
        global_name: u32,
        object: ObjectId,
        connection: WeakConnection,
        handler: Weak<dyn SeatHandler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            global_name,
            object,
            connection,
            handler,
            weak_self: weak_self.clone(),
            devices: Mutex::new(Devices::default()),
        })
    }

    /// Listener to install on the bound `wl_seat`.
    pub fn listener(self: &Arc<Self>) -> Listener {
        let weak = Arc::downgrade(self);
        listener(move |_, event| {
            let Some(seat) = weak.upgrade() else {
                return;
            };
            match event {
                Event::Capabilities(capabilities) => seat.update_capabilities(*capabilities),
                Event::SeatName(name) => {
                    debug!("Seat {} is called {name}", seat.global_name);
                    seat.devices.lock().name.clone_from(name);
                }
                _ => {}
            }
        })
    }

    pub const fn global_name(&self) -> u32 {
        self.global_name
    }

    pub const fn object(&self) -> ObjectId {
        self.object
    }

    pub fn name(&self) -> String {
        self.devices.lock().name.clone()
    }

    pub fn capabilities(&self) -> SeatCapabilities {
        self.devices.lock().capabilities
    }

    /// Surface the pointer is currently over.
    pub fn pointer_focus(&self) -> Option<ObjectId> {
        self.devices.lock().pointer_focus
    }

    /// Hide the cursor while the pointer is over our surfaces.
    pub fn hide_cursor(&self, serial: u32) -> Result<(), WireError> {
        let Some(pointer) = self.devices.lock().pointer else {
            return Ok(());
        };
        let Some(connection) = self.connection.upgrade() else {
            return Ok(());
        };
        connection.wire().send(
            pointer,
            Request::SetCursor {
                serial,
                surface: None,
                hotspot: Point::ORIGIN,
            },
        )
    }

    fn update_capabilities(&self, capabilities: SeatCapabilities) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        let wire = connection.wire();
        let mut devices = self.devices.lock();
        debug!(
            "Seat {} capabilities {:?} -> {:?}",
            self.global_name, devices.capabilities, capabilities
        );
        devices.capabilities = capabilities;

        let Devices {
            pointer,
            keyboard,
            touch,
            ..
        } = &mut *devices;
        let slots = [
            (SeatCapabilities::POINTER, Create::Pointer, pointer),
            (SeatCapabilities::KEYBOARD, Create::Keyboard, keyboard),
            (SeatCapabilities::TOUCH, Create::Touch, touch),
        ];
        for (capability, create, slot) in slots {
            match (capabilities.contains(capability), *slot) {
                (true, None) => match wire.create(self.object, create, Some(self.device_listener())) {
                    Ok(device) => *slot = Some(device),
                    Err(err) => warn!("Could not create {capability:?} device: {err}"),
                },
                (false, Some(device)) => {
                    wire.destroy(device);
                    *slot = None;
                }
                _ => {}
            }
        }
        if devices.pointer.is_none() {
            devices.pointer_focus = None;
        }
        if devices.keyboard.is_none() {
            devices.keyboard_focus = None;
        }
        if devices.touch.is_none() {
            devices.touch_focus.clear();
        }
    }

    fn device_listener(&self) -> Listener {
        let weak = self.weak_self.clone();
        listener(move |_, event| {
            if let Some(seat) = weak.upgrade() {
                seat.handle_device_event(event);
            }
        })
    }

    fn handle_device_event(&self, event: &Event) {
        let targets: Vec<ObjectId> = {
            let mut devices = self.devices.lock();
            match event {
                Event::PointerEnter { surface, .. } => {
                    devices.pointer_focus = Some(*surface);
                    vec![*surface]
                }
                Event::PointerLeave { .. } => devices.pointer_focus.take().into_iter().collect(),
                Event::PointerMotion { .. } | Event::PointerButton { .. } | Event::PointerAxis { .. } => {
                    devices.pointer_focus.into_iter().collect()
                }
                Event::KeyboardEnter { surface, .. } => {
                    devices.keyboard_focus = Some(*surface);
                    vec![*surface]
                }
                Event::KeyboardLeave { .. } => devices.keyboard_focus.take().into_iter().collect(),
                Event::Key { .. } | Event::Modifiers { .. } => {
                    devices.keyboard_focus.into_iter().collect()
                }
                Event::TouchDown { id, surface, .. } => {
                    devices.touch_focus.insert(*id, *surface);
                    vec![*surface]
                }
                Event::TouchMotion { id, .. } => devices.touch_focus.get(id).copied().into_iter().collect(),
                Event::TouchUp { id, .. } => devices.touch_focus.remove(id).into_iter().collect(),
                Event::TouchCancel => {
                    let mut surfaces: Vec<ObjectId> =
                        devices.touch_focus.drain().map(|(_, surface)| surface).collect();
                    surfaces.sort_unstable();
                    surfaces.dedup();
                    surfaces
                }
                _ => Vec::new(),
            }
        };
        let Some(handler) = self.handler.upgrade() else {
            return;
        };
        for surface in targets {
            handler.on_device_event(self, surface, event);
        }
    }
}

impl Drop for Seat {
    fn drop(&mut self) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        let devices = self.devices.get_mut();
        for device in [devices.pointer, devices.keyboard, devices.touch]
            .into_iter()
            .flatten()
        {
            connection.wire().destroy(device);
        }
        connection.wire().destroy(self.object);
    }
}

impl std::fmt::Debug for Seat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seat")
            .field("global_name", &self.global_name)
            .field("object", &self.object)
            .field("devices", &*self.devices.lock())
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
    struct Recorder(Mutex<Vec<(ObjectId, Event)>>);

    impl SeatHandler for Recorder {
        fn on_device_event(&self, _seat: &Seat, surface: ObjectId, event: &Event) {
            self.0.lock().push((surface, event.clone()));
        }
    }

    struct Fixture {
        fake: Arc<FakeCompositor>,
        recorder: Arc<Recorder>,
        seats: Arc<Mutex<Vec<Arc<Seat>>>>,
        _registry: Registry,
    }

    fn fixture(capabilities: SeatCapabilities) -> Fixture {
        let fake = FakeCompositor::new();
        let seat_name = fake.add_seat(capabilities);
        let connection = fake.connection();
        let recorder = Arc::new(Recorder::default());
        let handler: Weak<dyn SeatHandler> = {
            let strong: Arc<dyn SeatHandler> = recorder.clone();
            Arc::downgrade(&strong)
        };
        let seats = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new(&connection);
        {
            let seats = Arc::clone(&seats);
            registry
                .request(
                    Interface::Seat,
                    1,
                    5,
                    Box::new(move |connection, bound| {
                        let seat = Seat::new(bound.name, bound.object, connection.downgrade(), handler.clone());
                        connection.wire().set_listener(bound.object, seat.listener());
                        seats.lock().push(seat);
                    }),
                    Box::new(|_| {}),
                )
                .unwrap();
        }
        registry.bind().unwrap();
        // Capabilities were queued on bind.
        connection.roundtrip().unwrap();
        assert_eq!(seats.lock()[0].global_name(), seat_name);
        Fixture {
            fake,
            recorder,
            seats,
            _registry: registry,
        }
    }

    #[test]
    fn test_devices_follow_capabilities() {
        let f = fixture(SeatCapabilities::POINTER | SeatCapabilities::KEYBOARD);
        let seat = Arc::clone(&f.seats.lock()[0]);
        assert_eq!(f.fake.objects_of(Interface::Pointer).len(), 1);
        assert_eq!(f.fake.objects_of(Interface::Keyboard).len(), 1);
        assert!(f.fake.objects_of(Interface::Touch).is_empty());
        assert!(seat.name().starts_with("seat"));

        f.fake.emit(seat.object(), Event::Capabilities(SeatCapabilities::TOUCH));
        assert!(f.fake.objects_of(Interface::Pointer).is_empty());
        assert!(f.fake.objects_of(Interface::Keyboard).is_empty());
        assert_eq!(f.fake.objects_of(Interface::Touch).len(), 1);
        assert_eq!(seat.capabilities(), SeatCapabilities::TOUCH);
    }

    #[test]
    fn test_pointer_events_carry_focused_surface() {
        let f = fixture(SeatCapabilities::POINTER);
        let pointer = f.fake.objects_of(Interface::Pointer)[0];
        let surface = ObjectId(500);
        f.fake.emit(
            pointer,
            Event::PointerEnter {
                serial: 1,
                surface,
                x: 1.0,
                y: 2.0,
            },
        );
        f.fake.emit(pointer, Event::PointerMotion { time: 5, x: 3.0, y: 4.0 });
        f.fake.emit(pointer, Event::PointerLeave { serial: 2, surface });
        f.fake.emit(pointer, Event::PointerMotion { time: 6, x: 0.0, y: 0.0 });

        let events = f.recorder.0.lock().clone();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|(s, _)| *s == surface));
        assert!(f.seats.lock()[0].pointer_focus().is_none());
    }

    #[test]
    fn test_touch_points_tracked_per_id() {
        let f = fixture(SeatCapabilities::TOUCH);
        let touch = f.fake.objects_of(Interface::Touch)[0];
        let (a, b) = (ObjectId(600), ObjectId(601));
        for (id, surface) in [(0, a), (1, b)] {
            f.fake.emit(
                touch,
                Event::TouchDown {
                    serial: 1,
                    time: 0,
                    surface,
                    id,
                    x: 0.0,
                    y: 0.0,
                },
            );
        }
        f.fake.emit(touch, Event::TouchMotion { time: 1, id: 1, x: 5.0, y: 5.0 });
        f.fake.emit(touch, Event::TouchCancel);

        let surfaces: Vec<ObjectId> = f.recorder.0.lock().iter().map(|(s, _)| *s).collect();
        assert_eq!(surfaces, vec![a, b, b, a, b]);
    }

    #[test]
    fn test_hide_cursor_targets_pointer() {
        let f = fixture(SeatCapabilities::POINTER);
        let pointer = f.fake.objects_of(Interface::Pointer)[0];
        f.seats.lock()[0].hide_cursor(9).unwrap();
        assert_eq!(
            f.fake.requests_on(pointer),
            vec![Request::SetCursor {
                serial: 9,
                surface: None,
                hotspot: Point::ORIGIN,
            }]
        );
    }
}

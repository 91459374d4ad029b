//! Translation of typed protocol events into core [`Event`]s.

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};
use wayland_client::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_keyboard, wl_output, wl_pointer, wl_region,
    wl_registry, wl_seat, wl_shell, wl_shell_surface, wl_shm, wl_shm_pool, wl_subcompositor,
    wl_subsurface, wl_surface, wl_touch,
};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::wp::color_management::v1::client::{
    wp_color_management_surface_v1, wp_color_manager_v1, wp_image_description_creator_params_v1,
    wp_image_description_v1,
};
use wayland_protocols::wp::presentation_time::client::{wp_presentation, wp_presentation_feedback};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_protocols::xdg::shell::zv6::client::{zxdg_shell_v6, zxdg_surface_v6, zxdg_toplevel_v6};

use cinewin_core::geometry::{Point, Size};
use cinewin_core::seat::SeatCapabilities;
use cinewin_core::shell::webos::WebosState;
use cinewin_core::wire::{Axis, Event, GlobalInfo, ObjectId, ToplevelState};

use crate::objects::ObjectTable;
use crate::protocols::webos_shell::{wl_webos_shell, wl_webos_shell_surface};

/// Event queue state. Routes every event to the listener registered for
/// the proxy's core handle.
pub(crate) struct Dispatcher {
    objects: Arc<ObjectTable>,
}

impl Dispatcher {
    pub fn new(objects: Arc<ObjectTable>) -> Self {
        Self { objects }
    }

    fn deliver(&self, id: ObjectId, event: Event) {
        match self.objects.listener(id) {
            Some(listener) => listener(id, &event),
            None => trace!("Dropping {event:?} for {id} without listener"),
        }
    }
}

/// Core handle of a proxy passed as an event argument.
fn handle_of<P: Proxy>(proxy: &P) -> Option<ObjectId> {
    let handle = proxy.data::<ObjectId>().copied();
    if handle.is_none() {
        warn!("Event references foreign object {}", proxy.id());
    }
    handle
}

/// Raw value of a protocol enum argument, known or not.
fn raw<T: Into<u32>>(value: WEnum<T>) -> u32 {
    match value {
        WEnum::Value(value) => value.into(),
        WEnum::Unknown(raw) => raw,
    }
}

fn toplevel_states(states: &[u8]) -> Vec<ToplevelState> {
    states
        .chunks_exact(4)
        .map(|chunk| ToplevelState::from_raw(u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
        .collect()
}

const fn hi_lo(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

macro_rules! ignore_events {
    ($($interface:ty),* $(,)?) => {$(
        impl Dispatch<$interface, ObjectId> for Dispatcher {
            fn event(
                _: &mut Self,
                _: &$interface,
                _: <$interface as Proxy>::Event,
                _: &ObjectId,
                _: &Connection,
                _: &QueueHandle<Self>,
            ) {
            }
        }
    )*};
}

ignore_events!(
    wl_compositor::WlCompositor,
    wl_subcompositor::WlSubcompositor,
    wl_shm::WlShm,
    wl_shm_pool::WlShmPool,
    wl_region::WlRegion,
    wl_subsurface::WlSubsurface,
    wl_shell::WlShell,
    wl_webos_shell::WlWebosShell,
    wp_color_management_surface_v1::WpColorManagementSurfaceV1,
    wp_image_description_creator_params_v1::WpImageDescriptionCreatorParamsV1,
);

impl Dispatch<wl_registry::WlRegistry, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => Event::Global(GlobalInfo {
                name,
                interface,
                version,
            }),
            wl_registry::Event::GlobalRemove { name } => Event::GlobalRemove { name },
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wl_callback::WlCallback, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_callback::WlCallback,
        event: wl_callback::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            state.deliver(*id, Event::Done { data: callback_data });
            // The compositor destroys callbacks after done.
            state.objects.remove(*id);
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            state.deliver(*id, Event::Release);
        }
    }
}

impl Dispatch<wl_output::WlOutput, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_output::WlOutput,
        event: wl_output::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_output::Event::Geometry {
                x,
                y,
                physical_width,
                physical_height,
                make,
                model,
                ..
            } => Event::OutputGeometry {
                position: Point::new(x, y),
                physical_size: Size::new(physical_width, physical_height),
                make,
                model,
            },
            wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => {
                let flags = match flags {
                    WEnum::Value(flags) => flags,
                    WEnum::Unknown(raw) => wl_output::Mode::from_bits_truncate(raw),
                };
                Event::OutputMode {
                    size: Size::new(width, height),
                    refresh,
                    current: flags.contains(wl_output::Mode::Current),
                    preferred: flags.contains(wl_output::Mode::Preferred),
                }
            }
            wl_output::Event::Scale { factor } => Event::OutputScale(factor),
            wl_output::Event::Done => Event::OutputDone,
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wl_surface::WlSurface, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_surface::WlSurface,
        event: wl_surface::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_surface::Event::Enter { output } => match handle_of(&output) {
                Some(output) => Event::SurfaceEnter { output },
                None => return,
            },
            wl_surface::Event::Leave { output } => match handle_of(&output) {
                Some(output) => Event::SurfaceLeave { output },
                None => return,
            },
            _ => return,
        };
        state.deliver(*id, event);
    }
}

// ── Shells ──────────────────────────────────────────────────────

impl Dispatch<xdg_wm_base::XdgWmBase, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            state.deliver(*id, Event::Ping { serial });
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            state.deliver(*id, Event::SurfaceConfigure { serial });
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => Event::ToplevelConfigure {
                size: Size::new(width, height),
                states: toplevel_states(&states),
            },
            xdg_toplevel::Event::Close => Event::Close,
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<zxdg_shell_v6::ZxdgShellV6, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &zxdg_shell_v6::ZxdgShellV6,
        event: zxdg_shell_v6::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let zxdg_shell_v6::Event::Ping { serial } = event {
            state.deliver(*id, Event::Ping { serial });
        }
    }
}

impl Dispatch<zxdg_surface_v6::ZxdgSurfaceV6, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &zxdg_surface_v6::ZxdgSurfaceV6,
        event: zxdg_surface_v6::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let zxdg_surface_v6::Event::Configure { serial } = event {
            state.deliver(*id, Event::SurfaceConfigure { serial });
        }
    }
}

impl Dispatch<zxdg_toplevel_v6::ZxdgToplevelV6, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &zxdg_toplevel_v6::ZxdgToplevelV6,
        event: zxdg_toplevel_v6::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            zxdg_toplevel_v6::Event::Configure {
                width,
                height,
                states,
            } => Event::ToplevelConfigure {
                size: Size::new(width, height),
                states: toplevel_states(&states),
            },
            zxdg_toplevel_v6::Event::Close => Event::Close,
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wl_shell_surface::WlShellSurface, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_shell_surface::WlShellSurface,
        event: wl_shell_surface::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_shell_surface::Event::Ping { serial } => Event::Ping { serial },
            wl_shell_surface::Event::Configure {
                edges,
                width,
                height,
            } => Event::ShellConfigure {
                edges: match edges {
                    WEnum::Value(edges) => edges.bits(),
                    WEnum::Unknown(raw) => raw,
                },
                size: Size::new(width, height),
            },
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wl_webos_shell_surface::WlWebosShellSurface, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_webos_shell_surface::WlWebosShellSurface,
        event: wl_webos_shell_surface::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_webos_shell_surface::Event::StateChanged { state: raw } => {
                match WebosState::from_raw(raw) {
                    Some(webos_state) => Event::WebosStateChanged(webos_state),
                    None => {
                        warn!("Unknown webOS window state {raw}");
                        return;
                    }
                }
            }
            wl_webos_shell_surface::Event::PositionChanged { x, y } => {
                Event::WebosPositionChanged(Point::new(x, y))
            }
            wl_webos_shell_surface::Event::Close => Event::Close,
            _ => return,
        };
        state.deliver(*id, event);
    }
}

// ── Presentation and color management ───────────────────────────

impl Dispatch<wp_presentation::WpPresentation, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wp_presentation::WpPresentation,
        event: wp_presentation::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wp_presentation::Event::ClockId { clk_id } = event {
            state.deliver(*id, Event::ClockId(clk_id));
        }
    }
}

impl Dispatch<wp_presentation_feedback::WpPresentationFeedback, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wp_presentation_feedback::WpPresentationFeedback,
        event: wp_presentation_feedback::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let (event, last) = match event {
            wp_presentation_feedback::Event::SyncOutput { output } => match handle_of(&output) {
                Some(output) => (Event::SyncOutput { output }, false),
                None => return,
            },
            wp_presentation_feedback::Event::Presented {
                tv_sec_hi,
                tv_sec_lo,
                tv_nsec,
                refresh,
                seq_hi,
                seq_lo,
                flags,
            } => (
                Event::Presented {
                    timestamp: Duration::new(hi_lo(tv_sec_hi, tv_sec_lo), tv_nsec),
                    refresh,
                    msc: hi_lo(seq_hi, seq_lo),
                    flags: match flags {
                        WEnum::Value(flags) => flags.bits(),
                        WEnum::Unknown(raw) => raw,
                    },
                },
                true,
            ),
            wp_presentation_feedback::Event::Discarded => (Event::Discarded, true),
            _ => return,
        };
        state.deliver(*id, event);
        if last {
            state.objects.remove(*id);
        }
    }
}

impl Dispatch<wp_color_manager_v1::WpColorManagerV1, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wp_color_manager_v1::WpColorManagerV1,
        event: wp_color_manager_v1::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wp_color_manager_v1::Event::SupportedIntent { render_intent } => {
                Event::SupportedIntent(raw(render_intent))
            }
            wp_color_manager_v1::Event::SupportedFeature { feature } => {
                Event::SupportedFeature(raw(feature))
            }
            wp_color_manager_v1::Event::SupportedTfNamed { tf } => Event::SupportedTfNamed(raw(tf)),
            wp_color_manager_v1::Event::SupportedPrimariesNamed { primaries } => {
                Event::SupportedPrimariesNamed(raw(primaries))
            }
            wp_color_manager_v1::Event::Done => Event::ColorManagerDone,
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wp_image_description_v1::WpImageDescriptionV1, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wp_image_description_v1::WpImageDescriptionV1,
        event: wp_image_description_v1::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wp_image_description_v1::Event::Ready { identity } => {
                Event::ImageDescriptionReady { identity }
            }
            wp_image_description_v1::Event::Failed { cause, msg } => Event::ImageDescriptionFailed {
                cause: raw(cause),
                message: msg,
            },
            _ => return,
        };
        state.deliver(*id, event);
    }
}

// ── Seat ────────────────────────────────────────────────────────

impl Dispatch<wl_seat::WlSeat, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_seat::WlSeat,
        event: wl_seat::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_seat::Event::Capabilities { capabilities } => {
                let bits = match capabilities {
                    WEnum::Value(capabilities) => capabilities.bits(),
                    WEnum::Unknown(raw) => raw,
                };
                Event::Capabilities(SeatCapabilities::from_bits_truncate(bits))
            }
            wl_seat::Event::Name { name } => Event::SeatName(name),
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wl_pointer::WlPointer, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_pointer::WlPointer,
        event: wl_pointer::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_pointer::Event::Enter {
                serial,
                surface,
                surface_x,
                surface_y,
            } => match handle_of(&surface) {
                Some(surface) => Event::PointerEnter {
                    serial,
                    surface,
                    x: surface_x,
                    y: surface_y,
                },
                None => return,
            },
            wl_pointer::Event::Leave { serial, surface } => match handle_of(&surface) {
                Some(surface) => Event::PointerLeave { serial, surface },
                None => return,
            },
            wl_pointer::Event::Motion {
                time,
                surface_x,
                surface_y,
            } => Event::PointerMotion {
                time,
                x: surface_x,
                y: surface_y,
            },
            wl_pointer::Event::Button {
                serial,
                time,
                button,
                state: button_state,
            } => Event::PointerButton {
                serial,
                time,
                button,
                pressed: matches!(button_state, WEnum::Value(wl_pointer::ButtonState::Pressed)),
            },
            wl_pointer::Event::Axis { time, axis, value } => Event::PointerAxis {
                time,
                axis: match axis {
                    WEnum::Value(wl_pointer::Axis::HorizontalScroll) => Axis::Horizontal,
                    _ => Axis::Vertical,
                },
                value,
            },
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_keyboard::Event::Enter { serial, surface, .. } => match handle_of(&surface) {
                Some(surface) => Event::KeyboardEnter { serial, surface },
                None => return,
            },
            wl_keyboard::Event::Leave { serial, surface } => match handle_of(&surface) {
                Some(surface) => Event::KeyboardLeave { serial, surface },
                None => return,
            },
            wl_keyboard::Event::Key {
                serial,
                time,
                key,
                state: key_state,
            } => Event::Key {
                serial,
                time,
                key,
                pressed: matches!(key_state, WEnum::Value(wl_keyboard::KeyState::Pressed)),
            },
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => Event::Modifiers {
                depressed: mods_depressed,
                latched: mods_latched,
                locked: mods_locked,
                group,
            },
            // Keymap fd is closed on drop.
            _ => return,
        };
        state.deliver(*id, event);
    }
}

impl Dispatch<wl_touch::WlTouch, ObjectId> for Dispatcher {
    fn event(
        state: &mut Self,
        _: &wl_touch::WlTouch,
        event: wl_touch::Event,
        id: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_touch::Event::Down {
                serial,
                time,
                surface,
                id: touch_id,
                x,
                y,
            } => match handle_of(&surface) {
                Some(surface) => Event::TouchDown {
                    serial,
                    time,
                    surface,
                    id: touch_id,
                    x,
                    y,
                },
                None => return,
            },
            wl_touch::Event::Up {
                serial,
                time,
                id: touch_id,
            } => Event::TouchUp {
                serial,
                time,
                id: touch_id,
            },
            wl_touch::Event::Motion {
                time,
                id: touch_id,
                x,
                y,
            } => Event::TouchMotion {
                time,
                id: touch_id,
                x,
                y,
            },
            wl_touch::Event::Cancel => Event::TouchCancel,
            _ => return,
        };
        state.deliver(*id, event);
    }
}

//! Events the windowing system sends to the application.
//!
//! The windowing core never calls into the application directly. Mode
//! changes, resizes, input and lifecycle notifications are posted through
//! an [`AppMessenger`]; the application drains them on its main thread and
//! answers mode changes with
//! [`WinSystem::finish_mode_change`](crate::WinSystem::finish_mode_change) /
//! [`WinSystem::finish_window_resize`](crate::WinSystem::finish_window_resize).

use std::sync::mpsc::Sender;

use crate::display::ResolutionId;
use crate::wire::Axis;

/// Input translated into main-surface coordinates, already scaled to
/// buffer pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PointerMotion {
        x: f64,
        y: f64,
    },
    /// `button` is a Linux input event code (`BTN_LEFT` = 0x110).
    PointerButton {
        button: u32,
        pressed: bool,
        x: f64,
        y: f64,
    },
    PointerAxis {
        axis: Axis,
        value: f64,
    },
    Key {
        key: u32,
        pressed: bool,
    },
    Modifiers {
        depressed: u32,
        latched: u32,
        locked: u32,
    },
    TouchDown {
        id: i32,
        x: f64,
        y: f64,
    },
    TouchMotion {
        id: i32,
        x: f64,
        y: f64,
    },
    TouchUp {
        id: i32,
    },
    TouchCancel,
}

/// Notifications posted to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Switch to the resolution with this id, then call `finish_mode_change`.
    ModeChange { resolution: ResolutionId },
    /// Resize the windowed render target, then call `finish_window_resize`.
    VideoResize { width: i32, height: i32 },
    /// The compositor asked the window to close.
    Quit,
    /// Keyboard focus entered (`true`) or left the main surface.
    FocusChanged(bool),
    /// The pointer entered (`true`) or left the main surface.
    MouseActive(bool),
    /// Average DPI of the outputs the window is on, for touch gestures.
    TouchDpi(f32),
    /// The set of outputs changed; the resolution list was rebuilt.
    OutputsChanged,
    Input { seat: u32, event: InputEvent },
}

/// Sink for [`AppEvent`]s, called from the main thread and the event
/// pump thread.
pub trait AppMessenger: Send + Sync {
    fn post(&self, event: AppEvent);
}

impl AppMessenger for Sender<AppEvent> {
    fn post(&self, event: AppEvent) {
        // A closed receiver means the application is shutting down.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_channel_messenger_forwards_events() {
        let (tx, rx) = mpsc::channel();
        tx.post(AppEvent::Quit);
        tx.post(AppEvent::VideoResize {
            width: 800,
            height: 600,
        });
        assert_eq!(rx.try_recv().unwrap(), AppEvent::Quit);
        assert!(matches!(
            rx.try_recv().unwrap(),
            AppEvent::VideoResize { width: 800, .. }
        ));
    }

    #[test]
    fn test_post_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::channel::<AppEvent>();
        drop(rx);
        tx.post(AppEvent::Quit);
    }
}

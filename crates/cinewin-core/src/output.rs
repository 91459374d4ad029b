//! Monitor model.
//!
//! Attribute events are buffered in a pending copy and only published on
//! `done`, so readers on the main thread never see a half-updated output.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::connection::WeakConnection;
use crate::geometry::{Point, Size};
use crate::wire::{listener, Event, Listener, ObjectId};

const MM_PER_INCH: f32 = 25.4;

/// Label used when an output reports neither make nor model.
pub const UNKNOWN_OUTPUT_NAME: &str = "Unknown";

/// A display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub size: Size,
    /// mHz
    pub refresh: i32,
    pub current: bool,
    pub preferred: bool,
}

impl Mode {
    /// Refresh rate in Hz.
    pub fn refresh_rate(&self) -> f32 {
        self.refresh as f32 / 1000.0
    }
}

/// Published attributes of an output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    pub position: Point,
    /// Millimetres.
    pub physical_size: Size,
    pub make: String,
    pub model: String,
    pub scale: i32,
    pub modes: Vec<Mode>,
}

impl Default for OutputInfo {
    fn default() -> Self {
        Self {
            position: Point::ORIGIN,
            physical_size: Size::ZERO,
            make: String::new(),
            model: String::new(),
            scale: 1,
            modes: Vec::new(),
        }
    }
}

impl OutputInfo {
    pub fn current_mode(&self) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.current)
    }

    pub fn preferred_mode(&self) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.preferred)
    }

    /// Horizontal and vertical DPI of the current mode, if the physical
    /// size is known.
    pub fn physical_dpi(&self) -> Option<(f32, f32)> {
        let mode = self.current_mode()?;
        if self.physical_size.width <= 0 || self.physical_size.height <= 0 {
            return None;
        }
        Some((
            mode.size.width as f32 / self.physical_size.width as f32 * MM_PER_INCH,
            mode.size.height as f32 / self.physical_size.height as f32 * MM_PER_INCH,
        ))
    }

    /// Mean of horizontal and vertical DPI.
    pub fn dpi(&self) -> Option<f32> {
        self.physical_dpi().map(|(x, y)| (x + y) / 2.0)
    }

    /// Pixel aspect ratio of `mode` on this output; 1.0 if unknown.
    pub fn pixel_ratio_for_mode(&self, mode: &Mode) -> f32 {
        if self.physical_size.width <= 0
            || self.physical_size.height <= 0
            || mode.size.width <= 0
            || mode.size.height <= 0
        {
            return 1.0;
        }
        (self.physical_size.width as f32 / mode.size.width as f32)
            / (self.physical_size.height as f32 / mode.size.height as f32)
    }

    /// Make and model, with the position appended when it is not the
    /// origin, e.g. `"Acme Vision 24@1920x0"`.
    pub fn user_friendly_name(&self) -> String {
        let mut name = format!("{} {}", self.make, self.model).trim().to_owned();
        if name.is_empty() {
            name = UNKNOWN_OUTPUT_NAME.to_owned();
        }
        if self.position != Point::ORIGIN {
            name.push_str(&format!("@{}x{}", self.position.x, self.position.y));
        }
        name
    }

    fn record_mode(&mut self, size: Size, refresh: i32, current: bool, preferred: bool) {
        let index = match self
            .modes
            .iter()
            .position(|mode| mode.size == size && mode.refresh == refresh)
        {
            Some(index) => index,
            None => {
                self.modes.push(Mode {
                    size,
                    refresh,
                    current: false,
                    preferred: false,
                });
                self.modes.len() - 1
            }
        };
        if current {
            for (i, mode) in self.modes.iter_mut().enumerate() {
                mode.current = i == index;
            }
        }
        if preferred {
            for (i, mode) in self.modes.iter_mut().enumerate() {
                mode.preferred = i == index;
            }
        }
    }
}

/// One bound `wl_output`.
pub struct Output {
    global_name: u32,
    object: ObjectId,
    connection: WeakConnection,
    pending: Mutex<OutputInfo>,
    current: RwLock<OutputInfo>,
    done_count: Mutex<u32>,
    on_done: Box<dyn Fn(u32) + Send + Sync>,
}

impl Output {
    /// `on_done` receives the global name after every `done`.
    pub fn new(
        global_name: u32,
        object: ObjectId,
        connection: WeakConnection,
        on_done: Box<dyn Fn(u32) + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            global_name,
            object,
            connection,
            pending: Mutex::new(OutputInfo::default()),
            current: RwLock::new(OutputInfo::default()),
            done_count: Mutex::new(0),
            on_done,
        })
    }

    /// Listener to install on the bound object.
    pub fn listener(self: &Arc<Self>) -> Listener {
        let weak: Weak<Self> = Arc::downgrade(self);
        listener(move |_, event| {
            if let Some(output) = weak.upgrade() {
                output.handle_event(event);
            }
        })
    }

    pub fn handle_event(&self, event: &Event) {
        match event {
            Event::OutputGeometry {
                position,
                physical_size,
                make,
                model,
            } => {
                let mut pending = self.pending.lock();
                pending.position = *position;
                pending.physical_size = *physical_size;
                pending.make.clone_from(make);
                pending.model.clone_from(model);
            }
            Event::OutputMode {
                size,
                refresh,
                current,
                preferred,
            } => {
                trace!(
                    "Output {} mode {size} @ {refresh} mHz{}",
                    self.global_name,
                    if *current { " (current)" } else { "" }
                );
                self.pending
                    .lock()
                    .record_mode(*size, *refresh, *current, *preferred);
            }
            Event::OutputScale(scale) => self.pending.lock().scale = (*scale).max(1),
            Event::OutputDone => {
                let snapshot = self.pending.lock().clone();
                debug!(
                    "Output {} done: {} scale {} ({} modes)",
                    self.global_name,
                    snapshot.user_friendly_name(),
                    snapshot.scale,
                    snapshot.modes.len()
                );
                *self.current.write() = snapshot;
                *self.done_count.lock() += 1;
                (self.on_done)(self.global_name);
            }
            _ => {}
        }
    }

    pub const fn global_name(&self) -> u32 {
        self.global_name
    }

    pub const fn object(&self) -> ObjectId {
        self.object
    }

    /// Attributes as of the last `done`.
    pub fn info(&self) -> OutputInfo {
        self.current.read().clone()
    }

    /// Whether at least one `done` has been received.
    pub fn is_ready(&self) -> bool {
        *self.done_count.lock() > 0
    }

    pub fn scale(&self) -> i32 {
        self.current.read().scale
    }

    pub fn current_mode(&self) -> Option<Mode> {
        self.current.read().current_mode().copied()
    }

    pub fn dpi(&self) -> Option<f32> {
        self.current.read().dpi()
    }

    pub fn user_friendly_name(&self) -> String {
        self.current.read().user_friendly_name()
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.upgrade() {
            connection.wire().destroy(self.object);
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("global_name", &self.global_name)
            .field("object", &self.object)
            .field("info", &*self.current.read())
            .finish_non_exhaustive()
    }
}

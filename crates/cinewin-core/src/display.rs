//! Resolution list shared with the rendering side of the application.
//!
//! The window system writes desktop and custom resolutions here after every
//! output rescan and looks entries up again when a configure changes the
//! buffer size or refresh rate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Float tolerance when matching refresh rates.
const REFRESH_EPSILON: f32 = 0.0005;

/// Identifier of an entry in [`DisplaySettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionId {
    /// Windowed-mode resolution (size preferred by the settings).
    Window,
    /// Current mode of the selected output.
    Desktop,
    /// Any other mode, indexed in insertion order.
    Custom(usize),
}

impl fmt::Display for ResolutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window => f.write_str("window"),
            Self::Desktop => f.write_str("desktop"),
            Self::Custom(index) => write!(f, "custom#{index}"),
        }
    }
}

/// One renderable mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionInfo {
    pub width: i32,
    pub height: i32,
    /// Hz
    pub refresh_rate: f32,
    pub pixel_ratio: f32,
    pub full_screen: bool,
    /// User-friendly name of the output this mode belongs to.
    pub output: String,
    /// Label such as `"1920x1080 @ 60.00Hz"`.
    pub mode: String,
}

impl Default for ResolutionInfo {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            refresh_rate: 60.0,
            pixel_ratio: 1.0,
            full_screen: false,
            output: String::new(),
            mode: String::new(),
        }
    }
}

impl ResolutionInfo {
    pub fn new(width: i32, height: i32, refresh_rate: f32, output: &str) -> Self {
        Self {
            width,
            height,
            refresh_rate,
            pixel_ratio: 1.0,
            full_screen: true,
            output: output.to_owned(),
            mode: format_mode(width, height, refresh_rate),
        }
    }

    pub fn matches(&self, width: i32, height: i32, refresh_rate: f32) -> bool {
        self.width == width
            && self.height == height
            && (self.refresh_rate - refresh_rate).abs() < REFRESH_EPSILON
    }
}

fn format_mode(width: i32, height: i32, refresh_rate: f32) -> String {
    format!("{width}x{height} @ {refresh_rate:.2}Hz")
}

/// Resolution list: windowed, desktop and custom entries.
#[derive(Debug, Clone, Default)]
pub struct DisplaySettings {
    window: ResolutionInfo,
    desktop: ResolutionInfo,
    custom: Vec<ResolutionInfo>,
    current: Option<ResolutionId>,
}

impl DisplaySettings {
    pub fn new(window: ResolutionInfo) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    pub fn get(&self, id: ResolutionId) -> Option<&ResolutionInfo> {
        match id {
            ResolutionId::Window => Some(&self.window),
            ResolutionId::Desktop => Some(&self.desktop),
            ResolutionId::Custom(index) => self.custom.get(index),
        }
    }

    pub fn get_mut(&mut self, id: ResolutionId) -> Option<&mut ResolutionInfo> {
        match id {
            ResolutionId::Window => Some(&mut self.window),
            ResolutionId::Desktop => Some(&mut self.desktop),
            ResolutionId::Custom(index) => self.custom.get_mut(index),
        }
    }

    pub const fn window(&self) -> &ResolutionInfo {
        &self.window
    }

    pub const fn desktop(&self) -> &ResolutionInfo {
        &self.desktop
    }

    pub fn custom(&self) -> &[ResolutionInfo] {
        &self.custom
    }

    /// Update the windowed entry; the size is what the window gets when
    /// the compositor has no preference.
    pub fn set_window_resolution(&mut self, width: i32, height: i32) {
        self.window.width = width;
        self.window.height = height;
        self.window.full_screen = false;
        self.window.mode = format_mode(width, height, self.window.refresh_rate);
    }

    pub fn update_desktop_resolution(
        &mut self,
        width: i32,
        height: i32,
        refresh_rate: f32,
        output: &str,
    ) {
        self.desktop = ResolutionInfo::new(width, height, refresh_rate, output);
    }

    pub fn clear_custom(&mut self) {
        self.custom.clear();
    }

    pub fn add_custom(&mut self, resolution: ResolutionInfo) -> ResolutionId {
        self.custom.push(resolution);
        ResolutionId::Custom(self.custom.len() - 1)
    }

    /// First desktop or custom entry with this size and refresh rate.
    pub fn find_matching(&self, width: i32, height: i32, refresh_rate: f32) -> Option<ResolutionId> {
        if self.desktop.matches(width, height, refresh_rate) {
            return Some(ResolutionId::Desktop);
        }
        self.custom
            .iter()
            .position(|res| res.matches(width, height, refresh_rate))
            .map(ResolutionId::Custom)
    }

    pub const fn current(&self) -> Option<ResolutionId> {
        self.current
    }

    pub fn set_current(&mut self, id: ResolutionId) {
        self.current = Some(id);
    }
}

//! Cinewin Core — Protocol-agnostic Wayland windowing engine
//!
//! This crate contains the windowing logic of a fullscreen-first media
//! center (shell negotiation, HiDPI sizing, client-side decorations, input
//! routing, frame pacing, HDR metadata) with zero dependencies on a Wayland
//! library.
//!
//! Backends implement the [`Wire`](wire::Wire) trait on top of a real
//! compositor connection. The core issues typed requests through it and
//! receives typed events, and tells the application what to do through an
//! [`AppMessenger`].
//!
//! # Quick Start
//! ```
//! use std::sync::mpsc;
//! use cinewin_core::config::Config;
//! use cinewin_core::testing::FakeCompositor;
//! use cinewin_core::{AppEvent, WinSystem};
//!
//! let fake = FakeCompositor::desktop();
//! let (tx, rx) = mpsc::channel::<AppEvent>();
//! let mut win = WinSystem::new(fake.connection(), Config::default(), std::sync::Arc::new(tx));
//!
//! win.init_window_system()?;
//! win.create_window()?;
//!
//! // Once per frame, after submitting the frame:
//! win.finish_frame_presentation();
//! for event in rx.try_iter() {
//!     if let AppEvent::VideoResize { .. } = event {
//!         win.finish_window_resize();
//!     }
//! }
//! # Ok::<(), cinewin_core::WindowingError>(())
//! ```

pub mod actor;
pub mod color;
pub mod config;
pub mod connection;
pub mod decorator;
pub mod display;
pub mod event;
pub mod geometry;
pub mod invariants;
pub mod output;
pub mod presentation;
pub mod registry;
pub mod seat;
pub mod shell;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod win_system;
pub mod wire;

// Re-export primary API types at crate root
pub use color::{ColorManager, VideoPicture};
pub use config::Config;
pub use connection::Connection;
pub use display::{DisplaySettings, ResolutionId, ResolutionInfo};
pub use event::{AppEvent, AppMessenger, InputEvent};
pub use geometry::{Point, Rect, Size};
pub use shell::{ShellProtocol, ShellState};
pub use win_system::{ProcessStats, Sizes, WinSystem, WindowingError};
pub use wire::{Wire, WireError};

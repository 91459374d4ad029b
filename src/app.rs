//! Application side of the windowing handshake.
//!
//! Owns the window system and the renderer, draws frames and answers the
//! events the window system posts: mode changes and resizes are confirmed
//! after the render target followed them, a close request ends the loop.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, trace};

use cinewin_core::config::Config;
use cinewin_core::{AppEvent, Connection, InputEvent, ResolutionId, WinSystem};

use crate::render::SoftwareRenderer;

/// Linux input event codes handled by the demo.
const KEY_ESC: u32 = 1;
const KEY_Q: u32 = 16;
const KEY_F: u32 = 33;
const KEY_M: u32 = 50;

pub struct App {
    win: WinSystem,
    renderer: SoftwareRenderer,
    events: Receiver<AppEvent>,
    running: bool,
    frames: u64,
}

impl App {
    /// Initialize the window system on `connection` and open the window.
    pub fn new(connection: Connection, config: Config) -> Result<Self> {
        let (tx, events) = mpsc::channel();
        let start_full_screen = config.video_screen.fullscreen;
        let mut win = WinSystem::new(connection.clone(), config, Arc::new(tx));
        win.init_window_system()
            .context("Failed to initialize the window system")?;
        win.create_window().context("Failed to create the window")?;
        let surface = win.surface().context("Window has no main surface")?;
        let renderer = SoftwareRenderer::new(&connection, surface)?;

        let app = Self {
            win,
            renderer,
            events,
            running: true,
            frames: 0,
        };
        if start_full_screen {
            app.switch_full_screen(true);
        }
        Ok(app)
    }

    /// Render until the window is closed or `max_frames` were drawn.
    pub fn run(&mut self, max_frames: Option<u64>) -> Result<()> {
        info!(
            "Running on {:?} with outputs {:?}",
            self.win.shell_protocol(),
            self.win.get_connected_outputs()
        );
        while self.running {
            self.run_frame()?;
            if max_frames.is_some_and(|max| self.frames >= max) {
                info!("Rendered {} frames, stopping", self.frames);
                break;
            }
        }

        let stats = self.renderer.stats();
        info!(
            "Rendered {} frames ({} skipped), average {:.2} ms, peak {:.2} ms",
            stats.frames_rendered, stats.frames_skipped, stats.avg_frame_time_ms, stats.peak_frame_time_ms
        );
        if let Some(latency) = self.win.display_latency_ms() {
            info!("Average display latency {latency:.1} ms");
        }
        Ok(())
    }

    pub fn run_frame(&mut self) -> Result<()> {
        self.win.prepare_frame_presentation()?;
        if self.renderer.render(&self.win.sizes())? {
            self.frames += 1;
        }
        let stats = self.win.finish_frame_presentation();
        if stats.configures_skipped > 0 {
            debug!("Coalesced {} configures this frame", stats.configures_skipped);
        }

        let pending: Vec<AppEvent> = self.events.try_iter().collect();
        for event in pending {
            self.handle_event(event);
        }
        Ok(())
    }

    pub const fn is_running(&self) -> bool {
        self.running
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::ModeChange { resolution } => {
                info!("Switching to resolution {resolution}");
                // The renderer follows the window sizes on its next frame.
                self.win.finish_mode_change(resolution);
            }
            AppEvent::VideoResize { width, height } => {
                debug!("Resizing render target to {width}x{height}");
                self.win.finish_window_resize();
            }
            AppEvent::Quit => {
                info!("Window closed");
                self.running = false;
            }
            AppEvent::FocusChanged(focused) => debug!("Focus {}", if focused { "gained" } else { "lost" }),
            AppEvent::MouseActive(active) => trace!("Mouse active: {active}"),
            AppEvent::TouchDpi(dpi) => debug!("Touch DPI {dpi:.1}"),
            AppEvent::OutputsChanged => {
                info!("Outputs changed: {:?}", self.win.get_connected_outputs());
            }
            AppEvent::Input { seat, event } => self.handle_input(seat, &event),
        }
    }

    fn handle_input(&mut self, seat: u32, event: &InputEvent) {
        trace!("Input on seat {seat}: {event:?}");
        let InputEvent::Key { key, pressed: true } = *event else {
            return;
        };
        match key {
            KEY_ESC | KEY_Q => self.running = false,
            KEY_F => self.switch_full_screen(!self.win.is_full_screen()),
            KEY_M => self.win.minimize(),
            _ => {}
        }
    }

    fn switch_full_screen(&self, full_screen: bool) {
        let id = if full_screen {
            ResolutionId::Desktop
        } else {
            ResolutionId::Window
        };
        let resolution = self.win.display_settings().lock().get(id).cloned();
        if let Some(resolution) = resolution {
            self.win.set_full_screen(full_screen, &resolution);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinewin_core::testing::FakeCompositor;
    use cinewin_core::wire::{Event, Interface, ToplevelState};
    use cinewin_core::Size;

    #[test]
    fn test_close_stops_the_loop() {
        let fake = FakeCompositor::desktop();
        let mut app = App::new(fake.connection(), Config::default()).unwrap();
        app.run_frame().unwrap();
        assert!(app.is_running());

        let toplevel = fake.objects_of(Interface::XdgToplevel)[0];
        fake.emit(toplevel, Event::Close);
        app.run_frame().unwrap();
        assert!(!app.is_running());
    }

    #[test]
    fn test_configure_is_answered_and_rendered() {
        let fake = FakeCompositor::desktop();
        let mut app = App::new(fake.connection(), Config::default()).unwrap();
        app.run_frame().unwrap();

        fake.configure_toplevel(Size::new(1000, 700), &[ToplevelState::Activated]);
        app.run_frame().unwrap();
        app.run_frame().unwrap();
        assert!(!app.win.is_waiting_for_apply());
        assert_eq!(app.win.sizes().configured_size, Size::new(1000, 700));
    }

    #[test]
    fn test_fullscreen_start_requests_desktop_mode() {
        let fake = FakeCompositor::desktop();
        let mut config = Config::default();
        config.video_screen.fullscreen = true;
        let _app = App::new(fake.connection(), config).unwrap();
        assert!(fake
            .requests_of(Interface::XdgToplevel)
            .iter()
            .any(|r| matches!(r, cinewin_core::wire::Request::SetFullscreen { .. })));
    }

    #[test]
    fn test_max_frames_bounds_the_run() {
        let fake = FakeCompositor::desktop();
        let mut app = App::new(fake.connection(), Config::default()).unwrap();
        // Release every buffer as soon as it is committed.
        for _ in 0..3 {
            app.run(Some(app.frames + 1)).unwrap();
            for buffer in fake.objects_of(Interface::Buffer) {
                fake.emit(buffer, Event::Release);
            }
        }
        assert_eq!(app.frames, 3);
    }
}

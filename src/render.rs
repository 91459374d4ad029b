//! Software rendering of the main surface.
//!
//! Stands in for the media center's GPU pipeline: each frame is painted on
//! the CPU into one of two shared-memory buffers sized to the window's
//! buffer size and committed to the main surface. A buffer is reused only
//! after the compositor released it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, trace, warn};

use cinewin_core::decorator::draw::{buffer_len, Canvas, BYTES_PER_PIXEL};
use cinewin_core::registry::Registry;
use cinewin_core::wire::{listener, Create, Event, Interface, ObjectId, Request, ShmPool};
use cinewin_core::{Connection, Point, Rect, Size, Sizes};

const BACKGROUND: u32 = 0xFF10_1018;
const MARKER: u32 = 0xFF3A_7BD5;
const MARKER_SIZE: Size = Size::new(48, 24);
/// Buffers in flight; two is enough for a compositor that releases on
/// the next commit.
const BUFFER_COUNT: usize = 2;

/// Render statistics
#[derive(Debug, Clone)]
pub struct RenderStats {
    /// Number of frames rendered
    pub frames_rendered: u64,
    /// Frames skipped because every buffer was still held
    pub frames_skipped: u64,
    /// Average frame time in milliseconds
    pub avg_frame_time_ms: f64,
    /// Peak frame time in milliseconds
    pub peak_frame_time_ms: f64,
    /// Recent frame times for averaging
    frame_times: Vec<Duration>,
}

impl Default for RenderStats {
    fn default() -> Self {
        Self {
            frames_rendered: 0,
            frames_skipped: 0,
            avg_frame_time_ms: 0.0,
            peak_frame_time_ms: 0.0,
            frame_times: Vec::with_capacity(60),
        }
    }
}

impl RenderStats {
    /// Record a frame render
    pub fn record_frame(&mut self, frame_time: Duration) {
        self.frames_rendered += 1;

        let ms = frame_time.as_secs_f64() * 1000.0;
        if ms > self.peak_frame_time_ms {
            self.peak_frame_time_ms = ms;
        }

        // Keep last 60 frames for averaging
        self.frame_times.push(frame_time);
        if self.frame_times.len() > 60 {
            self.frame_times.remove(0);
        }

        let total: Duration = self.frame_times.iter().sum();
        self.avg_frame_time_ms = total.as_secs_f64() * 1000.0 / self.frame_times.len() as f64;
    }

    pub fn record_skip(&mut self) {
        self.frames_skipped += 1;
    }
}

struct FrameBuffer {
    id: ObjectId,
    offset: usize,
    busy: Arc<AtomicBool>,
}

/// Buffers for one (size, scale) combination.
struct RenderTarget {
    size: Size,
    scale: i32,
    pool: ShmPool,
    buffers: Vec<FrameBuffer>,
}

pub struct SoftwareRenderer {
    connection: Connection,
    surface: ObjectId,
    shm: ObjectId,
    _registry: Registry,
    target: Option<RenderTarget>,
    frame: u64,
    stats: RenderStats,
}

impl SoftwareRenderer {
    pub fn new(connection: &Connection, surface: ObjectId) -> Result<Self> {
        let mut registry = Registry::new(connection);
        let shm = registry.request_singleton(Interface::Shm, 1, 1, true)?;
        registry
            .bind()
            .context("Failed to bind wl_shm for the renderer")?;
        let shm = shm.object().context("Compositor offers no wl_shm")?;
        Ok(Self {
            connection: connection.clone(),
            surface,
            shm,
            _registry: registry,
            target: None,
            frame: 0,
            stats: RenderStats::default(),
        })
    }

    pub const fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Paint and commit one frame at the window's current size. Returns
    /// `false` if the frame was skipped.
    pub fn render(&mut self, sizes: &Sizes) -> Result<bool> {
        let start = Instant::now();
        if sizes.surface_size.width <= 0 || sizes.surface_size.height <= 0 {
            self.stats.record_skip();
            return Ok(false);
        }
        let stale = self
            .target
            .as_ref()
            .map_or(true, |t| t.size != sizes.surface_size || t.scale != sizes.scale);
        if stale {
            self.release_target();
            self.target = Some(self.allocate(sizes.surface_size, sizes.scale)?);
        }
        let Some(target) = self.target.as_mut() else {
            return Ok(false);
        };

        let Some(buffer) = target.buffers.iter().find(|b| !b.busy.load(Ordering::Acquire)) else {
            trace!("All frame buffers held by the compositor, skipping frame");
            self.stats.record_skip();
            return Ok(false);
        };

        let len = buffer_len(target.size, target.scale);
        let memory = &mut target.pool.memory.as_mut_slice()[buffer.offset..buffer.offset + len];
        let mut canvas = Canvas::new(memory, target.size, target.scale)?;
        paint_frame(&mut canvas, self.frame)?;

        buffer.busy.store(true, Ordering::Release);
        let wire = self.connection.wire();
        wire.send(
            self.surface,
            Request::Attach {
                buffer: Some(buffer.id),
                position: Point::ORIGIN,
            },
        )?;
        wire.send(
            self.surface,
            Request::Damage(Rect::from_parts(Point::ORIGIN, target.size)),
        )?;
        wire.send(self.surface, Request::Commit)?;

        self.frame += 1;
        self.stats.record_frame(start.elapsed());
        Ok(true)
    }

    fn allocate(&self, size: Size, scale: i32) -> Result<RenderTarget> {
        let len = buffer_len(size, scale);
        let wire = self.connection.wire();
        let pool = wire
            .create_shm_pool(self.shm, len * BUFFER_COUNT)
            .with_context(|| format!("Failed to allocate {} byte frame buffers", len * BUFFER_COUNT))?;
        let pixels = size * scale;
        let mut buffers = Vec::with_capacity(BUFFER_COUNT);
        for index in 0..BUFFER_COUNT {
            let offset = index * len;
            let busy = Arc::new(AtomicBool::new(false));
            let released = Arc::clone(&busy);
            let id = wire.create(
                pool.id,
                Create::Buffer {
                    offset: i32::try_from(offset).context("Frame buffer offset overflows")?,
                    width: pixels.width,
                    height: pixels.height,
                    stride: pixels.width * BYTES_PER_PIXEL as i32,
                },
                Some(listener(move |_, event| {
                    if matches!(event, Event::Release) {
                        released.store(false, Ordering::Release);
                    }
                })),
            )?;
            buffers.push(FrameBuffer { id, offset, busy });
        }
        debug!("Allocated {BUFFER_COUNT} frame buffers of {pixels} pixels");
        Ok(RenderTarget {
            size,
            scale,
            pool,
            buffers,
        })
    }

    fn release_target(&mut self) {
        let Some(target) = self.target.take() else {
            return;
        };
        let wire = self.connection.wire();
        for buffer in &target.buffers {
            wire.destroy(buffer.id);
        }
        wire.destroy(target.pool.id);
    }
}

impl Drop for SoftwareRenderer {
    fn drop(&mut self) {
        self.release_target();
        if let Err(err) = self.connection.flush() {
            warn!("Flush after releasing frame buffers failed: {err}");
        }
    }
}

/// Background plus a marker sweeping left to right, one logical pixel per
/// frame, so dropped frames are visible.
fn paint_frame(canvas: &mut Canvas<'_>, frame: u64) -> Result<(), cinewin_core::decorator::draw::DrawError> {
    canvas.fill(BACKGROUND);
    let size = canvas.size();
    if size.width < MARKER_SIZE.width || size.height < MARKER_SIZE.height {
        return Ok(());
    }
    let travel = (size.width - MARKER_SIZE.width + 1) as u64;
    let x = (frame % travel) as i32;
    let y = (size.height - MARKER_SIZE.height) / 2;
    canvas.fill_rect(MARKER, Rect::from_parts(Point::new(x, y), MARKER_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinewin_core::testing::FakeCompositor;
    use pretty_assertions::assert_eq;

    fn sizes(surface: Size, scale: i32) -> Sizes {
        Sizes {
            surface_size: surface,
            buffer_size: surface * scale,
            configured_size: surface,
            scale,
        }
    }

    fn renderer(fake: &Arc<FakeCompositor>) -> SoftwareRenderer {
        let connection = fake.connection();
        let mut registry = Registry::new(&connection);
        let compositor = registry.request_singleton(Interface::Compositor, 1, 4, true).unwrap();
        registry.bind().unwrap();
        let surface = connection
            .wire()
            .create(compositor.object().unwrap(), Create::Surface, None)
            .unwrap();
        SoftwareRenderer::new(&connection, surface).unwrap()
    }

    #[test]
    fn test_render_commits_a_buffer() {
        let fake = FakeCompositor::desktop();
        let mut renderer = renderer(&fake);
        assert!(renderer.render(&sizes(Size::new(320, 240), 1)).unwrap());

        let requests = fake.requests_of(Interface::Surface);
        assert!(requests.iter().any(|r| matches!(r, Request::Attach { buffer: Some(_), .. })));
        assert!(requests.contains(&Request::Commit));
        assert_eq!(fake.objects_of(Interface::Buffer).len(), BUFFER_COUNT);
        assert_eq!(renderer.stats().frames_rendered, 1);
    }

    #[test]
    fn test_frames_skip_until_a_buffer_is_released() {
        let fake = FakeCompositor::desktop();
        let mut renderer = renderer(&fake);
        let window = sizes(Size::new(320, 240), 1);
        assert!(renderer.render(&window).unwrap());
        assert!(renderer.render(&window).unwrap());
        assert!(!renderer.render(&window).unwrap());
        assert_eq!(renderer.stats().frames_skipped, 1);

        let first = fake.objects_of(Interface::Buffer)[0];
        fake.emit(first, Event::Release);
        assert!(renderer.render(&window).unwrap());
    }

    #[test]
    fn test_scale_change_reallocates() {
        let fake = FakeCompositor::desktop();
        let mut renderer = renderer(&fake);
        renderer.render(&sizes(Size::new(320, 240), 1)).unwrap();
        renderer.render(&sizes(Size::new(320, 240), 2)).unwrap();
        assert_eq!(fake.objects_of(Interface::Buffer).len(), BUFFER_COUNT);
        assert_eq!(fake.objects_of(Interface::ShmPool).len(), 1);
    }

    #[test]
    fn test_empty_window_is_skipped() {
        let fake = FakeCompositor::desktop();
        let mut renderer = renderer(&fake);
        assert!(!renderer.render(&sizes(Size::ZERO, 1)).unwrap());
    }

    #[test]
    fn test_marker_sweeps_across_the_frame() {
        let size = Size::new(100, 50);
        let mut data = vec![0u8; buffer_len(size, 1)];
        let mut canvas = Canvas::new(&mut data, size, 1).unwrap();
        paint_frame(&mut canvas, 10).unwrap();
        assert_eq!(canvas.pixel(9, 25), Some(BACKGROUND));
        assert_eq!(canvas.pixel(10, 25), Some(MARKER));
        assert_eq!(canvas.pixel(10 + MARKER_SIZE.width, 25), Some(BACKGROUND));
    }

    #[test]
    fn test_average_frame_time() {
        let mut stats = RenderStats::default();
        stats.record_frame(Duration::from_millis(2));
        stats.record_frame(Duration::from_millis(4));
        assert!((stats.avg_frame_time_ms - 3.0).abs() < 1e-9);
        assert!((stats.peak_frame_time_ms - 4.0).abs() < 1e-9);
    }
}

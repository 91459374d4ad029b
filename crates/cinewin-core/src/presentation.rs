//! Frame pacing and presentation timing.
//!
//! Before each frame the window system asks for a `wp_presentation`
//! feedback (if the compositor offers presentation-time) and waits, for a
//! bounded time, for the previous frame callback. Presented feedback turns
//! into display latency samples and is fanned out to registered handlers,
//! of which [`VideoSync`] is one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::actor::WakeEvent;
use crate::connection::{Connection, WeakConnection};
use crate::wire::{listener, Create, Event, Listener, ObjectId, WireError};

pub const DEFAULT_LATENCY_WINDOW: usize = 30;
pub const DEFAULT_FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Fixed-window moving average.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.window {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
    }

    /// Average of the samples in the window, 0 without samples.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One `presented` feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationInfo {
    /// Presentation clock time at which the frame turned visible.
    pub timestamp: Duration,
    /// Refresh period of the output, zero if unknown.
    pub refresh: Duration,
    pub msc: u64,
    pub sync_output: Option<ObjectId>,
    pub flags: u32,
}

pub type FeedbackHandler = Arc<dyn Fn(&PresentationInfo) + Send + Sync>;

#[derive(Default)]
struct HandlerList {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, FeedbackHandler)>>,
}

/// Keeps a feedback handler registered until dropped.
#[must_use = "the handler is unregistered when the registration is dropped"]
pub struct Registration {
    id: u64,
    list: Weak<HandlerList>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.handlers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

struct Shared {
    clock_id: Mutex<Option<u32>>,
    latency: Mutex<MovingAverage>,
    handlers: Arc<HandlerList>,
    last_sync_output: Mutex<Option<ObjectId>>,
}

/// Tracks presentation feedback and frame callbacks of one surface.
pub struct PresentationTracker {
    connection: WeakConnection,
    presentation: Mutex<Option<ObjectId>>,
    shared: Arc<Shared>,
    frame_event: Arc<WakeEvent>,
    frame_callback: Arc<Mutex<Option<ObjectId>>>,
    frame_timeout: Duration,
    frame_start: Mutex<Option<Instant>>,
}

impl PresentationTracker {
    pub fn new(connection: &Connection, latency_window: usize, frame_timeout: Duration) -> Self {
        Self {
            connection: connection.downgrade(),
            presentation: Mutex::new(None),
            shared: Arc::new(Shared {
                clock_id: Mutex::new(None),
                latency: Mutex::new(MovingAverage::new(latency_window)),
                handlers: Arc::new(HandlerList::default()),
                last_sync_output: Mutex::new(None),
            }),
            frame_event: WakeEvent::new(),
            frame_callback: Arc::new(Mutex::new(None)),
            frame_timeout,
            frame_start: Mutex::new(None),
        }
    }

    /// Listener for the bound `wp_presentation`, capturing its clock.
    pub fn presentation_listener(&self) -> Listener {
        let shared = Arc::clone(&self.shared);
        listener(move |_, event| {
            if let Event::ClockId(clock_id) = event {
                debug!("Presentation clock is {clock_id}");
                *shared.clock_id.lock() = Some(*clock_id);
            }
        })
    }

    /// Set (or clear) the bound `wp_presentation` global.
    pub fn set_presentation(&self, presentation: Option<ObjectId>) {
        *self.presentation.lock() = presentation;
        if presentation.is_none() {
            *self.shared.clock_id.lock() = None;
        }
    }

    pub fn has_presentation(&self) -> bool {
        self.presentation.lock().is_some() && self.shared.clock_id.lock().is_some()
    }

    /// Register `handler` for every presented frame.
    pub fn register_feedback_handler<F>(&self, handler: F) -> Registration
    where
        F: Fn(&PresentationInfo) + Send + Sync + 'static,
    {
        let list = &self.shared.handlers;
        let id = list.next_id.fetch_add(1, Ordering::Relaxed);
        list.handlers.lock().push((id, Arc::new(handler)));
        Registration {
            id,
            list: Arc::downgrade(list),
        }
    }

    /// Average latency between frame submission and presentation, in
    /// milliseconds.
    pub fn display_latency_ms(&self) -> f32 {
        self.shared.latency.lock().average() as f32
    }

    /// Time since the last [`finish_frame`](Self::finish_frame), in
    /// milliseconds.
    pub fn frame_latency_adjustment_ms(&self) -> f32 {
        self.frame_start
            .lock()
            .map_or(0.0, |start| start.elapsed().as_secs_f32() * 1000.0)
    }

    /// Output the last presented frame was synchronized to.
    pub fn sync_output(&self) -> Option<ObjectId> {
        *self.shared.last_sync_output.lock()
    }

    /// Request feedback for the next commit of `surface`, wait for the
    /// pending frame callback and request the next one.
    pub fn prepare_frame(&self, surface: ObjectId) -> Result<(), WireError> {
        let Some(connection) = self.connection.upgrade() else {
            return Ok(());
        };
        self.request_feedback(&connection, surface)?;

        let pending = self.frame_callback.lock().take();
        if let Some(callback) = pending {
            if !self.frame_event.wait(self.frame_timeout) {
                trace!("No frame callback within {:?}, drawing anyway", self.frame_timeout);
            }
            connection.wire().destroy(callback);
        }

        self.frame_event.reset();
        let frame_event = Arc::clone(&self.frame_event);
        let slot = Arc::downgrade(&self.frame_callback);
        let callback = connection.wire().create(
            surface,
            Create::Frame,
            Some(listener(move |callback, event| {
                if matches!(event, Event::Done { .. }) {
                    if let Some(slot) = slot.upgrade() {
                        let mut slot = slot.lock();
                        if *slot == Some(callback) {
                            *slot = None;
                        }
                    }
                    frame_event.set();
                }
            })),
        )?;
        // If the callback already fired, the event stays set and the next
        // frame does not wait.
        *self.frame_callback.lock() = Some(callback);
        Ok(())
    }

    pub fn finish_frame(&self) {
        *self.frame_start.lock() = Some(Instant::now());
    }

    fn request_feedback(&self, connection: &Connection, surface: ObjectId) -> Result<(), WireError> {
        let Some(presentation) = *self.presentation.lock() else {
            return Ok(());
        };
        let Some(clock_id) = *self.shared.clock_id.lock() else {
            return Ok(());
        };
        let wire = connection.wire();
        let submitted = wire.clock_time(clock_id)?;
        let shared = Arc::clone(&self.shared);
        let weak_connection = connection.downgrade();
        let sync_output = Mutex::new(None);
        wire.create(
            presentation,
            Create::Feedback { surface },
            Some(listener(move |feedback, event| match event {
                Event::SyncOutput { output } => *sync_output.lock() = Some(*output),
                Event::Presented {
                    timestamp,
                    refresh,
                    msc,
                    flags,
                } => {
                    let latency = timestamp.saturating_sub(submitted);
                    trace!("Frame presented after {latency:?} (msc {msc})");
                    shared.latency.lock().push(latency.as_secs_f64() * 1000.0);
                    let info = PresentationInfo {
                        timestamp: *timestamp,
                        refresh: Duration::from_nanos(u64::from(*refresh)),
                        msc: *msc,
                        sync_output: *sync_output.lock(),
                        flags: *flags,
                    };
                    *shared.last_sync_output.lock() = info.sync_output;
                    let handlers: Vec<FeedbackHandler> = shared
                        .handlers
                        .handlers
                        .lock()
                        .iter()
                        .map(|(_, h)| Arc::clone(h))
                        .collect();
                    for handler in handlers {
                        handler(&info);
                    }
                    if let Some(connection) = weak_connection.upgrade() {
                        connection.wire().destroy(feedback);
                    }
                }
                Event::Discarded => {
                    trace!("Frame discarded");
                    if let Some(connection) = weak_connection.upgrade() {
                        connection.wire().destroy(feedback);
                    }
                }
                _ => {}
            })),
        )?;
        Ok(())
    }
}

impl Drop for PresentationTracker {
    fn drop(&mut self) {
        if let (Some(callback), Some(connection)) =
            (self.frame_callback.lock().take(), self.connection.upgrade())
        {
            connection.wire().destroy(callback);
        }
    }
}

impl std::fmt::Debug for PresentationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentationTracker")
            .field("presentation", &*self.presentation.lock())
            .field("latency_ms", &self.display_latency_ms())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SyncState {
    last_msc: Option<u64>,
    vblanks: u64,
    refresh: Duration,
    sync_output: Option<ObjectId>,
}

/// Vertical blank clock derived from presentation feedback.
///
/// Each presented frame advances the clock by the MSC delta since the
/// previous one. A change of sync output restarts counting since MSC
/// values of different outputs are unrelated.
pub struct VideoSync {
    state: Arc<Mutex<SyncState>>,
    _registration: Registration,
}

impl VideoSync {
    /// `on_vblanks` receives the number of new vblanks and the timestamp of
    /// the frame that completed them.
    pub fn new<F>(tracker: &PresentationTracker, on_vblanks: F) -> Self
    where
        F: Fn(u64, Duration) + Send + Sync + 'static,
    {
        let state = Arc::new(Mutex::new(SyncState::default()));
        let handler_state = Arc::clone(&state);
        let registration = tracker.register_feedback_handler(move |info| {
            let delta = {
                let mut state = handler_state.lock();
                if state.sync_output != info.sync_output {
                    if state.sync_output.is_some() {
                        debug!("Video sync output changed, restarting vblank count");
                    }
                    state.sync_output = info.sync_output;
                    state.last_msc = None;
                }
                state.refresh = info.refresh;
                let delta = match state.last_msc {
                    Some(last) if info.msc > last => info.msc - last,
                    Some(last) if info.msc < last => {
                        warn!("MSC went backwards ({last} -> {})", info.msc);
                        0
                    }
                    _ => 0,
                };
                state.last_msc = Some(info.msc);
                state.vblanks += delta;
                delta
            };
            if delta > 0 {
                on_vblanks(delta, info.timestamp);
            }
        });
        Self {
            state,
            _registration: registration,
        }
    }

    pub fn vblank_count(&self) -> u64 {
        self.state.lock().vblanks
    }

    /// Refresh rate reported with the last presented frame.
    pub fn refresh_rate(&self) -> Option<f32> {
        let refresh = self.state.lock().refresh;
        (!refresh.is_zero()).then(|| 1.0 / refresh.as_secs_f32())
    }
}

impl std::fmt::Debug for VideoSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSync")
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testing::FakeCompositor;
    use crate::wire::Interface;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        fake: Arc<FakeCompositor>,
        tracker: PresentationTracker,
        surface: ObjectId,
        _registry: Registry,
    }

    fn fixture(with_presentation: bool) -> Fixture {
        let fake = FakeCompositor::desktop();
        if with_presentation {
            fake.add_global(Interface::Presentation, 1);
        }
        let connection = fake.connection();
        let tracker = PresentationTracker::new(&connection, 3, Duration::from_millis(5));
        let mut registry = Registry::new(&connection);
        let compositor = registry
            .request_singleton(Interface::Compositor, 1, 4, true)
            .unwrap();
        let presentation = registry
            .request_singleton_with_listener(
                Interface::Presentation,
                1,
                1,
                false,
                tracker.presentation_listener(),
            )
            .unwrap();
        registry.bind().unwrap();
        tracker.set_presentation(presentation.object());
        let surface = connection
            .wire()
            .create(compositor.object().unwrap(), Create::Surface, None)
            .unwrap();
        Fixture {
            fake,
            tracker,
            surface,
            _registry: registry,
        }
    }

    fn present(fake: &FakeCompositor, after: Duration, msc: u64) {
        let feedback = *fake.objects_of(Interface::PresentationFeedback).last().unwrap();
        fake.advance_clock(after);
        fake.emit(
            feedback,
            Event::Presented {
                timestamp: Duration::from_secs(1) + after,
                refresh: 16_666_667,
                msc,
                flags: 0,
            },
        );
    }

    #[test]
    fn test_moving_average_window() {
        let mut average = MovingAverage::new(3);
        assert_eq!(average.average(), 0.0);
        for sample in [1.0, 2.0, 3.0, 10.0] {
            average.push(sample);
        }
        assert_eq!(average.len(), 3);
        assert!((average.average() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_from_presented_feedback() {
        let f = fixture(true);
        assert!(f.tracker.has_presentation());
        f.tracker.prepare_frame(f.surface).unwrap();
        present(&f.fake, Duration::from_millis(20), 100);
        assert!((f.tracker.display_latency_ms() - 20.0).abs() < 0.01);
        assert!(f.fake.objects_of(Interface::PresentationFeedback).is_empty());
    }

    #[test]
    fn test_discarded_frames_add_no_sample() {
        let f = fixture(true);
        f.tracker.prepare_frame(f.surface).unwrap();
        let feedback = f.fake.objects_of(Interface::PresentationFeedback)[0];
        f.fake.emit(feedback, Event::Discarded);
        assert_eq!(f.tracker.display_latency_ms(), 0.0);
        assert!(!f.fake.is_alive(feedback));
    }

    #[test]
    fn test_no_feedback_without_presentation() {
        let f = fixture(false);
        assert!(!f.tracker.has_presentation());
        f.tracker.prepare_frame(f.surface).unwrap();
        assert!(f.fake.objects_of(Interface::PresentationFeedback).is_empty());
        assert_eq!(f.fake.objects_of(Interface::Callback).len(), 1);
    }

    #[test]
    fn test_frame_wait_is_bounded() {
        let f = fixture(false);
        f.tracker.prepare_frame(f.surface).unwrap();
        let first = f.fake.objects_of(Interface::Callback)[0];

        // No frame callback: the next frame still proceeds after the timeout.
        let started = Instant::now();
        f.tracker.prepare_frame(f.surface).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(5));
        assert!(!f.fake.is_alive(first));

        // A delivered callback lets the next frame go immediately.
        let second = f.fake.objects_of(Interface::Callback)[0];
        f.fake.emit(second, Event::Done { data: 0 });
        let started = Instant::now();
        f.tracker.prepare_frame(f.surface).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_registration_drop_unregisters() {
        let f = fixture(true);
        let calls = Arc::new(AtomicUsize::new(0));
        let registration = {
            let calls = Arc::clone(&calls);
            f.tracker.register_feedback_handler(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        f.tracker.prepare_frame(f.surface).unwrap();
        present(&f.fake, Duration::from_millis(1), 1);
        drop(registration);
        f.tracker.prepare_frame(f.surface).unwrap();
        present(&f.fake, Duration::from_millis(1), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_video_sync_counts_msc_deltas() {
        let f = fixture(true);
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sync = {
            let reported = Arc::clone(&reported);
            VideoSync::new(&f.tracker, move |vblanks, _| reported.lock().push(vblanks))
        };
        for msc in [10, 11, 13] {
            f.tracker.prepare_frame(f.surface).unwrap();
            present(&f.fake, Duration::from_millis(16), msc);
        }
        assert_eq!(sync.vblank_count(), 3);
        assert_eq!(reported.lock().clone(), vec![1, 2]);
        let rate = sync.refresh_rate().unwrap();
        assert!((rate - 60.0).abs() < 0.01);
    }
}

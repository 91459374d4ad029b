//! Background event dispatch.
//!
//! The pump thread runs a calloop event loop with the connection fd as a
//! level-triggered source and dispatches whatever arrived. Requests never
//! need the queue, so listeners running here can issue them.

use std::io;
use std::os::fd::OwnedFd;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use calloop::generic::Generic;
use calloop::{EventLoop, Interest, LoopSignal, Mode, PostAction};
use parking_lot::Mutex;
use tracing::{debug, error};
use wayland_client::backend::WaylandError;
use wayland_client::{Connection, EventQueue};

use cinewin_core::wire::WireError;

use crate::dispatch::Dispatcher;

/// Upper bound between dispatches of events another reader queued.
const DISPATCH_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) struct QueueState {
    pub queue: EventQueue<Dispatcher>,
    pub dispatcher: Dispatcher,
}

impl QueueState {
    pub fn dispatch_pending(&mut self) -> Result<usize, WireError> {
        let Self { queue, dispatcher } = self;
        queue
            .dispatch_pending(dispatcher)
            .map_err(|e| WireError::Protocol(e.to_string()))
    }

    pub fn roundtrip(&mut self) -> Result<usize, WireError> {
        let Self { queue, dispatcher } = self;
        queue
            .roundtrip(dispatcher)
            .map_err(|e| WireError::Protocol(e.to_string()))
    }
}

struct PumpData<F> {
    pump: F,
    signal: LoopSignal,
}

impl<F> PumpData<F>
where
    F: FnMut() -> Result<(), WireError>,
{
    fn run_pump(&mut self) {
        if let Err(err) = (self.pump)() {
            error!("Event pump stopped: {err}");
            self.signal.stop();
        }
    }
}

pub(crate) struct EventPump {
    signal: LoopSignal,
    thread: Option<JoinHandle<()>>,
}

impl EventPump {
    pub fn start(connection: Connection, queue: Arc<Mutex<QueueState>>) -> Result<Self, WireError> {
        let fd = connection
            .backend()
            .poll_fd()
            .try_clone_to_owned()
            .map_err(|e| WireError::Connection(e.to_string()))?;
        Self::spawn(fd, move || pump_once(&connection, &queue))
    }

    /// Run `pump` on a dedicated thread whenever `fd` is readable, and at
    /// least every [`DISPATCH_TIMEOUT`].
    fn spawn<F>(fd: OwnedFd, pump: F) -> Result<Self, WireError>
    where
        F: FnMut() -> Result<(), WireError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("wayland-events".to_owned())
            .spawn(move || {
                let mut event_loop = match build_loop::<F>(fd) {
                    Ok(event_loop) => event_loop,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let signal = event_loop.get_signal();
                if ready_tx.send(Ok(signal.clone())).is_err() {
                    return;
                }
                let mut data = PumpData { pump, signal };
                debug!("Event pump started");
                if let Err(err) = event_loop.run(DISPATCH_TIMEOUT, &mut data, PumpData::run_pump) {
                    error!("Event loop failed: {err}");
                }
                debug!("Event pump exited");
            })
            .map_err(|e| WireError::EventPump(e.to_string()))?;

        let signal = ready_rx
            .recv()
            .map_err(|e| WireError::EventPump(e.to_string()))??;
        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        self.signal.stop();
        self.signal.wakeup();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                // Stopped from a listener; the loop exits on its own.
                return;
            }
            if thread.join().is_err() {
                error!("Event pump thread panicked");
            }
        }
    }
}

fn build_loop<F>(fd: OwnedFd) -> Result<EventLoop<'static, PumpData<F>>, WireError>
where
    F: FnMut() -> Result<(), WireError> + 'static,
{
    let event_loop =
        EventLoop::try_new().map_err(|e| WireError::EventPump(e.to_string()))?;
    event_loop
        .handle()
        .insert_source(
            Generic::new(fd, Interest::READ, Mode::Level),
            |_, _, data: &mut PumpData<F>| {
                data.run_pump();
                Ok(PostAction::Continue)
            },
        )
        .map_err(|e| WireError::EventPump(e.to_string()))?;
    Ok(event_loop)
}

fn pump_once(connection: &Connection, queue: &Mutex<QueueState>) -> Result<(), WireError> {
    let mut state = queue.lock();
    state.dispatch_pending()?;
    // `None` means another reader queued events; they were just dispatched.
    if let Some(guard) = state.queue.prepare_read() {
        match guard.read() {
            Ok(_) => {}
            Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(WireError::Connection(err.to_string())),
        }
        state.dispatch_pending()?;
    }
    flush(connection)
}

/// Flush outgoing requests; a full socket is retried next time around.
pub(crate) fn flush(connection: &Connection) -> Result<(), WireError> {
    match connection.flush() {
        Ok(()) => Ok(()),
        Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(err) => Err(WireError::Connection(err.to_string())),
    }
}

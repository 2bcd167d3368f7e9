//! Serial connection lifecycle and line dispatch
//!
//! An open connection runs two threads. The watcher owns the input stream and
//! forwards every `PortEvent` over a channel. The dispatcher is the only
//! consumer of that channel; it owns the `LineDecoder` and calls the line
//! handler, so callbacks for one connection never overlap.
//!
//! Each session has its own listening flag, shared only by its two threads.
//! `close()` clears it before anything else. Neither thread starts new work
//! once the flag is down, and both are joined before the device streams are
//! released. A flag is never raised again, so a reopen cannot revive the
//! threads of an earlier session.

use crate::error::{ConnectError, HandlerError, ReleaseError};
use crate::serial::event::PortEvent;
use crate::serial::lines::LineDecoder;
use crate::serial::port::{AcquireError, PortBackend, PortConfig, PortIo};
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

#[cfg(feature = "serial")]
use crate::serial::port::SystemBackend;

/// Pause between attempts to acquire a busy device
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Size of the watcher's read buffer
const READ_CHUNK_SIZE: usize = 1024;

/// Receives every decoded line, in arrival order
pub trait LineHandler: Send {
    fn handle_line(&mut self, line: String) -> anyhow::Result<()>;
}

impl<F> LineHandler for F
where
    F: FnMut(String) -> anyhow::Result<()> + Send,
{
    fn handle_line(&mut self, line: String) -> anyhow::Result<()> {
        self(line)
    }
}

/// Lifecycle state of a `SerialConnection`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
}

type SharedHandler = Arc<Mutex<Box<dyn LineHandler>>>;

/// Everything that exists only while the connection is open
struct Session {
    config: PortConfig,
    listening: Arc<AtomicBool>,
    watcher: JoinHandle<Box<dyn PortIo>>,
    dispatcher: JoinHandle<()>,
    output: Box<dyn PortIo>,
}

/// Stop flag and dispatcher thread of the running session
///
/// Kept outside the session lock so `close()` can stop dispatch while
/// `open()` or another `close()` holds that lock.
#[derive(Clone)]
struct Listener {
    listening: Arc<AtomicBool>,
    dispatcher: ThreadId,
}

/// Exclusive owner of one serial device
pub struct SerialConnection {
    backend: Arc<dyn PortBackend>,
    handler: SharedHandler,
    max_line_length: Option<usize>,
    state: Mutex<ConnectionState>,
    listener: Mutex<Option<Listener>>,
    session: Mutex<Option<Session>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SerialConnection {
    /// Create a closed connection that will report lines to `handler`
    pub fn new(backend: Arc<dyn PortBackend>, handler: impl LineHandler + 'static) -> Self {
        Self {
            backend,
            handler: Arc::new(Mutex::new(Box::new(handler))),
            max_line_length: None,
            state: Mutex::new(ConnectionState::Closed),
            listener: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Create a closed connection backed by the operating system's serial ports
    #[cfg(feature = "serial")]
    pub fn system(handler: impl LineHandler + 'static) -> Self {
        Self::new(Arc::new(SystemBackend), handler)
    }

    /// Discard lines longer than `limit` bytes instead of buffering them
    pub fn with_max_line_length(mut self, limit: Option<usize>) -> Self {
        self.max_line_length = limit;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    /// Open the device and start dispatching lines
    ///
    /// The connection is `Open` only once the device is acquired and
    /// configured, both streams exist and the listener is running. On any
    /// failure the device is released again and the state is `Closed`.
    pub fn open(&self, config: PortConfig) -> Result<(), ConnectError> {
        let mut session = lock(&self.session);
        if session.is_some() {
            return Err(ConnectError::unavailable(
                &config.port_path,
                "connection is already open",
            ));
        }

        self.set_state(ConnectionState::Opening);
        let established = match self.establish(config) {
            Ok(established) => established,
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                return Err(e);
            }
        };

        info!(
            "Opened serial port {} at {} baud",
            established.config.port_path, established.config.baud_rate
        );
        let listening = Arc::clone(&established.listening);
        *session = Some(established);
        self.set_state(ConnectionState::Open);
        drop(session);

        // A close() from the handler while the session lock was held only
        // lowered the flag; finish it here
        if !listening.load(Ordering::SeqCst) {
            self.close();
        }
        Ok(())
    }

    fn establish(&self, config: PortConfig) -> Result<Session, ConnectError> {
        let path = config.port_path.clone();
        if !self.backend.exists(&path) {
            return Err(ConnectError::PortNotFound { path });
        }

        let mut output = self.acquire(&config)?;

        if let Err(e) = output.configure(&config) {
            release_port(&path, output);
            return Err(ConnectError::unavailable(
                &path,
                format!("failed to apply port settings: {}", e),
            ));
        }

        let input = match output.try_clone() {
            Ok(input) => input,
            Err(e) => {
                release_port(&path, output);
                return Err(ConnectError::unavailable(
                    &path,
                    format!("failed to open input stream: {}", e),
                ));
            }
        };

        let listening = Arc::new(AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::channel();

        let dispatcher = match self.spawn_dispatcher(&path, &listening, events_rx) {
            Ok(handle) => handle,
            Err(e) => {
                release_port(&path, input);
                release_port(&path, output);
                return Err(ConnectError::unavailable(
                    &path,
                    format!("failed to start dispatcher: {}", e),
                ));
            }
        };
        // Registered before the watcher exists, so no line reaches the
        // handler before close() can recognise the dispatcher thread
        *lock(&self.listener) = Some(Listener {
            listening: Arc::clone(&listening),
            dispatcher: dispatcher.thread().id(),
        });

        let watcher = match self.spawn_watcher(&config, &listening, input, events_tx) {
            Ok(handle) => handle,
            Err(e) => {
                // The failed spawn dropped the sender, so the dispatcher exits
                listening.store(false, Ordering::SeqCst);
                let _ = dispatcher.join();
                *lock(&self.listener) = None;
                release_port(&path, output);
                return Err(ConnectError::unavailable(
                    &path,
                    format!("failed to start port watcher: {}", e),
                ));
            }
        };

        Ok(Session {
            config,
            listening,
            watcher,
            dispatcher,
            output,
        })
    }

    /// Acquire the device, retrying while busy until the open timeout
    fn acquire(&self, config: &PortConfig) -> Result<Box<dyn PortIo>, ConnectError> {
        let path = &config.port_path;
        let deadline = Instant::now() + config.open_timeout;

        loop {
            match self.backend.acquire(config) {
                Ok(port) => return Ok(port),
                Err(AcquireError::NotFound) => {
                    return Err(ConnectError::PortNotFound { path: path.clone() })
                }
                Err(AcquireError::Refused(reason)) => {
                    return Err(ConnectError::unavailable(path, reason))
                }
                Err(AcquireError::Busy(reason)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ConnectError::unavailable(
                            path,
                            format!(
                                "not acquired within {} ms: {}",
                                config.open_timeout.as_millis(),
                                reason
                            ),
                        ));
                    }
                    debug!("Serial port {} busy ({}), retrying", path, reason);
                    thread::sleep(ACQUIRE_RETRY_INTERVAL.min(deadline - now));
                }
            }
        }
    }

    fn spawn_dispatcher(
        &self,
        path: &str,
        listening: &Arc<AtomicBool>,
        events: Receiver<PortEvent>,
    ) -> std::io::Result<JoinHandle<()>> {
        let path = path.to_string();
        let listening = Arc::clone(listening);
        let handler = Arc::clone(&self.handler);
        let decoder = match self.max_line_length {
            Some(limit) => LineDecoder::with_max_line_length(limit),
            None => LineDecoder::new(),
        };

        thread::Builder::new()
            .name(format!("serial-dispatch:{}", path))
            .spawn(move || dispatch_events(&path, events, &listening, &handler, decoder))
    }

    fn spawn_watcher(
        &self,
        config: &PortConfig,
        listening: &Arc<AtomicBool>,
        input: Box<dyn PortIo>,
        events: Sender<PortEvent>,
    ) -> std::io::Result<JoinHandle<Box<dyn PortIo>>> {
        let path = config.port_path.clone();
        let listening = Arc::clone(listening);

        thread::Builder::new()
            .name(format!("serial-watch:{}", path))
            .spawn(move || watch_port(&path, input, &listening, events))
    }

    /// Stop dispatching and release the device
    ///
    /// Safe to call any number of times from any thread, including from the
    /// line handler. Returns once no callback is running (other than the
    /// caller's own) and the device has been released.
    pub fn close(&self) {
        let current = lock(&self.listener).clone();
        let on_dispatcher = match current {
            Some(listener) => {
                listener.listening.store(false, Ordering::SeqCst);
                listener.dispatcher == thread::current().id()
            }
            None => false,
        };

        let mut session = if on_dispatcher {
            match self.session.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // open() or another close() holds the lock; either one
                // finishes the shutdown once the flag is down
                Err(TryLockError::WouldBlock) => return,
            }
        } else {
            lock(&self.session)
        };

        if let Some(active) = session.take() {
            *lock(&self.listener) = None;
            shutdown(active, on_dispatcher);
        }
        self.set_state(ConnectionState::Closed);
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn shutdown(session: Session, on_dispatcher: bool) {
    let Session {
        config,
        listening,
        watcher,
        dispatcher,
        output,
    } = session;
    let path = &config.port_path;
    listening.store(false, Ordering::SeqCst);

    let input = match watcher.join() {
        Ok(input) => Some(input),
        Err(_) => {
            error!("Watcher thread for {} panicked", path);
            None
        }
    };

    if !on_dispatcher && dispatcher.join().is_err() {
        error!("Dispatcher thread for {} panicked", path);
    }

    if let Some(input) = input {
        release_port(path, input);
    }
    release_port(path, output);

    info!("Closed serial port {}", path);
}

fn release_port(path: &str, port: Box<dyn PortIo>) {
    if let Err(source) = port.release() {
        let err = ReleaseError {
            path: path.to_string(),
            source,
        };
        warn!("{}", err);
    }
}

/// Watcher loop: read from the device and forward events
fn watch_port(
    path: &str,
    mut input: Box<dyn PortIo>,
    listening: &AtomicBool,
    events: Sender<PortEvent>,
) -> Box<dyn PortIo> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    while listening.load(Ordering::SeqCst) {
        match input.poll(&mut buf) {
            Ok(None) => {}
            Ok(Some(event)) => {
                let last = event == PortEvent::Disconnected;
                if events.send(event).is_err() || last {
                    break;
                }
            }
            Err(e) => {
                error!("Read error on {}: {}", path, e);
                let _ = events.send(PortEvent::Disconnected);
                break;
            }
        }
    }

    debug!("Stopped watching {}", path);
    input
}

/// Dispatcher loop: the single consumer of port events
fn dispatch_events(
    path: &str,
    events: Receiver<PortEvent>,
    listening: &AtomicBool,
    handler: &SharedHandler,
    mut decoder: LineDecoder,
) {
    for event in events.iter() {
        if !listening.load(Ordering::SeqCst) {
            break;
        }

        match event {
            PortEvent::DataAvailable(bytes) => {
                on_data_ready(&bytes, &mut decoder, listening, handler)
            }
            PortEvent::Disconnected => {
                warn!("Serial port {} disconnected; no further lines will arrive", path)
            }
            other => debug!("Ignoring {} event on {}", other.kind(), path),
        }
    }

    let stats = decoder.stats();
    debug!(
        "Dispatcher for {} stopped: {} lines, {} malformed bytes, {} overflows",
        path, stats.lines, stats.malformed_bytes, stats.overflows
    );
}

fn on_data_ready(
    bytes: &[u8],
    decoder: &mut LineDecoder,
    listening: &AtomicBool,
    handler: &SharedHandler,
) {
    decoder.feed(bytes);

    while let Some(line) = decoder.next_line() {
        if !listening.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = dispatch_line(handler, line) {
            warn!("{}", e);
        }
    }
}

/// Run the handler on one line, containing errors and panics
fn dispatch_line(handler: &SharedHandler, line: String) -> Result<(), HandlerError> {
    let mut handler = lock(handler);

    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle_line(line))) {
        Ok(result) => result.map_err(HandlerError::Failed),
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

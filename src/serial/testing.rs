//! In-memory port backend for connection tests

use crate::serial::event::PortEvent;
use crate::serial::port::{AcquireError, PortBackend, PortConfig, PortIo};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Simulated device shared between the backend and every handle on it
#[derive(Debug, Default)]
pub(crate) struct FakeDevice {
    held: AtomicBool,
    reject_settings: AtomicBool,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    incoming: Mutex<VecDeque<PortEvent>>,
}

impl FakeDevice {
    /// Queue bytes as if the device had sent them
    pub(crate) fn send(&self, bytes: &[u8]) {
        self.push_event(PortEvent::DataAvailable(bytes.to_vec()));
    }

    pub(crate) fn push_event(&self, event: PortEvent) {
        self.incoming.lock().unwrap().push_back(event);
    }

    /// Events not yet picked up by a watcher
    pub(crate) fn pending(&self) -> usize {
        self.incoming.lock().unwrap().len()
    }

    pub(crate) fn reject_settings(&self) {
        self.reject_settings.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub(crate) fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct FakeBackend {
    devices: Arc<Mutex<HashMap<String, Arc<FakeDevice>>>>,
}

impl FakeBackend {
    pub(crate) fn with_device(path: &str) -> (Self, Arc<FakeDevice>) {
        let backend = Self::default();
        let device = backend.add_device(path);
        (backend, device)
    }

    pub(crate) fn add_device(&self, path: &str) -> Arc<FakeDevice> {
        let device = Arc::new(FakeDevice::default());
        self.devices
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::clone(&device));
        device
    }
}

impl PortBackend for FakeBackend {
    fn exists(&self, path: &str) -> bool {
        self.devices.lock().unwrap().contains_key(path)
    }

    fn acquire(&self, config: &PortConfig) -> Result<Box<dyn PortIo>, AcquireError> {
        let device = self
            .devices
            .lock()
            .unwrap()
            .get(&config.port_path)
            .cloned()
            .ok_or(AcquireError::NotFound)?;

        if device.held.swap(true, Ordering::SeqCst) {
            return Err(AcquireError::Busy("device busy".to_string()));
        }
        device.acquisitions.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakePort {
            device,
            primary: true,
            poll_interval: config.poll_interval,
        }))
    }
}

/// Handle on a `FakeDevice`; only the handle returned by `acquire` owns the lock
struct FakePort {
    device: Arc<FakeDevice>,
    primary: bool,
    poll_interval: Duration,
}

impl PortIo for FakePort {
    fn configure(&mut self, config: &PortConfig) -> io::Result<()> {
        if self.device.reject_settings.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate: {}", config.baud_rate),
            ));
        }
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn PortIo>> {
        Ok(Box::new(FakePort {
            device: Arc::clone(&self.device),
            primary: false,
            poll_interval: self.poll_interval,
        }))
    }

    fn poll(&mut self, _buf: &mut [u8]) -> io::Result<Option<PortEvent>> {
        if let Some(event) = self.device.incoming.lock().unwrap().pop_front() {
            return Ok(Some(event));
        }
        thread::sleep(self.poll_interval.min(Duration::from_millis(2)));
        Ok(None)
    }

    fn release(self: Box<Self>) -> io::Result<()> {
        if self.primary {
            self.device.releases.fetch_add(1, Ordering::SeqCst);
            self.device.held.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

//! Notifications raised by an open serial port

/// A notification delivered from the port watcher to the dispatcher
///
/// Only `DataAvailable` is acted on today. The other kinds are logged and
/// skipped by the dispatcher; handling one means adding a match arm there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// Bytes were read from the device
    DataAvailable(Vec<u8>),
    /// The output buffer drained
    OutputEmpty,
    /// A break condition was detected on the line
    Break,
    /// A byte was received with a framing error
    FramingError,
    /// The device went away; the watcher stops after sending this
    Disconnected,
}

impl PortEvent {
    /// Short name for log output
    pub fn kind(&self) -> &'static str {
        match self {
            PortEvent::DataAvailable(_) => "data-available",
            PortEvent::OutputEmpty => "output-empty",
            PortEvent::Break => "break",
            PortEvent::FramingError => "framing-error",
            PortEvent::Disconnected => "disconnected",
        }
    }
}

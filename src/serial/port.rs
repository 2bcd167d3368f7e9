//! Serial port configuration and device access
//!
//! `PortBackend` and `PortIo` are the seam between the connection lifecycle and
//! the operating system. The `serial` feature provides the real backend on top
//! of the `serialport` crate.

use crate::serial::event::PortEvent;
use std::io;
use std::time::Duration;

#[cfg(feature = "serial")]
use colored::Colorize;
#[cfg(feature = "serial")]
use std::io::{Read, Write};

/// Device the listener connects to when nothing else is configured
pub const DEFAULT_PORT_PATH: &str = "/dev/ttyACM0";

/// Default data rate in bits per second
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long `open` keeps retrying a busy device
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(2000);

/// Upper bound on how long the watcher blocks in a single read
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Framing is fixed: 8 data bits, 1 stop bit, no parity
pub const DATA_BITS: u8 = 8;
pub const STOP_BITS: u8 = 1;

/// Parity setting; framing is fixed to 8N1, so `None` is the only value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
}

/// Configuration for serial port connection
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyACM0, COM3)
    pub port_path: String,
    /// Baud rate (default: 9600)
    pub baud_rate: u32,
    /// Data bits, always 8
    pub data_bits: u8,
    /// Stop bits, always 1
    pub stop_bits: u8,
    /// Parity, always none
    pub parity: Parity,
    /// Time allowed to acquire the device exclusively
    pub open_timeout: Duration,
    /// Read timeout of the watcher loop
    pub poll_interval: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from(DEFAULT_PORT_PATH),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DATA_BITS,
            stop_bits: STOP_BITS,
            parity: Parity::None,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PortConfig {
    /// Create a new configuration with the default line settings
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set how long `open` waits for a busy device
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the watcher read timeout
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Why a backend could not hand out a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// No such device
    NotFound,
    /// Held by another owner; worth retrying until the open timeout
    Busy(String),
    /// Refused outright (permissions, invalid settings)
    Refused(String),
}

/// Source of device handles
pub trait PortBackend: Send + Sync {
    /// Whether `path` names a device this backend can see
    fn exists(&self, path: &str) -> bool;

    /// Take exclusive ownership of the device
    fn acquire(&self, config: &PortConfig) -> Result<Box<dyn PortIo>, AcquireError>;
}

/// An open device handle
pub trait PortIo: Send {
    /// Apply line settings (rate, data bits, stop bits, parity)
    fn configure(&mut self, config: &PortConfig) -> io::Result<()>;

    /// Open a second stream on the same device
    fn try_clone(&self) -> io::Result<Box<dyn PortIo>>;

    /// Wait up to the poll interval for the next event
    ///
    /// `Ok(None)` means nothing happened within the interval.
    fn poll(&mut self, buf: &mut [u8]) -> io::Result<Option<PortEvent>>;

    /// Flush and let go of the handle
    fn release(self: Box<Self>) -> io::Result<()>;
}

/// Backend for real devices through the `serialport` crate
#[cfg(feature = "serial")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

#[cfg(feature = "serial")]
impl PortBackend for SystemBackend {
    fn exists(&self, path: &str) -> bool {
        if std::path::Path::new(path).exists() {
            return true;
        }

        // COM ports on Windows are not filesystem paths
        serialport::available_ports()
            .map(|ports| ports.iter().any(|p| p.port_name == path))
            .unwrap_or(false)
    }

    fn acquire(&self, config: &PortConfig) -> Result<Box<dyn PortIo>, AcquireError> {
        serialport::new(&config.port_path, config.baud_rate)
            .timeout(config.poll_interval)
            .open()
            .map(|port| Box::new(SystemPort { port }) as Box<dyn PortIo>)
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice
                | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => AcquireError::NotFound,
                serialport::ErrorKind::InvalidInput
                | serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                    AcquireError::Refused(e.description)
                }
                _ => AcquireError::Busy(e.description),
            })
    }
}

#[cfg(feature = "serial")]
struct SystemPort {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl PortIo for SystemPort {
    fn configure(&mut self, config: &PortConfig) -> io::Result<()> {
        let data_bits = match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            n => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported data bits: {}", n),
                ))
            }
        };
        let stop_bits = match config.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            n => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported stop bits: {}", n),
                ))
            }
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
        };

        self.port.set_baud_rate(config.baud_rate)?;
        self.port.set_data_bits(data_bits)?;
        self.port.set_stop_bits(stop_bits)?;
        self.port.set_parity(parity)?;
        self.port.set_flow_control(serialport::FlowControl::None)?;
        self.port.set_timeout(config.poll_interval)?;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn PortIo>> {
        let port = self.port.try_clone()?;
        Ok(Box::new(SystemPort { port }))
    }

    fn poll(&mut self, buf: &mut [u8]) -> io::Result<Option<PortEvent>> {
        match self.port.read(buf) {
            // A tty reads zero bytes only after hangup
            Ok(0) => Ok(Some(PortEvent::Disconnected)),
            Ok(n) => Ok(Some(PortEvent::DataAvailable(buf[..n].to_vec()))),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn release(mut self: Box<Self>) -> io::Result<()> {
        self.port.flush()
    }
}

/// Information about a detected serial port
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// List all available serial ports
#[cfg(feature = "serial")]
pub fn list_ports() -> anyhow::Result<Vec<PortInfo>> {
    use anyhow::Context;

    let ports = serialport::available_ports().with_context(|| "Failed to enumerate serial ports")?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (port_type, manufacturer, product, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    PortType::UsbSerial,
                    info.manufacturer,
                    info.product,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::PciPort => (PortType::PciSerial, None, None, None, None),
                serialport::SerialPortType::BluetoothPort => {
                    (PortType::Bluetooth, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => (PortType::Unknown, None, None, None, None),
            };

            PortInfo {
                path: p.port_name,
                port_type,
                manufacturer,
                product,
                vid,
                pid,
            }
        })
        .collect())
}

/// Print formatted list of available serial ports
#[cfg(feature = "serial")]
pub fn print_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Check the board is plugged in: ls -la /dev/ttyACM* /dev/ttyUSB*");
        println!("  2. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        println!("  3. Check dmesg for connection events: dmesg | tail -20");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{}",
        "Use: serial-listener listen -p <PORT> to start listening".yellow()
    );

    Ok(())
}

//! Serial Listener
//!
//! Listens to a serial device (typically a microcontroller on `/dev/ttyACM0`
//! at 9600 baud), splits the incoming byte stream into text lines and hands
//! every line to a [`LineHandler`]. The bundled [`report::PropertyReporter`]
//! parses `key=value` lines and prints them.
//!
#![cfg_attr(feature = "serial", doc = "```no_run")]
#![cfg_attr(not(feature = "serial"), doc = "```ignore")]
//! use serial_listener::{PortConfig, SerialConnection};
//!
//! let conn = SerialConnection::system(|line: String| -> anyhow::Result<()> {
//!     println!("{}", line);
//!     Ok(())
//! });
//! conn.open(PortConfig::new("/dev/ttyACM0"))?;
//! // ... lines are dispatched on a background thread ...
//! conn.close();
//! # Ok::<(), serial_listener::ConnectError>(())
//! ```

pub mod config;
pub mod error;
pub mod properties;
pub mod report;
pub mod serial;

pub use config::ListenerConfig;
pub use error::{ConnectError, DecodeError, HandlerError, ReleaseError};
pub use properties::{parse_line, ParseError, Properties};
pub use serial::{ConnectionState, LineDecoder, LineHandler, PortConfig, SerialConnection};

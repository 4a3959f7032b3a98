//! AT command transport.
//!
//! ```text
//!  SerialPort ─► AtAgent (parser task) ─► AtPort ─► bring-up / session
//!                        │
//!                        └─► UrcHandler (notification framers)
//! ```

pub mod agent;
pub mod cache;
pub mod port;
pub mod serial;
pub mod stream;

pub use agent::AtAgent;
pub use port::{AtPort, Echo, EchoStatus, command};
pub use serial::SerialPort;
pub use stream::{ByteSource, UrcHandler};

//! # voltage_iec60870
//!
//! IEC 60870-5-104 master and slave protocol stack for Rust.
//!
//! This crate implements the IEC 60870-5-104 telecontrol protocol used for
//! SCADA communication with substations and RTUs: APDU framing, sequence
//! numbering with k/w flow control and t1/t2/t3 supervision, the ASDU
//! container and typed codecs for all standard information objects.
//!
//! ## Features
//!
//! - **Master**: [`Connection`] with autostart, commands and callbacks
//! - **Server**: [`server::Server`] with single active connection and an
//!   outbound queue
//! - **Full Protocol Support**: I-frames, S-frames, U-frames
//! - **Standard Timeouts**: t0, t1, t2, t3, k, w parameters
//! - **Type Safe**: typed information elements for every supported type
//! - **Pluggable security**: [`TransportSecurity`] wraps the TCP stream
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voltage_iec60870::{Asdu, Connection, ConnectionConfig, Cot, QOI_STATION};
//!
//! #[tokio::main]
//! async fn main() -> voltage_iec60870::Result<()> {
//!     let config = ConnectionConfig::new("192.168.1.100").asdu_handler(Arc::new(|asdu: &Asdu| {
//!         for io in asdu.elements().flatten() {
//!             println!("{} {:?}", io.address, io.element);
//!         }
//!         true
//!     }));
//!     let mut connection = Connection::new(config);
//!
//!     // Connect; STARTDT is sent automatically
//!     connection.connect().await?;
//!
//!     // Request general interrogation
//!     connection
//!         .send_interrogation_command(Cot::Activation, 1, QOI_STATION)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! IEC 60870-5-104 uses TCP/IP for communication (default port 2404).
//! The protocol defines three frame types:
//!
//! - **I-frame**: Information transfer (contains ASDU)
//! - **S-frame**: Supervisory (acknowledgment)
//! - **U-frame**: Unnumbered (control: STARTDT, STOPDT, TESTFR)
//!
//! ### APDU Structure
//!
//! ```text
//! APCI (6 bytes):
//! +--------+--------+--------+--------+--------+--------+
//! | 0x68   | Length | Control Field (4 bytes)           |
//! +--------+--------+--------+--------+--------+--------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod connection;
pub mod error;
pub mod link;
pub mod parameters;
pub mod server;
mod session;
pub mod transport;
pub mod types;

// Re-export main types
pub use codec::{Apdu, Direction, Iec104Codec, RawMessageHandler};
pub use connection::{
    AsduReceivedHandler, Connection, ConnectionConfig, ConnectionEvent, ConnectionEventHandler,
    ConnectionState,
};
pub use error::{Iec104Error, Result};
pub use parameters::*;
pub use server::{Server, ServerConfig, ServerConnectionEvent, ServerConnectionHandle};
pub use session::ConnectionStatistics;
pub use transport::{BoxedStream, ByteStream, TransportSecurity};
pub use types::*;

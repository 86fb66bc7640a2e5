//! # iec104_honeypot
//!
//! IEC 60870-5-104 outstation core for an ICS honeypot.
//!
//! The crate accepts TCP connections from controlling stations, runs the
//! IEC 104 link layer on each of them and answers commands and interrogations
//! from a configurable register table, the way a real substation RTU would.
//!
//! ## Features
//!
//! - **Link layer**: I/S/U frames, STARTDT/STOPDT/TESTFR, T0-T3 and W
//! - **Commands**: single/double commands, scaled and float set points
//! - **Interrogation**: station interrogation packed into size-bounded ASDUs
//! - **Session events**: every frame and lifecycle change reported to a sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use iec104_honeypot::{Address, NoopSink, Register, RegisterTable, Server, ServerConfig, TypeId};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> iec104_honeypot::Result<()> {
//!     let table = RegisterTable::from_registers(vec![
//!         Register::new(Address::new(1, 1), TypeId::SinglePoint, true.into()),
//!     ])?;
//!
//!     let server = Server::new(ServerConfig::default(), Arc::new(table), Arc::new(NoopSink))?;
//!     server.run(CancellationToken::new()).await
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
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod frame;
pub mod registers;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types
pub use codec::Iec104Codec;
pub use config::ServerConfig;
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use error::{Iec104Error, Result};
pub use events::{EventSink, NoopSink, SessionEvent};
pub use frame::Frame;
pub use registers::{Address, Register, RegisterDef, RegisterStore, RegisterTable};
pub use server::Server;
pub use session::{Action, CloseReason, LinkState, Session};
pub use types::*;

//! A userspace Bluetooth/ANT UART packet multiplexer and demultiplexer.
//!
//! This crate bridges a single shared UART transport to two local
//! clients, a Bluetooth host stack and an ANT host stack, tagging and
//! untagging packets by their framing byte as they cross between the
//! two worlds.
//!
//! # Example
//! This opens the default UART device and serves the Bluetooth and ANT
//! endpoints under their default local socket names, using the real
//! platform property store.
//!
//! ```no_run
//! # fn example() -> wcnss_mux::Result<()> {
//! use wcnss_mux::MuxBuilder;
//!
//! MuxBuilder::new().open()?.build().run()?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod mux;
pub mod status;
pub mod transport;

pub use builder::MuxBuilder;
pub use config::Side;
pub use error::{Error, ProtocolError, Result};
pub use framer::Frame;
pub use mux::Mux;
pub use status::{InMemoryPropertyStore, PropertyStore, ShellPropertyStore};

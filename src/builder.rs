//! Type-state builder for [`Mux`](crate::mux::Mux). Mirrors the
//! connect-then-configure-then-build shape used elsewhere in this crate's
//! lineage, reduced to the one transport mode this daemon speaks: a UART
//! device plus two named local endpoints.

use std::marker::PhantomData;

use crate::config::{DEFAULT_ANT_SOCK, DEFAULT_BT_SOCK, DEFAULT_DEVICE};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::mux::Mux;
use crate::status::{PropertyStore, ShellPropertyStore};
use crate::transport::Transport;

pub struct Init;
pub struct Opened;

/// Type-state builder: `new()` -> `open()` -> `build()`. The device can
/// only be opened once the builder has a path (defaulted to
/// [`DEFAULT_DEVICE`] if `device` is never called), and `build()` is only
/// reachable once the device is open.
pub struct MuxBuilder<T> {
    device: String,
    bt_sock: &'static str,
    ant_sock: &'static str,
    transport: Option<Transport>,
    _marker: PhantomData<T>,
}

impl Default for MuxBuilder<Init> {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxBuilder<Init> {
    pub fn new() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            bt_sock: DEFAULT_BT_SOCK,
            ant_sock: DEFAULT_ANT_SOCK,
            transport: None,
            _marker: PhantomData,
        }
    }

    /// Overrides the UART device path. Defaults to [`DEFAULT_DEVICE`].
    pub fn device(mut self, path: impl Into<String>) -> Self {
        self.device = path.into();
        self
    }

    /// Overrides the Bluetooth endpoint's abstract-namespace socket name.
    pub fn bt_socket(mut self, name: &'static str) -> Self {
        self.bt_sock = name;
        self
    }

    /// Overrides the ANT endpoint's abstract-namespace socket name.
    pub fn ant_socket(mut self, name: &'static str) -> Self {
        self.ant_sock = name;
        self
    }

    /// Opens and configures the UART device, advancing the builder to the
    /// state where `build()` becomes available.
    pub fn open(self) -> Result<MuxBuilder<Opened>> {
        let transport = Transport::open(&self.device)?;
        Ok(self.with_transport(transport))
    }

    /// Advances straight to the opened state with an already-constructed
    /// [`Transport`], skipping the device-path open. Exists for
    /// integration tests that drive the mux over
    /// `serial2::SerialPort::pair()` instead of a real UART device.
    #[doc(hidden)]
    pub fn with_transport(self, transport: Transport) -> MuxBuilder<Opened> {
        MuxBuilder {
            device: self.device,
            bt_sock: self.bt_sock,
            ant_sock: self.ant_sock,
            transport: Some(transport),
            _marker: PhantomData,
        }
    }
}

impl MuxBuilder<Opened> {
    /// Builds a [`Mux`] backed by the platform property store
    /// ([`ShellPropertyStore`]).
    pub fn build(self) -> Mux<ShellPropertyStore> {
        self.build_with_store(ShellPropertyStore)
    }

    /// Builds a [`Mux`] backed by a caller-supplied property store. Used
    /// by tests to substitute [`crate::status::InMemoryPropertyStore`]
    /// for the real platform one.
    pub fn build_with_store<S: PropertyStore + 'static>(self, store: S) -> Mux<S> {
        let transport = self.transport.expect("transport is opened before MuxBuilder<Opened> exists");
        let bt = Endpoint::new(self.bt_sock);
        let ant = Endpoint::new(self.ant_sock);
        Mux::new(transport, bt, ant, store)
    }
}

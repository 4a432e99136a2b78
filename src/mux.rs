//! The mux core: owns the transport and both endpoints, spawns the
//! reader threads, and implements the uplink/downlink routing matrix.

use std::sync::Arc;
use std::thread;

use crate::config::{property_keys, Side};
use crate::endpoint::{Endpoint, PeerHandle};
use crate::error::{Error, ProtocolError, Result};
use crate::framer::{self, Frame};
use crate::status::PropertyStore;
use crate::transport::Transport;

/// A fully wired mux, ready to run. Built by `MuxBuilder` (see
/// `crate::builder`).
pub struct Mux<S: PropertyStore + 'static> {
    transport: Arc<Transport>,
    bt: Arc<Endpoint>,
    ant: Arc<Endpoint>,
    store: Arc<S>,
}

impl<S: PropertyStore + 'static> Mux<S> {
    pub(crate) fn new(transport: Transport, bt: Endpoint, ant: Endpoint, store: S) -> Self {
        Self {
            transport: Arc::new(transport),
            bt: Arc::new(bt),
            ant: Arc::new(ant),
            store: Arc::new(store),
        }
    }

    /// Runs the mux forever: spawns the three reader threads and blocks on
    /// the transport reader, which is the thread the process lives or dies
    /// with (the two endpoint threads re-listen indefinitely on their own).
    pub fn run(self) -> Result<()> {
        // The reference daemon ignores SIGPIPE at startup so a write to a
        // socket whose peer vanished surfaces as EPIPE rather than killing
        // the process.
        ignore_sigpipe();

        self.store.set_hci_filter_status("1");

        let writer = self.transport.writer();

        let ant_peer_handle = self.ant.peer_handle();
        let bt_peer_handle = self.bt.peer_handle();

        let bt_handle = self.bt.clone();
        let bt_writer = writer.clone();
        let bt_store = self.store.clone();
        let bt_thread = thread::Builder::new()
            .name("bt_reader".into())
            .spawn(move || {
                bt_handle.serve(
                    &bt_writer,
                    || log::info!(target: "wcnss_mux::mux", "bt: peer connected"),
                    || on_endpoint_disconnect(&*bt_store, Side::Bt, &ant_peer_handle),
                );
            })?;

        let ant_handle = self.ant.clone();
        let ant_writer = writer.clone();
        let ant_store = self.store.clone();
        let ant_thread = thread::Builder::new()
            .name("ant_reader".into())
            .spawn(move || {
                ant_handle.serve(
                    &ant_writer,
                    || log::info!(target: "wcnss_mux::mux", "ant: peer connected"),
                    || on_endpoint_disconnect(&*ant_store, Side::Ant, &bt_peer_handle),
                );
            })?;

        let result = self.transport_reader_loop();

        // The endpoint threads never return under normal operation; if the
        // transport loop exits (fatal device error), tear down with it
        // rather than leaving orphaned listener threads behind.
        drop(bt_thread);
        drop(ant_thread);

        result
    }

    /// The loop driving `transport_reader`: reads a type byte off the
    /// UART, parses the frame, and routes it downlink to the matching
    /// endpoint, discarding silently if that endpoint has no peer and
    /// flushing-and-resuming on an unrecognized type byte.
    fn transport_reader_loop(&self) -> Result<()> {
        loop {
            let type_byte = match self.transport.read_byte() {
                Ok(b) => b,
                Err(e) => {
                    log::error!(target: "wcnss_mux::mux", "transport read failed: {e}");
                    return Err(e);
                }
            };

            if type_byte == framer::SSR_MARK {
                log::warn!(target: "wcnss_mux::mux", "subsystem restart marker observed");
                continue;
            }

            let mut src: &Transport = self.transport.as_ref();
            let frame = match framer::parse_next(type_byte, &mut src) {
                Ok(frame) => frame,
                Err(Error::Protocol(ProtocolError::UnknownType(b))) => {
                    log::warn!(target: "wcnss_mux::mux", "unknown downlink type byte 0x{b:02x}, flushing");
                    self.transport.flush_input()?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.route_downlink(&frame);
        }
    }

    /// Dispatches a downlink frame to its destination endpoint by type
    /// byte. Frames that parse but have no destination in the routing
    /// matrix (e.g. an uplink-only type byte observed downlink) and
    /// frames destined for an endpoint with no connected peer are both
    /// silently dropped.
    fn route_downlink(&self, frame: &Frame) {
        let destination = match frame.type_byte {
            framer::BT_EVT | framer::BT_ACL => Some((&self.bt, Side::Bt)),
            framer::ANT_CTL | framer::ANT_DATA => Some((&self.ant, Side::Ant)),
            _ => None,
        };

        let Some((endpoint, side)) = destination else {
            log::debug!(
                target: "wcnss_mux::mux",
                "downlink type byte 0x{:02x} has no destination, dropped",
                frame.type_byte
            );
            return;
        };

        if let Err(e) = write_to_peer(&endpoint.peer_handle(), frame) {
            log::debug!(target: "wcnss_mux::mux", "{side}: no connected peer, dropped ({e})");
        }
    }
}

fn write_to_peer(peer: &PeerHandle, frame: &Frame) -> Result<()> {
    use std::io::Write;
    let mut guard = peer.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_mut() {
        Some(stream) => {
            let bytes = frame.to_bytes();
            stream.write_all(&bytes).map_err(Error::Io)
        }
        None => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no connected peer",
        ))),
    }
}

/// Mirrors the reference daemon's `handle_cleanup`: decrements the
/// externally-maintained reference count unless a cleanup request is
/// already pending, and if neither endpoint has a peer left, tears the
/// filter status down and exits the process outright.
///
/// `other_peer` is the *other* endpoint's peer handle, not this one's:
/// the "both peers absent" check needs both sides, and by the time this
/// runs the disconnecting endpoint has already cleared its own handle.
fn on_endpoint_disconnect<S: PropertyStore>(store: &S, side: Side, other_peer: &PeerHandle) {
    log::info!(target: "wcnss_mux::mux", "{side}: peer gone");

    let clean = store.get(property_keys::CLEAN_UP).unwrap_or_else(|| "0".to_string());
    if clean == "0" {
        let ref_val = store.ref_count();
        if ref_val > 0 {
            store.set_ref_count(ref_val - 1);
        }
    }

    let other_present = other_peer.lock().unwrap_or_else(|e| e.into_inner()).is_some();
    if other_present {
        return;
    }

    if store.hci_filter_status() == "0" {
        log::info!(target: "wcnss_mux::mux", "already stopped");
        return;
    }

    store.set_hci_filter_status("0");
    store.set(property_keys::START_HCI, "false");
    log::info!(target: "wcnss_mux::mux", "both endpoints idle, exiting");
    std::process::exit(0);
}

#[cfg(unix)]
fn ignore_sigpipe() {
    // SAFETY: SIG_IGN is a valid disposition for SIGPIPE and this call
    // has no preconditions beyond being on a Unix target.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

//! Per-client listener: binds a named local rendezvous, accepts one peer
//! at a time, verifies credentials, exposes a connected byte channel, and
//! republishes itself after disconnect.

use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::config::{effective_uid, is_allowed_uid, LISTEN_BACKLOG};
use crate::error::{Error, ProtocolError, Result};
use crate::framer::{self, read_exact_from, ByteSource};
use crate::transport::TransportWriter;

/// Shared, atomically-observable peer handle. The endpoint thread owns
/// mutation; the transport reader only ever checks presence or writes a
/// single frame, holding the lock for no longer than that.
pub type PeerHandle = Arc<Mutex<Option<UnixStream>>>;

/// A client endpoint: owns its listen/peer lifecycle and exposes the
/// shared peer handle the transport reader consults for downlink routing.
pub struct Endpoint {
    name: &'static str,
    peer: PeerHandle,
}

struct StreamSource<'a>(&'a mut UnixStream);
impl ByteSource for StreamSource<'_> {
    fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        read_exact_from(self.0, n)
    }
}

impl Endpoint {
    pub fn new(name: &'static str) -> Self {
        Self { name, peer: Arc::new(Mutex::new(None)) }
    }

    /// The shared peer handle the mux hands to the transport reader.
    pub fn peer_handle(&self) -> PeerHandle {
        self.peer.clone()
    }

    /// Runs the accept/serve loop forever. Each iteration: bind, accept
    /// one peer, gate on credentials, run `on_connect`, serve frames until
    /// disconnect, run `on_disconnect`, and go back to listening.
    pub fn serve(
        &self,
        writer: &TransportWriter,
        mut on_connect: impl FnMut(),
        mut on_disconnect: impl FnMut(),
    ) -> ! {
        loop {
            let stream = match self.accept_one() {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!(target: "wcnss_mux::endpoint", "{}: accept failed: {e}", self.name);
                    continue;
                }
            };

            *self.peer.lock().unwrap_or_else(|e| e.into_inner()) = Some(stream);
            log::info!(target: "wcnss_mux::endpoint", "{}: peer connected", self.name);
            on_connect();

            self.serve_connected(writer);

            *self.peer.lock().unwrap_or_else(|e| e.into_inner()) = None;
            log::info!(target: "wcnss_mux::endpoint", "{}: peer disconnected", self.name);
            on_disconnect();
        }
    }

    /// Binds an abstract-namespace listener under `self.name`, accepts one
    /// peer, checks its credentials, and closes the listener either way
    /// (the listen handle is rebuilt fresh on every acceptance cycle).
    fn accept_one(&self) -> Result<UnixStream> {
        loop {
            let listener = bind_abstract_listener(self.name, LISTEN_BACKLOG)?;
            let (stream, _) = listener.accept()?;
            drop(listener);

            match self.check_credentials(&stream) {
                Ok(()) => return Ok(stream),
                Err(e) => {
                    log::warn!(target: "wcnss_mux::endpoint", "{}: {e}", self.name);
                    continue;
                }
            }
        }
    }

    fn check_credentials(&self, stream: &UnixStream) -> Result<()> {
        let uid = peer_uid(stream)?;
        let eff = effective_uid(uid);
        if is_allowed_uid(eff) {
            Ok(())
        } else {
            Err(Error::CredentialRejected(eff))
        }
    }

    /// Reads frames from the connected peer and forwards them to the
    /// transport until EOF, a framer error, or a fatal write error.
    fn serve_connected(&self, writer: &TransportWriter) {
        loop {
            let mut stream = {
                let guard = self.peer.lock().unwrap_or_else(|e| e.into_inner());
                match guard.as_ref() {
                    Some(s) => match s.try_clone() {
                        Ok(s) => s,
                        Err(e) => {
                            log::warn!(target: "wcnss_mux::endpoint", "{}: try_clone failed: {e}", self.name);
                            return;
                        }
                    },
                    None => return,
                }
            };

            let mut type_byte = [0u8; 1];
            match stream.read(&mut type_byte) {
                Ok(0) => {
                    log::debug!(target: "wcnss_mux::endpoint", "{}: peer EOF", self.name);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!(target: "wcnss_mux::endpoint", "{}: read error: {e}", self.name);
                    return;
                }
            }
            let type_byte = type_byte[0];

            if type_byte == framer::SSR_MARK {
                log::debug!(target: "wcnss_mux::endpoint", "{}: dropped SSR sentinel", self.name);
                continue;
            }

            let mut src = StreamSource(&mut stream);
            let frame = match framer::parse_next(type_byte, &mut src) {
                Ok(frame) => frame,
                Err(Error::Protocol(ProtocolError::UnknownType(b))) => {
                    log::warn!(target: "wcnss_mux::endpoint", "{}: unknown type byte 0x{b:02x}, closing", self.name);
                    return;
                }
                Err(e) => {
                    log::warn!(target: "wcnss_mux::endpoint", "{}: framer error: {e}", self.name);
                    return;
                }
            };

            if let Err(e) = forward_uplink(writer, &frame) {
                log::warn!(target: "wcnss_mux::endpoint", "{}: write error: {e}", self.name);
                return;
            }
        }
    }
}

/// Binds an abstract-namespace Unix listener with an explicit `listen()`
/// backlog. `std::os::unix::net::UnixListener::bind_addr` has no way to set
/// the backlog (it always uses the platform default), so the socket is
/// built, bound and listened on directly against libc and then handed to
/// `UnixListener::from_raw_fd`.
fn bind_abstract_listener(name: &str, backlog: i32) -> Result<UnixListener> {
    let name_bytes = name.as_bytes();
    let max_name_len = std::mem::size_of::<libc::sockaddr_un>()
        - std::mem::size_of::<libc::sa_family_t>()
        - 1;
    if name_bytes.len() > max_name_len {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "abstract socket name too long",
        )));
    }

    // SAFETY: `addr` is a zero-initialized, correctly sized `sockaddr_un`
    // for an abstract-namespace address (`sun_path[0] == 0` followed by
    // the name, with no NUL terminator and an address length that excludes
    // the unused tail of `sun_path`). The fd is only ever handed to
    // `UnixListener::from_raw_fd` once `listen` has succeeded on it.
    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let mut addr: libc::sockaddr_un = std::mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        addr.sun_path[0] = 0;
        for (i, &b) in name_bytes.iter().enumerate() {
            addr.sun_path[1 + i] = b as libc::c_char;
        }
        let addr_len = (std::mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len())
            as libc::socklen_t;

        if libc::bind(fd, &addr as *const _ as *const libc::sockaddr, addr_len) != 0 {
            let e = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(Error::Io(e));
        }
        if libc::listen(fd, backlog) != 0 {
            let e = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(Error::Io(e));
        }

        Ok(UnixListener::from_raw_fd(fd))
    }
}

/// Writes a frame to the transport, absorbing the connection-broken error
/// family (EPIPE/EBADF) per the writer failure policy: the transport can't
/// meaningfully signal a broken controller link on this path, so those
/// errors are treated as success and the endpoint handler continues.
fn forward_uplink(writer: &TransportWriter, frame: &framer::Frame) -> Result<()> {
    match writer.write_all(&frame.to_bytes()) {
        Ok(()) => Ok(()),
        Err(Error::Io(e))
            if matches!(e.raw_os_error(), Some(libc::EPIPE) | Some(libc::EBADF)) =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Reads the peer's uid via `SO_PEERCRED`. Linux-specific; the only
/// portable way to obtain this without depending on a dedicated
/// credentials crate is a direct `getsockopt` call.
fn peer_uid(stream: &UnixStream) -> Result<u32> {
    let mut creds = libc::ucred { pid: 0, uid: 0, gid: 0 };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    // SAFETY: `creds` and `len` are valid, correctly-sized out-params for
    // SOL_SOCKET/SO_PEERCRED on the fd we own via `stream`.
    let ret = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut creds as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(creds.uid)
}

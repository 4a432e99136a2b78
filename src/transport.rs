//! Owns the serial device. Exposes a read side (exclusively used by the
//! transport-reader thread) and a mutex-guarded write side shared by every
//! uplink writer, backed by the same underlying file descriptor.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serial2::{FlowControl, SerialPort, Settings, StopBits};

use crate::config::BAUD_RATE;
use crate::error::{Error, Result};
use crate::framer::{read_exact_from, ByteSource};

/// The serial device, opened and configured per §4.2/§6: raw mode, 8N1,
/// RTS/CTS hardware flow control, 3 Mbaud both directions.
pub struct Transport {
    port: Arc<SerialPort>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Opens and configures the UART, flushing both directions twice
    /// around attribute application as the device requires.
    pub fn open(device_path: &str) -> Result<Self> {
        let port = SerialPort::open(device_path, configure_line)?;
        port.discard_input_buffer()?;
        port.discard_output_buffer()?;
        port.discard_input_buffer()?;
        port.discard_output_buffer()?;
        log::info!(target: "wcnss_mux::transport", "opened {device_path} at {BAUD_RATE} baud");
        Ok(Self { port: Arc::new(port) })
    }

    /// Returns a mutex-guarded writer handle sharing this transport's
    /// underlying file descriptor. Cheap to clone; intended to be handed
    /// to every endpoint thread.
    pub fn writer(&self) -> TransportWriter {
        TransportWriter { port: self.port.clone(), lock: Arc::new(Mutex::new(())) }
    }

    /// Reads a single byte (the type indicator). Blocks until one byte is
    /// available or the device errors.
    pub fn read_byte(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            match (&*self.port).read(&mut buf) {
                Ok(0) => return Err(Error::ShortRead { expected: 1, got: 0 }),
                Ok(_) => return Ok(buf[0]),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Discards queued input bytes. Used on unknown-type-byte recovery so
    /// parsing can resume cleanly.
    pub fn flush_input(&self) -> Result<()> {
        self.port.discard_input_buffer().map_err(Error::Io)
    }

    /// Wraps an already-open port without applying [`configure_line`] or
    /// flushing it. Test fixtures build transports over
    /// `serial2::SerialPort::pair()`, which does not accept the line
    /// settings a real UART device requires.
    #[doc(hidden)]
    pub fn from_port(port: SerialPort) -> Self {
        Self { port: Arc::new(port) }
    }
}

// Implemented for `&Transport` rather than `Transport`: reading from the
// shared file descriptor never needs exclusive access (the underlying
// `&SerialPort` is itself `Read`), and the transport-reader thread only
// ever holds the transport behind an `Arc`.
impl ByteSource for &Transport {
    fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        read_exact_from(&mut &*self.port, n)
    }
}

fn configure_line(mut settings: Settings) -> std::io::Result<Settings> {
    settings.set_raw();
    settings.set_baud_rate(BAUD_RATE)?;
    settings.set_stop_bits(StopBits::One);
    settings.set_flow_control(FlowControl::RtsCts);
    Ok(settings)
}

/// The mutex-guarded write side of the transport. Every thread that wants
/// to send a frame uplink obtains one of these (they're cheap clones of
/// the same lock and file descriptor) rather than touching `Transport`
/// directly.
#[derive(Clone)]
pub struct TransportWriter {
    port: Arc<SerialPort>,
    lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for TransportWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportWriter").finish_non_exhaustive()
    }
}

impl TransportWriter {
    /// Writes `bytes` atomically with respect to every other writer
    /// sharing this handle: the mutex is held for the full write, and is
    /// never held across a blocking read.
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        write_all_resumable(&*self.port, bytes)
    }
}

/// Loops over partial writes until all of `bytes` has been written. A
/// `write` returning zero after some bytes have already been written is
/// treated as success of those bytes (the caller has nothing left to
/// retry that the device hasn't already accepted); zero with nothing
/// written yet is an error.
fn write_all_resumable(mut w: impl Write, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match w.write(&bytes[offset..]) {
            Ok(0) if offset == 0 => {
                return Err(Error::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "write returned 0 with no bytes written",
                )));
            }
            Ok(0) => break,
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyWriter {
        chunks: Vec<usize>,
        buf: Vec<u8>,
    }
    impl Write for FlakyWriter {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            let n = self.chunks.remove(0).min(data.len());
            self.buf.extend_from_slice(&data[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_all_resumable_handles_partial_writes() {
        let mut w = FlakyWriter { chunks: vec![2, 0, 3], buf: Vec::new() };
        write_all_resumable(&mut w, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(w.buf, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn write_all_resumable_errors_on_zero_with_nothing_written() {
        let mut w = FlakyWriter { chunks: vec![0], buf: Vec::new() };
        let err = write_all_resumable(&mut w, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

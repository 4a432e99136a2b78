//! End-to-end tests driving the real reader threads: a `serial2`
//! pseudo-terminal pair stands in for the UART, and real abstract-namespace
//! Unix sockets stand in for the Bluetooth/ANT client processes.

use std::io::{Read, Write};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixStream};
use std::thread;
use std::time::Duration;

use serial2::SerialPort;
use uuid::Uuid;
use wcnss_mux::builder::MuxBuilder;
use wcnss_mux::status::InMemoryPropertyStore;
use wcnss_mux::transport::Transport;

fn unique_name(prefix: &str) -> &'static str {
    let name = format!("{prefix}-{}", Uuid::new_v4());
    Box::leak(name.into_boxed_str())
}

fn connect(name: &str) -> UnixStream {
    let addr = SocketAddr::from_abstract_name(name.as_bytes()).unwrap();
    // The endpoint thread's listener may not be bound yet; retry briefly.
    for _ in 0..100 {
        if let Ok(stream) = UnixStream::connect_addr(&addr) {
            return stream;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("could not connect to {name}");
}

/// Spawns a mux over a fresh pseudo-terminal pair, returning the thread
/// handle (joinable once the far side of the pair is dropped) and the
/// test-facing half of the pair.
fn spawn_mux(bt_sock: &'static str, ant_sock: &'static str) -> (thread::JoinHandle<()>, SerialPort) {
    let (mux_port, test_port) = SerialPort::pair().expect("platform supports pty pairs");
    let transport = Transport::from_port(mux_port);

    let mux = MuxBuilder::new()
        .bt_socket(bt_sock)
        .ant_socket(ant_sock)
        .with_transport(transport)
        .build_with_store(InMemoryPropertyStore::default());

    let handle = thread::spawn(move || {
        let _ = mux.run();
    });

    (handle, test_port)
}

#[test]
fn uplink_bt_command_crosses_to_the_transport() {
    let bt_sock = unique_name("wcnss-test-bt");
    let ant_sock = unique_name("wcnss-test-ant");
    let (_handle, mut test_port) = spawn_mux(bt_sock, ant_sock);

    let mut client = connect(bt_sock);
    // BT_CMD, header [0x03, 0x0c, 0x00] (zero-length payload).
    client.write_all(&[0x01, 0x03, 0x0c, 0x00]).unwrap();

    let mut buf = [0u8; 4];
    test_port.set_read_timeout(Duration::from_secs(5)).unwrap();
    test_port.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [0x01, 0x03, 0x0c, 0x00]);
}

#[test]
fn downlink_ant_data_crosses_to_the_connected_peer() {
    let bt_sock = unique_name("wcnss-test-bt");
    let ant_sock = unique_name("wcnss-test-ant");
    let (_handle, mut test_port) = spawn_mux(bt_sock, ant_sock);

    let mut client = connect(ant_sock);
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    // Give the endpoint thread time to finish its credential check and
    // start its read loop before the frame arrives from the transport.
    thread::sleep(Duration::from_millis(50));

    // ANT_DATA, length byte 0x03, three-byte payload.
    test_port.write_all(&[0x0e, 0x03, 0x11, 0x22, 0x33]).unwrap();

    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [0x0e, 0x03, 0x11, 0x22, 0x33]);
}

#[test]
fn downlink_with_no_connected_peer_is_silently_dropped() {
    let bt_sock = unique_name("wcnss-test-bt");
    let ant_sock = unique_name("wcnss-test-ant");
    let (_handle, mut test_port) = spawn_mux(bt_sock, ant_sock);

    // No client ever connects to the ANT endpoint; sending a downlink ANT
    // frame must not block or crash the reader loop. A follow-up BT_EVT
    // still reaches a connected BT client afterwards, proving the reader
    // kept going.
    test_port.write_all(&[0x0e, 0x01, 0xaa]).unwrap();

    let mut client = connect(bt_sock);
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    thread::sleep(Duration::from_millis(50));

    test_port.write_all(&[0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]).unwrap();
    let mut buf = [0u8; 7];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
}

#[test]
fn unknown_downlink_type_byte_flushes_and_resumes() {
    let bt_sock = unique_name("wcnss-test-bt");
    let ant_sock = unique_name("wcnss-test-ant");
    let (_handle, mut test_port) = spawn_mux(bt_sock, ant_sock);

    let mut client = connect(bt_sock);
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    thread::sleep(Duration::from_millis(50));

    // 0x77 has no family descriptor; the reader must flush and resume
    // rather than getting stuck trying to parse a header for it.
    test_port.write_all(&[0x77, 0xaa, 0xbb, 0xcc]).unwrap();
    thread::sleep(Duration::from_millis(50));
    test_port.write_all(&[0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]).unwrap();

    let mut buf = [0u8; 7];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
}

//! The message assembler / connection state machine: drives the frame
//! reader in a loop, reassembles fragmented messages, answers control
//! frames inline, and enforces the protocol's sequencing rules.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use log::{trace, warn};

use crate::callbacks::Callbacks;
use crate::config::WsConfig;
use crate::error::WsError;
use crate::frame::{read_frame, write_frame, OpCode};
use crate::server::ConnId;

/// Close status codes that are passed through unchanged when echoing a
/// peer's Close frame; anything else is replaced by 1002.
fn is_allowed_close_status(status: u16) -> bool {
    matches!(status, 1000..=1003 | 1007..=1011 | 3000..=3999 | 4000..=4999)
}

struct Assembling {
    kind: OpCode,
    bytes: Vec<u8>,
}

/// Drives one connection's frame loop to completion. Returns once the
/// connection should be torn down, having made a best-effort attempt to
/// send an appropriate Close frame first. Does not fire `on_close` —
/// that's the caller's job, after it has removed the connection from its
/// registry, so a racing `send_text` never observes a half-torn-down entry.
pub(crate) fn run<R: Read>(
    conn: ConnId,
    reader: &mut R,
    writer: &Arc<Mutex<std::net::TcpStream>>,
    config: &WsConfig,
    callbacks: &Callbacks,
) {
    let mut assembling: Option<Assembling> = None;

    loop {
        let frame = match read_frame(reader, config.max_message_size) {
            Ok(frame) => frame,
            Err(err) => {
                handle_terminal_error(conn, &err, writer, callbacks);
                return;
            }
        };

        trace!(
            "conn {:?}: frame opcode={:?} fin={} len={}",
            conn,
            frame.opcode,
            frame.fin,
            frame.payload.len()
        );

        match frame.opcode {
            OpCode::Continuation => {
                let Some(mut current) = assembling.take() else {
                    close_with_violation(
                        conn,
                        writer,
                        callbacks,
                        "continuation frame with no fragmented message in progress",
                    );
                    return;
                };

                if current.bytes.len() + frame.payload.len() > config.max_message_size {
                    warn!("conn {:?}: assembled message exceeds max_message_size", conn);
                    send_close_best_effort(writer, 1009);
                    return;
                }
                current.bytes.extend_from_slice(&frame.payload);

                if frame.fin {
                    deliver(conn, current.kind, current.bytes, callbacks);
                } else {
                    assembling = Some(current);
                }
            }

            OpCode::Text | OpCode::Binary => {
                if assembling.is_some() {
                    close_with_violation(
                        conn,
                        writer,
                        callbacks,
                        "new data frame started while a fragmented message was in progress",
                    );
                    return;
                }

                if frame.fin {
                    deliver(conn, frame.opcode, frame.payload, callbacks);
                } else {
                    assembling = Some(Assembling {
                        kind: frame.opcode,
                        bytes: frame.payload,
                    });
                }
            }

            OpCode::Ping => {
                if let Err(e) = write_frame(&mut *lock(writer), OpCode::Pong, &frame.payload, false)
                {
                    warn!("conn {:?}: failed to send pong: {}", conn, e);
                    callbacks.fire_error(conn, &e);
                    return;
                }
            }

            OpCode::Pong => {
                // No keepalive timer in the core loop; a received Pong is
                // simply evidence the peer is alive.
            }

            OpCode::Close => {
                let status = parse_close_status(&frame.payload);
                match status {
                    Some(status) if is_allowed_close_status(status) => {
                        let _ = write_frame(
                            &mut *lock(writer),
                            OpCode::Close,
                            &status.to_be_bytes(),
                            false,
                        );
                    }
                    _ => {
                        send_close_best_effort(writer, 1002);
                    }
                }
                return;
            }
        }
    }
}

fn deliver(conn: ConnId, kind: OpCode, bytes: Vec<u8>, callbacks: &Callbacks) {
    let is_text = kind == OpCode::Text;
    callbacks.fire_message(conn, is_text, &bytes);
}

/// Parses the close status from a Close frame's payload. An empty payload
/// means 1000; a non-empty payload's status is the first two bytes,
/// big-endian.
fn parse_close_status(payload: &[u8]) -> Option<u16> {
    if payload.is_empty() {
        return Some(1000);
    }
    if payload.len() >= 2 {
        return Some(u16::from_be_bytes([payload[0], payload[1]]));
    }
    // A length-1 close payload is rejected by the frame reader before this
    // function is ever reached.
    None
}

fn close_with_violation(
    conn: ConnId,
    writer: &Arc<Mutex<std::net::TcpStream>>,
    callbacks: &Callbacks,
    reason: &str,
) {
    warn!("conn {:?}: protocol violation: {}", conn, reason);
    let err = WsError::violation(reason.to_string());
    callbacks.fire_error(conn, &err);
    send_close_best_effort(writer, 1002);
}

fn handle_terminal_error(
    conn: ConnId,
    err: &WsError,
    writer: &Arc<Mutex<std::net::TcpStream>>,
    callbacks: &Callbacks,
) {
    match err {
        WsError::PeerClosed => {
            trace!("conn {:?}: peer closed without a close frame", conn);
        }
        WsError::Io(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            warn!("conn {:?}: read timed out", conn);
            send_close_best_effort(writer, 1011);
        }
        WsError::Io(e) => {
            warn!("conn {:?}: I/O error: {}", conn, e);
            callbacks.fire_error(conn, err);
        }
        WsError::MessageTooLarge => {
            warn!("conn {:?}: message too large", conn);
            callbacks.fire_error(conn, err);
            send_close_best_effort(writer, 1009);
        }
        WsError::ProtocolViolation { reason, status } => {
            warn!("conn {:?}: protocol violation: {}", conn, reason);
            callbacks.fire_error(conn, err);
            send_close_best_effort(writer, *status);
        }
        other => {
            warn!("conn {:?}: {}", conn, other);
            callbacks.fire_error(conn, err);
        }
    }
}

fn send_close_best_effort(writer: &Arc<Mutex<std::net::TcpStream>>, status: u16) {
    let _ = write_frame(&mut *lock(writer), OpCode::Close, &status.to_be_bytes(), false);
}

fn lock(writer: &Arc<Mutex<std::net::TcpStream>>) -> std::sync::MutexGuard<'_, std::net::TcpStream> {
    match writer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::Callbacks;
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::sync::mpsc;

    /// Builds a loopback `TcpStream` pair so `connection::run`, which needs
    /// a real `TcpStream` for its writer half, has something to write to in
    /// tests without touching the acceptor/worker plumbing in server.rs.
    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    fn masked_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut buf = Vec::new();
        let fin_bit = if fin { 0x80 } else { 0x00 };
        buf.push(fin_bit | opcode.as_u8());
        let length = payload.len();
        assert!(length <= 125, "test helper only handles short payloads");
        buf.push(0x80 | length as u8);
        buf.extend_from_slice(&key);
        buf.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        buf
    }

    #[test]
    fn fragment_reassembly_delivers_one_message() {
        let mut wire = Vec::new();
        wire.extend(masked_frame(false, OpCode::Text, b"Hel"));
        wire.extend(masked_frame(false, OpCode::Continuation, b"lo, "));
        wire.extend(masked_frame(true, OpCode::Continuation, b"world"));
        let mut reader = Cursor::new(wire);

        let (server_stream, _client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));

        let (tx, rx) = mpsc::channel();
        let callbacks = Callbacks::builder()
            .on_message(move |_conn, is_text, bytes| {
                tx.send((is_text, bytes.to_vec())).unwrap();
            })
            .build();

        run(
            ConnId::for_test(1),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let (is_text, bytes) = rx.try_recv().unwrap();
        assert!(is_text);
        assert_eq!(bytes, b"Hello, world");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn control_interleaving_sends_pong_and_delivers_message() {
        let mut wire = Vec::new();
        wire.extend(masked_frame(false, OpCode::Text, b"Hel"));
        wire.extend(masked_frame(true, OpCode::Ping, b"x"));
        wire.extend(masked_frame(true, OpCode::Continuation, b"lo"));
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));

        let (tx, rx) = mpsc::channel();
        let callbacks = Callbacks::builder()
            .on_message(move |_conn, is_text, bytes| {
                tx.send((is_text, bytes.to_vec())).unwrap();
            })
            .build();

        run(
            ConnId::for_test(2),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let (is_text, bytes) = rx.try_recv().unwrap();
        assert!(is_text);
        assert_eq!(bytes, b"Hello");

        let mut pong_wire = [0u8; 3];
        client.read_exact(&mut pong_wire).unwrap();
        assert_eq!(pong_wire[0] & 0x0F, OpCode::Pong.as_u8());
        assert_eq!(&pong_wire[2..3], b"x");
    }

    #[test]
    fn unsolicited_continuation_is_a_violation() {
        let wire = masked_frame(true, OpCode::Continuation, b"oops");
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));
        let callbacks = Callbacks::builder().build();

        run(
            ConnId::for_test(3),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let mut close_wire = [0u8; 4];
        client.read_exact(&mut close_wire).unwrap();
        assert_eq!(close_wire[0] & 0x0F, OpCode::Close.as_u8());
        let status = u16::from_be_bytes([close_wire[2], close_wire[3]]);
        assert_eq!(status, 1002);
    }

    #[test]
    fn nested_start_is_a_violation() {
        let mut wire = Vec::new();
        wire.extend(masked_frame(false, OpCode::Text, b"a"));
        wire.extend(masked_frame(false, OpCode::Text, b"b"));
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));
        let callbacks = Callbacks::builder().build();

        run(
            ConnId::for_test(4),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let mut close_wire = [0u8; 4];
        client.read_exact(&mut close_wire).unwrap();
        let status = u16::from_be_bytes([close_wire[2], close_wire[3]]);
        assert_eq!(status, 1002);
    }

    #[test]
    fn close_echo_passes_through_allowed_status() {
        let wire = masked_frame(true, OpCode::Close, &1001u16.to_be_bytes());
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));
        let callbacks = Callbacks::builder().build();

        run(
            ConnId::for_test(5),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let mut close_wire = [0u8; 4];
        client.read_exact(&mut close_wire).unwrap();
        assert_eq!(close_wire[0] & 0x0F, OpCode::Close.as_u8());
        let status = u16::from_be_bytes([close_wire[2], close_wire[3]]);
        assert_eq!(status, 1001);
    }

    #[test]
    fn close_echo_on_empty_payload_is_status_1000() {
        let wire = masked_frame(true, OpCode::Close, b"");
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));
        let callbacks = Callbacks::builder().build();

        run(
            ConnId::for_test(9),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let mut close_wire = [0u8; 4];
        client.read_exact(&mut close_wire).unwrap();
        assert_eq!(close_wire[0] & 0x0F, OpCode::Close.as_u8());
        assert_eq!(close_wire[1] & 0x7F, 2, "echoed close payload must be exactly the 2-byte status");
        let status = u16::from_be_bytes([close_wire[2], close_wire[3]]);
        assert_eq!(status, 1000);
        assert!(client.read_exact(&mut [0u8; 1]).is_err(), "no reason text should follow");
    }

    #[test]
    fn close_echo_truncates_reason_text_to_status_bytes() {
        let mut payload = 1001u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        let wire = masked_frame(true, OpCode::Close, &payload);
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));
        let callbacks = Callbacks::builder().build();

        run(
            ConnId::for_test(10),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let mut close_wire = [0u8; 4];
        client.read_exact(&mut close_wire).unwrap();
        assert_eq!(close_wire[0] & 0x0F, OpCode::Close.as_u8());
        assert_eq!(close_wire[1] & 0x7F, 2, "echoed close payload must drop the reason text");
        let status = u16::from_be_bytes([close_wire[2], close_wire[3]]);
        assert_eq!(status, 1001);
        assert!(client.read_exact(&mut [0u8; 1]).is_err(), "reason text must not be echoed back");
    }

    #[test]
    fn close_with_disallowed_status_is_replaced_with_1002() {
        let wire = masked_frame(true, OpCode::Close, &(42u16).to_be_bytes());
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));
        let callbacks = Callbacks::builder().build();

        run(
            ConnId::for_test(6),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let mut close_wire = [0u8; 4];
        client.read_exact(&mut close_wire).unwrap();
        let status = u16::from_be_bytes([close_wire[2], close_wire[3]]);
        assert_eq!(status, 1002);
    }

    #[test]
    fn empty_message_is_delivered() {
        let wire = masked_frame(true, OpCode::Text, b"");
        let mut reader = Cursor::new(wire);

        let (server_stream, _client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));

        let (tx, rx) = mpsc::channel();
        let callbacks = Callbacks::builder()
            .on_message(move |_conn, is_text, bytes| {
                tx.send((is_text, bytes.to_vec())).unwrap();
            })
            .build();

        run(
            ConnId::for_test(7),
            &mut reader,
            &writer,
            &WsConfig::default(),
            &callbacks,
        );

        let (is_text, bytes) = rx.try_recv().unwrap();
        assert!(is_text);
        assert!(bytes.is_empty());
    }

    #[test]
    fn oversized_fragmented_message_closes_with_1009() {
        let mut config = WsConfig::default();
        config.max_message_size = 4;

        let mut wire = Vec::new();
        wire.extend(masked_frame(false, OpCode::Binary, b"ab"));
        wire.extend(masked_frame(true, OpCode::Continuation, b"cde"));
        let mut reader = Cursor::new(wire);

        let (server_stream, mut client) = loopback_pair();
        let writer = Arc::new(Mutex::new(server_stream));
        let callbacks = Callbacks::builder().build();

        run(ConnId::for_test(8), &mut reader, &writer, &config, &callbacks);

        let mut close_wire = [0u8; 4];
        client.read_exact(&mut close_wire).unwrap();
        let status = u16::from_be_bytes([close_wire[2], close_wire[3]]);
        assert_eq!(status, 1009);
    }
}

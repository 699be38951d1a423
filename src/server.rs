//! The owning server handle: configuration, callbacks, the live-connection
//! registry, and the acceptor/worker dispatch loop.
//!
//! Unlike the reference implementation this crate is built from — which
//! keeps its four callbacks in one process-wide global (`g_callbacks` in
//! `swss.c`) and uses the raw socket file descriptor as connection identity
//! — a `WsServer` owns its own callback set and registry, so a process may
//! run several independent servers side by side.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{info, warn};

use crate::callbacks::Callbacks;
use crate::config::WsConfig;
use crate::connection;
use crate::error::WsError;
use crate::frame::{write_frame, OpCode};
use crate::handshake;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque, `Copy`-able handle identifying one connection for the life of
/// the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    fn next() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: u64) -> Self {
        ConnId(id)
    }
}

type Registry = Mutex<std::collections::HashMap<ConnId, Arc<Mutex<TcpStream>>>>;

/// Owns one server's configuration, callbacks, and live connections.
///
/// `WsServer` has no `on_open`/`on_message`/`on_close`/`on_error` methods of
/// its own to call directly — those are the `Callbacks` supplied at
/// construction, invoked from worker threads as connections progress.
pub struct WsServer {
    config: WsConfig,
    callbacks: Callbacks,
    registry: Registry,
}

impl WsServer {
    /// Installs `config` and `callbacks`. Must be wrapped in an `Arc` (via
    /// `WsServer::start`) before `listen` can be called, since each worker
    /// thread needs shared access to the server.
    pub fn new(config: WsConfig, callbacks: Callbacks) -> Arc<WsServer> {
        Arc::new(WsServer {
            config,
            callbacks,
            registry: Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Binds `port` and accepts connections forever, spawning one worker
    /// thread per accepted connection. Blocking; returns only on a fatal
    /// bind error.
    pub fn listen(self: &Arc<Self>, port: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port))?;
        info!("listening on port {}", port);

        for incoming in listener.incoming() {
            match incoming {
                Ok(stream) => {
                    let server = Arc::clone(self);
                    thread::spawn(move || server.handle_connection(stream));
                }
                Err(e) => {
                    warn!("accept() failed: {}", e);
                    continue;
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        let mut handshake_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to clone stream for {}: {}", peer, e);
                return;
            }
        };

        if let Err(e) = handshake::perform(&mut handshake_stream, self.config.max_handshake_size) {
            warn!("handshake with {} failed: {}", peer, e);
            return;
        }

        if let Some(timeout) = self.config.read_timeout {
            let _ = stream.set_read_timeout(Some(timeout));
        }
        if let Some(timeout) = self.config.write_timeout {
            let _ = stream.set_write_timeout(Some(timeout));
        }

        let mut reader = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to clone stream for {}: {}", peer, e);
                return;
            }
        };
        let writer = Arc::new(Mutex::new(stream));

        let conn = ConnId::next();
        self.registry
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(conn, Arc::clone(&writer));

        info!("conn {:?}: open ({})", conn, peer);
        self.callbacks.fire_open(conn);

        connection::run(conn, &mut reader, &writer, &self.config, &self.callbacks);

        self.registry
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&conn);
        let _ = writer.lock().unwrap_or_else(|p| p.into_inner()).shutdown(std::net::Shutdown::Both);

        info!("conn {:?}: closed", conn);
        self.callbacks.fire_close(conn);
    }

    /// Sends a Text frame to `conn`. Fails with `UnknownConnection` if the
    /// connection is no longer registered (already closed, or never
    /// existed).
    pub fn send_text(&self, conn: ConnId, bytes: &[u8]) -> Result<(), WsError> {
        self.send(conn, OpCode::Text, bytes)
    }

    /// Sends a Binary frame to `conn`.
    pub fn send_binary(&self, conn: ConnId, bytes: &[u8]) -> Result<(), WsError> {
        self.send(conn, OpCode::Binary, bytes)
    }

    fn send(&self, conn: ConnId, opcode: OpCode, bytes: &[u8]) -> Result<(), WsError> {
        let writer = {
            let registry = self.registry.lock().unwrap_or_else(|p| p.into_inner());
            registry.get(&conn).cloned()
        };
        let writer = writer.ok_or(WsError::UnknownConnection)?;
        let mut stream = writer.lock().unwrap_or_else(|p| p.into_inner());
        let result = write_frame(&mut *stream, opcode, bytes, false);
        if let Err(ref e) = result {
            warn!("conn {:?}: send failed: {}", conn, e);
            self.callbacks.fire_error(conn, e);
        }
        result
    }
}

//! Binary entry point: a minimal echo server built on the `swss` library.
//!
//! Bind, log, accept loop, echo text back to the sender — the loop itself
//! now lives inside `WsServer::listen`; this file only wires up logging and
//! an echo-style callback set.

use std::env;
use std::sync::{Arc, OnceLock};

use swss::{Callbacks, WsConfig, WsServer};

static SERVER: OnceLock<Arc<WsServer>> = OnceLock::new();

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port = env::args().nth(1).unwrap_or_else(|| "8080".to_string());

    let callbacks = Callbacks::builder()
        .on_open(|conn| log::info!("{:?} connected", conn))
        .on_message(|conn, is_text, bytes| {
            log::info!("{:?} sent {} bytes (text={})", conn, bytes.len(), is_text);
            let Some(server) = SERVER.get() else {
                return;
            };
            let result = if is_text {
                server.send_text(conn, bytes)
            } else {
                server.send_binary(conn, bytes)
            };
            if let Err(e) = result {
                log::warn!("{:?} echo failed: {}", conn, e);
            }
        })
        .on_close(|conn| log::info!("{:?} disconnected", conn))
        .on_error(|conn, err| log::error!("{:?} error: {}", conn, err))
        .build();

    let server = WsServer::new(WsConfig::default(), callbacks);
    SERVER
        .set(Arc::clone(&server))
        .unwrap_or_else(|_| panic!("main runs once"));

    log::info!("swss echo server starting on ws://0.0.0.0:{}/", port);
    if let Err(e) = server.listen(&port) {
        log::error!("server exited: {}", e);
        std::process::exit(1);
    }
}

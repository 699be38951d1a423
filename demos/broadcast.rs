//! A thin demonstration broadcaster. Mirrors a client-list broadcast against
//! the `swss` library's callback API, with the client list guarded by a
//! mutex since synchronization is left to the callback implementer.

use std::env;
use std::sync::{Arc, Mutex, OnceLock};

use swss::{Callbacks, ConnId, WsConfig, WsServer};

static SERVER: OnceLock<Arc<WsServer>> = OnceLock::new();

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port = env::args().nth(1).unwrap_or_else(|| "8080".to_string());
    let clients: Arc<Mutex<Vec<ConnId>>> = Arc::new(Mutex::new(Vec::new()));

    let open_clients = Arc::clone(&clients);
    let message_clients = Arc::clone(&clients);
    let close_clients = Arc::clone(&clients);

    let callbacks = Callbacks::builder()
        .on_open(move |conn| {
            open_clients.lock().unwrap().push(conn);
            log::info!("{:?} connected (total clients: {})", conn, open_clients.lock().unwrap().len());
        })
        .on_message(move |conn, is_text, bytes| {
            log::info!("broadcasting message from {:?} to all other clients", conn);
            let Some(server) = SERVER.get() else {
                return;
            };
            for &other in message_clients.lock().unwrap().iter() {
                if other == conn {
                    continue;
                }
                let result = if is_text {
                    server.send_text(other, bytes)
                } else {
                    server.send_binary(other, bytes)
                };
                if let Err(e) = result {
                    log::warn!("failed to relay to {:?}: {}", other, e);
                }
            }
        })
        .on_close(move |conn| {
            let mut clients = close_clients.lock().unwrap();
            clients.retain(|&c| c != conn);
            log::info!("{:?} disconnected (remaining clients: {})", conn, clients.len());
        })
        .on_error(|conn, err| log::error!("{:?} error: {}", conn, err))
        .build();

    let server = WsServer::new(WsConfig::default(), callbacks);
    SERVER
        .set(Arc::clone(&server))
        .unwrap_or_else(|_| panic!("main runs once"));

    log::info!("broadcast demo starting on ws://0.0.0.0:{}/", port);
    if let Err(e) = server.listen(&port) {
        log::error!("server exited: {}", e);
        std::process::exit(1);
    }
}

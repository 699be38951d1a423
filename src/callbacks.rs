//! The four user hooks a `WsServer` dispatches into.

use crate::error::WsError;
use crate::server::ConnId;

type OnOpen = Box<dyn Fn(ConnId) + Send + Sync>;
type OnMessage = Box<dyn Fn(ConnId, bool, &[u8]) + Send + Sync>;
type OnClose = Box<dyn Fn(ConnId) + Send + Sync>;
type OnError = Box<dyn Fn(ConnId, &WsError) + Send + Sync>;

/// Bundles the callback surface a `WsServer` dispatches into. Each hook is
/// optional; an uninstalled hook is simply a no-op.
pub struct Callbacks {
    on_open: Option<OnOpen>,
    on_message: Option<OnMessage>,
    on_close: Option<OnClose>,
    on_error: Option<OnError>,
}

impl Callbacks {
    pub fn builder() -> CallbacksBuilder {
        CallbacksBuilder::default()
    }

    pub(crate) fn fire_open(&self, conn: ConnId) {
        if let Some(cb) = &self.on_open {
            cb(conn);
        }
    }

    pub(crate) fn fire_message(&self, conn: ConnId, is_text: bool, bytes: &[u8]) {
        if let Some(cb) = &self.on_message {
            cb(conn, is_text, bytes);
        }
    }

    pub(crate) fn fire_close(&self, conn: ConnId) {
        if let Some(cb) = &self.on_close {
            cb(conn);
        }
    }

    pub(crate) fn fire_error(&self, conn: ConnId, error: &WsError) {
        if let Some(cb) = &self.on_error {
            cb(conn, error);
        }
    }
}

/// Builds a `Callbacks` one hook at a time, mirroring the four-field
/// `ws_callbacks_t` struct this crate's reference implementation wires up
/// in one shot, but without requiring every hook to be supplied.
#[derive(Default)]
pub struct CallbacksBuilder {
    on_open: Option<OnOpen>,
    on_message: Option<OnMessage>,
    on_close: Option<OnClose>,
    on_error: Option<OnError>,
}

impl CallbacksBuilder {
    pub fn on_open(mut self, f: impl Fn(ConnId) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(ConnId, bool, &[u8]) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(ConnId) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(ConnId, &WsError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Callbacks {
        Callbacks {
            on_open: self.on_open,
            on_message: self.on_message,
            on_close: self.on_close,
            on_error: self.on_error,
        }
    }
}

use std::cell::RefCell;
use std::sync::Arc;

use tokio::runtime::Handle;
use url::Url;

use crate::error::{ChatError, Result};
use crate::socket::{Connection, SocketConfig};

/// Owns at most one live [`Connection`].
///
/// `connect` is idempotent while a connection exists: later calls get the
/// same instance and their token is not applied. Use [`Self::reconnect`] to
/// start over with new credentials.
///
/// Meant to live on the UI thread; it is deliberately `!Sync`.
pub struct ConnectionManager {
    base_url: Url,
    config: SocketConfig,
    runtime: Handle,
    current: RefCell<Option<Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new(base_url: Url, config: SocketConfig, runtime: Handle) -> Self {
        Self {
            base_url,
            config,
            runtime,
            current: RefCell::new(None),
        }
    }

    pub fn connect(&self, token: &str) -> Result<Arc<Connection>> {
        if token.is_empty() {
            return Err(ChatError::MissingToken);
        }
        let mut current = self.current.borrow_mut();
        if let Some(conn) = current.as_ref() {
            if conn.token() != token {
                log::warn!(
                    "connection #{} already open with a different token; keeping the existing session",
                    conn.id()
                );
            }
            return Ok(conn.clone());
        }
        let conn = Arc::new(Connection::open(&self.base_url, token, &self.config, &self.runtime)?);
        *current = Some(conn.clone());
        Ok(conn)
    }

    /// Disconnect and forget the current connection, if any.
    pub fn close(&self) {
        if let Some(conn) = self.current.borrow_mut().take() {
            log::info!("closing connection #{}", conn.id());
            conn.disconnect();
        }
    }

    /// Close whatever is open and connect with `token`.
    pub fn reconnect(&self, token: &str) -> Result<Arc<Connection>> {
        self.close();
        self.connect(token)
    }

    pub fn current(&self) -> Option<Arc<Connection>> {
        self.current.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current.borrow().as_ref().is_some_and(|c| c.is_connected())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

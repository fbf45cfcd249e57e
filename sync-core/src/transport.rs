//! Transport.
//!
//! Owns the accept loop on the listener side and the connect loop on the
//! connector side. Both roles support a bounded port-search retry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;

use crate::error::SyncError;

/// Cooperative abort handle shared between the task driving `listen`/
/// `connect` and whatever wants to cancel it.
///
/// `tokio::net::TcpListener::accept` has no native cancellation, so
/// aborting a listener is implemented by opening a sacrificial loopback
/// connection to the bound port; the accept call then returns and the
/// listener recognizes it as sacrificial via the `aborted` flag rather
/// than a real client.
#[derive(Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
    bound_addr: Arc<Mutex<Option<SocketAddr>>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    async fn record_bound_addr(&self, addr: SocketAddr) {
        *self.bound_addr.lock().await = Some(addr);
    }

    /// Signal abort and, if a listener is bound, open the sacrificial
    /// connection that unblocks its `accept`.
    pub async fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        if let Some(addr) = *self.bound_addr.lock().await {
            let _ = TcpStream::connect(addr).await;
        }
    }
}

/// Outcome of a listener's accept attempt.
pub enum ListenOutcome {
    Accepted(TcpStream),
    Aborted,
    BindFailed(SyncError),
}

async fn bind_reuseaddr(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Role "listener". Binds, trying up to
/// `max_port_search_range` ports above `base_port` on failure, then
/// accepts exactly one connection.
pub async fn listen(host: &str, base_port: u16, max_port_search_range: u16, abort: &AbortHandle) -> ListenOutcome {
    let mut port = base_port;
    let listener = loop {
        match bind_reuseaddr(host, port).await {
            Ok(listener) => break listener,
            Err(source) => {
                if port - base_port >= max_port_search_range {
                    return ListenOutcome::BindFailed(SyncError::BindFailed {
                        host: host.to_string(),
                        port,
                        source,
                    });
                }
                port += 1;
            }
        }
    };

    let bound_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(source) => {
            return ListenOutcome::BindFailed(SyncError::BindFailed {
                host: host.to_string(),
                port,
                source,
            })
        }
    };
    abort.record_bound_addr(bound_addr).await;

    match listener.accept().await {
        Ok((stream, _peer_addr)) => {
            if abort.is_aborted() {
                ListenOutcome::Aborted
            } else {
                ListenOutcome::Accepted(stream)
            }
        }
        Err(source) => ListenOutcome::BindFailed(SyncError::BindFailed {
            host: host.to_string(),
            port,
            source,
        }),
    }
}

/// Role "connector". Tries `connect(host, port)` starting
/// at `base_port`, incrementing until `max_port_search_range` is
/// exhausted or an abort is signaled.
pub async fn connect(host: &str, base_port: u16, max_port_search_range: u16, abort: &AbortHandle) -> Result<TcpStream, SyncError> {
    let mut port = base_port;
    loop {
        if abort.is_aborted() {
            return Err(SyncError::ConnectExhausted {
                host: host.to_string(),
                base_port,
                last_port: port,
            });
        }
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return Ok(stream),
            Err(_) if port - base_port < max_port_search_range => {
                port += 1;
            }
            Err(_) => {
                return Err(SyncError::ConnectExhausted {
                    host: host.to_string(),
                    base_port,
                    last_port: port,
                })
            }
        }
    }
}

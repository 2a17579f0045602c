//! Sources of established mTLS connections
//!
//! The HTTP layer only ever sees connections whose handshake, including
//! client certificate verification, already succeeded.

use crate::error::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

/// A TLS stream whose handshake completed with a verified client certificate
pub type TlsConnection = tokio_rustls::server::TlsStream<TcpStream>;

/// Something that hands out established connections
pub trait ConnectionSource: Send {
    /// Wait for the next connection; `None` once the source is exhausted.
    ///
    /// Implementations must be cancel safe so the caller can race this
    /// against other work.
    fn accept(&mut self) -> impl Future<Output = Option<(TlsConnection, SocketAddr)>> + Send;
}

/// Run `fut` under an optional deadline, mapping any failure to a handshake error
pub(crate) async fn with_timeout<T>(
    fut: impl Future<Output = std::io::Result<T>>,
    limit: Option<Duration>,
) -> Result<T> {
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::handshake(format!("timed out after {:?}", limit)))?,
        None => fut.await,
    };

    result.map_err(|e| Error::handshake(e.to_string()))
}

/// Accepts TCP connections and drives each handshake in its own task
pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Option<Duration>,
    pending: JoinSet<(SocketAddr, Result<TlsConnection>)>,
}

impl TlsListener {
    /// Wrap a bound TCP listener
    pub fn new(tcp: TcpListener, acceptor: TlsAcceptor, handshake_timeout: Option<Duration>) -> Self {
        TlsListener {
            tcp,
            acceptor,
            handshake_timeout,
            pending: JoinSet::new(),
        }
    }

    /// Handshakes started but not finished yet
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl ConnectionSource for TlsListener {
    async fn accept(&mut self) -> Option<(TlsConnection, SocketAddr)> {
        loop {
            tokio::select! {
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "TCP connection accepted");
                        let acceptor = self.acceptor.clone();
                        let limit = self.handshake_timeout;
                        self.pending.spawn(async move {
                            (peer, with_timeout(acceptor.accept(stream), limit).await)
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "TCP accept failed");
                    }
                },
                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => match joined {
                    Ok((peer, Ok(conn))) => {
                        debug!(peer = %peer, "mTLS handshake successful");
                        return Some((conn, peer));
                    }
                    Ok((peer, Err(e))) => {
                        warn!(peer = %peer, error = %e, "mTLS handshake failed");
                    }
                    Err(e) => {
                        error!(error = %e, "Handshake task panicked");
                    }
                },
            }
        }
    }
}

/// Yields a single, already established connection and then reports exhaustion
pub struct OneShotListener {
    conn: Option<(TlsConnection, SocketAddr)>,
}

impl OneShotListener {
    /// Wrap an established connection
    pub fn new(conn: TlsConnection, peer: SocketAddr) -> Self {
        OneShotListener {
            conn: Some((conn, peer)),
        }
    }
}

impl ConnectionSource for OneShotListener {
    async fn accept(&mut self) -> Option<(TlsConnection, SocketAddr)> {
        self.conn.take()
    }
}

//! C2: listener set (spec.md §4.2).
//!
//! The host string is a `+`-separated list of endpoints, each either
//! `host:port` (TCP) or an absolute filesystem path (a Unix socket).
//! Every endpoint gets its own accept task; a bind failure retries with
//! backoff instead of taking the whole server down, since one bad
//! endpoint in the list shouldn't prevent the others from serving.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// A listener backlog of one connection waiting to be accepted, per
/// spec.md §4.2: the arbitrator, not the kernel, should decide how
/// many pending connections pile up.
pub const BACKLOG: u32 = 1;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

/// A connected socket, erased to whichever transport accepted it.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Socket for T {}

pub fn parse_endpoints(spec: &str) -> Vec<Endpoint> {
    spec.split('+')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with('/') {
                Endpoint::Unix(PathBuf::from(s))
            } else {
                Endpoint::Tcp(s.to_string())
            }
        })
        .collect()
}

/// Spawns one accept task per endpoint onto `tasks`, each pushing
/// accepted sockets onto `new_conn_tx`.
pub fn spawn_all(
    endpoints: Vec<Endpoint>,
    new_conn_tx: mpsc::Sender<Box<dyn Socket>>,
    tasks: &mut JoinSet<()>,
) {
    for endpoint in endpoints {
        let tx = new_conn_tx.clone();
        tasks.spawn(async move { accept_loop(endpoint, tx).await });
    }
}

async fn accept_loop(endpoint: Endpoint, new_conn_tx: mpsc::Sender<Box<dyn Socket>>) {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let listener = match bind_with_backoff(&addr, bind_tcp).await {
                Some(listener) => listener,
                None => return,
            };
            info!(%addr, "listening");
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!(%peer, "accepted tcp connection");
                        if new_conn_tx.send(Box::new(stream)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(%err, "tcp accept failed"),
                }
            }
        }
        Endpoint::Unix(path) => {
            let listener = match bind_with_backoff(&path, bind_unix).await {
                Some(listener) => listener,
                None => return,
            };
            info!(path = %path.display(), "listening");
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        info!("accepted unix connection");
                        if new_conn_tx.send(Box::new(stream)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(%err, "unix accept failed"),
                }
            }
        }
    }
}

async fn bind_tcp(addr: &str) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

async fn bind_unix(path: &PathBuf) -> io::Result<UnixListener> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    UnixListener::bind(path)
}

async fn bind_with_backoff<A, F, Fut, L>(addr: &A, bind: F) -> Option<L>
where
    A: std::fmt::Debug + ?Sized,
    F: Fn(&A) -> Fut,
    Fut: std::future::Future<Output = io::Result<L>>,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match bind(addr).await {
            Ok(listener) => return Some(listener),
            Err(err) => {
                warn!(?addr, %err, ?backoff, "bind failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_tcp_and_unix_endpoints() {
        let endpoints = parse_endpoints("localhost:4101+/var/run/BrlAPI+127.0.0.1:4102");
        assert_eq!(
            endpoints,
            vec![
                Endpoint::Tcp("localhost:4101".into()),
                Endpoint::Unix(PathBuf::from("/var/run/BrlAPI")),
                Endpoint::Tcp("127.0.0.1:4102".into()),
            ]
        );
    }

    #[test]
    fn blank_segments_are_ignored() {
        assert_eq!(parse_endpoints("++localhost:1+"), vec![Endpoint::Tcp("localhost:1".into())]);
    }
}

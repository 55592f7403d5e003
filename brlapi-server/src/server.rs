//! Top-level wiring (spec.md §4.10, §6): assembles the listener set,
//! the shared server state, and the main loop, then hands back a
//! handle whose drop triggers shutdown.
//!
//! Grounded on the teacher's `Server::run`: a coordinating task
//! `tokio::select!`s between the work finishing on its own and an
//! external close request, and a `ServerHandle { _close_rx }` ties
//! "drop the handle" to "stop the server" the same way the teacher's
//! handle does with `protocol`/`transport`.

use crate::mainloop::{self, ServerState};
use brlapi_core::driver::{AuthBackend, CoreTaskRunner, Driver, TextTable};
use brlapi_device::listener;
use brlapi_shared::shutdown::Shutdown;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub struct ServerOpts {
    pub host: String,
    pub driver: Arc<dyn Driver>,
    pub text_table: Arc<dyn TextTable>,
    pub auth_backend: Arc<dyn AuthBackend>,
    pub core_task: Arc<dyn CoreTaskRunner>,
}

pub struct Server {
    state: Arc<ServerState>,
    will_close_tx: mpsc::Sender<()>,
}

impl Server {
    #[tracing::instrument(skip(opts), target = "server")]
    pub async fn run(opts: ServerOpts) -> anyhow::Result<(Self, ServerHandle)> {
        let endpoints = listener::parse_endpoints(&opts.host);
        let (new_conn_tx, new_conn_rx) = mpsc::channel(16);
        let mut tasks = JoinSet::new();
        listener::spawn_all(endpoints, new_conn_tx, &mut tasks);

        let state = ServerState::new(opts.driver, opts.text_table, opts.auth_backend, opts.core_task);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel::<()>(1);
        let shutdown = Shutdown::new(shutdown_tx, shutdown_complete_tx);

        let (close_tx, close_rx) = mpsc::channel(1);
        let (will_close_tx, will_close_rx) = mpsc::channel(1);

        tokio::spawn({
            let state = state.clone();
            let shutdown = shutdown.clone();
            async move {
                // Dropping `ServerHandle` closes `close_rx`; running to
                // completion on its own means `new_conn_rx` closed.
                // Either way we stop accepting, but connections already
                // spawned onto `tasks` are left to drain on their own
                // rather than being force-aborted.
                tokio::select! {
                    _ = mainloop::run(state, new_conn_rx, shutdown, &mut tasks) => {},
                    _ = close_tx.closed() => {},
                }
                while tasks.join_next().await.is_some() {}
                drop(will_close_rx);
                drop(shutdown_rx);
                drop(shutdown_complete_rx);
            }
        });

        Ok((Self { state, will_close_tx }, ServerHandle { _close_rx: close_rx }))
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    pub async fn will_close(&self) {
        self.will_close_tx.closed().await;
    }
}

pub struct ServerHandle {
    _close_rx: mpsc::Receiver<()>,
}

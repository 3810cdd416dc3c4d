//! TCP accept loop: binds the listener, peeks and classifies each fresh
//! connection, and spawns a handler task for whatever protocol it turns
//! out to be. Stratum v2 connections are recognized but immediately
//! closed — no v2 handler is registered (see `protocol::Router`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{AuthStore, Authenticator};
use crate::config::Config;
use crate::jobs::JobDistributor;
use crate::metrics;
use crate::protocol::{self, PeekableConnection, ProtocolVersion, Router};
use crate::session::SessionManager;
use crate::shares::{Share, ShareValidator};
use crate::stratum::connection::V1Connection;

pub struct StratumServer<S: AuthStore + 'static> {
    config: Arc<Config>,
    session_manager: Arc<SessionManager>,
    job_distributor: Arc<JobDistributor>,
    authenticator: Arc<Authenticator<S>>,
    share_validator: Arc<ShareValidator>,
    router: Arc<Router>,
    share_tx: mpsc::UnboundedSender<Share>,
    connections: AsyncMutex<JoinSet<()>>,
}

impl<S: AuthStore + 'static> StratumServer<S> {
    pub fn new(
        config: Arc<Config>,
        session_manager: Arc<SessionManager>,
        job_distributor: Arc<JobDistributor>,
        authenticator: Arc<Authenticator<S>>,
        share_validator: Arc<ShareValidator>,
        share_tx: mpsc::UnboundedSender<Share>,
    ) -> Self {
        Self {
            config,
            session_manager,
            job_distributor,
            authenticator,
            share_validator,
            router: Arc::new(Router::new(true, false)),
            share_tx,
            connections: AsyncMutex::new(JoinSet::new()),
        }
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    /// Binds and accepts until `shutdown` is cancelled. Spawned connection
    /// tasks outlive this call; use `drain` afterward to wait for them.
    pub async fn serve(&self, shutdown: CancellationToken) -> std::io::Result<()> {
        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid listen address"))?;
        let listener = bind_reuseaddr(addr)?;
        info!(listen = %self.config.listen, "stratum server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote_addr)) => self.spawn_connection(stream, remote_addr, shutdown.clone()).await,
                        Err(err) => warn!(error = %err, "failed to accept connection"),
                    }
                }
            }
        }

        self.router.close();
        Ok(())
    }

    /// Waits for already-spawned connection tasks to finish, up to
    /// `timeout`. Returns `false` if the grace period elapsed with tasks
    /// still running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut connections = self.connections.lock().await;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if connections.is_empty() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, connections.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    async fn spawn_connection(&self, stream: TcpStream, remote_addr: SocketAddr, shutdown: CancellationToken) {
        let config = Arc::clone(&self.config);
        let session_manager = Arc::clone(&self.session_manager);
        let job_distributor = Arc::clone(&self.job_distributor);
        let authenticator = Arc::clone(&self.authenticator);
        let share_validator = Arc::clone(&self.share_validator);
        let router = Arc::clone(&self.router);
        let share_tx = self.share_tx.clone();

        metrics::inc_connections();
        let mut connections = self.connections.lock().await;
        connections.spawn(async move {
            handle_connection(
                stream,
                remote_addr,
                config,
                session_manager,
                job_distributor,
                authenticator,
                share_validator,
                router,
                share_tx,
                shutdown,
            )
            .await;
            metrics::dec_connections();
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection<S: AuthStore + 'static>(
    stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<Config>,
    session_manager: Arc<SessionManager>,
    job_distributor: Arc<JobDistributor>,
    authenticator: Arc<Authenticator<S>>,
    share_validator: Arc<ShareValidator>,
    router: Arc<Router>,
    share_tx: mpsc::UnboundedSender<Share>,
    shutdown: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut peekable = PeekableConnection::new(read_half);

    let detection_timeout = Duration::from_secs(config.detection_timeout_secs);
    let version = match protocol::detect(&mut peekable, detection_timeout).await {
        Ok(v) => v,
        Err(err) => {
            warn!(remote_addr = %remote_addr, error = %err, "protocol detection failed, closing connection");
            router.record_failed_detection();
            return;
        }
    };

    metrics::inc_protocol_detection(protocol_label(version));

    if let Err(err) = router.route(version) {
        warn!(remote_addr = %remote_addr, ?version, error = %err, "closing connection");
        return;
    }

    match version {
        ProtocolVersion::V1 => {
            let reader = FramedRead::new(peekable, LinesCodec::new());
            let connection = V1Connection::new(
                remote_addr,
                reader,
                write_half,
                config,
                session_manager,
                job_distributor,
                authenticator,
                share_validator,
                share_tx,
                shutdown,
            );
            connection.serve().await;
        }
        ProtocolVersion::V2 | ProtocolVersion::Unknown => {
            unreachable!("router only routes successfully for registered, classified protocols")
        }
    }
}

fn protocol_label(version: ProtocolVersion) -> &'static str {
    match version {
        ProtocolVersion::V1 => "v1",
        ProtocolVersion::V2 => "v2",
        ProtocolVersion::Unknown => "unknown",
    }
}

fn bind_reuseaddr(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

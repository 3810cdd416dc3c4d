//! Stratum v1 connection handler: owns the per-connection state machine,
//! the framed reader/writer pair, and the event loop that races inbound
//! requests, job broadcasts, and the idle timeout against each other.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthStore, Authenticator};
use crate::config::Config;
use crate::error::ShareError;
use crate::jobs::{Job, JobDistributor, Subscription};
use crate::metrics;
use crate::protocol::PeekableConnection;
use crate::session::{Session, SessionManager, SessionState};
use crate::shares::{Share, ShareValidator, Submission};
use crate::stratum::wire::{self, Request, Response, WireError};
use crate::vardiff::VardiffConfig;

/// Write deadline from the resource model: a single outbound frame must
/// land within this long or the connection is considered stuck.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Upper bound on how long the auth store gets to answer a `mining.authorize`.
const AUTH_STORE_DEADLINE: Duration = Duration::from_secs(5);

pub struct V1Connection<S: AuthStore + 'static> {
    remote_addr: SocketAddr,
    config: Arc<Config>,
    session_manager: Arc<SessionManager>,
    job_distributor: Arc<JobDistributor>,
    authenticator: Arc<Authenticator<S>>,
    share_validator: Arc<ShareValidator>,
    share_tx: mpsc::UnboundedSender<Share>,
    shutdown: CancellationToken,

    reader: FramedRead<PeekableConnection<OwnedReadHalf>, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,

    session: Session,
    job_rx: mpsc::Receiver<Arc<Job>>,
    job_tx: Option<mpsc::Sender<Arc<Job>>>,
    job_subscription: Option<Subscription>,
    sent_first_job_since_authorize: bool,
}

impl<S: AuthStore + 'static> V1Connection<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote_addr: SocketAddr,
        reader: FramedRead<PeekableConnection<OwnedReadHalf>, LinesCodec>,
        write_half: OwnedWriteHalf,
        config: Arc<Config>,
        session_manager: Arc<SessionManager>,
        job_distributor: Arc<JobDistributor>,
        authenticator: Arc<Authenticator<S>>,
        share_validator: Arc<ShareValidator>,
        share_tx: mpsc::UnboundedSender<Share>,
        shutdown: CancellationToken,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let extranonce1 = session_manager.allocate_extranonce1();
        let session = Session::new(session_id, extranonce1, config.extranonce2_size, config.initial_difficulty);
        let (job_tx, job_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));

        Self {
            remote_addr,
            config,
            session_manager,
            job_distributor,
            authenticator,
            share_validator,
            share_tx,
            shutdown,
            reader,
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            session,
            job_rx,
            job_tx: Some(job_tx),
            job_subscription: None,
            sent_first_job_since_authorize: false,
        }
    }

    /// Runs until the peer disconnects, a transport error occurs, an
    /// authorization failure closes the connection, or the idle timeout
    /// trips with no share ever submitted.
    pub async fn serve(mut self) {
        self.session_manager.insert(self.session.clone()).await;
        info!(remote_addr = %self.remote_addr, session_id = %self.session.id, "connection accepted");

        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs.max(1));
        let mut deadline = TokioInstant::now() + idle_timeout;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(session_id = %self.session.id, "shutdown signal received, closing connection");
                    break;
                }
                line = self.reader.next() => {
                    match line {
                        Some(Ok(line)) => {
                            deadline = TokioInstant::now() + idle_timeout;
                            if let Err(err) = self.handle_line(&line).await {
                                warn!(session_id = %self.session.id, error = %err, "closing connection");
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(session_id = %self.session.id, error = %err, "transport error, closing connection");
                            break;
                        }
                        None => {
                            info!(session_id = %self.session.id, "peer closed connection");
                            break;
                        }
                    }
                }
                Some(job) = self.job_rx.recv() => {
                    if let Err(err) = self.forward_job(job).await {
                        warn!(session_id = %self.session.id, error = %err, "failed to forward job, closing connection");
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if self.session.share_count == 0 {
                        info!(session_id = %self.session.id, "idle timeout with no shares submitted, closing connection");
                        break;
                    }
                    deadline = TokioInstant::now() + idle_timeout;
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        if let Some(sub) = &self.job_subscription {
            sub.unsubscribe();
        }
        self.session_manager.remove(&self.session.id).await;
        if self.session.is_authorized() {
            metrics::dec_sessions();
        }
        info!(
            session_id = %self.session.id,
            share_count = self.session.share_count,
            "connection closed"
        );
    }

    async fn handle_line(&mut self, line: &str) -> anyhow::Result<()> {
        let value: Value = serde_json::from_str(line).map_err(|_| {
            warn!(%line, "received a line that is not valid json");
            anyhow::anyhow!("malformed line")
        })?;

        let id = value.get("id").cloned().unwrap_or(Value::Null);

        let request: Request = match serde_json::from_value(value) {
            Ok(req) => req,
            Err(_) => {
                if id.is_null() {
                    anyhow::bail!("malformed request with no id to reply against");
                }
                self.reply_error(id, WireError(20, "malformed request".to_string(), None)).await?;
                return Ok(());
            }
        };

        match request.method.as_str() {
            "mining.subscribe" => self.handle_subscribe(request.id, &request.params).await,
            "mining.authorize" => self.handle_authorize(request.id, &request.params).await,
            "mining.submit" => self.handle_submit(request.id, &request.params).await,
            other => {
                warn!(method = other, session_id = %self.session.id, "unrecognized method");
                if request.id.is_null() {
                    Ok(())
                } else {
                    self.reply_error(request.id, WireError(20, format!("unknown method: {other}"), None)).await
                }
            }
        }
    }

    async fn handle_subscribe(&mut self, id: Value, _params: &Value) -> anyhow::Result<()> {
        if self.session.state != SessionState::New {
            return self.reply_error(id, WireError(25, "already subscribed".to_string(), None)).await;
        }

        self.session.state = SessionState::Subscribed;
        self.session.subscribed_to_jobs = true;

        let subscription_id = format!("sub-{}", self.session.id);
        let result = serde_json::json!([
            [["mining.set_difficulty", subscription_id], ["mining.notify", subscription_id]],
            hex::encode(&self.session.extranonce1),
            self.session.extranonce2_size,
        ]);
        self.send_response(Response::ok(id, result)).await?;
        self.sync_session().await;
        Ok(())
    }

    async fn handle_authorize(&mut self, id: Value, params: &Value) -> anyhow::Result<()> {
        if self.session.state == SessionState::New {
            return self.reply_error(id, WireError(25, "not subscribed".to_string(), None)).await;
        }

        let args = params.as_array().cloned().unwrap_or_default();
        let worker = args.first().and_then(Value::as_str).unwrap_or_default();
        let password = args.get(1).and_then(Value::as_str).unwrap_or_default();

        let auth_result = match tokio::time::timeout(AUTH_STORE_DEADLINE, self.authenticator.authenticate(worker, password)).await {
            Ok(Ok(result)) => result,
            Ok(Err(failure)) => {
                warn!(worker, error = %failure, "authorize failed");
                self.reply_error(id, WireError(24, failure.to_string(), None)).await?;
                anyhow::bail!("authorization rejected, closing per protocol");
            }
            Err(_) => {
                warn!(worker, "auth store call exceeded its deadline");
                self.reply_error(id, WireError(24, "authorization timed out".to_string(), None)).await?;
                anyhow::bail!("authorization timed out, closing per protocol");
            }
        };

        self.session.worker_name = Some(auth_result.worker_name.clone());
        self.session.state = SessionState::Authorized;
        let difficulty = self
            .config
            .initial_difficulty
            .max(auth_result.permissions.min_difficulty)
            .min(auth_result.permissions.max_difficulty);
        self.session.set_difficulty(difficulty);

        self.send_response(Response::ok(id, Value::Bool(true))).await?;
        self.send_notification(wire::set_difficulty(self.session.difficulty)).await?;

        // Subscribing here (rather than at `mining.subscribe`) is what
        // delivers "push set_difficulty and notify with the current job"
        // on a successful authorize: `JobDistributor::subscribe` invokes
        // the handler immediately with the current job, if any.
        if let Some(tx) = self.job_tx.take() {
            let subscription = self.job_distributor.subscribe(Box::new(move |job| {
                if tx.try_send(job).is_err() {
                    metrics::inc_notify_dropped();
                }
            }));
            self.job_subscription = Some(subscription);
        }

        self.sync_session().await;
        metrics::inc_sessions();
        info!(session_id = %self.session.id, worker = %auth_result.worker_name, "session authorized");
        Ok(())
    }

    async fn handle_submit(&mut self, id: Value, params: &Value) -> anyhow::Result<()> {
        let args = params.as_array().cloned().unwrap_or_default();
        let worker_name = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let job_id = args.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
        let extranonce2 = args.get(2).and_then(Value::as_str).and_then(|s| hex::decode(s).ok());
        let ntime = args.get(3).and_then(Value::as_str).and_then(|s| u32::from_str_radix(s, 16).ok());
        let nonce = args.get(4).and_then(Value::as_str).and_then(|s| u32::from_str_radix(s, 16).ok());

        let (extranonce2, ntime, nonce) = match (extranonce2, ntime, nonce) {
            (Some(e), Some(t), Some(n)) => (e, t, n),
            _ => {
                metrics::inc_rejected("malformed");
                return self.reply_error(id, WireError(23, "malformed submit params".to_string(), None)).await;
            }
        };

        let submission = Submission {
            worker_name,
            job_id,
            extranonce2,
            ntime,
            nonce,
        };

        match self.share_validator.validate(&mut self.session, submission, unix_now_secs()) {
            Ok(share) => {
                self.session.record_share();
                metrics::inc_accepted();
                if share.block_candidate {
                    metrics::inc_block_candidate();
                    info!(session_id = %self.session.id, job_id = %share.job_id, "block candidate share");
                }

                self.send_response(Response::ok(id, Value::Bool(true))).await?;

                if self.share_tx.send(share).is_err() {
                    warn!(session_id = %self.session.id, "share sink channel closed, dropping accepted share");
                }

                let vardiff_config = VardiffConfig {
                    target_share_secs: self.config.vardiff_target_share_secs,
                    min_difficulty: self.config.min_difficulty,
                    max_difficulty: self.config.max_difficulty,
                };
                if let Some(new_difficulty) =
                    self.session
                        .vardiff
                        .record_accept(std::time::Instant::now(), self.session.difficulty, &vardiff_config)
                {
                    self.session.set_difficulty(new_difficulty);
                    metrics::inc_vardiff_retarget();
                    self.send_notification(wire::set_difficulty(new_difficulty)).await?;
                }

                self.sync_session().await;
                Ok(())
            }
            Err(err) => {
                metrics::inc_rejected(reject_reason_label(&err));
                self.reply_error(id, WireError::from(&err)).await
            }
        }
    }

    async fn forward_job(&mut self, job: Arc<Job>) -> anyhow::Result<()> {
        let clean_jobs = if self.sent_first_job_since_authorize {
            job.clean_jobs
        } else {
            self.sent_first_job_since_authorize = true;
            true
        };
        self.session.known_jobs.accept(Arc::clone(&job));
        self.send_notification(wire::notify(&job, clean_jobs)).await?;
        metrics::inc_job_broadcasts();
        self.sync_session().await;
        Ok(())
    }

    async fn send_response(&mut self, response: Response) -> anyhow::Result<()> {
        let text = serde_json::to_string(&response)?;
        tokio::time::timeout(WRITE_DEADLINE, self.writer.send(text)).await??;
        Ok(())
    }

    async fn send_notification(&mut self, notification: wire::Notification) -> anyhow::Result<()> {
        let text = serde_json::to_string(&notification)?;
        tokio::time::timeout(WRITE_DEADLINE, self.writer.send(text)).await??;
        Ok(())
    }

    async fn reply_error(&mut self, id: Value, error: WireError) -> anyhow::Result<()> {
        self.send_response(Response::err(id, error)).await
    }

    async fn sync_session(&self) {
        let snapshot = self.session.clone();
        self.session_manager
            .update(&self.session.id, move |s| *s = snapshot)
            .await;
    }
}

fn reject_reason_label(err: &ShareError) -> &'static str {
    match err {
        ShareError::Unauthorized => "unauthorized",
        ShareError::JobNotFound => "job_not_found",
        ShareError::Duplicate => "duplicate",
        ShareError::TimeOutOfRange => "time_out_of_range",
        ShareError::Malformed(_) => "malformed",
        ShareError::LowDifficulty => "low_difficulty",
        ShareError::NotSubscribed => "not_subscribed",
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

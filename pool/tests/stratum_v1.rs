//! End-to-end Stratum v1 scenarios driven over real loopback TCP: the
//! full subscribe/authorize/notify/submit handshake, the share-validation
//! error paths, and the v2-detection-then-close path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stratum_core::Algorithm;
use stratum_pool::auth::{Authenticator, InMemoryAuthStore};
use stratum_pool::config::Config;
use stratum_pool::jobs::{Job, JobDistributor};
use stratum_pool::session::SessionManager;
use stratum_pool::shares::{Share, ShareValidator};
use stratum_pool::stratum::StratumServer;

/// The loosest session target this configuration can express (see the
/// `difficulty_to_target` clamp): roughly one in four thousand headers
/// meets it, so a bounded search over mining-nonce values finds an
/// accepted share quickly without needing to compute a real hash up
/// front.
const LOOSE_DIFFICULTY: f64 = 0.000001;
const MAX_SUBMIT_ATTEMPTS: u32 = 20_000;

struct Harness {
    addr: String,
    job_distributor: Arc<JobDistributor>,
    share_rx: mpsc::UnboundedReceiver<Share>,
    _shutdown: CancellationToken,
}

async fn start_server(port: u16, initial_difficulty: f64, min_difficulty: f64, max_difficulty: f64) -> Harness {
    let mut config = Config::default();
    config.listen = format!("127.0.0.1:{port}");
    config.initial_difficulty = initial_difficulty;
    config.min_difficulty = min_difficulty;
    config.max_difficulty = max_difficulty;
    config.idle_timeout_secs = 30;
    let config = Arc::new(config);

    let session_manager = Arc::new(SessionManager::new(config.extranonce1_size));
    let job_distributor = Arc::new(JobDistributor::new());
    let authenticator = Arc::new(Authenticator::new(InMemoryAuthStore::new()));
    let share_validator = Arc::new(ShareValidator::new(Algorithm::Sha256d));
    let (share_tx, share_rx) = mpsc::unbounded_channel();

    let server = Arc::new(StratumServer::new(
        config,
        session_manager,
        Arc::clone(&job_distributor),
        authenticator,
        share_validator,
        share_tx,
    ));

    let shutdown = CancellationToken::new();
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.serve(serve_shutdown).await;
    });

    // Give the listener a moment to bind before the first client connects.
    tokio::time::sleep(Duration::from_millis(75)).await;

    Harness {
        addr: format!("127.0.0.1:{port}"),
        job_distributor,
        share_rx,
        _shutdown: shutdown,
    }
}

fn test_job(job_id: &str, ntime: u32, network_target: [u8; 32]) -> Job {
    Job {
        job_id: job_id.to_string(),
        prev_hash: [0x11; 32],
        coinb1: vec![0xAA; 20],
        coinb2: vec![0xBB; 8],
        merkle_branch: vec![[0x22; 32], [0x33; 32]],
        version: 1,
        nbits: 0x1d00ffff,
        ntime,
        clean_jobs: true,
        network_target,
    }
}

async fn send_line(writer: &mut (impl AsyncWriteExt + Unpin), value: &Value) {
    let mut text = serde_json::to_string(value).unwrap();
    text.push('\n');
    writer.write_all(text.as_bytes()).await.unwrap();
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Value {
    let mut line = String::new();
    let n = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .unwrap();
    assert!(n > 0, "connection closed before a line arrived");
    serde_json::from_str(line.trim_end()).unwrap()
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn subscribe(&mut self) -> Value {
        send_line(&mut self.writer, &json!({"id": 1, "method": "mining.subscribe", "params": []})).await;
        read_line(&mut self.reader).await
    }

    async fn authorize(&mut self, worker: &str) -> Value {
        send_line(
            &mut self.writer,
            &json!({"id": 2, "method": "mining.authorize", "params": [worker, "x"]}),
        )
        .await;
        read_line(&mut self.reader).await
    }

    async fn submit(&mut self, id: i64, worker: &str, job_id: &str, extranonce2_hex: &str, ntime: u32, nonce: u32) -> Value {
        send_line(
            &mut self.writer,
            &json!({
                "id": id,
                "method": "mining.submit",
                "params": [worker, job_id, extranonce2_hex, format!("{:08x}", ntime), format!("{:08x}", nonce)],
            }),
        )
        .await;
        read_line(&mut self.reader).await
    }

    /// Submits increasing mining-nonce values against a fixed extranonce2
    /// until the session's (loose) target is met, up to `MAX_SUBMIT_ATTEMPTS`.
    /// Returns the `(response, nonce_used)` for the accepted submission.
    async fn submit_until_accepted(&mut self, worker: &str, job_id: &str, ntime: u32) -> (Value, u32) {
        for nonce in 0..MAX_SUBMIT_ATTEMPTS {
            let response = self.submit(100 + nonce as i64, worker, job_id, "00000001", ntime, nonce).await;
            if response["result"] == json!(true) {
                return (response, nonce);
            }
        }
        panic!("no accepted share found in {MAX_SUBMIT_ATTEMPTS} attempts");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_authorize_notify_submit_accepted() {
    let mut harness = start_server(19201, LOOSE_DIFFICULTY, LOOSE_DIFFICULTY, 1_000_000.0).await;
    harness.job_distributor.broadcast(test_job("J1", 1_700_000_000, [0xff; 32]));

    let mut client = Client::connect(&harness.addr).await;

    let subscribe_response = client.subscribe().await;
    assert!(subscribe_response["result"].is_array());

    let authorize_response = client.authorize("alice.rig1").await;
    assert_eq!(authorize_response["result"], json!(true));

    let set_difficulty = read_line(&mut client.reader).await;
    assert_eq!(set_difficulty["method"], "mining.set_difficulty");
    assert!(set_difficulty["id"].is_null());

    let notify = read_line(&mut client.reader).await;
    assert_eq!(notify["method"], "mining.notify");
    assert_eq!(notify["params"][0], json!("J1"));
    assert_eq!(notify["params"][8], json!(true), "first job after authorize must be clean_jobs=true");

    let (response, _) = client.submit_until_accepted("alice.rig1", "J1", 1_700_000_000).await;
    assert_eq!(response["result"], json!(true));

    let share = tokio::time::timeout(Duration::from_secs(2), harness.share_rx.recv())
        .await
        .expect("sink never received the accepted share")
        .unwrap();
    assert_eq!(share.job_id, "J1");
    assert_eq!(share.worker_name, "alice.rig1");
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_below_session_target_is_rejected_with_low_difficulty_code() {
    let harness = start_server(19202, 1_000_000.0, 1_000_000.0, 1_000_000.0).await;
    harness.job_distributor.broadcast(test_job("J1", 1_700_000_000, [0xff; 32]));

    let mut client = Client::connect(&harness.addr).await;
    client.subscribe().await;
    client.authorize("alice.rig1").await;
    read_line(&mut client.reader).await; // set_difficulty
    read_line(&mut client.reader).await; // notify

    let response = client.submit(3, "alice.rig1", "J1", "00000001", 1_700_000_000, 0).await;
    assert!(response["result"].is_null());
    assert_eq!(response["error"][0], json!(23));
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_valid_share_below_network_target_is_not_a_block_candidate() {
    let mut tight_network_target = [0u8; 32];
    tight_network_target[28] = 0x01;

    let mut harness = start_server(19203, LOOSE_DIFFICULTY, LOOSE_DIFFICULTY, 1_000_000.0).await;
    harness.job_distributor.broadcast(test_job("J1", 1_700_000_000, tight_network_target));

    let mut client = Client::connect(&harness.addr).await;
    client.subscribe().await;
    client.authorize("alice.rig1").await;
    read_line(&mut client.reader).await; // set_difficulty
    read_line(&mut client.reader).await; // notify

    client.submit_until_accepted("alice.rig1", "J1", 1_700_000_000).await;

    let share = tokio::time::timeout(Duration::from_secs(2), harness.share_rx.recv())
        .await
        .expect("sink never received the accepted share")
        .unwrap();
    assert!(!share.block_candidate);
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_valid_share_below_maximal_network_target_is_a_block_candidate() {
    let mut harness = start_server(19204, LOOSE_DIFFICULTY, LOOSE_DIFFICULTY, 1_000_000.0).await;
    harness.job_distributor.broadcast(test_job("J1", 1_700_000_000, [0xff; 32]));

    let mut client = Client::connect(&harness.addr).await;
    client.subscribe().await;
    client.authorize("alice.rig1").await;
    read_line(&mut client.reader).await; // set_difficulty
    read_line(&mut client.reader).await; // notify

    client.submit_until_accepted("alice.rig1", "J1", 1_700_000_000).await;

    let share = tokio::time::timeout(Duration::from_secs(2), harness.share_rx.recv())
        .await
        .expect("sink never received the accepted share")
        .unwrap();
    assert!(share.block_candidate, "maximal network target accepts every hash");
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmitting_the_same_share_is_rejected_as_duplicate() {
    let harness = start_server(19205, LOOSE_DIFFICULTY, LOOSE_DIFFICULTY, 1_000_000.0).await;
    harness.job_distributor.broadcast(test_job("J1", 1_700_000_000, [0xff; 32]));

    let mut client = Client::connect(&harness.addr).await;
    client.subscribe().await;
    client.authorize("alice.rig1").await;
    read_line(&mut client.reader).await; // set_difficulty
    read_line(&mut client.reader).await; // notify

    let (_, nonce) = client.submit_until_accepted("alice.rig1", "J1", 1_700_000_000).await;

    let replay = client.submit(999, "alice.rig1", "J1", "00000001", 1_700_000_000, nonce).await;
    assert!(replay["result"].is_null());
    assert_eq!(replay["error"][0], json!(22));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_v2_framed_connection_is_detected_and_closed_without_a_v1_handler() {
    let harness = start_server(19206, LOOSE_DIFFICULTY, LOOSE_DIFFICULTY, 1_000_000.0).await;

    let mut stream = TcpStream::connect(&harness.addr).await.unwrap();
    // ext_type=0 (<=0x07), msg_type=0x00 (<=0x60): classifies as v2.
    stream.write_all(&[0x00, 0x00, 0x00, 0x64, 0x00, 0x00]).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("server never closed the unroutable v2 connection")
        .unwrap();
    assert_eq!(n, 0, "no v1 handler is registered, the connection must be closed with no reply");
}

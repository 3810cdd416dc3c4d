//! Share Validator: the 13-step `mining.submit` flow. Given a submission
//! and the session's job+target, rebuilds the header, hashes, verifies
//! bounds, classifies the outcome, and emits an accepted `Share` record.

use stratum_core::{coinbase, header, merkle, Algorithm, HashAlgorithm};

use crate::error::ShareError;
use crate::jobs::ShareKey;
use crate::session::Session;

/// A parsed `mining.submit` request, before validation.
#[derive(Debug, Clone)]
pub struct Submission {
    pub worker_name: String,
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
}

/// A validated, accepted share — handed to the downstream sink and then
/// discarded from core memory.
#[derive(Debug, Clone)]
pub struct Share {
    pub session_id: String,
    pub worker_name: String,
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
    pub submitted_at_secs: u64,
    pub hash: [u8; 32],
    pub difficulty_at_submit: f64,
    pub block_candidate: bool,
}

/// Ntime may run ahead of the job's own timestamp by up to this many
/// seconds, and no more than this many seconds ahead of the server clock.
const NTIME_FUTURE_TOLERANCE_SECS: u32 = 7200;

pub struct ShareValidator {
    algorithm: Algorithm,
}

impl ShareValidator {
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm }
    }

    /// Runs steps 1-11 and, on success, step 12 (emits the `Share`). Step
    /// 13 (informing vardiff) is the caller's responsibility, since it
    /// also needs to react to a resulting difficulty change.
    pub fn validate(
        &self,
        session: &mut Session,
        submission: Submission,
        now_secs: u64,
    ) -> Result<Share, ShareError> {
        // 1. Fast reject.
        if !session.is_authorized() {
            return Err(ShareError::Unauthorized);
        }

        // 2. Job lookup.
        let job = session
            .known_jobs
            .get(&submission.job_id)
            .ok_or(ShareError::JobNotFound)?;

        // 3. Duplicate check.
        let key = ShareKey {
            extranonce2: submission.extranonce2.clone(),
            ntime: submission.ntime,
            nonce: submission.nonce,
        };
        if session
            .known_jobs
            .check_and_record_duplicate(&submission.job_id, key)
        {
            return Err(ShareError::Duplicate);
        }

        // 4. Time bounds.
        let upper_bound = job.ntime.saturating_add(NTIME_FUTURE_TOLERANCE_SECS);
        let server_upper_bound = (now_secs as u32).saturating_add(NTIME_FUTURE_TOLERANCE_SECS);
        if submission.ntime < job.ntime
            || submission.ntime > upper_bound
            || submission.ntime > server_upper_bound
        {
            return Err(ShareError::TimeOutOfRange);
        }

        if submission.extranonce2.len() != session.extranonce2_size {
            return Err(ShareError::Malformed("extranonce2 length mismatch".to_string()));
        }

        // 5. Reconstruct coinbase.
        let coinbase_bytes = coinbase::assemble(
            &job.coinb1,
            &session.extranonce1,
            &submission.extranonce2,
            &job.coinb2,
        );

        // 6. Coinbase hash.
        let coinbase_hash = self.algorithm.hash_header(&coinbase_bytes);

        // 7. Merkle root.
        let merkle_root = merkle::compute_root(coinbase_hash, &job.merkle_branch);

        // 8. Header.
        let header_bytes = header::assemble(
            job.version,
            &job.prev_hash,
            &merkle_root,
            submission.ntime,
            job.nbits,
            submission.nonce,
        );

        // 9. Proof-of-work hash.
        let hash = self.algorithm.hash_header(&header_bytes);

        // 10. Target compare.
        if !self.algorithm.meets_target(&header_bytes, &session.target) {
            return Err(ShareError::LowDifficulty);
        }

        // 11. Network target compare.
        let block_candidate = self.algorithm.meets_target(&header_bytes, &job.network_target);

        // 12. Emit.
        Ok(Share {
            session_id: session.id.clone(),
            worker_name: submission.worker_name,
            job_id: submission.job_id,
            extranonce2: submission.extranonce2,
            ntime: submission.ntime,
            nonce: submission.nonce,
            submitted_at_secs: now_secs,
            hash,
            difficulty_at_submit: session.difficulty,
            block_candidate,
        })
    }
}

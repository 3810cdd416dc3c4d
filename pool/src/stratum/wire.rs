//! Stratum v1 wire types: newline-delimited JSON-RPC 2.0 objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ShareError;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: Value,
    pub method: String,
    #[serde(default = "default_params")]
    pub params: Value,
}

fn default_params() -> Value {
    Value::Array(vec![])
}

/// `[code, message, data]`, the Stratum error triple.
#[derive(Debug, Clone, Serialize)]
pub struct WireError(pub i32, pub String, pub Option<Value>);

impl From<&ShareError> for WireError {
    fn from(err: &ShareError) -> Self {
        WireError(err.code(), err.message(), None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: Value,
    pub result: Value,
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn err(id: Value, error: WireError) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error),
        }
    }
}

/// A server-initiated push (`mining.set_difficulty`, `mining.notify`).
/// Carries no `id` and no `result`/`error` — just `method`/`params`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Value,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            id: Value::Null,
            method: method.to_string(),
            params,
        }
    }
}

pub fn set_difficulty(difficulty: f64) -> Notification {
    Notification::new("mining.set_difficulty", serde_json::json!([difficulty]))
}

/// `clean_jobs` is taken as a separate argument rather than read off
/// `job.clean_jobs`: a freshly authorized session must see `true` on the
/// first job it is handed regardless of the flag the job source set, so
/// the work of deciding that belongs to the caller, not this encoder.
pub fn notify(job: &crate::jobs::Job, clean_jobs: bool) -> Notification {
    let branch_hex: Vec<String> = job.merkle_branch.iter().map(hex::encode).collect();
    Notification::new(
        "mining.notify",
        serde_json::json!([
            job.job_id,
            hex::encode(job.prev_hash),
            hex::encode(&job.coinb1),
            hex::encode(&job.coinb2),
            branch_hex,
            format!("{:08x}", job.version),
            format!("{:08x}", job.nbits),
            format!("{:08x}", job.ntime),
            clean_jobs,
        ]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_serializes_as_triple() {
        let resp = Response::err(Value::from(1), WireError(23, "Low difficulty".to_string(), None));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"], serde_json::json!([23, "Low difficulty", null]));
        assert_eq!(json["result"], Value::Null);
    }

    #[test]
    fn success_response_has_null_error() {
        let resp = Response::ok(Value::from(1), Value::Bool(true));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"], Value::Bool(true));
        assert!(json["error"].is_null());
    }

    #[test]
    fn notify_clean_jobs_argument_overrides_the_job_field() {
        let job = crate::jobs::Job {
            job_id: "J1".to_string(),
            prev_hash: [0u8; 32],
            coinb1: vec![0xAA],
            coinb2: vec![0xBB],
            merkle_branch: vec![],
            version: 1,
            nbits: 0x1d00ffff,
            ntime: 0,
            clean_jobs: false,
            network_target: [0xff; 32],
        };
        let note = notify(&job, true);
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["params"][8], serde_json::json!(true));
    }

    #[test]
    fn notification_has_no_id_field_value() {
        let note = set_difficulty(64.0);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json["id"].is_null());
        assert_eq!(json["method"], "mining.set_difficulty");
        assert_eq!(json["params"], serde_json::json!([64.0]));
    }
}

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};
use std::sync::OnceLock;

static ACCEPTED: OnceLock<IntCounter> = OnceLock::new();
static REJECTED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static BLOCK_CANDIDATES: OnceLock<IntCounter> = OnceLock::new();
static VARDIFF_RETARGETS: OnceLock<IntCounter> = OnceLock::new();
static JOB_BROADCASTS: OnceLock<IntCounter> = OnceLock::new();
static NOTIFY_DROPPED: OnceLock<IntCounter> = OnceLock::new();
static PROTOCOL_DETECTIONS: IntCounterVecCell = IntCounterVecCell::new();

static ACTIVE_CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();
static ACTIVE_SESSIONS: OnceLock<IntGauge> = OnceLock::new();

// `IntCounterVec` behind a thin helper so `protocol` labels don't need an
// extra top-level static beside the rest.
struct IntCounterVecCell(OnceLock<IntCounterVec>);

impl IntCounterVecCell {
    const fn new() -> Self {
        Self(OnceLock::new())
    }

    fn get(&self) -> &IntCounterVec {
        self.0.get_or_init(|| {
            IntCounterVec::new(
                Opts::new(
                    "protocol_detections_total",
                    "Connections classified by detected wire protocol",
                ),
                &["protocol"],
            )
            .unwrap()
        })
    }
}

fn accepted() -> &'static IntCounter {
    ACCEPTED.get_or_init(|| IntCounter::new("shares_accepted_total", "Total accepted shares").unwrap())
}

fn rejected() -> &'static IntCounterVec {
    REJECTED_TOTAL.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("shares_rejected_total", "Total rejected shares by reason"),
            &["reason"],
        )
        .unwrap()
    })
}

fn block_candidates() -> &'static IntCounter {
    BLOCK_CANDIDATES
        .get_or_init(|| IntCounter::new("block_candidates_total", "Shares that also met the network target").unwrap())
}

fn vardiff_retargets() -> &'static IntCounter {
    VARDIFF_RETARGETS
        .get_or_init(|| IntCounter::new("vardiff_retargets_total", "Total vardiff retarget events").unwrap())
}

fn job_broadcasts() -> &'static IntCounter {
    JOB_BROADCASTS
        .get_or_init(|| IntCounter::new("job_broadcasts_total", "Total mining.notify broadcasts sent").unwrap())
}

fn notify_dropped() -> &'static IntCounter {
    NOTIFY_DROPPED.get_or_init(|| {
        IntCounter::new(
            "notify_dropped_total",
            "Stale mining.notify broadcasts dropped because a session's outbound queue was full",
        )
        .unwrap()
    })
}

fn active_connections() -> &'static IntGauge {
    ACTIVE_CONNECTIONS
        .get_or_init(|| IntGauge::new("stratum_active_connections", "Active TCP connections").unwrap())
}

fn active_sessions() -> &'static IntGauge {
    ACTIVE_SESSIONS.get_or_init(|| IntGauge::new("stratum_active_sessions", "Authorized sessions").unwrap())
}

pub fn inc_accepted() {
    accepted().inc();
}

pub fn inc_rejected(reason: &str) {
    rejected().with_label_values(&[reason]).inc();
}

pub fn inc_block_candidate() {
    block_candidates().inc();
}

pub fn inc_vardiff_retarget() {
    vardiff_retargets().inc();
}

pub fn inc_job_broadcasts() {
    job_broadcasts().inc();
}

pub fn inc_notify_dropped() {
    notify_dropped().inc();
}

pub fn inc_connections() {
    active_connections().inc();
}

pub fn dec_connections() {
    active_connections().dec();
}

pub fn inc_sessions() {
    active_sessions().inc();
}

pub fn dec_sessions() {
    active_sessions().dec();
}

pub fn inc_protocol_detection(protocol: &str) {
    PROTOCOL_DETECTIONS.get().with_label_values(&[protocol]).inc();
}

pub fn render() -> String {
    let enc = TextEncoder::new();
    let mut mfs = Vec::new();

    mfs.extend(accepted().collect());
    mfs.extend(rejected().collect());
    mfs.extend(block_candidates().collect());
    mfs.extend(vardiff_retargets().collect());
    mfs.extend(job_broadcasts().collect());
    mfs.extend(notify_dropped().collect());
    mfs.extend(active_connections().collect());
    mfs.extend(active_sessions().collect());
    mfs.extend(PROTOCOL_DETECTIONS.get().collect());

    let mut buf = Vec::new();
    let _ = enc.encode(&mfs, &mut buf);
    String::from_utf8_lossy(&buf).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_known_metric_names() {
        inc_accepted();
        inc_rejected("stale");
        let text = render();
        assert!(text.contains("shares_accepted_total"));
        assert!(text.contains("shares_rejected_total"));
    }
}

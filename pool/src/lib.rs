pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod shares;
pub mod sink;
pub mod stratum;
pub mod vardiff;

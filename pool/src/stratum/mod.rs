pub mod connection;
pub mod server;
pub mod v2;
pub mod wire;

pub use connection::V1Connection;
pub use server::StratumServer;

//! Pure, I/O-free primitives shared by the Stratum pool front-end:
//! hashing, merkle branch construction, coinbase assembly, and
//! difficulty/target arithmetic. Nothing in this crate touches a socket
//! or a clock — it exists so the hard math can be unit- and
//! property-tested in isolation from the pool's async machinery.

pub mod algorithm;
pub mod coinbase;
pub mod crypto;
pub mod header;
pub mod merkle;
pub mod target;

pub use algorithm::{Algorithm, HashAlgorithm};
pub use crypto::double_sha256;
pub use target::{difficulty_to_target, hash_meets_target};

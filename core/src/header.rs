//! Block header assembly: the fixed-layout byte string an algorithm
//! adapter hashes to produce a share's proof-of-work hash.

/// `version || prev_hash || merkle_root || ntime || nbits || nonce`, each
/// multi-byte integer field little-endian (the Bitcoin-family wire
/// convention); `prev_hash`/`merkle_root` are taken as-is, already in
/// their internal byte order.
pub fn assemble(
    version: u32,
    prev_hash: &[u8; 32],
    merkle_root: &[u8; 32],
    ntime: u32,
    nbits: u32,
    nonce: u32,
) -> [u8; 80] {
    let mut header = [0u8; 80];
    header[0..4].copy_from_slice(&version.to_le_bytes());
    header[4..36].copy_from_slice(prev_hash);
    header[36..68].copy_from_slice(merkle_root);
    header[68..72].copy_from_slice(&ntime.to_le_bytes());
    header[72..76].copy_from_slice(&nbits.to_le_bytes());
    header[76..80].copy_from_slice(&nonce.to_le_bytes());
    header
}

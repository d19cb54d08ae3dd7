//! Content addressing for tiles.
//!
//! A tile's cache key hashes its generation inputs: the seed, the
//! monotonically increasing content version, and a digest of the bytes
//! themselves. Hashing the content version guarantees a fresh key on every
//! successful write, even when a regeneration happens to produce identical
//! pixels.

/// Digest of raw tile bytes, hex-encoded.
pub fn tile_byte_hash(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Deterministic content hash over a tile's generation inputs, used as the
/// cache-invalidation key and ETag.
pub fn content_hash(seed: u64, content_ver: u64, byte_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(&content_ver.to_le_bytes());
    hasher.update(byte_hash.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

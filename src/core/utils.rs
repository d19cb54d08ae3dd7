//! Utility functions for common operations across the codebase.

/// Current timestamp in milliseconds since epoch.
///
/// Used for the `created_at`/`updated_at` fields of persisted records and as
/// the lease timestamp for in-flight generation. Milliseconds keep the
/// operator-facing JSON readable while staying precise enough for ordering.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

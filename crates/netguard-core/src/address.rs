//! Peer address normalization.
//!
//! Allowlist checks are exact string membership, so every address (peer or
//! allowlist entry) goes through [`normalize_peer`] first. The only rewrite
//! performed is stripping the IPv4-mapped IPv6 prefix: `::ffff:10.0.0.5`
//! becomes `10.0.0.5`. No DNS, no CIDR matching.

/// IPv4 loopback, always present in the allowlist.
pub const LOOPBACK_V4: &str = "127.0.0.1";

/// IPv6 loopback, always present in the allowlist.
pub const LOOPBACK_V6: &str = "::1";

/// Label used in messages when the peer address could not be determined.
pub const UNKNOWN_PEER: &str = "Unknown";

const MAPPED_V4_PREFIX: &str = "::ffff:";

/// Normalize a raw peer address for allowlist lookup.
///
/// Surrounding whitespace is trimmed and an IPv4-mapped IPv6 prefix
/// (matched case-insensitively) is stripped. Returns `None` when nothing
/// usable is left.
pub fn normalize_peer(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let bare = match trimmed.get(..MAPPED_V4_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(MAPPED_V4_PREFIX) => {
            &trimmed[MAPPED_V4_PREFIX.len()..]
        }
        _ => trimmed,
    };
    if bare.is_empty() {
        None
    } else {
        Some(bare)
    }
}

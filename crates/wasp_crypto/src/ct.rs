//! Constant-time comparison.
//!
//! Required whenever user-controlled bytes are compared against a secret or
//! an integrity value (media digests, truncated MACs).

use subtle::{Choice, ConstantTimeEq};

/// Compare two byte slices in constant time.
///
/// A length mismatch returns false, but the common prefix is still compared
/// so the running time depends only on the lengths, never on the contents.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    let n = a.len().min(b.len());
    let contents = a[..n].ct_eq(&b[..n]);
    let lengths = Choice::from((a.len() == b.len()) as u8);
    bool::from(contents & lengths)
}

use crate::error::GatewayError;

const BCRYPT_COST: u32 = 12;

/// One-way key/password hashing with a single call-site for comparison, so
/// the constant-time guarantee bcrypt already provides is never bypassed by
/// an ad-hoc `==` elsewhere in the codebase.
pub fn hash(raw: &str) -> Result<Vec<u8>, GatewayError> {
    bcrypt::hash(raw, BCRYPT_COST)
        .map(|s| s.into_bytes())
        .map_err(|e| GatewayError::internal(format!("hash failed: {e}")))
}

/// Constant-time compare of a raw value against a stored bcrypt hash.
pub fn verify(raw: &str, hash: &[u8]) -> bool {
    let Ok(hash_str) = std::str::from_utf8(hash) else {
        return false;
    };
    bcrypt::verify(raw, hash_str).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrips() {
        let h = hash("sk_abc123").unwrap();
        assert!(verify("sk_abc123", &h));
        assert!(!verify("sk_wrong", &h));
    }
}

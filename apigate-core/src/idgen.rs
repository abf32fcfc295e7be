use rand::RngCore;

/// Generates resource identifiers. A trait seam so tests can substitute a
/// deterministic generator (§2: "Clock / IDGen / Random").
pub trait IdGen: Send + Sync {
    fn new_id(&self) -> String;
}

#[derive(Debug, Default)]
pub struct UuidGen;

impl IdGen for UuidGen {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Generates raw API key material: `prefix_` + 32 bytes of CSPRNG output,
/// base64url-encoded without padding. The raw value is returned to the
/// caller exactly once (§3) and is never itself persisted.
pub fn generate_raw_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    use base64::Engine;
    format!(
        "sk_{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

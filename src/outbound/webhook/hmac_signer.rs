use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a generated endpoint secret.
pub const SECRET_BYTES: usize = 32;

/// HMAC-SHA256 over the exact bytes sent on the wire, hex encoded.
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature against the payload.
pub fn verify(payload: &[u8], secret: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Fresh endpoint secret: 32 random bytes rendered as lowercase hex.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Helper function to format signature for HTTP header
pub fn format_signature_header(signature: &str) -> String {
    format!("sha256={signature}")
}

/// Helper function to parse signature from HTTP header
pub fn parse_signature_header(header: &str) -> Result<String, String> {
    if let Some(sig) = header.strip_prefix("sha256=") {
        Ok(sig.to_string())
    } else {
        Err(format!("Invalid signature header format: {header}"))
    }
}

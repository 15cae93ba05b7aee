use ring::{digest, hmac, rand::SecureRandom, rand::SystemRandom};

#[derive(thiserror::Error, Debug)]
pub enum SignatureError {
    #[error("Signature is not valid hex")]
    MalformedSignature,

    #[error("Signature does not match payload")]
    Mismatch,

    #[error("Random generator failure")]
    Rng,
}

/// Signs a payload with HMAC-SHA256 and returns the tag as lowercase hex.
pub fn sign(payload: &str, key: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, payload.as_bytes());
    hex::encode(tag.as_ref())
}

/// Verifies a hex HMAC-SHA256 tag in constant time.
pub fn verify(payload: &str, signature: &str, key: &[u8]) -> Result<(), SignatureError> {
    let tag = hex::decode(signature).map_err(|_| SignatureError::MalformedSignature)?;
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, payload.as_bytes(), &tag).map_err(|_| SignatureError::Mismatch)
}

/// SHA-256 of the input as lowercase hex. Used to store refresh tokens and device keys.
pub fn sha256_hex(input: &str) -> String {
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hex::encode(hash.as_ref())
}

/// `len` bytes from the system CSPRNG, hex encoded.
pub fn random_hex(len: usize) -> Result<String, SignatureError> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| SignatureError::Rng)?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = b"door-secret";
        let signature = sign("payload", key);

        assert_eq!(signature.len(), 64);
        assert!(verify("payload", &signature, key).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let key = b"door-secret";
        let signature = sign("payload", key);

        assert!(matches!(
            verify("payload2", &signature, key),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signature = sign("payload", b"key-one");
        assert!(verify("payload", &signature, b"key-two").is_err());
    }

    #[test]
    fn test_non_hex_signature_is_malformed() {
        let key = b"door-secret";
        assert!(matches!(
            verify("payload", "not-hex!", key),
            Err(SignatureError::MalformedSignature)
        ));
    }

    #[test]
    fn test_random_hex_is_unique() {
        let a = random_hex(32).unwrap();
        let b = random_hex(32).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
    }
}

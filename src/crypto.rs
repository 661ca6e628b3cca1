//! Hashing and signing primitives for the quote protocol.
//!
//! Commitments use hash160 (RIPEMD-160 over SHA-256); threshold keys are
//! HMAC-SHA256 derivations; attestations are DER-encoded low-S ECDSA
//! signatures over a 32-byte digest on secp256k1.

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::{OracleError, Result};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest of the input.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// hash160: RIPEMD-160 of the SHA-256 of the input.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// HMAC-SHA256 over the concatenation of `parts`, keyed by `secret`.
pub fn hmac256(secret: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|err| OracleError::Crypto(err.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Derive the compressed secp256k1 public key for a signing secret, hex-encoded.
pub fn derive_pubkey(secret: &[u8; 32]) -> Result<String> {
    let secp = Secp256k1::new();
    let seckey =
        SecretKey::from_slice(secret).map_err(|err| OracleError::Crypto(err.to_string()))?;
    let pubkey = PublicKey::from_secret_key(&secp, &seckey);
    Ok(hex::encode(pubkey.serialize()))
}

/// ECDSA-sign a 32-byte digest. Returns the DER-encoded signature in
/// canonical low-S form, hex-encoded.
pub fn sign_digest(secret: &[u8; 32], digest: &[u8; 32]) -> Result<String> {
    let secp = Secp256k1::new();
    let seckey =
        SecretKey::from_slice(secret).map_err(|err| OracleError::Crypto(err.to_string()))?;
    let message = Message::from_digest(*digest);
    let mut signature = secp.sign_ecdsa(&message, &seckey);
    signature.normalize_s();
    Ok(hex::encode(signature.serialize_der()))
}

/// Verify a hex DER signature over a 32-byte digest against a hex compressed
/// public key.
pub fn verify_digest(pubkey_hex: &str, digest: &[u8; 32], sig_hex: &str) -> Result<bool> {
    let secp = Secp256k1::new();
    let pubkey_bytes =
        hex::decode(pubkey_hex).map_err(|err| OracleError::Crypto(err.to_string()))?;
    let pubkey =
        PublicKey::from_slice(&pubkey_bytes).map_err(|err| OracleError::Crypto(err.to_string()))?;
    let sig_bytes = hex::decode(sig_hex).map_err(|err| OracleError::Crypto(err.to_string()))?;
    let signature =
        Signature::from_der(&sig_bytes).map_err(|err| OracleError::Crypto(err.to_string()))?;
    let message = Message::from_digest(*digest);
    Ok(secp.verify_ecdsa(&message, &signature, &pubkey).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_vector() {
        // SHA-256("abc")
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash160_vector() {
        // hash160 of the empty string: RIPEMD160(SHA256(""))
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn test_hmac_concatenation_matches_single_buffer() {
        let secret = b"secret";
        let joined = hmac256(secret, &[b"abc", b"def"]).unwrap();
        let single = hmac256(secret, &[b"abcdef"]).unwrap();
        assert_eq!(joined, single);

        let other = hmac256(secret, &[b"abcdeg"]).unwrap();
        assert_ne!(joined, other);
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let secret = [0x42u8; 32];
        let pubkey = derive_pubkey(&secret).unwrap();
        let digest = sha256(b"message");

        let sig = sign_digest(&secret, &digest).unwrap();
        assert!(verify_digest(&pubkey, &digest, &sig).unwrap());

        let wrong = sha256(b"other message");
        assert!(!verify_digest(&pubkey, &wrong, &sig).unwrap());
    }

    #[test]
    fn test_sign_rejects_invalid_key() {
        // All-zero bytes are not a valid secp256k1 secret key.
        let digest = sha256(b"message");
        assert!(sign_digest(&[0u8; 32], &digest).is_err());
    }
}

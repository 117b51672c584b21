//! Signature verifier (C8): EIP-191 `personal_sign` framing, secp256k1
//! public-key recovery, and Keccak-256 address derivation.

use crate::error::ProofError;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use sha3::{Digest, Keccak256};

/// Frames a message per EIP-191 `personal_sign`:
/// `"\x19Ethereum Signed Message:\n" + len(message) + message`.
pub fn eip191_frame(message: &[u8]) -> Vec<u8> {
    let mut framed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    framed.extend_from_slice(message);
    framed
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derives the 0x-prefixed lowercase Ethereum-style address from an
/// uncompressed secp256k1 public key (65 bytes, leading `0x04`).
fn address_from_uncompressed_pubkey(pubkey: &[u8; 65]) -> String {
    let hash = keccak256(&pubkey[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recovers the signer address from a 65-byte `r‖s‖v` signature over a
/// 32-byte message digest.
pub fn recover_address(digest: &[u8; 32], signature: &[u8; 65]) -> Result<String, ProofError> {
    let secp = Secp256k1::verification_only();
    let message =
        Message::from_digest_slice(digest).map_err(|_| ProofError::BadSignature)?;

    let v = signature[64];
    let recovery_id = if v >= 27 { v - 27 } else { v };
    let recid = RecoveryId::from_i32(recovery_id as i32).map_err(|_| ProofError::BadSignature)?;
    let mut rs = [0u8; 64];
    rs.copy_from_slice(&signature[..64]);
    let recoverable = RecoverableSignature::from_compact(&rs, recid)
        .map_err(|_| ProofError::BadSignature)?;

    let pubkey = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| ProofError::BadSignature)?;
    let uncompressed = pubkey.serialize_uncompressed();
    Ok(address_from_uncompressed_pubkey(&uncompressed))
}

/// Verifies that `signature_hex` (0x-prefixed, 130 hex chars) over
/// `signable_message`, framed per EIP-191, was produced by `expected_account`
/// (case-insensitive comparison — checksum-tolerant).
pub fn verify_signature(
    signable_message: &[u8],
    signature_hex: &str,
    expected_account: &str,
) -> Result<(), ProofError> {
    let sig_bytes = parse_signature_hex(signature_hex)?;
    let framed = eip191_frame(signable_message);
    let digest = keccak256(&framed);
    let recovered = recover_address(&digest, &sig_bytes)?;
    if recovered.eq_ignore_ascii_case(expected_account) {
        Ok(())
    } else {
        Err(ProofError::BadSignature)
    }
}

fn parse_signature_hex(signature_hex: &str) -> Result<[u8; 65], ProofError> {
    let trimmed = signature_hex.strip_prefix("0x").unwrap_or(signature_hex);
    let bytes = hex::decode(trimmed).map_err(|_| ProofError::BadSignature)?;
    if bytes.len() != 65 {
        return Err(ProofError::BadSignature);
    }
    let mut out = [0u8; 65];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{rand, SecretKey};

    fn sign_message(secret: &SecretKey, message: &[u8]) -> (String, String) {
        let secp = Secp256k1::new();
        let framed = eip191_frame(message);
        let digest = keccak256(&framed);
        let msg = Message::from_digest_slice(&digest).unwrap();
        let (recid, sig) = secp.sign_ecdsa_recoverable(&msg, secret).serialize_compact();
        let mut bytes = sig.to_vec();
        bytes.push(recid.to_i32() as u8 + 27);
        let pubkey = secp256k1::PublicKey::from_secret_key(&secp, secret);
        let uncompressed = pubkey.serialize_uncompressed();
        let address = address_from_uncompressed_pubkey(&uncompressed);
        (hex::encode(bytes), address)
    }

    #[test]
    fn recovers_the_signing_address() {
        let mut rng = rand::thread_rng();
        let secret = SecretKey::new(&mut rng);
        let (sig_hex, address) = sign_message(&secret, b"hello step");
        let result = verify_signature(b"hello step", &format!("0x{sig_hex}"), &address);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_a_mutated_signature() {
        let mut rng = rand::thread_rng();
        let secret = SecretKey::new(&mut rng);
        let (sig_hex, address) = sign_message(&secret, b"hello step");
        let mut bytes = hex::decode(&sig_hex).unwrap();
        bytes[0] ^= 0xff;
        let mutated = format!("0x{}", hex::encode(bytes));
        let result = verify_signature(b"hello step", &mutated, &address);
        assert!(matches!(result, Err(ProofError::BadSignature)));
    }

    #[test]
    fn rejects_signature_for_a_different_account() {
        let mut rng = rand::thread_rng();
        let secret = SecretKey::new(&mut rng);
        let (sig_hex, _address) = sign_message(&secret, b"hello step");
        let result = verify_signature(
            b"hello step",
            &format!("0x{sig_hex}"),
            "0x0000000000000000000000000000000000dead",
        );
        assert!(matches!(result, Err(ProofError::BadSignature)));
    }

    #[test]
    fn rejects_malformed_signature_hex() {
        let result = verify_signature(b"hello step", "0xnothex", "0xabc");
        assert!(matches!(result, Err(ProofError::BadSignature)));
    }
}

//! # Envelope Crypto
//!
//! Cryptographic primitives for the partner envelope protocol:
//!
//! - **AES-256-CBC** payload encryption with PKCS#7 padding. A fresh random
//!   16-byte IV is generated per call and prepended to the ciphertext, so the
//!   wire blob is `base64(IV || ciphertext)`.
//! - **RSA SHA-256 / PKCS#1 v1.5** detached signatures over UTF-8 strings,
//!   exchanged as base64.
//! - Key generation helpers for partner onboarding (256-bit AES keys and
//!   2048-bit+ RSA keypairs in PEM form).
//!
//! Decryption failures are deliberately collapsed into a single
//! [`CryptoError::DecryptFailure`]: callers cannot distinguish a wrong key
//! from corrupted ciphertext or a padding mismatch, which keeps the service
//! from acting as a padding oracle. Likewise [`verify_rsa`] returns `false`
//! for *any* malformed input instead of erroring.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size; also the length of the prepended IV.
const IV_LEN: usize = 16;

/// AES-256 key length in bytes.
const AES_KEY_LEN: usize = 32;

/// Minimum accepted RSA modulus size for partner keys.
pub const MIN_RSA_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key is not a valid base64-encoded 256-bit AES key.
    #[error("invalid AES key: {0}")]
    InvalidKey(String),

    /// Wrong key, corrupted ciphertext, or padding mismatch — callers are
    /// not told which.
    #[error("failed to decrypt data")]
    DecryptFailure,

    /// The private key PEM could not be parsed or signing failed.
    #[error("failed to sign data: {0}")]
    SignFailure(String),

    /// RSA keypair generation failed or the requested size is too small.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

/// Encrypt a plaintext string with AES-256-CBC / PKCS#7.
///
/// A fresh random IV is generated on every call; the IV is never reused
/// across calls with the same key. Returns `base64(IV || ciphertext)`.
pub fn encrypt_aes(plaintext: &str, aes_key_b64: &str) -> Result<String, CryptoError> {
    let key = decode_aes_key(aes_key_b64)?;

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Decrypt a `base64(IV || ciphertext)` blob with AES-256-CBC / PKCS#7.
///
/// The first 16 bytes of the decoded blob are the IV; the remainder is the
/// ciphertext. Every failure mode after key decoding maps to
/// [`CryptoError::DecryptFailure`].
pub fn decrypt_aes(blob_b64: &str, aes_key_b64: &str) -> Result<String, CryptoError> {
    let key = decode_aes_key(aes_key_b64)?;

    let blob = BASE64
        .decode(blob_b64)
        .map_err(|_| CryptoError::DecryptFailure)?;
    if blob.len() <= IV_LEN {
        return Err(CryptoError::DecryptFailure);
    }
    let (iv, ciphertext) = blob.split_at(IV_LEN);

    let cipher =
        Aes256CbcDec::new_from_slices(&key, iv).map_err(|_| CryptoError::DecryptFailure)?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptFailure)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailure)
}

/// Sign a UTF-8 string with an RSA private key (SHA-256, PKCS#1 v1.5).
///
/// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`)
/// PEM. Returns the signature as base64.
pub fn sign_rsa(data: &str, private_key_pem: &str) -> Result<String, CryptoError> {
    let private_key = parse_private_key(private_key_pem)
        .map_err(|e| CryptoError::SignFailure(e))?;

    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key
        .try_sign(data.as_bytes())
        .map_err(|e| CryptoError::SignFailure(e.to_string()))?;

    Ok(BASE64.encode(signature.to_bytes()))
}

/// Verify an RSA signature (SHA-256, PKCS#1 v1.5) over a UTF-8 string.
///
/// Returns `false` — never an error — on malformed PEM, malformed base64,
/// a wrong key, or a signature that simply does not match. Callers cannot
/// tell the cases apart.
pub fn verify_rsa(data: &str, signature_b64: &str, public_key_pem: &str) -> bool {
    let Ok(public_key) = parse_public_key(public_key_pem) else {
        return false;
    };
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(sig_bytes.as_slice()) else {
        return false;
    };

    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    verifying_key.verify(data.as_bytes(), &signature).is_ok()
}

/// Generate a random 256-bit AES key, base64-encoded.
pub fn generate_aes_key() -> String {
    let mut key = [0u8; AES_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

/// Generate an RSA keypair, returned as `(public_pem, private_pem)` in
/// SPKI / PKCS#8 form.
pub fn generate_rsa_keypair(bits: usize) -> Result<(String, String), CryptoError> {
    if bits < MIN_RSA_BITS {
        return Err(CryptoError::KeyGeneration(format!(
            "RSA keys must be at least {MIN_RSA_BITS} bits, got {bits}"
        )));
    }

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    Ok((public_pem, private_pem.to_string()))
}

fn decode_aes_key(aes_key_b64: &str) -> Result<[u8; AES_KEY_LEN], CryptoError> {
    let bytes = BASE64
        .decode(aes_key_b64)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!("expected {AES_KEY_LEN}-byte key, got {len} bytes"))
    })
}

// Partners export keys from a variety of tooling, so both the modern
// PKCS#8/SPKI headers and the legacy PKCS#1 headers are accepted.
fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, String> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| e.to_string())
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, String> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| e.to_string())
}

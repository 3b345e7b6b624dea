//! APK signing and verification.
//!
//! A signed APK is the original archive followed by a signature trailer:
//!
//! ```text
//! apk || signature(64) || public_key(32) || alias || alias_len(u32 LE) || "APK Sig Block 42"
//! ```
//!
//! The signature covers the SHA-256 digest of the unsigned APK bytes.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey};
use crate::keystore::Keystore;
use bytes::{BufMut, Bytes, BytesMut};
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier;
use sha2::{Digest, Sha256};
use splitstore_core::{SigningConfig, SplitApk};

/// Magic trailing every signed APK.
pub const SIG_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

const SIGNATURE_LEN: usize = 64;
const PUBLIC_KEY_LEN: usize = 32;
const ALIAS_LEN_LEN: usize = 4;
const MAX_ALIAS_LEN: usize = 1024;

/// Signs generated split APKs with the key stored in a bundle's keystore.
pub trait ApkSigner: Send + Sync + 'static {
    /// Sign every APK in `apks`, preserving names and order.
    fn sign_splits(
        &self,
        apks: &[SplitApk],
        keystore: &[u8],
        config: &SigningConfig,
    ) -> SignerResult<Vec<SplitApk>>;

    /// Fingerprint of the signing certificate named by `config`.
    fn certificate_fingerprint(&self, keystore: &[u8], config: &SigningConfig)
    -> SignerResult<String>;
}

/// Ed25519 signer over the keystore format in [`crate::keystore`].
#[derive(Clone, Copy, Debug, Default)]
pub struct KeystoreSigner;

impl ApkSigner for KeystoreSigner {
    fn sign_splits(
        &self,
        apks: &[SplitApk],
        keystore: &[u8],
        config: &SigningConfig,
    ) -> SignerResult<Vec<SplitApk>> {
        let keypair = Keystore::open(keystore, config)?;
        apks.iter()
            .map(|apk| {
                let signed = sign_apk(&keypair, &apk.data)?;
                Ok(SplitApk {
                    name: apk.name.clone(),
                    data: signed,
                })
            })
            .collect()
    }

    fn certificate_fingerprint(
        &self,
        keystore: &[u8],
        config: &SigningConfig,
    ) -> SignerResult<String> {
        Ok(Keystore::open(keystore, config)?.fingerprint())
    }
}

/// Sign raw APK bytes with an unlocked key, returning the signed archive.
pub fn sign_apk(keypair: &KeyPair, apk: &[u8]) -> SignerResult<Bytes> {
    if apk.is_empty() {
        return Err(SignerError::EmptyApk);
    }

    let digest = Sha256::digest(apk);
    let signature = keypair.secret.signing_key().sign(&digest);
    let alias = keypair.alias.as_bytes();

    let mut out = BytesMut::with_capacity(
        apk.len() + SIGNATURE_LEN + PUBLIC_KEY_LEN + alias.len() + ALIAS_LEN_LEN + 16,
    );
    out.put_slice(apk);
    out.put_slice(&signature.to_bytes());
    out.put_slice(keypair.public.as_bytes());
    out.put_slice(alias);
    out.put_u32_le(alias.len() as u32);
    out.put_slice(SIG_BLOCK_MAGIC);
    Ok(out.freeze())
}

/// Sign with a keystore in one step.
pub fn sign(apk: &[u8], keystore: &[u8], config: &SigningConfig) -> SignerResult<Bytes> {
    let keypair = Keystore::open(keystore, config)?;
    sign_apk(&keypair, apk)
}

/// Details recovered from a verified signed APK.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedApk {
    /// Length of the unsigned APK prefix.
    pub payload_len: usize,
    pub alias: String,
    pub fingerprint: String,
}

/// Verify a signed APK's trailer against its payload.
pub fn verify_signed_apk(signed: &[u8]) -> SignerResult<VerifiedApk> {
    let invalid = |msg: &str| SignerError::InvalidSignedApk(msg.to_string());

    let body = signed
        .strip_suffix(SIG_BLOCK_MAGIC.as_slice())
        .ok_or_else(|| invalid("missing signature block magic"))?;

    let len_at = body
        .len()
        .checked_sub(ALIAS_LEN_LEN)
        .ok_or_else(|| invalid("truncated trailer"))?;
    let mut len_bytes = [0u8; ALIAS_LEN_LEN];
    len_bytes.copy_from_slice(&body[len_at..]);
    let alias_len = u32::from_le_bytes(len_bytes) as usize;
    if alias_len > MAX_ALIAS_LEN {
        return Err(invalid("alias length out of range"));
    }

    let alias_at = len_at
        .checked_sub(alias_len)
        .ok_or_else(|| invalid("truncated alias"))?;
    let key_at = alias_at
        .checked_sub(PUBLIC_KEY_LEN)
        .ok_or_else(|| invalid("truncated public key"))?;
    let sig_at = key_at
        .checked_sub(SIGNATURE_LEN)
        .ok_or_else(|| invalid("truncated signature"))?;
    if sig_at == 0 {
        return Err(invalid("empty payload"));
    }

    let alias = std::str::from_utf8(&body[alias_at..len_at])
        .map_err(|_| invalid("alias is not UTF-8"))?
        .to_string();
    let public = PublicKey::from_bytes(&body[key_at..alias_at])?;

    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(&body[sig_at..key_at]);
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);

    let digest = Sha256::digest(&body[..sig_at]);
    public
        .verifying_key()
        .verify(&digest, &signature)
        .map_err(|_| SignerError::VerificationFailed)?;

    Ok(VerifiedApk {
        payload_len: sig_at,
        alias,
        fingerprint: public.fingerprint(),
    })
}

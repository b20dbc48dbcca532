//! Signing key lifecycle.
//!
//! The [`KeyManager`] owns the single RSA key pair that signs every access
//! token for the lifetime of the process. It is created exactly once at
//! startup through [`KeyManager::load_or_generate`] and then shared behind an
//! `Arc`; nothing mutates it afterwards.
//!
//! # Persistence
//!
//! The private key lives in one PKCS#8 PEM file. A new key is published with
//! create-if-absent semantics: the PEM is written to a temporary sibling and
//! hard-linked into place, which fails if another writer got there first. The
//! loser discards its key and loads the published one, so concurrent starters
//! converge on a single key. Within one process the whole load-or-generate
//! step is additionally serialised.
//!
//! # Signing
//!
//! `rsa` generates and persists the key; signatures are produced and checked
//! by `jsonwebtoken` on its aws-lc backend. The PKCS#1 DER is handed to an
//! [`EncodingKey`] once at construction and the public components to a
//! [`DecodingKey`].
//!
//! # Exported material
//!
//! Only the public half ever leaves this module: SPKI PEM, a JWK, and the key
//! id. The private key has no accessor and is redacted from `Debug`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::Error as JwtError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use parking_lot::Mutex;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Smallest accepted RSA modulus.
pub const MIN_KEY_BITS: usize = 2048;

/// Serialises load-or-generate within the process.
static LOAD_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Signing key failures. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// Reading, writing or linking the key file failed.
    #[error("key file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// RSA key generation failed.
    #[error("RSA key generation failed: {0}")]
    Generate(#[source] rsa::Error),

    /// Key material could not be encoded.
    #[error("key encoding failed: {0}")]
    Encode(String),

    /// Key material could not be parsed.
    #[error("key decoding failed: {0}")]
    Decode(String),

    /// Modulus below [`MIN_KEY_BITS`].
    #[error("RSA key of {bits} bits is below the {MIN_KEY_BITS}-bit minimum")]
    WeakKey {
        /// Modulus size found or requested.
        bits: usize,
    },

    /// Producing a signature failed.
    #[error("signing failed: {0}")]
    Sign(String),
}

impl KeyError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Process-wide RSA signing key.
pub struct KeyManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    public: RsaPublicKey,
    public_pem: String,
    kid: String,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("kid", &self.kid)
            .field("bits", &self.modulus_bits())
            .field("private", &"<redacted>")
            .finish()
    }
}

impl KeyManager {
    /// Load the key at `path`, or generate and persist a new `bits`-bit key.
    ///
    /// An unreadable or unparseable file is moved aside to
    /// `<path>.corrupt-<unix ts>` before a replacement is generated. A
    /// readable key below [`MIN_KEY_BITS`] is an error, not a reason to
    /// regenerate.
    pub fn load_or_generate(path: &Path, bits: usize) -> Result<Self, KeyError> {
        if bits < MIN_KEY_BITS {
            return Err(KeyError::WeakKey { bits });
        }

        let _guard = LOAD_LOCK.lock();

        match fs::read_to_string(path) {
            Ok(pem) => match Self::from_pkcs8_pem(&pem) {
                Ok(manager) => {
                    info!(path = %path.display(), kid = %manager.kid, bits = manager.modulus_bits(), "Loaded signing key");
                    return Ok(manager);
                }
                Err(e @ KeyError::WeakKey { .. }) => return Err(e),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Signing key unparseable, replacing it");
                    quarantine(path)?;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No signing key on disk");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Signing key unreadable, replacing it");
                quarantine(path)?;
            }
        }

        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(KeyError::Generate)?;
        let pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encode(e.to_string()))?;

        if publish(path, pem.as_bytes())? {
            let manager = Self::from_private(private)?;
            info!(path = %path.display(), kid = %manager.kid, bits, "Generated signing key");
            Ok(manager)
        } else {
            let published = fs::read_to_string(path).map_err(|e| KeyError::io(path, e))?;
            let manager = Self::from_pkcs8_pem(&published)?;
            info!(path = %path.display(), kid = %manager.kid, "Signing key published concurrently, using it");
            Ok(manager)
        }
    }

    /// Build from an in-memory PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, KeyError> {
        let private =
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| KeyError::Decode(e.to_string()))?;
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self, KeyError> {
        let bits = private.size() * 8;
        if bits < MIN_KEY_BITS {
            return Err(KeyError::WeakKey { bits });
        }

        let public = RsaPublicKey::from(&private);
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encode(e.to_string()))?;
        let der = public
            .to_public_key_der()
            .map_err(|e| KeyError::Encode(e.to_string()))?;
        let kid = hex::encode(Sha256::digest(der.as_bytes()).to_vec())[..16].to_string();

        let pkcs1 = private
            .to_pkcs1_der()
            .map_err(|e| KeyError::Encode(e.to_string()))?;
        let encoding = EncodingKey::from_rsa_der(pkcs1.as_bytes());
        let decoding =
            DecodingKey::from_rsa_raw_components(&public.n().to_bytes_be(), &public.e().to_bytes_be());

        Ok(Self {
            encoding,
            decoding,
            public,
            public_pem,
            kid,
        })
    }

    /// Key id: first 16 hex chars of SHA-256 over the SPKI DER.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn modulus_bits(&self) -> usize {
        self.public.size() * 8
    }

    /// Public key as SPKI PEM.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// Public key as an RS256 JWK.
    #[must_use]
    pub fn public_jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(self.public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(self.public.e().to_bytes_be()),
        })
    }

    /// RSASSA-PKCS1-v1_5 / SHA-256 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        let encoded = jsonwebtoken::crypto::sign(message, &self.encoding, Algorithm::RS256)
            .map_err(|e| KeyError::Sign(e.to_string()))?;
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| KeyError::Sign(e.to_string()))
    }

    /// Check a signature produced by [`sign`](Self::sign).
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let encoded = URL_SAFE_NO_PAD.encode(signature);
        jsonwebtoken::crypto::verify(&encoded, message, &self.decoding, Algorithm::RS256)
            .unwrap_or(false)
    }

    /// Sign `claims` as a compact RS256 JWS whose header carries this key's id.
    pub fn sign_jwt<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding)
            .map_err(|e| KeyError::Sign(e.to_string()))
    }

    /// Check the signature of a compact JWS and decode its claims under
    /// `validation`.
    pub fn decode_jwt<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<TokenData<T>, JwtError> {
        jsonwebtoken::decode(token, &self.decoding, validation)
    }
}

/// Publish `pem` at `path` unless a file already exists there.
///
/// Returns `false` when another writer won.
fn publish(path: &Path, pem: &[u8]) -> Result<bool, KeyError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| KeyError::io(parent, e))?;
    }

    let tmp = sibling(path, &format!("tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, pem).map_err(|e| KeyError::io(&tmp, e))?;

    // Owner read/write only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600));
    }

    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(KeyError::io(path, e)),
    }
}

/// Move a bad key file out of the way without destroying it.
fn quarantine(path: &Path) -> Result<(), KeyError> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let target = sibling(path, &format!("corrupt-{ts}"));
    match fs::rename(path, &target) {
        Ok(()) => {
            warn!(from = %path.display(), to = %target.display(), "Moved bad signing key aside");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KeyError::io(path, e)),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn sign_then_verify_round_trips() {
        // GIVEN: the shared test key
        let keys = testutil::key_manager();

        // WHEN: signing a payload
        let sig = keys.sign(b"payload").unwrap();

        // THEN: it verifies, and only for the same payload
        assert!(keys.verify(b"payload", &sig));
        assert!(!keys.verify(b"payloaD", &sig));
    }

    #[test]
    fn verify_rejects_garbage_signatures() {
        let keys = testutil::key_manager();

        assert!(!keys.verify(b"payload", b""));
        assert!(!keys.verify(b"payload", &[0u8; 256]));
        assert!(!keys.verify(b"payload", &[1u8; 7]));
    }

    #[test]
    fn flipped_signature_bit_fails() {
        let keys = testutil::key_manager();
        let mut sig = keys.sign(b"payload").unwrap();

        sig[10] ^= 0x01;

        assert!(!keys.verify(b"payload", &sig));
    }

    #[test]
    fn exports_only_public_material() {
        let keys = testutil::key_manager();

        assert!(keys.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(!format!("{keys:?}").contains("PRIVATE"));
        assert!(format!("{keys:?}").contains("<redacted>"));
    }

    #[test]
    fn jwk_describes_rs256_key() {
        let keys = testutil::key_manager();
        let jwk = keys.public_jwk();

        assert_eq!(jwk["kty"], "RSA");
        assert_eq!(jwk["alg"], "RS256");
        assert_eq!(jwk["use"], "sig");
        assert_eq!(jwk["kid"], keys.key_id());
        let n = URL_SAFE_NO_PAD.decode(jwk["n"].as_str().unwrap()).unwrap();
        assert_eq!(n.len() * 8, keys.modulus_bits());
        assert!(jwk.get("d").is_none());
    }

    #[test]
    fn key_id_is_spki_digest_prefix() {
        let keys = testutil::key_manager();
        let private = RsaPrivateKey::from_pkcs8_pem(testutil::private_pem()).unwrap();
        let der = RsaPublicKey::from(&private).to_public_key_der().unwrap();

        let expected = hex::encode(Sha256::digest(der.as_bytes()).to_vec());

        assert_eq!(keys.key_id(), &expected[..16]);
    }

    #[test]
    fn jwt_round_trip_and_signature_failure() {
        use jsonwebtoken::errors::ErrorKind;

        // GIVEN: a signed JWT
        let keys = testutil::key_manager();
        let claims = json!({"sub": "c1", "exp": 4_000_000_000_u64});
        let token = keys.sign_jwt(&claims).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;

        // WHEN/THEN: it decodes with the kid in its header
        let decoded = keys.decode_jwt::<Value>(&token, &validation).unwrap();
        assert_eq!(decoded.claims, claims);
        assert_eq!(decoded.header.kid.as_deref(), Some(keys.key_id()));

        // and a foreign signature is reported as such
        let (input, _) = token.rsplit_once('.').unwrap();
        let forged = format!("{input}.{}", URL_SAFE_NO_PAD.encode([7u8; 256]));
        let err = keys.decode_jwt::<Value>(&forged, &validation).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidSignature), "{err:?}");
    }

    #[test]
    fn key_id_is_stable_for_same_material() {
        let first = KeyManager::from_pkcs8_pem(testutil::private_pem()).unwrap();
        let second = KeyManager::from_pkcs8_pem(testutil::private_pem()).unwrap();

        assert_eq!(first.key_id(), second.key_id());
        assert_eq!(first.key_id().len(), 16);
    }

    #[test]
    fn requested_weak_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let err = KeyManager::load_or_generate(&dir.path().join("k.pem"), 1024).unwrap_err();

        assert!(matches!(err, KeyError::WeakKey { bits: 1024 }));
        assert!(!dir.path().join("k.pem").exists());
    }

    #[test]
    fn garbage_pem_is_a_decode_error() {
        let err = KeyManager::from_pkcs8_pem("not a key").unwrap_err();
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn sibling_appends_suffix() {
        let p = sibling(Path::new("/var/keys/signing.pem"), "tmp-1");
        assert_eq!(p, PathBuf::from("/var/keys/signing.pem.tmp-1"));
    }
}

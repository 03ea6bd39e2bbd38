use anyhow::{Context, Result};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_ENGINE;
use jsonwebtoken::{EncodingKey, Header};
use pem as pem_crate;
use sha2::{Digest, Sha256};
use simple_asn1::{ASN1Block, from_der};

/// RS256 signer backed by the agent's RSA private key PEM.
///
/// Signs private-key JWT client assertions for the IdP and publishes the
/// matching public JWK so the assertion audience can verify them.
#[derive(Clone)]
pub struct PemSigner {
    kid: String,
    encoding_key: EncodingKey,
    jwk: serde_json::Value,
}

pub trait Signer: Send + Sync {
    fn kid(&self) -> &str;
    fn sign(&self, header: Header, claims: &serde_json::Value) -> Result<String>;
    fn jwks(&self) -> serde_json::Value;
}

impl PemSigner {
    /// Build a signer from a PKCS1 or PKCS8 RSA private key PEM.
    ///
    /// The public modulus/exponent are extracted from the key material to
    /// publish the JWK. When `kid_override` is not supplied, the key id is
    /// SHA-256(n || e) so it is stable across restarts for the same key.
    pub fn from_pem(key_pem: &[u8], kid_override: Option<&str>) -> Result<Self> {
        let encoding_key =
            EncodingKey::from_rsa_pem(key_pem).context("failed to create encoding key from pem")?;

        // Parse PEM to DER and extract modulus/exponent from private key
        let pem = pem_crate::parse(std::str::from_utf8(key_pem).context("key pem to str")?)
            .map_err(|e| anyhow::anyhow!("failed to parse key pem: {}", e))?;

        let der = pem.contents;
        let asn1 = from_der(&der).context("failed to parse private key DER ASN.1")?;

        // Walk ASN.1 to locate integers for modulus and exponent
        fn extract_n_e(blocks: &[ASN1Block]) -> Option<(Vec<u8>, Vec<u8>)> {
            for b in blocks {
                if let ASN1Block::Sequence(_, inner) = b {
                    // PKCS1 private key: sequence of integers: 0, n, e, d, ...
                    if inner.len() >= 3
                        && let (ASN1Block::Integer(_, n), ASN1Block::Integer(_, e)) =
                            (&inner[1], &inner[2])
                    {
                        let n_bytes = n.to_signed_bytes_be();
                        let e_bytes = e.to_signed_bytes_be();
                        return Some((n_bytes, e_bytes));
                    }
                    // PKCS8 will embed algorithmIdentifier and privateKey as octet string
                    for elem in inner.iter() {
                        if let ASN1Block::OctetString(_, os) = elem
                            && let Ok(nested) = from_der(os)
                            && let Some((n, e)) = extract_n_e(&nested)
                        {
                            return Some((n, e));
                        }
                    }
                }
            }
            None
        }

        let (n_bytes, e_bytes) = extract_n_e(&asn1)
            .ok_or_else(|| anyhow::anyhow!("failed to extract n/e from private key ASN.1"))?;

        let n_b64 = BASE64_ENGINE.encode(&n_bytes);
        let e_b64 = BASE64_ENGINE.encode(&e_bytes);

        let kid = match kid_override {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => {
                // Stable kid: SHA-256(n || e)
                let mut hasher = Sha256::new();
                hasher.update(&n_bytes);
                hasher.update(&e_bytes);
                hex::encode(hasher.finalize())
            }
        };

        let jwk = serde_json::json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": n_b64,
            "e": e_b64,
        });

        Ok(PemSigner {
            kid,
            encoding_key,
            jwk,
        })
    }
}

impl Signer for PemSigner {
    fn kid(&self) -> &str {
        &self.kid
    }

    fn sign(&self, mut header: Header, claims: &serde_json::Value) -> Result<String> {
        header.kid = Some(self.kid.clone());
        let token = jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .context("failed to encode jwt")?;
        Ok(token)
    }

    fn jwks(&self) -> serde_json::Value {
        serde_json::json!({ "keys": [self.jwk.clone()] })
    }
}

pub type DynSigner = Arc<dyn Signer>;

pub fn load_pem_signer_from_path(key_path: &str, kid: Option<&str>) -> Result<DynSigner> {
    let key = std::fs::read(key_path).context("read private key")?;
    let signer = PemSigner::from_pem(&key, kid).context("create pem signer")?;
    Ok(Arc::new(signer))
}

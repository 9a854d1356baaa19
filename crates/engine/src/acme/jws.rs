//! Requests signed with a certificate's own key
//!
//! The holder of a certificate's private key may revoke it without any
//! account. Such requests carry the public key as a `jwk` header where
//! account requests carry a `kid`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::rsa::PublicKeyComponents;
use ring::signature::{
    EcdsaKeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P384_SHA384_FIXED_SIGNING, RSA_PKCS1_SHA256,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ProtocolError;

pub(super) fn b64(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Directory entries used for key-authorized revocation
#[derive(Debug, Deserialize)]
pub(super) struct Directory {
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "revokeCert")]
    pub revoke_cert: String,
}

/// Flattened JSON serialization of a JWS
#[derive(Debug, Serialize)]
pub(super) struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

/// Private key that signs its own requests
pub(super) enum KeySigner {
    Ecdsa {
        key: EcdsaKeyPair,
        alg: &'static str,
        crv: &'static str,
    },
    Rsa(RsaKeyPair),
}

impl KeySigner {
    /// Accepts PKCS#8 (EC P-256, EC P-384, RSA) and PKCS#1 RSA keys
    pub(super) fn from_pem(key_pem: &str) -> Result<Self, ProtocolError> {
        let parsed = ::pem::parse(key_pem).map_err(|e| ProtocolError::PrivateKey(e.to_string()))?;
        let der = parsed.contents();
        let rng = SystemRandom::new();

        match parsed.tag() {
            "PRIVATE KEY" => {
                if let Ok(key) = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
                {
                    return Ok(Self::Ecdsa {
                        key,
                        alg: "ES256",
                        crv: "P-256",
                    });
                }
                if let Ok(key) = EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, der, &rng)
                {
                    return Ok(Self::Ecdsa {
                        key,
                        alg: "ES384",
                        crv: "P-384",
                    });
                }
                RsaKeyPair::from_pkcs8(der)
                    .map(Self::Rsa)
                    .map_err(|e| ProtocolError::PrivateKey(e.to_string()))
            }
            "RSA PRIVATE KEY" => RsaKeyPair::from_der(der)
                .map(Self::Rsa)
                .map_err(|e| ProtocolError::PrivateKey(e.to_string())),
            other => Err(ProtocolError::PrivateKey(format!(
                "unsupported PEM block '{}'",
                other
            ))),
        }
    }

    fn alg(&self) -> &'static str {
        match self {
            Self::Ecdsa { alg, .. } => *alg,
            Self::Rsa(_) => "RS256",
        }
    }

    /// Public half as a JSON Web Key
    pub(super) fn jwk(&self) -> Value {
        match self {
            Self::Ecdsa { key, crv, .. } => {
                // uncompressed point: 0x04 || x || y
                let point = key.public_key().as_ref();
                let (x, y) = point[1..].split_at((point.len() - 1) / 2);
                json!({ "crv": crv, "kty": "EC", "x": b64(x), "y": b64(y) })
            }
            Self::Rsa(key) => {
                let public = PublicKeyComponents::<Vec<u8>>::from(key.public());
                json!({ "e": b64(&public.e), "kty": "RSA", "n": b64(&public.n) })
            }
        }
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let rng = SystemRandom::new();
        match self {
            Self::Ecdsa { key, .. } => key
                .sign(&rng, message)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|e| ProtocolError::Signing(e.to_string())),
            Self::Rsa(key) => {
                let mut sig = vec![0; key.public().modulus_len()];
                key.sign(&RSA_PKCS1_SHA256, &rng, message, &mut sig)
                    .map_err(|e| ProtocolError::Signing(e.to_string()))?;
                Ok(sig)
            }
        }
    }

    /// Sign `payload` for a POST to `url`
    pub(super) fn sign_request(
        &self,
        url: &str,
        nonce: &str,
        payload: &Value,
    ) -> Result<Jws, ProtocolError> {
        let header = json!({
            "alg": self.alg(),
            "jwk": self.jwk(),
            "nonce": nonce,
            "url": url,
        });
        let protected = b64(header.to_string());
        let payload = b64(payload.to_string());
        let signature = b64(self.sign(format!("{}.{}", protected, payload).as_bytes())?);
        Ok(Jws {
            protected,
            payload,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};

    fn decode(part: &str) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(part).unwrap()
    }

    #[test]
    fn test_ec_key_signs_with_embedded_jwk() {
        let key = rcgen::KeyPair::generate().unwrap();
        let signer = KeySigner::from_pem(&key.serialize_pem()).unwrap();

        let jws = signer
            .sign_request(
                "https://ca.example/revoke-cert",
                "nonce-1",
                &json!({ "certificate": "AAAA" }),
            )
            .unwrap();

        let header: Value = serde_json::from_slice(&decode(&jws.protected)).unwrap();
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["nonce"], "nonce-1");
        assert_eq!(header["url"], "https://ca.example/revoke-cert");
        assert_eq!(header["jwk"]["kty"], "EC");
        assert!(header.get("kid").is_none());

        let x = decode(header["jwk"]["x"].as_str().unwrap());
        let y = decode(header["jwk"]["y"].as_str().unwrap());
        assert_eq!((x.len(), y.len()), (32, 32));

        let mut point = vec![0x04];
        point.extend(&x);
        point.extend(&y);
        let message = format!("{}.{}", jws.protected, jws.payload);
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point)
            .verify(message.as_bytes(), &decode(&jws.signature))
            .unwrap();
    }

    #[test]
    fn test_certificate_is_not_a_key() {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["a.com".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        assert!(matches!(
            KeySigner::from_pem(&cert.pem()),
            Err(ProtocolError::PrivateKey(_))
        ));
    }

    #[test]
    fn test_directory_fields() {
        let directory: Directory = serde_json::from_value(json!({
            "newNonce": "https://ca.example/new-nonce",
            "newAccount": "https://ca.example/new-acct",
            "revokeCert": "https://ca.example/revoke-cert",
        }))
        .unwrap();
        assert_eq!(directory.revoke_cert, "https://ca.example/revoke-cert");
    }
}

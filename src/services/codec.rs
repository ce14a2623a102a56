use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::models::message::{EncryptedBody, MessageBody};

pub const ALGORITHM: &str = "aes-256-gcm";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Shown to readers when a stored envelope cannot be authenticated or
/// decrypted. Deliberately a normal string so clients need no special case.
pub const DECODE_FAILURE_PLACEHOLDER: &str = "[Encrypted message - decryption failed]";

/// Encrypts and decrypts message bodies with AES-256-GCM under a single
/// service-wide key. Encoding failures degrade to plaintext storage rather
/// than losing the message; decoding failures degrade to a placeholder.
pub struct MessageCodec {
    cipher: Aes256Gcm,
}

impl MessageCodec {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext` with a fresh random 12-byte nonce. On failure
    /// the body is stored as plaintext and a warning is logged.
    pub fn encode(&self, plaintext: &str) -> MessageBody {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        match self.cipher.encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: &[],
            },
        ) {
            Ok(sealed) => {
                // aes-gcm appends the 16-byte auth tag to the ciphertext
                let split = sealed.len() - TAG_LEN;
                MessageBody::Encrypted(EncryptedBody {
                    ciphertext: STANDARD.encode(&sealed[..split]),
                    iv: STANDARD.encode(nonce_bytes),
                    tag: STANDARD.encode(&sealed[split..]),
                    algorithm: ALGORITHM.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!("message encryption failed, storing plaintext");
                MessageBody::Plain {
                    content: plaintext.to_string(),
                }
            }
        }
    }

    /// Recovers plaintext from a stored body. Plaintext bodies pass through
    /// unchanged; envelopes that fail authentication yield the placeholder.
    pub fn decode(&self, body: &MessageBody) -> String {
        match body {
            MessageBody::Plain { content } => content.clone(),
            MessageBody::Encrypted(env) => self
                .try_decrypt(env)
                .unwrap_or_else(|| DECODE_FAILURE_PLACEHOLDER.to_string()),
        }
    }

    /// Like `decode` but reports failure instead of substituting the
    /// placeholder. Search uses this to skip undecodable rows.
    pub fn try_decode(&self, body: &MessageBody) -> Option<String> {
        match body {
            MessageBody::Plain { content } => Some(content.clone()),
            MessageBody::Encrypted(env) => self.try_decrypt(env),
        }
    }

    fn try_decrypt(&self, env: &EncryptedBody) -> Option<String> {
        let ciphertext = STANDARD.decode(&env.ciphertext).ok()?;
        let nonce_bytes = STANDARD.decode(&env.iv).ok()?;
        let tag = STANDARD.decode(&env.tag).ok()?;
        if nonce_bytes.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return None;
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plain = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed,
                    aad: &[],
                },
            )
            .ok()?;
        String::from_utf8(plain).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MessageCodec {
        MessageCodec::new(&[42u8; 32])
    }

    #[test]
    fn roundtrips_plaintext() {
        let codec = codec();
        for text in [
            "",
            "hi",
            "multibyte: héllo wörld 你好 🚀",
            &"long ".repeat(1000),
        ] {
            let body = codec.encode(text);
            assert!(body.is_encrypted());
            assert_eq!(codec.decode(&body), text);
        }
    }

    #[test]
    fn fresh_nonce_per_message() {
        let codec = codec();
        let a = codec.encode("same text");
        let b = codec.encode("same text");
        match (&a, &b) {
            (MessageBody::Encrypted(x), MessageBody::Encrypted(y)) => {
                assert_ne!(x.iv, y.iv);
                assert_ne!(x.ciphertext, y.ciphertext);
            }
            _ => panic!("expected encrypted bodies"),
        }
    }

    #[test]
    fn corrupted_ciphertext_yields_placeholder() {
        let codec = codec();
        let body = codec.encode("secret");
        let MessageBody::Encrypted(mut env) = body else {
            panic!("expected encrypted body");
        };
        let mut raw = STANDARD.decode(&env.ciphertext).unwrap();
        if raw.is_empty() {
            raw.push(0);
        } else {
            raw[0] ^= 0xff;
        }
        env.ciphertext = STANDARD.encode(raw);
        assert_eq!(
            codec.decode(&MessageBody::Encrypted(env)),
            DECODE_FAILURE_PLACEHOLDER
        );
    }

    #[test]
    fn wrong_key_yields_placeholder() {
        let body = codec().encode("secret");
        let other = MessageCodec::new(&[9u8; 32]);
        assert_eq!(other.decode(&body), DECODE_FAILURE_PLACEHOLDER);
        assert!(other.try_decode(&body).is_none());
    }

    #[test]
    fn plain_bodies_pass_through() {
        let codec = codec();
        let body = MessageBody::Plain {
            content: "legacy row".into(),
        };
        assert_eq!(codec.decode(&body), "legacy row");
    }
}

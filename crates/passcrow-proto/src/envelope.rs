//! `Plain(record) | Sealed(ciphertext)` sum type (§4.4, §9): the wire
//! representation for any message field that toggles between a structured
//! record and an opaque AES-GCM ciphertext string depending on whether it
//! has been encrypted yet.

use std::marker::PhantomData;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};

use passcrow_crypto::{aead_decrypt, aead_encrypt, random_bytes, NONCE_LEN};

use crate::error::{Error, Result};

/// A message field that is either still plaintext (only valid before
/// sealing, never serialized) or sealed into an opaque base64 ciphertext
/// string (the only form that ever goes on the wire).
#[derive(Debug, Clone)]
pub enum Envelope<T> {
    Plain(T),
    Sealed(String),
}

impl<T> Envelope<T> {
    pub fn plain_value(value: T) -> Self {
        Envelope::Plain(value)
    }

    /// Borrow the plaintext record, failing if this envelope is still
    /// sealed.
    pub fn as_plain(&self) -> Result<&T> {
        match self {
            Envelope::Plain(v) => Ok(v),
            Envelope::Sealed(_) => Err(Error::NotPlain),
        }
    }

    /// Borrow the raw ciphertext string, failing if this envelope has not
    /// been sealed yet.
    pub fn as_sealed(&self) -> Result<&str> {
        match self {
            Envelope::Sealed(ct) => Ok(ct),
            Envelope::Plain(_) => Err(Error::NotSealed),
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Consume a [`Envelope::Plain`], encrypting it under `key` (32 bytes)
    /// into the base64(`nonce || ciphertext`) form carried on the wire.
    /// Fails if the envelope is already sealed.
    pub fn seal(self, key: &[u8]) -> Result<Envelope<T>> {
        let value = match self {
            Envelope::Plain(v) => v,
            Envelope::Sealed(_) => return Err(Error::NotPlain),
        };
        let json = serde_json::to_vec(&value)?;
        let nonce = random_bytes::<NONCE_LEN>();
        let ct = aead_encrypt(key, &nonce, &json, None)?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ct.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ct);
        Ok(Envelope::Sealed(BASE64.encode(blob)))
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Consume a [`Envelope::Sealed`], decrypting it under `key` back into
    /// plaintext. Fails if the envelope is already plain.
    pub fn unseal(self, key: &[u8]) -> Result<Envelope<T>> {
        let ct = match self {
            Envelope::Sealed(ct) => ct,
            Envelope::Plain(_) => return Err(Error::NotSealed),
        };
        let blob = BASE64.decode(ct.as_bytes())?;
        if blob.len() < NONCE_LEN {
            return Err(Error::MalformedEnvelope("ciphertext shorter than nonce".into()));
        }
        let (nonce, body) = blob.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce.try_into().unwrap();
        let json = aead_decrypt(key, &nonce, body, None)?;
        let value: T = serde_json::from_slice(&json)?;
        Ok(Envelope::Plain(value))
    }
}

impl<T> Serialize for Envelope<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Envelope::Sealed(ct) => serializer.serialize_str(ct),
            Envelope::Plain(_) => Err(ser::Error::custom(
                "cannot place an unsealed envelope on the wire",
            )),
        }
    }
}

impl<'de, T> Deserialize<'de> for Envelope<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor<T>(PhantomData<T>);
        impl<'de, T> de::Visitor<'de> for Visitor<T> {
            type Value = Envelope<T>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a base64-encoded ciphertext string")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Envelope::Sealed(v.to_string()))
            }
        }
        deserializer.deserialize_str(Visitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Body {
        secret: String,
    }

    #[test]
    fn seal_then_unseal_round_trips() {
        let key = random_bytes::<32>();
        let env = Envelope::plain_value(Body {
            secret: "hunter2".into(),
        });
        let sealed = env.seal(&key).unwrap();
        let ct = sealed.as_sealed().unwrap().to_string();

        let plain = Envelope::<Body>::Sealed(ct).unseal(&key).unwrap();
        assert_eq!(
            plain.as_plain().unwrap(),
            &Body {
                secret: "hunter2".into()
            }
        );
    }

    #[test]
    fn unseal_with_wrong_key_fails() {
        let key = random_bytes::<32>();
        let other = random_bytes::<32>();
        let sealed = Envelope::plain_value(Body {
            secret: "hunter2".into(),
        })
        .seal(&key)
        .unwrap();
        assert!(sealed.unseal(&other).is_err());
    }

    #[test]
    fn serializing_plain_envelope_is_rejected() {
        let env = Envelope::plain_value(Body {
            secret: "x".into(),
        });
        assert!(serde_json::to_string(&env).is_err());
    }

    #[test]
    fn wire_round_trip_through_json() {
        let key = random_bytes::<32>();
        let sealed = Envelope::plain_value(Body {
            secret: "s".into(),
        })
        .seal(&key)
        .unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        let back: Envelope<Body> = serde_json::from_str(&json).unwrap();
        let plain = back.unseal(&key).unwrap();
        assert_eq!(plain.as_plain().unwrap().secret, "s");
    }
}

//! Key configuration
//!
//! A [`KeyConfig`] converts between an item and the opaque string key used by
//! public read/update/delete calls, batch delete edits and page keys.
//!
//! ## Encodings
//!
//! - `Attr`: one field, rendered as its stringified scalar
//! - `Composite`: ordered fields, rendered as base64(JSON array)
//! - `PartitionSort`: partition + sort field, sealed with ChaCha20-Poly1305 so
//!   callers cannot see or forge the partition/sort structure
//!
//! ## Contract
//!
//! For every well-formed item, `from_key_str(to_key_str(item))` reproduces the
//! key-bearing fields exactly.

use crate::attr::AttrType;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::value::Value;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use std::fmt;

/// Size of the sealing nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// A key-bearing field and its declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    /// Attribute name
    pub name: String,
    /// Attribute type
    pub attr_type: AttrType,
}

impl KeyField {
    /// Create a key field
    pub fn new(name: impl Into<String>, attr_type: AttrType) -> Self {
        KeyField {
            name: name.into(),
            attr_type,
        }
    }

    fn value_of<'a>(&self, item: &'a Item) -> StoreResult<&'a Value> {
        item.get(&self.name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| StoreError::validation(format!("missing key field '{}'", self.name)))
    }
}

/// 32-byte secret used to seal partition/sort keys
#[derive(Clone, PartialEq, Eq)]
pub struct KeySecret([u8; 32]);

impl KeySecret {
    /// Wrap raw key material
    pub fn new(bytes: [u8; 32]) -> Self {
        KeySecret(bytes)
    }

    /// Generate a random secret
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        KeySecret(bytes)
    }
}

impl fmt::Debug for KeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeySecret(..)")
    }
}

/// Bidirectional mapping between an item and its string key
#[derive(Debug, Clone, PartialEq)]
pub enum KeyConfig {
    /// Single field ↔ stringified scalar
    Attr(KeyField),
    /// Ordered fields ↔ base64(JSON array)
    Composite(Vec<KeyField>),
    /// Partition + sort field ↔ sealed composite
    PartitionSort {
        /// Partition key field
        partition: KeyField,
        /// Sort key field
        sort: KeyField,
        /// Sealing secret
        secret: KeySecret,
    },
}

impl KeyConfig {
    /// The key-bearing fields, in encoding order
    pub fn fields(&self) -> Vec<&KeyField> {
        match self {
            KeyConfig::Attr(field) => vec![field],
            KeyConfig::Composite(fields) => fields.iter().collect(),
            KeyConfig::PartitionSort {
                partition, sort, ..
            } => vec![partition, sort],
        }
    }

    /// Names of the key-bearing fields, in encoding order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields().into_iter().map(|f| f.name.as_str()).collect()
    }

    /// True if `name` must be present on every stored item
    pub fn is_required_attr(&self, name: &str) -> bool {
        self.fields().iter().any(|f| f.name == name)
    }

    /// Encode the key fields of `item`
    ///
    /// # Errors
    ///
    /// Returns `Validation` if a key field is absent, null, or of a type that
    /// cannot be converted to the declared key type.
    pub fn to_key_str(&self, item: &Item) -> StoreResult<String> {
        match self {
            KeyConfig::Attr(field) => field.attr_type.to_key_string(field.value_of(item)?),
            KeyConfig::Composite(fields) => {
                let json = composite_json(fields.iter(), item)?;
                Ok(STANDARD.encode(json))
            }
            KeyConfig::PartitionSort {
                partition,
                sort,
                secret,
            } => {
                let json = composite_json([partition, sort].into_iter(), item)?;
                seal(secret, json.as_bytes())
            }
        }
    }

    /// Decode a key string into an item holding only the key fields
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the key is malformed, was sealed under a
    /// different secret, or does not match the declared field types.
    pub fn from_key_str(&self, key: &str) -> StoreResult<Item> {
        match self {
            KeyConfig::Attr(field) => {
                let value = field.attr_type.parse_key_string(key)?;
                Ok(Item::new().with(field.name.clone(), value))
            }
            KeyConfig::Composite(fields) => {
                let bytes = STANDARD
                    .decode(key)
                    .map_err(|_| StoreError::validation(format!("invalid key: '{}'", key)))?;
                parse_composite(fields.iter(), &bytes)
            }
            KeyConfig::PartitionSort {
                partition,
                sort,
                secret,
            } => {
                let bytes = unseal(secret, key)?;
                parse_composite([partition, sort].into_iter(), &bytes)
            }
        }
    }

    /// Deterministic, unsealed rendering of the key fields
    ///
    /// Used by backends as an internal map key; sealed keys carry a random
    /// nonce and so differ on every call to `to_key_str`.
    pub fn canonical_key(&self, item: &Item) -> StoreResult<String> {
        composite_json(self.fields().into_iter(), item)
    }

    /// Coerce the key fields of `item` to their declared types, in place
    pub fn normalize(&self, item: &mut Item) -> StoreResult<()> {
        for field in self.fields() {
            if let Some(value) = item.get(&field.name).cloned() {
                let coerced = field.attr_type.coerce(value).ok_or_else(|| {
                    StoreError::validation(format!(
                        "key field '{}' must be {}",
                        field.name, field.attr_type
                    ))
                })?;
                item.set(field.name.clone(), coerced);
            }
        }
        Ok(())
    }
}

fn composite_json<'a, I>(fields: I, item: &Item) -> StoreResult<String>
where
    I: Iterator<Item = &'a KeyField>,
{
    let mut values = Vec::new();
    for field in fields {
        let value = field.value_of(item)?;
        let coerced = field.attr_type.coerce(value.clone()).ok_or_else(|| {
            StoreError::validation(format!(
                "key field '{}' must be {}, got {}",
                field.name,
                field.attr_type,
                value.type_name()
            ))
        })?;
        values.push(coerced.to_json());
    }
    Ok(serde_json::Value::Array(values).to_string())
}

fn parse_composite<'a, I>(fields: I, bytes: &[u8]) -> StoreResult<Item>
where
    I: ExactSizeIterator<Item = &'a KeyField>,
{
    let parsed: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|_| StoreError::validation("invalid key: not a JSON array"))?;
    let serde_json::Value::Array(values) = parsed else {
        return Err(StoreError::validation("invalid key: not a JSON array"));
    };
    if values.len() != fields.len() {
        return Err(StoreError::validation(format!(
            "invalid key: expected {} components, got {}",
            fields.len(),
            values.len()
        )));
    }
    let mut item = Item::new();
    for (field, json) in fields.zip(values.iter()) {
        let value = field.attr_type.value_from_json(json)?;
        if value.is_null() {
            return Err(StoreError::validation(format!(
                "invalid key: null component '{}'",
                field.name
            )));
        }
        item.set(field.name.clone(), value);
    }
    Ok(item)
}

fn seal(secret: &KeySecret, plaintext: &[u8]) -> StoreResult<String> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&secret.0));
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| StoreError::backend(format!("key sealing failed: {}", e)))?;
    let mut bytes = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    bytes.extend_from_slice(&nonce_bytes);
    bytes.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn unseal(secret: &KeySecret, key: &str) -> StoreResult<Vec<u8>> {
    let invalid = || StoreError::validation("invalid key: cannot be opened");
    let bytes = URL_SAFE_NO_PAD.decode(key).map_err(|_| invalid())?;
    if bytes.len() <= NONCE_SIZE {
        return Err(invalid());
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&secret.0));
    cipher
        .decrypt(Nonce::from_slice(&bytes[..NONCE_SIZE]), &bytes[NONCE_SIZE..])
        .map_err(|_| invalid())
}

//! Payload schemas derived from `StoreMeta`
//!
//! An [`ItemSchema`] describes which fields a create or update payload may
//! carry. It fails closed: anything not declared writable is rejected.

use crate::attr::AttrType;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::meta::StoreMeta;

/// One field a payload may carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    /// Attribute name
    pub name: String,
    /// Declared type
    pub attr_type: AttrType,
    /// May be `Null`
    pub nullable: bool,
    /// Must be present
    pub required: bool,
}

/// Shape of a create or update payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSchema {
    /// Schema name, for error messages
    pub name: String,
    /// Permitted fields
    pub fields: Vec<SchemaField>,
}

impl ItemSchema {
    /// Schema for create payloads: the creatable attributes
    ///
    /// A field is required when it is a key field or non-nullable and no
    /// create generator fills it in.
    pub fn for_create(meta: &StoreMeta) -> Self {
        let fields = meta
            .attrs
            .iter()
            .filter(|a| a.creatable)
            .map(|a| SchemaField {
                name: a.name.clone(),
                attr_type: a.attr_type,
                nullable: a.nullable,
                required: a.create_generator.is_none()
                    && (!a.nullable || meta.key_config.is_required_attr(&a.name)),
            })
            .collect();
        ItemSchema {
            name: format!("{}Create", meta.name),
            fields,
        }
    }

    /// Schema for update payloads: the updatable attributes plus the key
    ///
    /// Key fields are required; everything else is optional.
    pub fn for_update(meta: &StoreMeta) -> Self {
        let fields = meta
            .attrs
            .iter()
            .filter(|a| a.updatable || meta.key_config.is_required_attr(&a.name))
            .map(|a| SchemaField {
                name: a.name.clone(),
                attr_type: a.attr_type,
                nullable: a.nullable,
                required: meta.key_config.is_required_attr(&a.name),
            })
            .collect();
        ItemSchema {
            name: format!("{}Update", meta.name),
            fields,
        }
    }

    /// Check `item` against the schema
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the first offending field.
    pub fn validate(&self, item: &Item) -> StoreResult<()> {
        for (name, value) in item.iter() {
            let field = self.fields.iter().find(|f| &f.name == name).ok_or_else(|| {
                StoreError::validation(format!("{}: field '{}' is not writable", self.name, name))
            })?;
            if value.is_null() {
                if !field.nullable {
                    return Err(StoreError::validation(format!(
                        "{}: field '{}' may not be null",
                        self.name, name
                    )));
                }
                continue;
            }
            if field.attr_type.coerce(value.clone()).is_none() {
                return Err(StoreError::validation(format!(
                    "{}: field '{}' must be {}, got {}",
                    self.name,
                    name,
                    field.attr_type,
                    value.type_name()
                )));
            }
        }
        for field in self.fields.iter().filter(|f| f.required) {
            if !item.contains(&field.name) {
                return Err(StoreError::validation(format!(
                    "{}: missing required field '{}'",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{Attr, ValueGenerator};
    use crate::value::Value;

    fn meta() -> StoreMeta {
        StoreMeta::builder("tasks")
            .attr(
                Attr::new("id", AttrType::Uuid)
                    .with_creatable(false)
                    .with_updatable(false)
                    .with_create_generator(ValueGenerator::Uuid),
            )
            .attr(Attr::new("title", AttrType::Str).with_nullable(false))
            .attr(Attr::new("notes", AttrType::Str))
            .attr(Attr::new("owner", AttrType::Str).with_updatable(false))
            .key_attr("id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_accepts_valid_payload() {
        let schema = ItemSchema::for_create(&meta());
        assert!(schema
            .validate(&Item::new().with("title", "x").with("notes", Value::Null))
            .is_ok());
    }

    #[test]
    fn test_create_rejects_non_creatable_field() {
        let schema = ItemSchema::for_create(&meta());
        let item = Item::new().with("title", "x").with("id", uuid::Uuid::new_v4());
        assert!(schema.validate(&item).is_err());
    }

    #[test]
    fn test_create_rejects_missing_required() {
        let schema = ItemSchema::for_create(&meta());
        assert!(schema.validate(&Item::new().with("notes", "n")).is_err());
    }

    #[test]
    fn test_rejects_null_in_non_nullable() {
        let schema = ItemSchema::for_create(&meta());
        assert!(schema.validate(&Item::new().with("title", Value::Null)).is_err());
    }

    #[test]
    fn test_rejects_wrong_type() {
        let schema = ItemSchema::for_create(&meta());
        assert!(schema.validate(&Item::new().with("title", 12)).is_err());
    }

    #[test]
    fn test_update_requires_key_and_rejects_frozen_fields() {
        let schema = ItemSchema::for_update(&meta());
        let id = uuid::Uuid::new_v4();
        assert!(schema.validate(&Item::new().with("id", id).with("notes", "n")).is_ok());
        assert!(schema.validate(&Item::new().with("notes", "n")).is_err());
        assert!(schema
            .validate(&Item::new().with("id", id).with("owner", "me"))
            .is_err());
    }
}

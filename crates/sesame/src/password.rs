//! Password storage keyed by attributes.
//!
//! These calls cover the common case of keeping one password per set of
//! attributes without handling collections or items directly. A [`Schema`]
//! names the kind of password and the attributes it is looked up by; the
//! schema name is stored with each item under [`SCHEMA_ATTRIBUTE`] so that
//! passwords of different kinds never match each other.
//!
//! Locked items and collections are unlocked on the way, prompting if the
//! service requires it.

use sesame_bus::ObjectPath;
use std::collections::BTreeMap;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collection::Collection;
use crate::error::{Result, SecretError};
use crate::item::Item;
use crate::service::Service;
use crate::sync;
use crate::types::SecretValue;

/// Attribute holding the schema name of a stored password.
pub const SCHEMA_ATTRIBUTE: &str = "xdg:schema";

/// Alias path of the collection passwords go to by default.
pub const DEFAULT_COLLECTION: &str = "/org/freedesktop/secrets/aliases/default";

/// How an attribute value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    /// A decimal integer.
    Integer,
    /// `true` or `false`.
    Boolean,
}

impl AttributeType {
    fn accepts(self, value: &str) -> bool {
        match self {
            Self::String => true,
            Self::Integer => value.parse::<i64>().is_ok(),
            Self::Boolean => value == "true" || value == "false",
        }
    }
}

/// Schema behaviour flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaFlags(u8);

impl SchemaFlags {
    pub const NONE: Self = Self(0);
    /// Accept attributes the schema does not list.
    pub const ALLOW_UNDEFINED: Self = Self(1);
    /// Neither store nor match the schema name.
    pub const DONT_MATCH_NAME: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SchemaFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The name and attributes of a kind of password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    flags: SchemaFlags,
    attributes: BTreeMap<String, AttributeType>,
}

impl Schema {
    pub fn new<'a>(
        name: impl Into<String>,
        flags: SchemaFlags,
        attributes: impl IntoIterator<Item = (&'a str, AttributeType)>,
    ) -> Self {
        Self {
            name: name.into(),
            flags,
            attributes: attributes
                .into_iter()
                .map(|(name, kind)| (name.to_string(), kind))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> SchemaFlags {
        self.flags
    }

    /// Check `attributes` against the schema.
    ///
    /// Attributes may be left out; those given must be listed (unless the
    /// schema allows undefined ones) and written as their type requires.
    pub fn validate(&self, attributes: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in attributes {
            if name == SCHEMA_ATTRIBUTE {
                continue;
            }
            match self.attributes.get(name) {
                Some(kind) if !kind.accepts(value) => {
                    return Err(SecretError::InvalidAttribute(format!(
                        "'{}' of schema {} must be {:?}, got '{}'",
                        name, self.name, kind, value
                    )));
                }
                Some(_) => {}
                None if self.flags.contains(SchemaFlags::ALLOW_UNDEFINED) => {}
                None => {
                    return Err(SecretError::InvalidAttribute(format!(
                        "'{}' is not defined in schema {}",
                        name, self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// The validated attributes sent to the service, with the schema name.
    fn attributes_for(&self, attributes: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        self.validate(attributes)?;
        let mut full = attributes.clone();
        if !self.flags.contains(SchemaFlags::DONT_MATCH_NAME) {
            full.insert(SCHEMA_ATTRIBUTE.to_string(), self.name.clone());
        }
        Ok(full)
    }
}

/// Store a password, replacing one stored earlier with the same attributes.
///
/// `collection` defaults to [`DEFAULT_COLLECTION`]. Returns `false` when a
/// prompt needed to unlock the collection or create the item was dismissed.
pub async fn store(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
    collection: Option<&ObjectPath>,
    label: &str,
    password: &str,
) -> Result<bool> {
    let attributes = schema.attributes_for(attributes)?;
    let path = match collection {
        Some(path) => path.clone(),
        None => ObjectPath::new(DEFAULT_COLLECTION)?,
    };

    let collection = Collection::new(service, path).await?;
    if collection.locked() {
        let unlocked = service.unlock(&[collection.path().clone()]).await?;
        if unlocked.is_empty() {
            debug!(collection = %collection.path(), "Collection stayed locked");
            return Ok(false);
        }
    }

    let item = collection
        .create_item(label, &attributes, &SecretValue::text(password), true)
        .await?;
    Ok(item.is_some())
}

/// Blocking variant of [`store`].
pub fn store_sync(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
    collection: Option<&ObjectPath>,
    label: &str,
    password: &str,
) -> Result<bool> {
    sync::wait(store(service, schema, attributes, collection, label, password))
}

/// Look up a password.
///
/// Returns `None` when nothing matches or the stored secret is not text.
pub async fn lookup(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<Option<String>> {
    let Some(secret) = lookup_nonpageable(service, schema, attributes).await? else {
        return Ok(None);
    };
    match secret.get_text() {
        Some(text) => Ok(Some(text.to_string())),
        None => {
            warn!(schema = %schema.name(), "Stored password is not valid text");
            Ok(None)
        }
    }
}

/// Blocking variant of [`lookup`].
pub fn lookup_sync(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<Option<String>> {
    sync::wait(lookup(service, schema, attributes))
}

/// Look up a password, keeping it in a buffer that is wiped when the last
/// handle to it is dropped.
pub async fn lookup_nonpageable(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<Option<SecretValue>> {
    let Some(item) = find_item(service, schema, attributes).await? else {
        return Ok(None);
    };
    Ok(Some(item.get_secret().await?))
}

/// Blocking variant of [`lookup_nonpageable`].
pub fn lookup_nonpageable_sync(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<Option<SecretValue>> {
    sync::wait(lookup_nonpageable(service, schema, attributes))
}

/// Remove a password.
///
/// Returns `false` when nothing matched or the deletion prompt was
/// dismissed.
pub async fn remove(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<bool> {
    match find_item(service, schema, attributes).await? {
        Some(item) => item.delete().await,
        None => Ok(false),
    }
}

/// Blocking variant of [`remove`].
pub fn remove_sync(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<bool> {
    sync::wait(remove(service, schema, attributes))
}

/// The first matching item, unlocking one if only locked items match.
async fn find_item(
    service: &Arc<Service>,
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<Option<Item>> {
    let attributes = schema.attributes_for(attributes)?;
    let (unlocked, locked) = service.search_paths(&attributes).await?;

    let path = match (unlocked.into_iter().next(), locked.into_iter().next()) {
        (Some(path), _) => path,
        (None, Some(path)) => match service.unlock(&[path]).await?.into_iter().next() {
            Some(path) => path,
            None => return Ok(None),
        },
        (None, None) => return Ok(None),
    };

    Ok(Some(Item::new(service, path).await?))
}

//! Typed wire values.
//!
//! [`Value`] covers the part of the D-Bus type system the Secret Service
//! protocol uses. Signatures come from `zvariant`'s type information, and
//! values convert to and from [`zvariant::Value`] for the real transport.
//! Shape checks on replies and signal payloads compare signatures.

use crate::error::{BusError, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use zvariant::{Array, Dict, OwnedObjectPath, OwnedValue, StructureBuilder, Type};

/// A validated object path.
#[derive(Clone)]
pub struct ObjectPath(OwnedObjectPath);

impl ObjectPath {
    /// Validate and wrap an object path.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        zvariant::ObjectPath::try_from(path.clone())
            .map(|p| Self(OwnedObjectPath::from(p)))
            .map_err(|_| BusError::InvalidPath(path))
    }

    /// The root path `/`, used on the wire to mean "no object".
    pub fn root() -> Self {
        Self(OwnedObjectPath::from(zvariant::ObjectPath::from_static_str_unchecked("/")))
    }

    pub fn is_root(&self) -> bool {
        self.as_str() == "/"
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Append a segment.
    pub fn join(&self, segment: &str) -> Result<Self> {
        if self.is_root() {
            Self::new(format!("/{}", segment))
        } else {
            Self::new(format!("{}/{}", self.as_str(), segment))
        }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.as_str().rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Self::new(&self.as_str()[..idx]).ok(),
            None => None,
        }
    }

    /// The underlying `zvariant` path.
    pub fn as_zvariant(&self) -> &OwnedObjectPath {
        &self.0
    }
}

impl PartialEq for ObjectPath {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ObjectPath {}

impl Hash for ObjectPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl PartialOrd for ObjectPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Debug for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectPath").field(&self.as_str()).finish()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = BusError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OwnedObjectPath> for ObjectPath {
    fn from(path: OwnedObjectPath) -> Self {
        Self(path)
    }
}

impl From<zvariant::ObjectPath<'_>> for ObjectPath {
    fn from(path: zvariant::ObjectPath<'_>) -> Self {
        Self(OwnedObjectPath::from(path))
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A value on the wire.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// `b`
    Bool(bool),
    /// `u`
    U32(u32),
    /// `i`
    I32(i32),
    /// `t`
    U64(u64),
    /// `s`
    Str(String),
    /// `o`
    Path(ObjectPath),
    /// `ay`
    Bytes(Vec<u8>),
    /// `ao`
    Paths(Vec<ObjectPath>),
    /// `as`
    Strings(Vec<String>),
    /// `a{ss}`
    Attributes(BTreeMap<String, String>),
    /// `a{sv}`. Entries may be given bare or already wrapped in a variant;
    /// decoded entries are bare.
    Dict(BTreeMap<String, Value>),
    /// `v`
    Variant(Box<Value>),
    /// `(...)`
    Struct(Vec<Value>),
}

fn signature_of<T: Type>() -> String {
    T::signature().to_string()
}

fn encoding(e: zvariant::Error) -> BusError {
    BusError::Encoding(e.to_string())
}

impl Value {
    /// Wrap a value in a variant.
    pub fn variant(inner: impl Into<Value>) -> Self {
        Self::Variant(Box::new(inner.into()))
    }

    /// Build a struct from its fields.
    pub fn tuple(fields: impl IntoIterator<Item = Value>) -> Self {
        Self::Struct(fields.into_iter().collect())
    }

    /// The empty struct `()`, used as the reply of methods without out arguments.
    pub fn unit() -> Self {
        Self::Struct(Vec::new())
    }

    /// The signature string of this value.
    pub fn signature(&self) -> String {
        match self {
            Self::Bool(_) => signature_of::<bool>(),
            Self::U32(_) => signature_of::<u32>(),
            Self::I32(_) => signature_of::<i32>(),
            Self::U64(_) => signature_of::<u64>(),
            Self::Str(_) => signature_of::<String>(),
            Self::Path(_) => signature_of::<OwnedObjectPath>(),
            Self::Bytes(_) => signature_of::<Vec<u8>>(),
            Self::Paths(_) => signature_of::<Vec<OwnedObjectPath>>(),
            Self::Strings(_) => signature_of::<Vec<String>>(),
            Self::Attributes(_) => signature_of::<HashMap<String, String>>(),
            Self::Dict(_) => signature_of::<HashMap<String, OwnedValue>>(),
            Self::Variant(_) => signature_of::<OwnedValue>(),
            Self::Struct(fields) => {
                let inner: String = fields.iter().map(Value::signature).collect();
                format!("({})", inner)
            }
        }
    }

    /// Check this value against a signature string.
    pub fn is_of_type(&self, signature: &str) -> bool {
        zvariant::Signature::try_from(signature).is_ok() && self.signature() == signature
    }

    /// Convert to a `zvariant` value.
    ///
    /// Fails for empty structs, which have no wire representation except as
    /// a whole message body.
    pub fn to_zvariant(&self) -> Result<zvariant::Value<'static>> {
        let value = match self {
            Self::Bool(b) => zvariant::Value::Bool(*b),
            Self::U32(n) => zvariant::Value::U32(*n),
            Self::I32(n) => zvariant::Value::I32(*n),
            Self::U64(n) => zvariant::Value::U64(*n),
            Self::Str(s) => zvariant::Value::from(s.clone()),
            Self::Path(p) => zvariant::Value::ObjectPath(p.0.clone().into_inner()),
            Self::Bytes(b) => zvariant::Value::Array(Array::from(b.clone())),
            Self::Paths(paths) => {
                let paths: Vec<zvariant::ObjectPath<'static>> =
                    paths.iter().map(|p| p.0.clone().into_inner()).collect();
                zvariant::Value::Array(Array::from(paths))
            }
            Self::Strings(s) => zvariant::Value::Array(Array::from(s.clone())),
            Self::Attributes(map) => {
                let mut dict = Dict::new(String::signature(), String::signature());
                for (key, value) in map {
                    dict.append(
                        zvariant::Value::from(key.clone()),
                        zvariant::Value::from(value.clone()),
                    )
                    .map_err(encoding)?;
                }
                zvariant::Value::Dict(dict)
            }
            Self::Dict(map) => {
                let mut dict = Dict::new(String::signature(), OwnedValue::signature());
                for (key, value) in map {
                    let inner = match value {
                        Self::Variant(inner) => inner.to_zvariant()?,
                        other => other.to_zvariant()?,
                    };
                    dict.append(
                        zvariant::Value::from(key.clone()),
                        zvariant::Value::Value(Box::new(inner)),
                    )
                    .map_err(encoding)?;
                }
                zvariant::Value::Dict(dict)
            }
            Self::Variant(inner) => zvariant::Value::Value(Box::new(inner.to_zvariant()?)),
            Self::Struct(fields) => zvariant::Value::Structure(to_structure(fields)?),
        };
        Ok(value)
    }

    /// Convert from a `zvariant` value.
    ///
    /// Types outside the protocol subset are rejected with
    /// [`BusError::Encoding`].
    pub fn from_zvariant(value: &zvariant::Value<'_>) -> Result<Self> {
        let converted = match value {
            zvariant::Value::Bool(b) => Self::Bool(*b),
            zvariant::Value::U32(n) => Self::U32(*n),
            zvariant::Value::I32(n) => Self::I32(*n),
            zvariant::Value::U64(n) => Self::U64(*n),
            zvariant::Value::Str(s) => Self::Str(s.as_str().to_string()),
            zvariant::Value::ObjectPath(p) => Self::Path(ObjectPath::from(p.clone())),
            zvariant::Value::Value(inner) => Self::variant(Self::from_zvariant(inner)?),
            zvariant::Value::Structure(structure) => Self::Struct(
                structure
                    .fields()
                    .iter()
                    .map(Self::from_zvariant)
                    .collect::<Result<_>>()?,
            ),
            zvariant::Value::Array(_) => match value.value_signature().as_str() {
                "ay" => Self::Bytes(Vec::<u8>::try_from(detach(value)?).map_err(encoding)?),
                "as" => Self::Strings(Vec::<String>::try_from(detach(value)?).map_err(encoding)?),
                "ao" => Self::Paths(
                    Vec::<zvariant::ObjectPath<'_>>::try_from(detach(value)?)
                        .map_err(encoding)?
                        .into_iter()
                        .map(ObjectPath::from)
                        .collect(),
                ),
                other => return Err(unsupported(other)),
            },
            zvariant::Value::Dict(_) => match value.value_signature().as_str() {
                "a{ss}" => Self::Attributes(
                    HashMap::<String, String>::try_from(detach(value)?)
                        .map_err(encoding)?
                        .into_iter()
                        .collect(),
                ),
                "a{sv}" => {
                    let entries = HashMap::<String, OwnedValue>::try_from(detach(value)?)
                        .map_err(encoding)?;
                    let mut values = BTreeMap::new();
                    for (key, entry) in entries.iter() {
                        values.insert(key.clone(), Self::from_zvariant(entry)?.into_unwrapped());
                    }
                    Self::Dict(values)
                }
                other => return Err(unsupported(other)),
            },
            other => return Err(unsupported(other.value_signature().as_str())),
        };
        Ok(converted)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&ObjectPath> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_paths(&self) -> Option<&[ObjectPath]> {
        match self {
            Self::Paths(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Self::Strings(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_attributes(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Attributes(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// The value inside a variant.
    pub fn as_variant(&self) -> Option<&Value> {
        match self {
            Self::Variant(inner) => Some(inner),
            _ => None,
        }
    }

    /// Borrow the fields of a struct.
    pub fn fields(&self) -> Option<&[Value]> {
        match self {
            Self::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Take the fields of a struct.
    pub fn into_fields(self) -> Option<Vec<Value>> {
        match self {
            Self::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Unwrap one level of variant, returning other values unchanged.
    pub fn into_unwrapped(self) -> Value {
        match self {
            Self::Variant(inner) => *inner,
            other => other,
        }
    }
}

/// Build a `zvariant` structure from struct fields.
pub(crate) fn to_structure(fields: &[Value]) -> Result<zvariant::Structure<'static>> {
    if fields.is_empty() {
        return Err(BusError::Encoding("empty structs cannot be encoded".to_string()));
    }
    let mut builder = StructureBuilder::new();
    for field in fields {
        builder = builder.append_field(field.to_zvariant()?);
    }
    Ok(builder.build())
}

// Containers are converted through owned copies
fn detach<'a>(value: &zvariant::Value<'a>) -> Result<zvariant::Value<'a>> {
    value.try_clone().map_err(encoding)
}

fn unsupported(signature: &str) -> BusError {
    BusError::Encoding(format!("unsupported type '{}'", signature))
}

// Byte arrays carry secrets in the plain algorithm
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::U32(n) => write!(f, "U32({})", n),
            Self::I32(n) => write!(f, "I32({})", n),
            Self::U64(n) => write!(f, "U64({})", n),
            Self::Str(s) => write!(f, "Str({:?})", s),
            Self::Path(p) => write!(f, "Path({})", p),
            Self::Bytes(b) => write!(f, "Bytes(<{} bytes>)", b.len()),
            Self::Paths(p) => f.debug_tuple("Paths").field(p).finish(),
            Self::Strings(s) => f.debug_tuple("Strings").field(s).finish(),
            Self::Attributes(a) => f.debug_tuple("Attributes").field(a).finish(),
            Self::Dict(d) => f.debug_tuple("Dict").field(d).finish(),
            Self::Variant(v) => f.debug_tuple("Variant").field(v).finish(),
            Self::Struct(fields) => f.debug_tuple("Struct").field(fields).finish(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::U32(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::U64(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<ObjectPath> for Value {
    fn from(p: ObjectPath) -> Self {
        Self::Path(p)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<ObjectPath>> for Value {
    fn from(p: Vec<ObjectPath>) -> Self {
        Self::Paths(p)
    }
}

impl From<Vec<String>> for Value {
    fn from(s: Vec<String>) -> Self {
        Self::Strings(s)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(a: BTreeMap<String, String>) -> Self {
        Self::Attributes(a)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(d: BTreeMap<String, Value>) -> Self {
        Self::Dict(d)
    }
}

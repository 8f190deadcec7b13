//! Host-facing values.
//!
//! [`Object`] is the owned type exchanged with embedders: run results and
//! host-builtin arguments/returns. [`ListView`] and [`MapView`] are
//! read-only adapters over aggregate objects for hosts that want indexed or
//! member access without destructuring the whole value.

use std::fmt;

use indexmap::IndexMap;

use crate::{
    error::{RunError, RunResult},
    value::{PiiValue, RecordValue, Value},
};

/// An owned value exchanged between the runtime and its host.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
    List(Vec<Object>),
    Map(IndexMap<String, Object>),
    Record {
        type_name: String,
        fields: IndexMap<String, Object>,
    },
    Enum {
        enum_name: String,
        variant: String,
    },
    Ok(Box<Object>),
    Err(Box<Object>),
    Some(Box<Object>),
    None,
    /// A PII-wrapped value. The payload is exposed to the embedding host,
    /// which owns the redaction decision; the string form stays redacted.
    Pii {
        value: Box<Object>,
        tags: Vec<String>,
        sensitivity: String,
    },
}

impl Object {
    pub(crate) fn from_value(value: &Value) -> RunResult<Self> {
        Ok(match value {
            Value::Undefined => return Err(RunError::type_error("cannot export an unbound value")),
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(*v),
            Value::Int(v) => Self::Int(*v),
            Value::Long(v) => Self::Long(*v),
            Value::Double(v) => Self::Double(*v),
            Value::Text(v) => Self::Text(v.to_string()),
            Value::List(items) => Self::List(items.iter().map(Self::from_value).collect::<RunResult<_>>()?),
            Value::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), Self::from_value(value)?)))
                    .collect::<RunResult<_>>()?,
            ),
            Value::Record(record) => Self::Record {
                type_name: record.type_name.to_string(),
                fields: record
                    .fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), Self::from_value(value)?)))
                    .collect::<RunResult<_>>()?,
            },
            Value::Enum(value) => Self::Enum {
                enum_name: value.enum_name.to_string(),
                variant: value.variant.to_string(),
            },
            Value::Ok(inner) => Self::Ok(Box::new(Self::from_value(inner)?)),
            Value::Err(inner) => Self::Err(Box::new(Self::from_value(inner)?)),
            Value::Some(inner) => Self::Some(Box::new(Self::from_value(inner)?)),
            Value::None => Self::None,
            Value::Closure(closure) => {
                return Err(RunError::type_error(format!(
                    "cannot export closure '{}' to the host",
                    closure.target.name
                )));
            }
            Value::Pii(pii) => Self::Pii {
                value: Box::new(Self::from_value(&pii.inner)?),
                tags: pii.tags.iter().cloned().collect(),
                sensitivity: pii.sensitivity.clone(),
            },
            Value::TaskHandle(name) => {
                return Err(RunError::type_error(format!("cannot export handle of task '{name}'")));
            }
        })
    }

    pub(crate) fn into_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(v) => Value::Bool(v),
            Self::Int(v) => Value::Int(v),
            Self::Long(v) => Value::Long(v),
            Self::Double(v) => Value::Double(v),
            Self::Text(v) => Value::Text(v.into()),
            Self::List(items) => Value::List(items.into_iter().map(Self::into_value).collect::<Vec<_>>().into()),
            Self::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, value.into_value()))
                    .collect::<IndexMap<_, _>>()
                    .into(),
            ),
            Self::Record { type_name, fields } => Value::Record(
                RecordValue {
                    type_name: type_name.into(),
                    fields: fields
                        .into_iter()
                        .map(|(name, value)| (name, value.into_value()))
                        .collect(),
                }
                .into(),
            ),
            Self::Enum { enum_name, variant } => Value::Enum(
                crate::value::EnumValue {
                    enum_name: enum_name.into(),
                    variant: variant.into(),
                }
                .into(),
            ),
            Self::Ok(inner) => Value::Ok(inner.into_value().into()),
            Self::Err(inner) => Value::Err(inner.into_value().into()),
            Self::Some(inner) => Value::Some(inner.into_value().into()),
            Self::None => Value::None,
            Self::Pii {
                value,
                tags,
                sensitivity,
            } => {
                let inner = value.into_value();
                Value::Pii(
                    PiiValue {
                        inner,
                        tags: tags.into_iter().collect(),
                        sensitivity: crate::value::normalize_sensitivity(&sensitivity),
                    }
                    .into(),
                )
            }
        }
    }

    /// Read-only list view, when this object is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<ListView<'_>> {
        match self {
            Self::List(items) => Some(ListView { items }),
            _ => Option::None,
        }
    }

    /// Read-only member view, when this object is a map or record.
    #[must_use]
    pub fn as_map(&self) -> Option<MapView<'_>> {
        match self {
            Self::Map(entries) => Some(MapView { entries }),
            Self::Record { fields, .. } => Some(MapView { entries: fields }),
            _ => Option::None,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::Text(v) => f.write_str(v),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Record { type_name, fields } => {
                write!(f, "{type_name} {{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Enum { enum_name, variant } => write!(f, "{enum_name}.{variant}"),
            Self::Ok(v) => write!(f, "Ok({v})"),
            Self::Err(v) => write!(f, "Err({v})"),
            Self::Some(v) => write!(f, "Some({v})"),
            Self::None => f.write_str("None"),
            Self::Pii { tags, .. } => {
                if tags.is_empty() {
                    f.write_str("<PII>")
                } else {
                    write!(f, "<PII:{}>", tags.join(","))
                }
            }
        }
    }
}

/// Read-only indexed access over a list object.
#[derive(Debug, Clone, Copy)]
pub struct ListView<'a> {
    items: &'a [Object],
}

impl<'a> ListView<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'a Object> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Object> {
        self.items.iter()
    }
}

/// Read-only member access over a map or record object.
#[derive(Debug, Clone, Copy)]
pub struct MapView<'a> {
    entries: &'a IndexMap<String, Object>,
}

impl<'a> MapView<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, member: &str) -> Option<&'a Object> {
        self.entries.get(member)
    }

    /// Member names in insertion order.
    pub fn members(&self) -> impl Iterator<Item = &'a str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Object)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

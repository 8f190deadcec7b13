use std::{collections::BTreeSet, fmt, sync::Arc};

use indexmap::IndexMap;

use crate::{effect::EffectSet, nodes::FunctionDef};

/// Primary value type representing Aster values at runtime.
///
/// Small immediate values (Null, Bool, Int, Long, Double) are stored inline;
/// aggregate payloads (Text, List, Map, Record, closures, PII wrappers) are
/// `Arc`-shared so that cloning a value is cheap and values can cross the
/// worker-thread boundary during workflow execution. All values are immutable
/// except through an explicit `set` rebinding the name.
///
/// `Undefined` is an internal sentinel for a frame slot whose `let` has not
/// executed yet; it never escapes the interpreter.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    Undefined,
    Null,
    Bool(bool),
    /// Host 32-bit integer.
    Int(i32),
    /// Host 64-bit integer.
    Long(i64),
    Double(f64),
    /// Immutable string.
    Text(Arc<str>),
    /// Ordered sequence.
    List(Arc<Vec<Value>>),
    /// String-keyed, insertion-ordered mapping.
    Map(Arc<IndexMap<String, Value>>),
    /// A record: type name plus ordered field map.
    Record(Arc<RecordValue>),
    /// An enum constant: enum name plus variant name.
    Enum(Arc<EnumValue>),
    Ok(Arc<Value>),
    Err(Arc<Value>),
    Some(Arc<Value>),
    None,
    Closure(Arc<ClosureValue>),
    /// A value carrying PII tags and a normalized sensitivity level.
    Pii(Arc<PiiValue>),
    /// Handle to a task registered by `start`, resolved by name.
    TaskHandle(Arc<str>),
}

/// A record instance. Field order matches the `Data` declaration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordValue {
    pub type_name: Arc<str>,
    pub fields: IndexMap<String, Value>,
}

/// An enum constant, pre-built at load time for every known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnumValue {
    pub enum_name: Arc<str>,
    pub variant: Arc<str>,
}

/// A first-class closure.
///
/// The captured array is fixed at creation: each capture is snapshotted by
/// value when the lambda expression is evaluated. Top-level functions are
/// pre-bound as closures with empty capture arrays.
#[derive(Debug)]
pub(crate) struct ClosureValue {
    /// The call target: parameter names, capture names, frame layout, body.
    pub target: Arc<FunctionDef>,
    /// Captured values, aligned with `target.captures`.
    pub captured: Vec<Value>,
    /// Declared required-effects set; installed for the duration of calls.
    pub effects: EffectSet,
}

/// A PII-wrapped value: the inner value, the tag categories attached to it,
/// and a normalized sensitivity level.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PiiValue {
    pub inner: Value,
    /// Tag categories, kept sorted so the redacted form is deterministic.
    pub tags: BTreeSet<String>,
    /// Upper-cased, trimmed sensitivity level.
    pub sensitivity: String,
}

impl PiiValue {
    /// The redacted string form: `<PII>` when tagless, else `<PII:tag1,tag2>`.
    pub fn redacted(&self) -> String {
        if self.tags.is_empty() {
            "<PII>".to_owned()
        } else {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            format!("<PII:{}>", tags.join(","))
        }
    }
}

/// Normalizes a free-form sensitivity level: trimmed, upper-cased.
pub(crate) fn normalize_sensitivity(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl Value {
    /// Wraps `value` with a PII annotation.
    ///
    /// Wrapping is idempotent: re-wrapping an already-wrapped value merges
    /// the tag sets and keeps the lexicographically greater normalized
    /// sensitivity ("higher sensitivity sticks").
    pub fn wrap_pii(value: Self, category: &str, sensitivity: &str) -> Self {
        let level = normalize_sensitivity(sensitivity);
        match value {
            Self::Pii(existing) => {
                let mut tags = existing.tags.clone();
                tags.insert(category.to_owned());
                let sensitivity = if existing.sensitivity >= level {
                    existing.sensitivity.clone()
                } else {
                    level
                };
                Self::Pii(Arc::new(PiiValue {
                    inner: existing.inner.clone(),
                    tags,
                    sensitivity,
                }))
            }
            inner => Self::Pii(Arc::new(PiiValue {
                inner,
                tags: BTreeSet::from([category.to_owned()]),
                sensitivity: level,
            })),
        }
    }

    /// A short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Long(_) => "Long",
            Self::Double(_) => "Double",
            Self::Text(_) => "Text",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Record(_) => "Record",
            Self::Enum(_) => "Enum",
            Self::Ok(_) => "Ok",
            Self::Err(_) => "Err",
            Self::Some(_) => "Some",
            Self::None => "None",
            Self::Closure(_) => "Closure",
            Self::Pii(_) => "PII",
            Self::TaskHandle(_) => "TaskHandle",
        }
    }

    /// Numeric view used by arithmetic and comparison builtins.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Option::Some(f64::from(*v)),
            Self::Long(v) => Option::Some(*v as f64),
            Self::Double(v) => Option::Some(*v),
            _ => Option::None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Long(_) | Self::Double(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) | (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            // Mixed-width integers compare by numeric value.
            (Self::Int(a), Self::Long(b)) | (Self::Long(b), Self::Int(a)) => i64::from(*a) == *b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Ok(a), Self::Ok(b)) | (Self::Err(a), Self::Err(b)) | (Self::Some(a), Self::Some(b)) => a == b,
            (Self::Closure(a), Self::Closure(b)) => Arc::ptr_eq(a, b),
            (Self::Pii(a), Self::Pii(b)) => a == b,
            (Self::TaskHandle(a), Self::TaskHandle(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("<undefined>"),
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
            Self::Record(record) => {
                write!(f, "{} {{", record.type_name)?;
                for (i, (name, value)) in record.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Enum(value) => write!(f, "{}.{}", value.enum_name, value.variant),
            Self::Ok(v) => write!(f, "Ok({v})"),
            Self::Err(v) => write!(f, "Err({v})"),
            Self::Some(v) => write!(f, "Some({v})"),
            Self::None => f.write_str("None"),
            Self::Closure(closure) => write!(f, "<closure {}>", closure.target.name),
            // PII never renders its payload; the redacted form is the only
            // string representation.
            Self::Pii(pii) => f.write_str(&pii.redacted()),
            Self::TaskHandle(name) => write!(f, "<task {name}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pii_rewrap_merges_tags_and_keeps_higher_sensitivity() {
        let wrapped = Value::wrap_pii(Value::Text("alice@example.com".into()), "email", "low");
        let rewrapped = Value::wrap_pii(wrapped, "contact", " HIGH ");
        let Value::Pii(pii) = rewrapped else {
            panic!("expected a PII value");
        };
        assert_eq!(pii.tags, BTreeSet::from(["contact".to_owned(), "email".to_owned()]));
        // Lexicographically greater normalized level sticks: "LOW" > "HIGH".
        assert_eq!(pii.sensitivity, "LOW");
        assert_eq!(pii.redacted(), "<PII:contact,email>");
    }

    #[test]
    fn pii_display_is_redacted() {
        let wrapped = Value::wrap_pii(Value::Text("secret".into()), "name", "medium");
        assert_eq!(wrapped.to_string(), "<PII:name>");
        let bare = Value::Pii(Arc::new(PiiValue {
            inner: Value::Int(1),
            tags: BTreeSet::new(),
            sensitivity: "LOW".to_owned(),
        }));
        assert_eq!(bare.to_string(), "<PII>");
    }

    #[test]
    fn mixed_width_integers_compare_by_value() {
        assert_eq!(Value::Int(42), Value::Long(42));
        assert_ne!(Value::Int(42), Value::Long(43));
    }
}

//! # Parameter Schema
//!
//! Declared parameters of a task callable. The schema is fixed at registration time;
//! the resolver checks wire arguments against it before anything executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire type accepted by a value parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Any,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ParamType {
    /// Whether a wire value fits this type. Integers are accepted where floats are.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Human-readable name of a wire value's type, for validation messages
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Value injected by the receiver rather than supplied on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// The execution [`Context`](crate::dependencies::Context)
    Context,
    /// A [`ProgressTracker`](crate::progress::ProgressTracker) for the current task
    Progress,
    /// A named dependency provider registered on the registry
    Provider(String),
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Bound from `args`/`kwargs`
    Value {
        name: String,
        ty: ParamType,
        default: Option<Value>,
    },
    /// Supplied by the receiver; never bound from the wire
    Inject { name: String, injection: Injection },
}

impl Param {
    /// Required wire parameter
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self::Value {
            name: name.into(),
            ty,
            default: None,
        }
    }

    /// Wire parameter with a default used when the caller omits it
    pub fn optional(name: impl Into<String>, ty: ParamType, default: Value) -> Self {
        Self::Value {
            name: name.into(),
            ty,
            default: Some(default),
        }
    }

    pub fn context(name: impl Into<String>) -> Self {
        Self::Inject {
            name: name.into(),
            injection: Injection::Context,
        }
    }

    pub fn progress(name: impl Into<String>) -> Self {
        Self::Inject {
            name: name.into(),
            injection: Injection::Progress,
        }
    }

    /// Parameter filled by the named dependency provider
    pub fn depends(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::Inject {
            name: name.into(),
            injection: Injection::Provider(provider.into()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Value { name, .. } | Self::Inject { name, .. } => name,
        }
    }

    pub fn is_injected(&self) -> bool {
        matches!(self, Self::Inject { .. })
    }
}

/// Ordered parameter list of a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    params: Vec<Param>,
}

impl ParamSchema {
    pub fn new(params: Vec<Param>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name() == name)
    }

    /// Wire parameters in declaration order; positional args bind to these
    pub fn value_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| !p.is_injected())
    }

    /// Providers referenced directly by this schema
    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|p| match p {
            Param::Inject {
                injection: Injection::Provider(provider),
                ..
            } => Some(provider.as_str()),
            _ => None,
        })
    }

    /// First parameter name declared twice, if any
    pub(crate) fn duplicate_name(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.params
            .iter()
            .map(Param::name)
            .find(|name| !seen.insert(*name))
    }
}

impl From<Vec<Param>> for ParamSchema {
    fn from(params: Vec<Param>) -> Self {
        Self::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_acceptance() {
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Float.accepts(&json!(3)));
        assert!(ParamType::Float.accepts(&json!(3.5)));
        assert!(!ParamType::String.accepts(&json!(3)));
        assert!(ParamType::Any.accepts(&Value::Null));
        assert!(!ParamType::Bool.accepts(&Value::Null));
    }

    #[test]
    fn test_schema_views() {
        let schema = ParamSchema::new(vec![
            Param::required("a", ParamType::Integer),
            Param::context("ctx"),
            Param::optional("b", ParamType::Integer, json!(1)),
            Param::depends("db", "database"),
        ]);

        let values: Vec<&str> = schema.value_params().map(Param::name).collect();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(schema.provider_names().collect::<Vec<_>>(), vec!["database"]);
        assert!(schema.duplicate_name().is_none());
    }

    #[test]
    fn test_duplicate_name_detected() {
        let schema = ParamSchema::new(vec![
            Param::required("a", ParamType::Any),
            Param::progress("a"),
        ]);
        assert_eq!(schema.duplicate_name(), Some("a"));
    }
}

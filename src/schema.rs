//! Input schema collaborator.
//!
//! A pipeline validates its `input` mapping against a [`Schema`] before any step
//! runs. The engine itself only relies on two operations: [`Schema::resolve`],
//! which turns a raw input mapping into a resolved output plus structured
//! errors, and [`Schema::merge`], which folds a nested pipeline's schema into
//! its parent's.
//!
//! # Example
//! ```
//! use stageline::schema::{FieldType, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::builder()
//!     .required("current_product_slug", FieldType::String)
//!     .optional_with_default("months", FieldType::Integer, json!(1))
//!     .build();
//!
//! let input = json!({ "current_product_slug": "p2" });
//! let resolution = schema.resolve(input.as_object().unwrap());
//! assert!(resolution.is_valid());
//! assert_eq!(resolution.output["months"], json!(1));
//! ```

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Field path (`$.name`, `$.address.city`) to the messages reported for it
pub type ValidationErrors = BTreeMap<String, Vec<String>>;

/// Root of every field path
pub const ROOT_PATH: &str = "$";

/// Expected shape of a single input field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object(Schema),
}

impl FieldType {
    fn describe(&self) -> &'static str {
        match self {
            FieldType::Any => "value",
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object(_) => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Any => true,
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object(_) => value.is_object(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A named, typed input field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldType,
    pub required: bool,
    pub default: Option<Value>,
}

/// Outcome of resolving an input mapping against a schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub output: Map<String, Value>,
    pub errors: ValidationErrors,
}

impl Resolution {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Ordered set of named input fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: IndexMap<String, Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Top-level field names in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Resolve `input` against this schema.
    ///
    /// A schema without fields passes the input through untouched. Otherwise
    /// only declared fields reach the output; defaults fill in missing optional
    /// fields and `null` counts as missing.
    pub fn resolve(&self, input: &Map<String, Value>) -> Resolution {
        let mut errors = ValidationErrors::new();
        let output = self.resolve_at(input, ROOT_PATH, &mut errors);
        Resolution { output, errors }
    }

    fn resolve_at(
        &self,
        input: &Map<String, Value>,
        path: &str,
        errors: &mut ValidationErrors,
    ) -> Map<String, Value> {
        if self.fields.is_empty() {
            return input.clone();
        }

        let mut output = Map::new();
        for field in self.fields.values() {
            let field_path = format!("{}.{}", path, field.name);
            let value = input.get(&field.name).filter(|v| !v.is_null());

            let Some(value) = value else {
                if let Some(default) = &field.default {
                    output.insert(field.name.clone(), default.clone());
                } else if field.required {
                    push_error(errors, field_path, "is required".to_string());
                }
                continue;
            };

            if !field.kind.accepts(value) {
                push_error(errors, field_path, format!("must be a {}", field.kind));
                continue;
            }

            let resolved = match (&field.kind, value) {
                (FieldType::Object(nested), Value::Object(map)) => {
                    Value::Object(nested.resolve_at(map, &field_path, errors))
                }
                _ => value.clone(),
            };
            output.insert(field.name.clone(), resolved);
        }
        output
    }

    /// Field-set union of `self` and `other`.
    ///
    /// A field keeps the position of its first declaration. When both sides
    /// declare the same name, nested object schemas are merged recursively and
    /// any other definition from `other` replaces the existing one in place.
    pub fn merge(&self, other: &Schema) -> Schema {
        let mut merged = self.clone();
        for field in other.fields.values() {
            merged.upsert(field.clone());
        }
        merged
    }

    fn upsert(&mut self, field: Field) {
        match self.fields.entry(field.name.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                let deep = match (&existing.kind, &field.kind) {
                    (FieldType::Object(left), FieldType::Object(right)) => Some(left.merge(right)),
                    _ => None,
                };
                *existing = match deep {
                    Some(schema) => Field {
                        kind: FieldType::Object(schema),
                        ..field
                    },
                    None => field,
                };
            }
            Entry::Vacant(slot) => {
                slot.insert(field);
            }
        }
    }
}

fn push_error(errors: &mut ValidationErrors, path: String, message: String) {
    errors.entry(path).or_default().push(message);
}

/// Accumulates fields for a [`Schema`]
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn required(&mut self, name: impl Into<String>, kind: FieldType) -> &mut Self {
        self.field(Field {
            name: name.into(),
            kind,
            required: true,
            default: None,
        })
    }

    pub fn optional(&mut self, name: impl Into<String>, kind: FieldType) -> &mut Self {
        self.field(Field {
            name: name.into(),
            kind,
            required: false,
            default: None,
        })
    }

    pub fn optional_with_default(
        &mut self,
        name: impl Into<String>,
        kind: FieldType,
        default: Value,
    ) -> &mut Self {
        self.field(Field {
            name: name.into(),
            kind,
            required: false,
            default: Some(default),
        })
    }

    /// Declare a nested object field described by `block`
    pub fn object<F>(&mut self, name: impl Into<String>, required: bool, block: F) -> &mut Self
    where
        F: FnOnce(&mut SchemaBuilder),
    {
        let mut nested = SchemaBuilder::default();
        block(&mut nested);
        self.field(Field {
            name: name.into(),
            kind: FieldType::Object(nested.build()),
            required,
            default: None,
        })
    }

    pub fn field(&mut self, field: Field) -> &mut Self {
        self.schema.upsert(field);
        self
    }

    pub fn build(&self) -> Schema {
        self.schema.clone()
    }
}

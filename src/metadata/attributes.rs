//! Custom attributes.
//!
//! A [`CustomAttribute`] names its attribute class by token and carries its constructor and
//! named arguments as decoded values. The merge engine compares attributes by resolved type name
//! plus arguments, so two byte-identical applications from different modules collapse into one.

use crate::metadata::token::Token;

/// Full name of the attribute controlling attribute multiplicity.
pub const ATTRIBUTE_USAGE: &str = "System.AttributeUsageAttribute";
/// Named argument of [`ATTRIBUTE_USAGE`] enabling multiple applications.
pub const ALLOW_MULTIPLE: &str = "AllowMultiple";

/// A decoded custom attribute argument value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    /// `bool`
    Bool(bool),
    /// `int32` (also enum values)
    I32(i32),
    /// `int64`
    I64(i64),
    /// `string`, `None` for a null string
    String(Option<String>),
    /// `System.Type`, stored as its serialized type name
    TypeName(String),
}

/// A named (field or property) argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedArgument {
    /// `true` for a field, `false` for a property
    pub is_field: bool,
    /// Field or property name
    pub name: String,
    /// Value
    pub value: AttributeValue,
}

/// One application of a custom attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomAttribute {
    /// Attribute class, `TypeDef` or `TypeRef`
    pub attribute_type: Token,
    /// Constructor arguments
    pub fixed_args: Vec<AttributeValue>,
    /// Named arguments
    pub named_args: Vec<NamedArgument>,
}

impl CustomAttribute {
    /// Creates an attribute application with constructor arguments only.
    #[must_use]
    pub fn new(attribute_type: Token, fixed_args: Vec<AttributeValue>) -> Self {
        CustomAttribute {
            attribute_type,
            fixed_args,
            named_args: Vec::new(),
        }
    }

    /// Adds a named property argument.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.named_args.push(NamedArgument {
            is_field: false,
            name: name.into(),
            value,
        });
        self
    }

    /// Interprets this application as `AttributeUsage` and returns its `AllowMultiple` value.
    ///
    /// The caller is responsible for checking that the attribute type is [`ATTRIBUTE_USAGE`].
    #[must_use]
    pub fn allow_multiple(&self) -> bool {
        self.named_args.iter().any(|arg| {
            arg.name == ALLOW_MULTIPLE && arg.value == AttributeValue::Bool(true)
        })
    }

    /// Returns `true` if both applications carry the same arguments. Attribute types have to be
    /// compared by resolved name separately since tokens are module local.
    #[must_use]
    pub fn same_arguments(&self, other: &CustomAttribute) -> bool {
        self.fixed_args == other.fixed_args && self.named_args == other.named_args
    }
}

/// Checks `name` against a drop list entry. Entries match the full or the simple type name,
/// with or without the `Attribute` suffix.
#[must_use]
pub fn attribute_name_matches(full_name: &str, entry: &str) -> bool {
    let simple = full_name.rsplit(['.', '/']).next().unwrap_or(full_name);
    let simple_short = simple.strip_suffix("Attribute").unwrap_or(simple);
    let full_short = full_name.strip_suffix("Attribute").unwrap_or(full_name);
    let entry = entry.trim();
    let entry_short = entry.strip_suffix("Attribute").unwrap_or(entry);

    entry_short == full_short || entry_short == simple_short
}

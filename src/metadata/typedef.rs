//! Type definitions and their members.

use crate::{
    metadata::{
        attributes::CustomAttribute,
        body::MethodBody,
        flags::{FieldAttributes, MethodAttributes, TypeAttributes},
        signatures::{MethodSig, TypeSig},
        token::Token,
    },
    Result,
};

/// A field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// `Field` token
    pub token: Token,
    /// Field name
    pub name: String,
    /// Field attributes
    pub flags: FieldAttributes,
    /// Field type
    pub signature: TypeSig,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

/// A method definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// `MethodDef` token
    pub token: Token,
    /// Method name
    pub name: String,
    /// Method attributes
    pub flags: MethodAttributes,
    /// Signature
    pub signature: MethodSig,
    /// IL body, `None` for abstract and runtime provided methods
    pub body: Option<MethodBody>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

/// A property definition. Accessors point at methods of the declaring type.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    /// `Property` token
    pub token: Token,
    /// Property name
    pub name: String,
    /// Property type
    pub signature: TypeSig,
    /// Getter method
    pub getter: Option<Token>,
    /// Setter method
    pub setter: Option<Token>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

/// An event definition. Accessors point at methods of the declaring type.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDef {
    /// `Event` token
    pub token: Token,
    /// Event name
    pub name: String,
    /// Delegate type of the event
    pub event_type: Token,
    /// `add` accessor
    pub add: Option<Token>,
    /// `remove` accessor
    pub remove: Option<Token>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

/// A type definition, with its nested types carried inline.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// `TypeDef` token
    pub token: Token,
    /// Namespace, empty for nested types and the global namespace
    pub namespace: String,
    /// Simple name (including a generic arity suffix such as `` `1 ``)
    pub name: String,
    /// Type attributes
    pub flags: TypeAttributes,
    /// Base type
    pub extends: Option<Token>,
    /// Implemented interfaces
    pub interfaces: Vec<Token>,
    /// Generic parameter names
    pub generic_params: Vec<String>,
    /// Fields
    pub fields: Vec<FieldDef>,
    /// Methods
    pub methods: Vec<MethodDef>,
    /// Properties
    pub properties: Vec<PropertyDef>,
    /// Events
    pub events: Vec<EventDef>,
    /// Nested types
    pub nested: Vec<TypeDef>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

/// Joins a namespace and a name into a qualified name.
#[must_use]
pub fn qualified_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

impl TypeDef {
    /// Namespace-qualified name, e.g. `N.T`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.namespace, &self.name)
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// Looks up a method of this type by token.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.token == token)
    }

    /// Visits this type and all nested types depth first, passing the full name
    /// (`N.Outer/Inner`) alongside.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a TypeDef, &str)) {
        self.walk_with_prefix(None, f);
    }

    fn walk_with_prefix<'a>(&'a self, outer: Option<&str>, f: &mut impl FnMut(&'a TypeDef, &str)) {
        let full_name = match outer {
            Some(outer) => format!("{outer}/{}", self.name),
            None => self.qualified_name(),
        };
        f(self, &full_name);
        for nested in &self.nested {
            nested.walk_with_prefix(Some(&full_name), f);
        }
    }

    /// Calls `f` for every token this type (excluding nested types) references: base type,
    /// interfaces, member signatures, bodies, accessors, event types and attribute types.
    pub fn visit_tokens(&self, f: &mut impl FnMut(Token)) {
        if let Some(extends) = self.extends {
            f(extends);
        }
        for interface in &self.interfaces {
            f(*interface);
        }
        for attribute in &self.attributes {
            f(attribute.attribute_type);
        }

        for field in &self.fields {
            field.signature.visit_tokens(f);
            for attribute in &field.attributes {
                f(attribute.attribute_type);
            }
        }

        for method in &self.methods {
            method.signature.visit_tokens(f);
            if let Some(body) = &method.body {
                body.visit_tokens(f);
            }
            for attribute in &method.attributes {
                f(attribute.attribute_type);
            }
        }

        for property in &self.properties {
            property.signature.visit_tokens(f);
            property.getter.into_iter().chain(property.setter).for_each(&mut *f);
            for attribute in &property.attributes {
                f(attribute.attribute_type);
            }
        }

        for event in &self.events {
            f(event.event_type);
            event.add.into_iter().chain(event.remove).for_each(&mut *f);
            for attribute in &event.attributes {
                f(attribute.attribute_type);
            }
        }
    }
}

impl FieldDef {
    /// Returns a copy with the definition token, signature and attribute types replaced
    /// through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<FieldDef> {
        Ok(FieldDef {
            token: f(self.token)?,
            name: self.name.clone(),
            flags: self.flags,
            signature: self.signature.map_tokens(f)?,
            attributes: map_attributes(&self.attributes, f)?,
        })
    }
}

impl MethodDef {
    /// Returns a copy with the definition token, signature, body and attribute types replaced
    /// through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<MethodDef> {
        Ok(MethodDef {
            token: f(self.token)?,
            name: self.name.clone(),
            flags: self.flags,
            signature: self.signature.map_tokens(f)?,
            body: self
                .body
                .as_ref()
                .map(|body| body.map_tokens(f))
                .transpose()?,
            attributes: map_attributes(&self.attributes, f)?,
        })
    }
}

impl PropertyDef {
    /// Returns a copy with the definition token, signature, accessors and attribute types
    /// replaced through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<PropertyDef> {
        Ok(PropertyDef {
            token: f(self.token)?,
            name: self.name.clone(),
            signature: self.signature.map_tokens(f)?,
            getter: self.getter.map(&mut *f).transpose()?,
            setter: self.setter.map(&mut *f).transpose()?,
            attributes: map_attributes(&self.attributes, f)?,
        })
    }
}

impl EventDef {
    /// Returns a copy with the definition token, event type, accessors and attribute types
    /// replaced through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<EventDef> {
        Ok(EventDef {
            token: f(self.token)?,
            name: self.name.clone(),
            event_type: f(self.event_type)?,
            add: self.add.map(&mut *f).transpose()?,
            remove: self.remove.map(&mut *f).transpose()?,
            attributes: map_attributes(&self.attributes, f)?,
        })
    }
}

/// Returns copies of `attributes` with their attribute types replaced through `f`.
///
/// # Errors
/// Propagates the first error returned by `f`.
pub fn map_attributes(
    attributes: &[CustomAttribute],
    f: &mut impl FnMut(Token) -> Result<Token>,
) -> Result<Vec<CustomAttribute>> {
    attributes
        .iter()
        .map(|attribute| {
            Ok(CustomAttribute {
                attribute_type: f(attribute.attribute_type)?,
                fixed_args: attribute.fixed_args.clone(),
                named_args: attribute.named_args.clone(),
            })
        })
        .collect()
}

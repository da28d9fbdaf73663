//! The in-memory module model.
//!
//! A [`Module`] is what the [`crate::image`] codec decodes from disk and what the merge engine
//! produces. Types are held as a tree (nested types inside their enclosing type); external
//! references live in the `type_refs` and `member_refs` tables and point at the module's
//! `references` by index.

use std::collections::HashMap;

use strum::{Display, EnumString};

use crate::metadata::{
    attributes::{CustomAttribute, ATTRIBUTE_USAGE},
    flags::ManifestResourceAttributes,
    identity::ModuleIdentity,
    signatures::MemberSig,
    token::Token,
    typedef::{qualified_name, MethodDef, TypeDef},
};

/// The kind of image a module was compiled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ModuleKind {
    /// Class library
    Dll,
    /// Console executable
    Exe,
    /// GUI executable
    WinExe,
    /// Kind metadata is zero
    Unspecified,
}

/// Where a [`TypeRef`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionScope {
    /// Index into [`Module::references`]
    Reference(u32),
    /// Nested inside another `TypeRef`
    Enclosing(Token),
    /// The referencing module itself
    Local,
}

/// A reference to a type defined elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// `TypeRef` token
    pub token: Token,
    /// Resolution scope
    pub scope: ResolutionScope,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

/// A reference to a field or method of another type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// `MemberRef` token
    pub token: Token,
    /// Declaring type, `TypeRef` or `TypeDef`
    pub parent: Token,
    /// Member name
    pub name: String,
    /// Member signature
    pub signature: MemberSig,
}

/// An embedded manifest resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    /// Resource name
    pub name: String,
    /// Visibility flags
    pub flags: ManifestResourceAttributes,
    /// Resource content
    pub data: Vec<u8>,
}

/// A compiled module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Module identity
    pub identity: ModuleIdentity,
    /// Image kind
    pub kind: ModuleKind,
    /// Runtime version tag, e.g. `v4.0.30319`
    pub target_platform: String,
    /// Module version id
    pub mvid: uguid::Guid,
    /// Referenced modules
    pub references: Vec<ModuleIdentity>,
    /// External type references
    pub type_refs: Vec<TypeRef>,
    /// External member references
    pub member_refs: Vec<MemberRef>,
    /// Top level types, nested types inside
    pub types: Vec<TypeDef>,
    /// Embedded resources
    pub resources: Vec<Resource>,
    /// Module level custom attributes
    pub attributes: Vec<CustomAttribute>,
    /// Entry point method for executables
    pub entry_point: Option<Token>,
    /// Strong-name signature slot
    pub signature: Option<Vec<u8>>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(identity: ModuleIdentity, kind: ModuleKind) -> Self {
        Module {
            identity,
            kind,
            target_platform: "v4.0.30319".to_string(),
            mvid: uguid::Guid::ZERO,
            references: Vec::new(),
            type_refs: Vec::new(),
            member_refs: Vec::new(),
            types: Vec::new(),
            resources: Vec::new(),
            attributes: Vec::new(),
            entry_point: None,
            signature: None,
        }
    }

    /// Simple name of the module.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Visits every type, nested ones included, depth first in declaration order.
    pub fn walk_types<'a>(&'a self, f: &mut impl FnMut(&'a TypeDef, &str)) {
        for ty in &self.types {
            ty.walk(f);
        }
    }

    /// Maps every `TypeDef` token to its full name (`N.Outer/Inner`).
    #[must_use]
    pub fn type_names(&self) -> HashMap<Token, String> {
        let mut names = HashMap::new();
        self.walk_types(&mut |ty, name| {
            names.insert(ty.token, name.to_string());
        });
        for type_ref in &self.type_refs {
            if let Some(name) = self.type_ref_name(type_ref.token) {
                names.insert(type_ref.token, name);
            }
        }
        names
    }

    /// Finds a type definition, nested ones included, by token.
    #[must_use]
    pub fn find_type(&self, token: Token) -> Option<&TypeDef> {
        let mut found = None;
        self.walk_types(&mut |ty, _| {
            if found.is_none() && ty.token == token {
                found = Some(ty);
            }
        });
        found
    }

    /// Finds a type definition by full name.
    #[must_use]
    pub fn find_type_by_name(&self, full_name: &str) -> Option<&TypeDef> {
        let mut found = None;
        self.walk_types(&mut |ty, name| {
            if found.is_none() && name == full_name {
                found = Some(ty);
            }
        });
        found
    }

    /// Finds a method definition by token.
    #[must_use]
    pub fn find_method(&self, token: Token) -> Option<&MethodDef> {
        let mut found = None;
        self.walk_types(&mut |ty, _| {
            if found.is_none() {
                found = ty.method(token);
            }
        });
        found
    }

    /// Looks up a `TypeRef` row.
    #[must_use]
    pub fn type_ref(&self, token: Token) -> Option<&TypeRef> {
        self.type_refs.iter().find(|type_ref| type_ref.token == token)
    }

    /// Looks up a `MemberRef` row.
    #[must_use]
    pub fn member_ref(&self, token: Token) -> Option<&MemberRef> {
        self.member_refs.iter().find(|member| member.token == token)
    }

    /// Full name of a `TypeRef`, following enclosing scopes for nested references.
    #[must_use]
    pub fn type_ref_name(&self, token: Token) -> Option<String> {
        let type_ref = self.type_ref(token)?;
        match type_ref.scope {
            ResolutionScope::Enclosing(outer) if outer != token => {
                Some(format!("{}/{}", self.type_ref_name(outer)?, type_ref.name))
            }
            _ => Some(qualified_name(&type_ref.namespace, &type_ref.name)),
        }
    }

    /// The module a `TypeRef` resolves into, `None` for references local to this module.
    #[must_use]
    pub fn type_ref_target(&self, token: Token) -> Option<&ModuleIdentity> {
        let mut current = self.type_ref(token)?;
        for _ in 0..self.type_refs.len() {
            match current.scope {
                ResolutionScope::Reference(index) => {
                    return self.references.get(index as usize);
                }
                ResolutionScope::Enclosing(outer) => current = self.type_ref(outer)?,
                ResolutionScope::Local => return None,
            }
        }
        None
    }

    /// Full name of any type token (`TypeDef` or `TypeRef`).
    #[must_use]
    pub fn type_name(&self, token: Token) -> Option<String> {
        match token.table() {
            Token::TYPE_DEF => {
                let mut found = None;
                self.walk_types(&mut |ty, name| {
                    if found.is_none() && ty.token == token {
                        found = Some(name.to_string());
                    }
                });
                found
            }
            Token::TYPE_REF => self.type_ref_name(token),
            _ => None,
        }
    }

    /// Returns `Some(allow_multiple)` if this module defines `full_name` and carries an
    /// `AttributeUsage` on the definition.
    #[must_use]
    pub fn attribute_usage(&self, full_name: &str) -> Option<bool> {
        let definition = self.find_type_by_name(full_name)?;
        definition
            .attributes
            .iter()
            .find(|attribute| {
                self.type_name(attribute.attribute_type).as_deref() == Some(ATTRIBUTE_USAGE)
            })
            .map(CustomAttribute::allow_multiple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        attributes::{AttributeValue, ALLOW_MULTIPLE},
        builder::{ModuleBuilder, TypeBuilder},
        identity::ModuleVersion,
    };

    #[test]
    fn test_type_ref_names() {
        let mut builder = ModuleBuilder::new("App", ModuleKind::Dll);
        let lib = builder.reference(ModuleIdentity::new("Lib", ModuleVersion::new(1, 0, 0, 0)));
        let outer = builder.type_ref(lib, "N", "Outer");
        let inner = builder.nested_type_ref(outer, "Inner");
        let module = builder.build().unwrap();

        assert_eq!(module.type_name(outer).as_deref(), Some("N.Outer"));
        assert_eq!(module.type_name(inner).as_deref(), Some("N.Outer/Inner"));
        assert_eq!(module.type_ref_target(inner).map(|id| id.name.as_str()), Some("Lib"));
    }

    #[test]
    fn test_find_types() {
        let mut builder = ModuleBuilder::new("App", ModuleKind::Exe);
        builder.add_type(TypeBuilder::new("N", "T").nested(TypeBuilder::new("", "Inner")));
        let module = builder.build().unwrap();

        let inner = module.find_type_by_name("N.T/Inner").unwrap();
        assert_eq!(module.find_type(inner.token).unwrap().name, "Inner");
        assert_eq!(module.type_name(inner.token).as_deref(), Some("N.T/Inner"));
        assert!(module.find_type_by_name("N.Inner").is_none());
    }

    #[test]
    fn test_attribute_usage_lookup() {
        let mut builder = ModuleBuilder::new("Lib", ModuleKind::Dll);
        let core = builder.reference(ModuleIdentity::new("System.Runtime", ModuleVersion::default()));
        let usage = builder.type_ref(core, "System", "AttributeUsageAttribute");
        builder.add_type(TypeBuilder::new("Lib", "TagAttribute").attribute(
            CustomAttribute::new(usage, vec![AttributeValue::I32(1)])
                .with_property(ALLOW_MULTIPLE, AttributeValue::Bool(true)),
        ));
        builder.add_type(TypeBuilder::new("Lib", "PlainAttribute"));
        let module = builder.build().unwrap();

        assert_eq!(module.attribute_usage("Lib.TagAttribute"), Some(true));
        assert_eq!(module.attribute_usage("Lib.PlainAttribute"), None);
        assert_eq!(module.attribute_usage("Lib.Missing"), None);
    }
}

//! Fluent builders for assembling [`Module`]s in memory.
//!
//! Used by hosts that synthesize modules and throughout the test suite. Tokens are allocated
//! eagerly: [`ModuleBuilder::add_type`] returns the token of the new type, and member tokens
//! can be looked up right after through [`ModuleBuilder::method_token`] to build call sites in
//! types added later.
//!
//! # Example
//!
//! ```rust
//! use dotrepack::metadata::{
//!     body::{opcodes, Operand},
//!     builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
//!     module::ModuleKind,
//!     signatures::{MethodSig, TypeSig},
//! };
//!
//! let mut builder = ModuleBuilder::new("Library", ModuleKind::Dll);
//! let helper = builder.add_type(
//!     TypeBuilder::new("Library", "Helper").method(
//!         MethodBuilder::new("Run", MethodSig::new_static(TypeSig::Void, vec![]))
//!             .code(vec![(opcodes::RET, Operand::None)]),
//!     ),
//! );
//! let run = builder.method_token(helper, "Run").unwrap();
//! let module = builder.build()?;
//! assert_eq!(module.find_method(run).unwrap().name, "Run");
//! # Ok::<(), dotrepack::Error>(())
//! ```

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use crate::{
    metadata::{
        attributes::CustomAttribute,
        body::{Instruction, MethodBody, Operand},
        flags::{FieldAttributes, ManifestResourceAttributes, MethodAttributes, TypeAttributes},
        identity::{Identity, ModuleIdentity, ModuleVersion},
        module::{MemberRef, Module, ModuleKind, ResolutionScope, Resource, TypeRef},
        signatures::{MemberSig, MethodSig, TypeSig},
        token::Token,
        typedef::{EventDef, FieldDef, MethodDef, PropertyDef, TypeDef},
    },
    Error, Result,
};

/// Hands out consecutive 1-based rows per metadata table.
#[derive(Debug, Default, Clone)]
pub struct TokenAllocator {
    next: HashMap<u8, u32>,
}

impl TokenAllocator {
    /// Allocates the next token of `table`.
    ///
    /// # Errors
    /// Returns [`Error::Rewrite`] once the table has no free row left; rows are 24 bits wide.
    pub fn next(&mut self, table: u8) -> Result<Token> {
        let row = self.next.entry(table).or_insert(0);
        if *row >= Token::MAX_ROW {
            return Err(Error::Rewrite(format!(
                "Table 0x{table:02x} exceeds {} rows",
                Token::MAX_ROW
            )));
        }
        *row += 1;
        Ok(Token::from_parts(table, *row))
    }

    /// Number of tokens allocated for `table` so far.
    #[must_use]
    pub fn count(&self, table: u8) -> u32 {
        self.next.get(&table).copied().unwrap_or(0)
    }
}

/// Builder for a [`MethodDef`].
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    name: String,
    flags: MethodAttributes,
    signature: MethodSig,
    body: Option<MethodBody>,
    attributes: Vec<CustomAttribute>,
}

impl MethodBuilder {
    /// Creates a public method without a body.
    pub fn new(name: impl Into<String>, signature: MethodSig) -> Self {
        let flags = if signature.has_this {
            MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG
        } else {
            MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | MethodAttributes::STATIC
        };

        MethodBuilder {
            name: name.into(),
            flags,
            signature,
            body: None,
            attributes: Vec::new(),
        }
    }

    /// Replaces the method attributes.
    #[must_use]
    pub fn flags(mut self, flags: MethodAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the complete body.
    #[must_use]
    pub fn body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a body from `(opcode, operand)` pairs, assigning instruction offsets from the
    /// encoded opcode and operand sizes.
    #[must_use]
    pub fn code(mut self, code: Vec<(u16, Operand)>) -> Self {
        let mut offset = 0u32;
        let mut instructions = Vec::with_capacity(code.len());
        for (opcode, operand) in code {
            let size = if opcode > 0xFF { 2 } else { 1 }
                + match &operand {
                    Operand::None => 0,
                    Operand::I64(_) | Operand::F64(_) => 8,
                    Operand::Switch(targets) => 4 + 4 * targets.len() as u32,
                    _ => 4,
                };
            instructions.push(Instruction::new(offset, opcode, operand));
            offset += size;
        }

        self.body = Some(MethodBody {
            max_stack: 8,
            init_locals: true,
            instructions,
            ..MethodBody::default()
        });
        self
    }

    /// Adds a custom attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: CustomAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    fn build(self, tokens: &mut TokenAllocator) -> Result<MethodDef> {
        Ok(MethodDef {
            token: tokens.next(Token::METHOD_DEF)?,
            name: self.name,
            flags: self.flags,
            signature: self.signature,
            body: self.body,
            attributes: self.attributes,
        })
    }
}

#[derive(Debug, Clone)]
struct PropertySpec {
    name: String,
    signature: TypeSig,
    getter: Option<String>,
    setter: Option<String>,
}

#[derive(Debug, Clone)]
struct EventSpec {
    name: String,
    event_type: Token,
    add: Option<String>,
    remove: Option<String>,
}

/// Builder for a [`TypeDef`] and its members.
#[derive(Debug, Clone)]
pub struct TypeBuilder {
    namespace: String,
    name: String,
    flags: TypeAttributes,
    extends: Option<Token>,
    interfaces: Vec<Token>,
    generic_params: Vec<String>,
    fields: Vec<(String, FieldAttributes, TypeSig)>,
    methods: Vec<MethodBuilder>,
    properties: Vec<PropertySpec>,
    events: Vec<EventSpec>,
    nested: Vec<TypeBuilder>,
    attributes: Vec<CustomAttribute>,
}

impl TypeBuilder {
    /// Creates a public class. Nested types default to `NESTED_PUBLIC` when added through
    /// [`TypeBuilder::nested`].
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeBuilder {
            namespace: namespace.into(),
            name: name.into(),
            flags: TypeAttributes::PUBLIC,
            extends: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            nested: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Replaces the type attributes.
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Makes the type non-public.
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.flags = self.flags.with_visibility(TypeAttributes::NOT_PUBLIC);
        self
    }

    /// Sets the base type.
    #[must_use]
    pub fn extends(mut self, base: Token) -> Self {
        self.extends = Some(base);
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn implements(mut self, interface: Token) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Adds a generic parameter.
    #[must_use]
    pub fn generic_param(mut self, name: impl Into<String>) -> Self {
        self.generic_params.push(name.into());
        self
    }

    /// Adds a public instance field.
    #[must_use]
    pub fn field(self, name: impl Into<String>, signature: TypeSig) -> Self {
        self.field_with_flags(name, FieldAttributes::PUBLIC, signature)
    }

    /// Adds a field with explicit attributes.
    #[must_use]
    pub fn field_with_flags(
        mut self,
        name: impl Into<String>,
        flags: FieldAttributes,
        signature: TypeSig,
    ) -> Self {
        self.fields.push((name.into(), flags, signature));
        self
    }

    /// Adds a method.
    #[must_use]
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Adds a property whose accessors are methods of this type, named by method name.
    #[must_use]
    pub fn property(
        mut self,
        name: impl Into<String>,
        signature: TypeSig,
        getter: Option<&str>,
        setter: Option<&str>,
    ) -> Self {
        self.properties.push(PropertySpec {
            name: name.into(),
            signature,
            getter: getter.map(str::to_string),
            setter: setter.map(str::to_string),
        });
        self
    }

    /// Adds an event whose accessors are methods of this type, named by method name.
    #[must_use]
    pub fn event(
        mut self,
        name: impl Into<String>,
        event_type: Token,
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Self {
        self.events.push(EventSpec {
            name: name.into(),
            event_type,
            add: add.map(str::to_string),
            remove: remove.map(str::to_string),
        });
        self
    }

    /// Adds a nested type.
    #[must_use]
    pub fn nested(mut self, mut nested: TypeBuilder) -> Self {
        if nested.flags.visibility() == TypeAttributes::PUBLIC.bits() {
            nested.flags = nested.flags.with_visibility(TypeAttributes::NESTED_PUBLIC);
        }
        nested.namespace.clear();
        self.nested.push(nested);
        self
    }

    /// Adds a custom attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: CustomAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Builds the type, allocating tokens depth first: the type, its members, then nested
    /// types.
    ///
    /// # Errors
    /// Returns [`Error::Rewrite`] if a metadata table runs out of rows.
    pub fn build(self, tokens: &mut TokenAllocator) -> Result<TypeDef> {
        let token = tokens.next(Token::TYPE_DEF)?;

        let fields = self
            .fields
            .into_iter()
            .map(|(name, flags, signature)| -> Result<FieldDef> {
                Ok(FieldDef {
                    token: tokens.next(Token::FIELD)?,
                    name,
                    flags,
                    signature,
                    attributes: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let methods = self
            .methods
            .into_iter()
            .map(|method| method.build(tokens))
            .collect::<Result<Vec<_>>>()?;

        let accessor = |name: &Option<String>| -> Option<Token> {
            let name = name.as_deref()?;
            methods
                .iter()
                .find(|method| method.name == name)
                .map(|method| method.token)
        };

        let properties = self
            .properties
            .iter()
            .map(|pending| -> Result<PropertyDef> {
                Ok(PropertyDef {
                    token: tokens.next(Token::PROPERTY)?,
                    name: pending.name.clone(),
                    signature: pending.signature.clone(),
                    getter: accessor(&pending.getter),
                    setter: accessor(&pending.setter),
                    attributes: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let events = self
            .events
            .iter()
            .map(|pending| -> Result<EventDef> {
                Ok(EventDef {
                    token: tokens.next(Token::EVENT)?,
                    name: pending.name.clone(),
                    event_type: pending.event_type,
                    add: accessor(&pending.add),
                    remove: accessor(&pending.remove),
                    attributes: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let nested = self
            .nested
            .into_iter()
            .map(|nested| nested.build(tokens))
            .collect::<Result<Vec<_>>>()?;

        Ok(TypeDef {
            token,
            namespace: self.namespace,
            name: self.name,
            flags: self.flags,
            extends: self.extends,
            interfaces: self.interfaces,
            generic_params: self.generic_params,
            fields,
            methods,
            properties,
            events,
            nested,
            attributes: self.attributes,
        })
    }
}

/// Builder for a complete [`Module`].
///
/// Token allocation failures are kept until [`ModuleBuilder::build`], which reports the first
/// one; the methods adding rows return a null token after a failure.
#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
    tokens: TokenAllocator,
    failure: Option<Error>,
}

impl ModuleBuilder {
    /// Creates a builder for a module named `name`, version `1.0.0.0`.
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        let identity = ModuleIdentity::new(name, ModuleVersion::new(1, 0, 0, 0));
        ModuleBuilder {
            module: Module::new(identity, kind),
            tokens: TokenAllocator::default(),
            failure: None,
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                if self.failure.is_none() {
                    self.failure = Some(error);
                }
                None
            }
        }
    }

    /// Sets the module version.
    #[must_use]
    pub fn version(mut self, version: ModuleVersion) -> Self {
        self.module.identity.version = version;
        self
    }

    /// Sets the strong-name identity.
    #[must_use]
    pub fn strong_name(mut self, identity: Identity) -> Self {
        self.module.identity.strong_name = Some(identity);
        self
    }

    /// Sets the runtime version tag.
    #[must_use]
    pub fn target_platform(mut self, platform: impl Into<String>) -> Self {
        self.module.target_platform = platform.into();
        self
    }

    /// Adds (or finds) a module reference and returns its index.
    pub fn reference(&mut self, identity: ModuleIdentity) -> u32 {
        if let Some(index) = self.module.references.iter().position(|r| *r == identity) {
            return index as u32;
        }
        self.module.references.push(identity);
        (self.module.references.len() - 1) as u32
    }

    fn push_type_ref(&mut self, scope: ResolutionScope, namespace: &str, name: &str) -> Token {
        if let Some(existing) = self.module.type_refs.iter().find(|type_ref| {
            type_ref.scope == scope && type_ref.namespace == namespace && type_ref.name == name
        }) {
            return existing.token;
        }

        let next = self.tokens.next(Token::TYPE_REF);
        let Some(token) = self.record(next) else {
            return Token::default();
        };
        self.module.type_refs.push(TypeRef {
            token,
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        token
    }

    /// Adds (or finds) a reference to type `namespace.name` in the referenced module at
    /// `reference`.
    pub fn type_ref(&mut self, reference: u32, namespace: &str, name: &str) -> Token {
        self.push_type_ref(ResolutionScope::Reference(reference), namespace, name)
    }

    /// Adds (or finds) a reference to a type nested in the referenced type `outer`.
    pub fn nested_type_ref(&mut self, outer: Token, name: &str) -> Token {
        self.push_type_ref(ResolutionScope::Enclosing(outer), "", name)
    }

    /// Adds (or finds) a member reference.
    pub fn member_ref(&mut self, parent: Token, name: &str, signature: MemberSig) -> Token {
        if let Some(existing) = self.module.member_refs.iter().find(|member| {
            member.parent == parent && member.name == name && member.signature == signature
        }) {
            return existing.token;
        }

        let next = self.tokens.next(Token::MEMBER_REF);
        let Some(token) = self.record(next) else {
            return Token::default();
        };
        self.module.member_refs.push(MemberRef {
            token,
            parent,
            name: name.to_string(),
            signature,
        });
        token
    }

    /// Builds and adds a top level type, returning its token.
    pub fn add_type(&mut self, ty: TypeBuilder) -> Token {
        let built = ty.build(&mut self.tokens);
        let Some(ty) = self.record(built) else {
            return Token::default();
        };
        let token = ty.token;
        self.module.types.push(ty);
        token
    }

    /// Token of the method `name` declared by the type `ty` (nested types included).
    #[must_use]
    pub fn method_token(&self, ty: Token, name: &str) -> Option<Token> {
        self.module
            .find_type(ty)?
            .methods
            .iter()
            .find(|method| method.name == name)
            .map(|method| method.token)
    }

    /// Adds a public resource.
    pub fn resource(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.module.resources.push(Resource {
            name: name.into(),
            flags: ManifestResourceAttributes::PUBLIC,
            data,
        });
    }

    /// Adds a module level custom attribute.
    pub fn attribute(&mut self, attribute: CustomAttribute) {
        self.module.attributes.push(attribute);
    }

    /// Sets the entry point method.
    pub fn entry_point(&mut self, method: Token) {
        self.module.entry_point = Some(method);
    }

    /// Finishes the module. The MVID is derived from the display name so that equal
    /// builders produce equal modules.
    ///
    /// # Errors
    /// Returns the first token allocation failure of this builder.
    pub fn build(mut self) -> Result<Module> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        let digest = Sha1::digest(self.module.identity.display_name().as_bytes());
        let mut mvid = [0u8; 16];
        mvid.copy_from_slice(&digest[..16]);
        self.module.mvid = uguid::Guid::from_bytes(mvid);
        Ok(self.module)
    }
}

//! Reference rewriting.
//!
//! Builds the output module from the [`MergePlan`]:
//!
//! 1. Every emitted top-level type becomes a shape. Coalesced types are folded into the shape of
//!    the type they merge into: members are unioned by [`MemberKey`], nested types by name, and
//!    every dropped duplicate is redirected to its survivor.
//! 2. Output tokens are allocated depth first (type, fields, methods, properties, events, nested
//!    types) and recorded in the [`SubstitutionMap`] under (source module, old token).
//! 3. Type references into merged modules are resolved to the new definitions; all other type
//!    and member references are deduplicated into the output tables.
//! 4. Once the map is frozen the shapes are rewritten in parallel.
//!
//! Source index `n` (the number of inputs) denotes the attribute source module. Only the types
//! of its planned assembly attributes are imported.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;

use crate::{
    metadata::{
        attributes::CustomAttribute,
        builder::TokenAllocator,
        flags::TypeAttributes,
        identity::ModuleIdentity,
        module::{MemberRef, Module, ResolutionScope, TypeRef},
        signatures::MemberSig,
        token::Token,
        typedef::{map_attributes, EventDef, FieldDef, MethodDef, PropertyDef, TypeDef},
    },
    repack::{
        conflicts::{AttributeMerger, AttributeSource, MergePlan, Placement},
        logger::RepackLogger,
        options::MergePolicy,
        resolver::ModuleSet,
        symbols::{member_keys, MemberKey, NameResolver, TypeOrigin},
    },
    Error, Result,
};

const MAX_BASE_DEPTH: usize = 64;

type SourceToken = (usize, Token);

/// Maps (source module, old token) to the token of the output module.
#[derive(Debug, Default, Clone)]
pub struct SubstitutionMap {
    entries: HashMap<SourceToken, Token>,
}

impl SubstitutionMap {
    /// The output token for `token` of source module `source`.
    ///
    /// Null tokens and user string tokens pass through unchanged.
    ///
    /// # Errors
    /// Returns [`Error::Rewrite`] if the token has no substitution.
    pub fn resolve(&self, source: usize, token: Token) -> Result<Token> {
        if token.is_null() || token.table() == Token::USER_STRING {
            return Ok(token);
        }
        self.entries.get(&(source, token)).copied().ok_or_else(|| {
            Error::Rewrite(format!("No substitution for {token} of source module {source}"))
        })
    }

    /// Number of substitutions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map holds no substitution.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, key: &SourceToken) -> Option<Token> {
        self.entries.get(key).copied()
    }

    fn insert(&mut self, key: SourceToken, token: Token) {
        self.entries.insert(key, token);
    }
}

struct TypeShape<'a> {
    source: usize,
    def: &'a TypeDef,
    name: String,
    flags: TypeAttributes,
    fields: Vec<(usize, &'a FieldDef)>,
    methods: Vec<(usize, &'a MethodDef)>,
    properties: Vec<(usize, &'a PropertyDef)>,
    events: Vec<(usize, &'a EventDef)>,
    interfaces: Vec<(usize, Token)>,
    attributes: Vec<(usize, &'a CustomAttribute)>,
    nested: Vec<TypeShape<'a>>,
    members: HashMap<MemberKey, SourceToken>,
    interface_names: HashSet<String>,
}

struct ShapeContext<'a, 'b> {
    modules: &'a ModuleSet,
    policy: &'a MergePolicy,
    logger: &'a dyn RepackLogger,
    names: &'b [NameResolver],
    redirects: &'b mut Vec<(SourceToken, SourceToken)>,
}

impl<'a> TypeShape<'a> {
    fn new(source: usize, def: &'a TypeDef, context: &mut ShapeContext<'a, '_>) -> Self {
        let mut shape = TypeShape {
            source,
            def,
            name: def.name.clone(),
            flags: def.flags,
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            interfaces: Vec::new(),
            attributes: Vec::new(),
            nested: Vec::new(),
            members: HashMap::new(),
            interface_names: HashSet::new(),
        };
        shape.absorb(source, def, context);
        shape
    }

    /// Folds the members, interfaces, attributes and nested types of `def` into this shape.
    fn absorb(&mut self, source: usize, def: &'a TypeDef, context: &mut ShapeContext<'a, '_>) {
        let all_names = context.names;
        let names = &all_names[source];

        for (key, token) in member_keys(def, names) {
            if let Some(survivor) = self.members.get(&key) {
                context.redirects.push(((source, token), *survivor));
                continue;
            }
            self.members.insert(key, (source, token));

            match token.table() {
                Token::FIELD => self
                    .fields
                    .extend(def.fields.iter().filter(|f| f.token == token).map(|f| (source, f))),
                Token::METHOD_DEF => self
                    .methods
                    .extend(def.methods.iter().filter(|m| m.token == token).map(|m| (source, m))),
                Token::PROPERTY => self.properties.extend(
                    def.properties
                        .iter()
                        .filter(|p| p.token == token)
                        .map(|p| (source, p)),
                ),
                _ => self
                    .events
                    .extend(def.events.iter().filter(|e| e.token == token).map(|e| (source, e))),
            }
        }

        for interface in &def.interfaces {
            if self.interface_names.insert(names.name(*interface)) {
                self.interfaces.push((source, *interface));
            }
        }

        let module = context.modules.inputs[source].module.name();
        let mut merger = AttributeMerger::new(context.modules, context.policy, context.logger);
        for (kept_source, kept) in &self.attributes {
            let name = all_names[*kept_source].name(kept.attribute_type);
            merger.record(&name, AttributeSource::Input(*kept_source), kept);
        }
        for attribute in &def.attributes {
            let name = names.name(attribute.attribute_type);
            if context.policy.drops_attribute(&name) {
                context
                    .logger
                    .verbose(&format!("Dropping attribute '{name}' of '{module}'"));
                continue;
            }
            let origin = AttributeSource::Input(source);
            if merger.offer(&name, origin, attribute) {
                merger.record(&name, origin, attribute);
                self.attributes.push((source, attribute));
            }
        }

        for nested in &def.nested {
            match self.nested.iter_mut().find(|shape| shape.name == nested.name) {
                Some(existing) => {
                    context
                        .redirects
                        .push(((source, nested.token), (existing.source, existing.def.token)));
                    existing.absorb(source, nested, context);
                }
                None => self.nested.push(TypeShape::new(source, nested, context)),
            }
        }
    }

    fn allocate(&self, tokens: &mut TokenAllocator, map: &mut SubstitutionMap) -> Result<()> {
        map.insert((self.source, self.def.token), tokens.next(Token::TYPE_DEF)?);
        for (source, field) in &self.fields {
            map.insert((*source, field.token), tokens.next(Token::FIELD)?);
        }
        for (source, method) in &self.methods {
            map.insert((*source, method.token), tokens.next(Token::METHOD_DEF)?);
        }
        for (source, property) in &self.properties {
            map.insert((*source, property.token), tokens.next(Token::PROPERTY)?);
        }
        for (source, event) in &self.events {
            map.insert((*source, event.token), tokens.next(Token::EVENT)?);
        }
        for nested in &self.nested {
            nested.allocate(tokens, map)?;
        }
        Ok(())
    }
}

/// Imports type and member references into the output tables.
struct ReferenceImporter<'a> {
    modules: &'a ModuleSet,
    names: &'a [NameResolver],
    map: SubstitutionMap,
    tokens: TokenAllocator,
    references: Vec<ModuleIdentity>,
    type_refs: Vec<TypeRef>,
    member_refs: Vec<MemberRef>,
    type_ref_index: HashMap<(ResolutionScope, String, String), Token>,
    member_ref_index: HashMap<(Token, String, MemberSig), Token>,
}

impl<'a> ReferenceImporter<'a> {
    fn source(&self, source: usize) -> Result<&'a Module> {
        let modules = self.modules;
        match modules.inputs.get(source) {
            Some(loaded) => Ok(&loaded.module),
            None => modules
                .attribute_source
                .as_ref()
                .map(|loaded| &loaded.module)
                .ok_or_else(|| Error::Rewrite(format!("Unknown source module {source}"))),
        }
    }

    fn is_input(&self, source: usize) -> bool {
        source < self.modules.inputs.len()
    }

    fn reference(&mut self, identity: &ModuleIdentity) -> u32 {
        if let Some(index) = self.references.iter().position(|r| r == identity) {
            return index as u32;
        }
        self.references.push(identity.clone());
        (self.references.len() - 1) as u32
    }

    fn push_type_ref(
        &mut self,
        scope: ResolutionScope,
        namespace: &str,
        name: &str,
    ) -> Result<Token> {
        let key = (scope, namespace.to_string(), name.to_string());
        if let Some(token) = self.type_ref_index.get(&key) {
            return Ok(*token);
        }

        let token = self.tokens.next(Token::TYPE_REF)?;
        self.type_refs.push(TypeRef {
            token,
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        self.type_ref_index.insert(key, token);
        Ok(token)
    }

    /// The output definition of the type named `full_name` in input `module`.
    fn definition(&self, module: usize, full_name: &str) -> Result<Token> {
        let target = &self.modules.inputs[module].module;
        let def = target.find_type_by_name(full_name).ok_or_else(|| {
            Error::Rewrite(format!(
                "Type '{full_name}' is not declared in '{}'",
                target.name()
            ))
        })?;
        self.map.get(&(module, def.token)).ok_or_else(|| {
            Error::Rewrite(format!(
                "Type '{full_name}' of '{}' has no output token",
                target.name()
            ))
        })
    }

    /// A type reference to a definition of the attribute source module.
    fn attribute_source_type(&mut self, full_name: &str) -> Result<Token> {
        let identity = self.source(self.modules.inputs.len())?.identity.clone();
        if let Some(input) = self.modules.input_index(&identity.name) {
            return self.definition(input, full_name);
        }

        let reference = self.reference(&identity);
        let mut parts = full_name.split('/');
        let outer = parts.next().unwrap_or(full_name);
        let (namespace, name) = outer.rsplit_once('.').unwrap_or(("", outer));
        let mut token = self.push_type_ref(ResolutionScope::Reference(reference), namespace, name)?;
        for nested in parts {
            token = self.push_type_ref(ResolutionScope::Enclosing(token), "", nested)?;
        }
        Ok(token)
    }

    fn import_type_ref(&mut self, source: usize, token: Token) -> Result<Token> {
        if let Some(resolved) = self.map.get(&(source, token)) {
            return Ok(resolved);
        }

        let module = self.source(source)?;
        let type_ref = module.type_ref(token).ok_or_else(|| {
            Error::Rewrite(format!(
                "Unknown type reference {token} in '{}'",
                module.name()
            ))
        })?;
        let full_name = module.type_ref_name(token).ok_or_else(|| {
            Error::Rewrite(format!(
                "Broken type reference chain at {token} in '{}'",
                module.name()
            ))
        })?;

        let target = module.type_ref_target(token);
        let target_input = match target {
            Some(identity) => self.modules.input_index(&identity.name),
            None if self.is_input(source) => Some(source),
            None => None,
        };

        let resolved = if let Some(input) = target_input {
            self.definition(input, &full_name)?
        } else if target.is_none() {
            self.attribute_source_type(&full_name)?
        } else {
            match type_ref.scope {
                ResolutionScope::Reference(index) => {
                    let identity = module.references.get(index as usize).ok_or_else(|| {
                        Error::Rewrite(format!(
                            "Reference index {index} out of range in '{}'",
                            module.name()
                        ))
                    })?;
                    let reference = self.reference(identity);
                    self.push_type_ref(
                        ResolutionScope::Reference(reference),
                        &type_ref.namespace,
                        &type_ref.name,
                    )?
                }
                ResolutionScope::Enclosing(outer) => {
                    let outer = self.import_type_ref(source, outer)?;
                    self.push_type_ref(
                        ResolutionScope::Enclosing(outer),
                        &type_ref.namespace,
                        &type_ref.name,
                    )?
                }
                ResolutionScope::Local => self.definition(source, &full_name)?,
            }
        };

        self.map.insert((source, token), resolved);
        Ok(resolved)
    }

    /// Resolves a type token (definition or reference) of `source`.
    fn import_type(&mut self, source: usize, token: Token) -> Result<Token> {
        if let Some(resolved) = self.map.get(&(source, token)) {
            return Ok(resolved);
        }

        match token.table() {
            Token::TYPE_REF => self.import_type_ref(source, token),
            Token::TYPE_DEF if !self.is_input(source) => {
                let module = self.source(source)?;
                let full_name = module.type_name(token).ok_or_else(|| {
                    Error::Rewrite(format!("Unknown type {token} in '{}'", module.name()))
                })?;
                let resolved = self.attribute_source_type(&full_name)?;
                self.map.insert((source, token), resolved);
                Ok(resolved)
            }
            _ => self.map.resolve(source, token),
        }
    }

    /// The input definition a type token of `source` points at, if it lies in a merged module.
    fn input_definition(&self, source: usize, token: Token) -> Option<(usize, &'a TypeDef)> {
        let modules = self.modules;
        match token.table() {
            Token::TYPE_DEF if self.is_input(source) => modules.inputs[source]
                .module
                .find_type(token)
                .map(|def| (source, def)),
            Token::TYPE_REF => {
                let module = self.source(source).ok()?;
                let input = match module.type_ref_target(token) {
                    Some(identity) => modules.input_index(&identity.name)?,
                    None if self.is_input(source) => source,
                    None => return None,
                };
                let full_name = module.type_ref_name(token)?;
                modules.inputs[input]
                    .module
                    .find_type_by_name(&full_name)
                    .map(|def| (input, def))
            }
            _ => None,
        }
    }

    fn member_key(&self, source: usize, member: &MemberRef) -> MemberKey {
        let names = &self.names[source];
        match &member.signature {
            MemberSig::Field(signature) => {
                MemberKey::Field(member.name.clone(), names.describe(signature))
            }
            MemberSig::Method(signature) => MemberKey::Method(
                member.name.clone(),
                signature.has_this,
                signature.describe(&|token| names.name(token)),
            ),
        }
    }

    fn import_member_ref(&mut self, source: usize, token: Token) -> Result<Token> {
        if let Some(resolved) = self.map.get(&(source, token)) {
            return Ok(resolved);
        }

        let module = self.source(source)?;
        let member = module.member_ref(token).ok_or_else(|| {
            Error::Rewrite(format!(
                "Unknown member reference {token} in '{}'",
                module.name()
            ))
        })?;

        let resolved = match self.input_definition(source, member.parent) {
            Some((input, def)) => self.merged_member(source, member, input, def)?,
            None => self.external_member(source, member, member.parent)?,
        };

        self.map.insert((source, token), resolved);
        Ok(resolved)
    }

    /// Resolves a member reference whose parent is a merged type, searching its base types
    /// inside the merged modules.
    fn merged_member(
        &mut self,
        source: usize,
        member: &MemberRef,
        input: usize,
        def: &'a TypeDef,
    ) -> Result<Token> {
        let key = self.member_key(source, member);
        let mut current = Some((input, def));

        for _ in 0..MAX_BASE_DEPTH {
            let Some((input, def)) = current else {
                break;
            };

            if let Some((_, found)) = member_keys(def, &self.names[input])
                .into_iter()
                .find(|(candidate, _)| *candidate == key)
            {
                return self.map.resolve(input, found);
            }

            match def.extends {
                Some(base) => match self.input_definition(input, base) {
                    Some(next) => current = Some(next),
                    None => return self.external_member(source, member, member.parent),
                },
                None => current = None,
            }
        }

        Err(Error::Rewrite(format!(
            "Member '{}' not found on '{}' or its merged base types",
            member.name,
            self.names[input].name(def.token)
        )))
    }

    fn external_member(&mut self, source: usize, member: &MemberRef, parent: Token) -> Result<Token> {
        let parent = self.import_type(source, parent)?;
        let signature = member
            .signature
            .map_tokens(&mut |token| self.import_type(source, token))?;

        let key = (parent, member.name.clone(), signature);
        if let Some(token) = self.member_ref_index.get(&key) {
            return Ok(*token);
        }

        let token = self.tokens.next(Token::MEMBER_REF)?;
        self.member_refs.push(MemberRef {
            token,
            parent,
            name: member.name.clone(),
            signature: key.2.clone(),
        });
        self.member_ref_index.insert(key, token);
        Ok(token)
    }
}

/// Builds the output module of a merge.
///
/// The result carries the primary module's identity, kind and platform, every emitted type,
/// the planned resources and attributes, and a null MVID; the emitter finishes it.
///
/// # Errors
/// Returns [`Error::Rewrite`] if a reference cannot be resolved inside the output.
pub fn rewrite(
    modules: &ModuleSet,
    plan: &MergePlan,
    policy: &MergePolicy,
    logger: &dyn RepackLogger,
) -> Result<Module> {
    let input_count = modules.inputs.len();
    let names = modules
        .inputs
        .iter()
        .chain(modules.attribute_source.iter())
        .map(|loaded| NameResolver::new(&loaded.module))
        .collect::<Vec<_>>();

    let mut redirects = Vec::new();
    let shapes = build_shapes(modules, plan, policy, logger, &names, &mut redirects)?;

    let mut map = SubstitutionMap::default();
    let mut tokens = TokenAllocator::default();
    for shape in &shapes {
        shape.allocate(&mut tokens, &mut map)?;
    }
    for (from, to) in &redirects {
        let survivor = map.resolve(to.0, to.1)?;
        map.insert(*from, survivor);
    }

    let mut importer = ReferenceImporter {
        modules,
        names: &names,
        map,
        tokens,
        references: Vec::new(),
        type_refs: Vec::new(),
        member_refs: Vec::new(),
        type_ref_index: HashMap::new(),
        member_ref_index: HashMap::new(),
    };

    for (source, loaded) in modules.inputs.iter().enumerate() {
        for type_ref in &loaded.module.type_refs {
            importer.import_type_ref(source, type_ref.token)?;
        }
        for member in &loaded.module.member_refs {
            importer.import_member_ref(source, member.token)?;
        }
    }

    let mut attributes = Vec::with_capacity(plan.attributes.len());
    for planned in &plan.attributes {
        let source = match planned.source {
            AttributeSource::Input(index) => index,
            AttributeSource::AttributeFile => input_count,
        };
        let attribute = importer
            .source(source)?
            .attributes
            .get(planned.index)
            .ok_or_else(|| Error::Rewrite(format!("Planned attribute {} missing", planned.index)))?;
        let attribute_type = importer.import_type(source, attribute.attribute_type)?;
        attributes.push(CustomAttribute {
            attribute_type,
            ..attribute.clone()
        });
    }

    let ReferenceImporter {
        map,
        references,
        type_refs,
        member_refs,
        ..
    } = importer;

    let writer = TypeWriter {
        modules,
        policy,
        map: &map,
    };
    let types = if policy.options.parallel {
        shapes
            .par_iter()
            .map(|shape| writer.write(shape))
            .collect::<Result<Vec<_>>>()?
    } else {
        shapes
            .iter()
            .map(|shape| writer.write(shape))
            .collect::<Result<Vec<_>>>()?
    };

    let primary = modules.primary();
    let mut output = Module::new(primary.identity.clone(), primary.kind);
    output.target_platform = primary.target_platform.clone();
    output.references = references;
    output.type_refs = type_refs;
    output.member_refs = member_refs;
    output.types = types;
    output.resources = plan.resources.clone();
    output.attributes = attributes;
    output.entry_point = primary
        .entry_point
        .map(|entry| map.resolve(0, entry))
        .transpose()?;

    logger.verbose(&format!(
        "Rewrote {} types with {} substitutions, {} type references, {} member references",
        output.types.len(),
        map.len(),
        output.type_refs.len(),
        output.member_refs.len()
    ));
    Ok(output)
}

fn build_shapes<'a>(
    modules: &'a ModuleSet,
    plan: &MergePlan,
    policy: &'a MergePolicy,
    logger: &'a dyn RepackLogger,
    names: &[NameResolver],
    redirects: &mut Vec<(SourceToken, SourceToken)>,
) -> Result<Vec<TypeShape<'a>>> {
    let mut context = ShapeContext {
        modules,
        policy,
        logger,
        names,
        redirects,
    };
    let mut shapes: Vec<TypeShape<'a>> = Vec::new();
    let mut positions: HashMap<TypeOrigin, usize> = HashMap::new();

    for (module_index, loaded) in modules.inputs.iter().enumerate() {
        for (index, def) in loaded.module.types.iter().enumerate() {
            let origin = TypeOrigin {
                module: module_index,
                index,
            };
            let placement = plan.placement(origin).ok_or_else(|| {
                Error::Rewrite(format!("No placement for '{}'", def.qualified_name()))
            })?;

            match placement {
                Placement::Emit { name, internalize } => {
                    let mut shape = TypeShape::new(module_index, def, &mut context);
                    shape.name.clone_from(name);
                    if *internalize {
                        shape.flags = shape.flags.with_visibility(TypeAttributes::NOT_PUBLIC);
                    }
                    positions.insert(origin, shapes.len());
                    shapes.push(shape);
                }
                Placement::Coalesced(target) => {
                    let position = positions.get(target).copied().ok_or_else(|| {
                        Error::Rewrite(format!(
                            "'{}' merges into a type emitted later",
                            def.qualified_name()
                        ))
                    })?;
                    let shape = &mut shapes[position];
                    context
                        .redirects
                        .push(((module_index, def.token), (shape.source, shape.def.token)));
                    shape.absorb(module_index, def, &mut context);
                }
            }
        }
    }

    Ok(shapes)
}

struct TypeWriter<'a> {
    modules: &'a ModuleSet,
    policy: &'a MergePolicy,
    map: &'a SubstitutionMap,
}

impl TypeWriter<'_> {
    fn retained(&self, source: usize, attributes: &[CustomAttribute]) -> Vec<CustomAttribute> {
        let module = &self.modules.inputs[source].module;
        attributes
            .iter()
            .filter(|attribute| {
                module
                    .type_name(attribute.attribute_type)
                    .map_or(true, |name| !self.policy.drops_attribute(&name))
            })
            .cloned()
            .collect()
    }

    fn write(&self, shape: &TypeShape<'_>) -> Result<TypeDef> {
        let source = shape.source;
        let def = shape.def;
        let map = self.map;

        let fields = shape
            .fields
            .iter()
            .map(|(source, field)| {
                FieldDef {
                    attributes: self.retained(*source, &field.attributes),
                    ..(*field).clone()
                }
                .map_tokens(&mut |token| map.resolve(*source, token))
            })
            .collect::<Result<Vec<_>>>()?;

        let methods = shape
            .methods
            .iter()
            .map(|(source, method)| {
                MethodDef {
                    attributes: self.retained(*source, &method.attributes),
                    ..(*method).clone()
                }
                .map_tokens(&mut |token| map.resolve(*source, token))
            })
            .collect::<Result<Vec<_>>>()?;

        let properties = shape
            .properties
            .iter()
            .map(|(source, property)| {
                PropertyDef {
                    attributes: self.retained(*source, &property.attributes),
                    ..(*property).clone()
                }
                .map_tokens(&mut |token| map.resolve(*source, token))
            })
            .collect::<Result<Vec<_>>>()?;

        let events = shape
            .events
            .iter()
            .map(|(source, event)| {
                EventDef {
                    attributes: self.retained(*source, &event.attributes),
                    ..(*event).clone()
                }
                .map_tokens(&mut |token| map.resolve(*source, token))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut attributes = Vec::with_capacity(shape.attributes.len());
        for (source, attribute) in &shape.attributes {
            attributes.extend(map_attributes(std::slice::from_ref(*attribute), &mut |token| {
                map.resolve(*source, token)
            })?);
        }

        Ok(TypeDef {
            token: map.resolve(source, def.token)?,
            namespace: def.namespace.clone(),
            name: shape.name.clone(),
            flags: shape.flags,
            extends: def
                .extends
                .map(|base| map.resolve(source, base))
                .transpose()?,
            interfaces: shape
                .interfaces
                .iter()
                .map(|(source, interface)| map.resolve(*source, *interface))
                .collect::<Result<Vec<_>>>()?,
            generic_params: def.generic_params.clone(),
            fields,
            methods,
            properties,
            events,
            nested: shape
                .nested
                .iter()
                .map(|nested| self.write(nested))
                .collect::<Result<Vec<_>>>()?,
            attributes,
        })
    }
}

/// Checks that every token used by `module` resolves inside it.
///
/// # Errors
/// Returns [`Error::Rewrite`] naming the first dangling token.
pub fn verify_reference_closure(module: &Module) -> Result<()> {
    let mut defined = HashSet::new();
    module.walk_types(&mut |ty, _| {
        defined.insert(ty.token);
        defined.extend(ty.fields.iter().map(|field| field.token));
        defined.extend(ty.methods.iter().map(|method| method.token));
        defined.extend(ty.properties.iter().map(|property| property.token));
        defined.extend(ty.events.iter().map(|event| event.token));
    });
    defined.extend(module.type_refs.iter().map(|type_ref| type_ref.token));
    defined.extend(module.member_refs.iter().map(|member| member.token));

    let check = |token: Token, context: &str| -> Result<()> {
        if token.is_null() || token.table() == Token::USER_STRING || defined.contains(&token) {
            Ok(())
        } else {
            Err(Error::Rewrite(format!("Dangling reference {token} in {context}")))
        }
    };

    for type_ref in &module.type_refs {
        match type_ref.scope {
            ResolutionScope::Reference(index) if index as usize >= module.references.len() => {
                return Err(Error::Rewrite(format!(
                    "Type reference '{}' points at missing module reference {index}",
                    type_ref.name
                )));
            }
            ResolutionScope::Enclosing(outer) => check(outer, &type_ref.name)?,
            _ => {}
        }
    }

    for member in &module.member_refs {
        check(member.parent, &member.name)?;
        let mut result = Ok(());
        member.signature.visit_tokens(&mut |token| {
            if result.is_ok() {
                result = check(token, &member.name);
            }
        });
        result?;
    }

    let mut result = Ok(());
    module.walk_types(&mut |ty, name| {
        if result.is_ok() {
            ty.visit_tokens(&mut |token| {
                if result.is_ok() {
                    result = check(token, name);
                }
            });
        }
    });
    result?;

    for attribute in &module.attributes {
        check(attribute.attribute_type, "assembly attributes")?;
    }
    if let Some(entry_point) = module.entry_point {
        if entry_point.table() != Token::METHOD_DEF {
            return Err(Error::Rewrite(format!(
                "Entry point {entry_point} is not a method definition"
            )));
        }
        check(entry_point, "entry point")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            body::{opcodes, Operand},
            builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
            identity::ModuleVersion,
            module::ModuleKind,
            signatures::{MethodSig, TypeSig},
        },
        repack::{
            logger::RecordingLogger, options::RepackOptions, resolver::LoadedModule,
            symbols::SymbolTable,
        },
    };

    fn set(modules: Vec<Module>) -> ModuleSet {
        ModuleSet {
            inputs: modules
                .into_iter()
                .map(|module| LoadedModule {
                    path: format!("{}.dll", module.name()).into(),
                    module,
                })
                .collect(),
            references: Vec::new(),
            attribute_source: None,
        }
    }

    fn merge(modules: &ModuleSet, options: RepackOptions) -> Result<Module> {
        let logger = RecordingLogger::new();
        let policy = options.validate(&logger)?;
        let table = SymbolTable::build(modules, policy.options.parallel);
        let plan = MergePlan::build(modules, &table, &policy, &logger)?;
        rewrite(modules, &plan, &policy, &logger)
    }

    fn void() -> MethodSig {
        MethodSig::new_static(TypeSig::Void, vec![])
    }

    /// `Lib` declares `Lib.Helper::Run`; `App` calls it through a type and member reference.
    fn app_and_lib() -> ModuleSet {
        let mut lib = ModuleBuilder::new("Lib", ModuleKind::Dll);
        let core = lib.reference(ModuleIdentity::new("System.Runtime", ModuleVersion::default()));
        let object = lib.type_ref(core, "System", "Object");
        lib.add_type(
            TypeBuilder::new("Lib", "Helper")
                .extends(object)
                .method(MethodBuilder::new("Run", void()).code(vec![(opcodes::RET, Operand::None)])),
        );
        let lib = lib.build().unwrap();

        let mut app = ModuleBuilder::new("App", ModuleKind::Exe);
        let lib_ref = app.reference(lib.identity.clone());
        let core = app.reference(ModuleIdentity::new("System.Runtime", ModuleVersion::default()));
        let helper = app.type_ref(lib_ref, "Lib", "Helper");
        let run = app.member_ref(helper, "Run", MemberSig::Method(void()));
        let console = app.type_ref(core, "System", "Console");
        let write_line = app.member_ref(
            console,
            "WriteLine",
            MemberSig::Method(MethodSig::new_static(TypeSig::Void, vec![TypeSig::String])),
        );
        let program = app.add_type(
            TypeBuilder::new("App", "Program").method(MethodBuilder::new("Main", void()).code(
                vec![
                    (opcodes::CALL, Operand::Token(run)),
                    (opcodes::LDSTR, Operand::String("done".into())),
                    (opcodes::CALL, Operand::Token(write_line)),
                    (opcodes::RET, Operand::None),
                ],
            )),
        );
        let main = app.method_token(program, "Main").unwrap();
        app.entry_point(main);

        set(vec![app.build().unwrap(), lib])
    }

    fn options() -> crate::repack::options::RepackOptionsBuilder {
        RepackOptions::builder()
            .input("App.exe")
            .input("Lib.dll")
            .output("out/App.exe")
            .working_directory("/work")
    }

    fn call_targets(module: &Module, type_name: &str, method: &str) -> Vec<Token> {
        module
            .find_type_by_name(type_name)
            .unwrap()
            .methods
            .iter()
            .find(|m| m.name == method)
            .unwrap()
            .body
            .as_ref()
            .unwrap()
            .instructions
            .iter()
            .filter_map(|instruction| match instruction.operand {
                Operand::Token(token) => Some(token),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_cross_module_references_become_definitions() {
        let modules = app_and_lib();
        let output = merge(&modules, options().build()).unwrap();

        verify_reference_closure(&output).unwrap();
        assert_eq!(output.types.len(), 2);

        let run = output.find_type_by_name("Lib.Helper").unwrap().methods[0].token;
        let targets = call_targets(&output, "App.Program", "Main");
        assert_eq!(targets[0], run);
        assert_eq!(targets[1].table(), Token::MEMBER_REF);

        let names = output
            .references
            .iter()
            .map(|identity| identity.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["System.Runtime"]);
        assert_eq!(output.type_refs.len(), 2);
        assert_eq!(
            output.entry_point,
            Some(output.find_type_by_name("App.Program").unwrap().methods[0].token)
        );
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let modules = app_and_lib();
        let parallel = merge(&modules, options().build()).unwrap();
        let sequential = merge(&modules, options().parallel(false).build()).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_union_redirects_duplicates() {
        let mut a = ModuleBuilder::new("A", ModuleKind::Dll);
        a.add_type(
            TypeBuilder::new("N", "T")
                .field("x", TypeSig::I4)
                .method(MethodBuilder::new("F", void()))
                .nested(TypeBuilder::new("", "Inner").method(MethodBuilder::new("H", void()))),
        );
        let mut b = ModuleBuilder::new("B", ModuleKind::Dll);
        let t = b.add_type(
            TypeBuilder::new("N", "T")
                .field("x", TypeSig::I4)
                .method(MethodBuilder::new("F", void()))
                .method(MethodBuilder::new("G", void()))
                .nested(TypeBuilder::new("", "Inner").method(MethodBuilder::new("H", void()))),
        );
        let f = b.method_token(t, "F").unwrap();
        b.add_type(
            TypeBuilder::new("N", "Caller").method(
                MethodBuilder::new("Call", void()).code(vec![(opcodes::CALL, Operand::Token(f))]),
            ),
        );
        let modules = set(vec![a.build().unwrap(), b.build().unwrap()]);

        let output = merge(
            &modules,
            RepackOptions::builder()
                .input("A.dll")
                .input("B.dll")
                .output("out.dll")
                .working_directory("/work")
                .union_merge(true)
                .build(),
        )
        .unwrap();
        verify_reference_closure(&output).unwrap();

        let merged = output.find_type_by_name("N.T").unwrap();
        assert_eq!(merged.fields.len(), 1);
        let methods = merged.methods.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
        assert_eq!(methods, vec!["F", "G"]);
        assert_eq!(merged.nested.len(), 1);
        assert_eq!(merged.nested[0].methods.len(), 1);

        let surviving_f = merged.methods[0].token;
        assert_eq!(call_targets(&output, "N.Caller", "Call"), vec![surviving_f]);
    }

    #[test]
    fn test_missing_cross_module_type_is_a_rewrite_error() {
        let lib = ModuleBuilder::new("Lib", ModuleKind::Dll).build().unwrap();
        let mut app = ModuleBuilder::new("App", ModuleKind::Exe);
        let lib_ref = app.reference(lib.identity.clone());
        app.type_ref(lib_ref, "Lib", "Gone");
        let modules = set(vec![app.build().unwrap(), lib]);

        let error = merge(&modules, options().build()).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::Rewrite);
    }

    #[test]
    fn test_closure_check_detects_dangling_tokens() {
        let mut builder = ModuleBuilder::new("App", ModuleKind::Dll);
        builder.add_type(TypeBuilder::new("N", "T").extends(Token::from_parts(Token::TYPE_REF, 7)));
        let module = builder.build().unwrap();
        assert!(verify_reference_closure(&module).is_err());

        let mut builder = ModuleBuilder::new("App", ModuleKind::Dll);
        builder.add_type(TypeBuilder::new("N", "T"));
        assert!(verify_reference_closure(&builder.build().unwrap()).is_ok());
    }

    #[test]
    fn test_substitution_map_passthrough() {
        let map = SubstitutionMap::default();
        assert!(map.is_empty());
        assert_eq!(map.resolve(0, Token(0)).unwrap(), Token(0));
        assert_eq!(
            map.resolve(3, Token(0x7000_0010)).unwrap(),
            Token(0x7000_0010)
        );
        assert!(map.resolve(0, Token(0x0200_0001)).is_err());
    }
}

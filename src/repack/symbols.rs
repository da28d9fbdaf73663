//! Unified symbol table over all input modules.
//!
//! Every top-level type of every input claims the slot of its qualified name. Modules are
//! traversed in parallel; each claim is an insert-or-append on a [`DashMap`] entry, so two
//! workers never write the same slot at once and a second claim on a slot is how a collision is
//! detected. Once all modules are traversed the slots are frozen into an arena of [`Symbol`]s
//! with stable [`SymbolId`]s, ordered by their first contributor (module index, declaration
//! index) so the outcome does not depend on worker scheduling.
//!
//! Nested types travel with their enclosing type and never claim a slot of their own.
//!
//! Alongside the slots, two ordered indices are filled during the same traversal:
//! embedded resources by name and assembly-level attributes by attribute type name.

use std::collections::HashMap;

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    metadata::{
        module::Module,
        signatures::TypeSig,
        token::Token,
        typedef::TypeDef,
    },
    repack::resolver::ModuleSet,
};

/// Position of a top-level type: input module index and declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeOrigin {
    /// Index into [`ModuleSet::inputs`]
    pub module: usize,
    /// Index into the module's top-level types
    pub index: usize,
}

/// Stable index of a [`Symbol`] in the [`SymbolTable`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

/// One qualified name of the merged namespace and the types claiming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Qualified name, `N.T`
    pub name: String,
    /// Contributors in (module, declaration) order
    pub contributors: Vec<TypeOrigin>,
}

impl Symbol {
    /// Returns `true` if more than one type claims this name.
    #[must_use]
    pub fn is_collision(&self) -> bool {
        self.contributors.len() > 1
    }
}

/// Where a resource or attribute was declared: module index and position within the module.
pub type EntryOrigin = (usize, usize);

/// The frozen, unified symbol table.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
    by_origin: HashMap<TypeOrigin, SymbolId>,
    resources: SkipMap<(String, usize, usize), ()>,
    attributes: SkipMap<(String, usize, usize), ()>,
}

impl SymbolTable {
    /// Builds the table over the inputs of `modules`.
    ///
    /// `parallel` selects between the rayon traversal and a sequential one; both produce the
    /// same table.
    #[must_use]
    pub fn build(modules: &ModuleSet, parallel: bool) -> SymbolTable {
        let slots: DashMap<String, Vec<TypeOrigin>> = DashMap::new();
        let resources = SkipMap::new();
        let attributes = SkipMap::new();

        let visit = |(module_index, module): (usize, &Module)| {
            for (index, ty) in module.types.iter().enumerate() {
                slots.entry(ty.qualified_name()).or_default().push(TypeOrigin {
                    module: module_index,
                    index,
                });
            }
            for (index, resource) in module.resources.iter().enumerate() {
                resources.insert((resource.name.clone(), module_index, index), ());
            }
            for (index, attribute) in module.attributes.iter().enumerate() {
                let name = module
                    .type_name(attribute.attribute_type)
                    .unwrap_or_else(|| attribute.attribute_type.to_string());
                attributes.insert((name, module_index, index), ());
            }
        };

        if parallel {
            modules
                .inputs
                .par_iter()
                .map(|loaded| &loaded.module)
                .enumerate()
                .for_each(visit);
        } else {
            modules
                .inputs
                .iter()
                .map(|loaded| &loaded.module)
                .enumerate()
                .for_each(visit);
        }

        let mut symbols = slots
            .into_iter()
            .map(|(name, mut contributors)| {
                contributors.sort_unstable();
                Symbol { name, contributors }
            })
            .collect::<Vec<_>>();
        symbols.sort_by_key(|symbol| symbol.contributors[0]);

        let mut by_name = HashMap::with_capacity(symbols.len());
        let mut by_origin = HashMap::new();
        for (index, symbol) in symbols.iter().enumerate() {
            let id = SymbolId(index as u32);
            by_name.insert(symbol.name.clone(), id);
            for origin in &symbol.contributors {
                by_origin.insert(*origin, id);
            }
        }

        SymbolTable {
            symbols,
            by_name,
            by_origin,
            resources,
            attributes,
        }
    }

    /// All symbols in arena order.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Looks a symbol up by id.
    #[must_use]
    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    /// Looks a symbol up by qualified name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// The symbol a top-level type contributes to.
    #[must_use]
    pub fn symbol_of(&self, origin: TypeOrigin) -> Option<&Symbol> {
        self.by_origin.get(&origin).and_then(|id| self.get(*id))
    }

    /// Symbols claimed by more than one type.
    pub fn collisions(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|symbol| symbol.is_collision())
    }

    /// Returns `true` if some input declares a top-level type named `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Resource names with their origins, names ascending, origins in module order.
    #[must_use]
    pub fn resources(&self) -> Vec<(String, Vec<EntryOrigin>)> {
        group(&self.resources)
    }

    /// Origins of the resources named `name`.
    #[must_use]
    pub fn resource_origins(&self, name: &str) -> Vec<EntryOrigin> {
        origins(&self.resources, name)
    }

    /// Origins of the assembly attributes of type `name`.
    #[must_use]
    pub fn attribute_origins(&self, name: &str) -> Vec<EntryOrigin> {
        origins(&self.attributes, name)
    }
}

fn origins(index: &SkipMap<(String, usize, usize), ()>, name: &str) -> Vec<EntryOrigin> {
    let start = (name.to_string(), 0, 0);
    let end = (name.to_string(), usize::MAX, usize::MAX);
    index
        .range(start..=end)
        .map(|entry| (entry.key().1, entry.key().2))
        .collect()
}

fn group(index: &SkipMap<(String, usize, usize), ()>) -> Vec<(String, Vec<EntryOrigin>)> {
    let mut grouped: Vec<(String, Vec<EntryOrigin>)> = Vec::new();
    for entry in index.iter() {
        let (name, module, position) = entry.key();
        match grouped.last_mut() {
            Some((last, origins)) if *last == *name => origins.push((*module, *position)),
            _ => grouped.push((name.clone(), vec![(*module, *position)])),
        }
    }
    grouped
}

/// Resolves tokens of one module to display names for canonical signature text.
pub struct NameResolver {
    names: HashMap<Token, String>,
}

impl NameResolver {
    /// Collects the names of every type definition and type reference of `module`.
    #[must_use]
    pub fn new(module: &Module) -> Self {
        NameResolver {
            names: module.type_names(),
        }
    }

    /// Name of `token`, or its hexadecimal form if the module does not define it.
    #[must_use]
    pub fn name(&self, token: Token) -> String {
        self.names
            .get(&token)
            .cloned()
            .unwrap_or_else(|| token.to_string())
    }

    /// Canonical text of a type signature.
    #[must_use]
    pub fn describe(&self, signature: &TypeSig) -> String {
        signature.describe(&|token| self.name(token))
    }
}

/// Identity of a member within its declaring type, comparable across modules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKey {
    /// Field name and type
    Field(String, String),
    /// Method name, instance flag and canonical signature
    Method(String, bool, String),
    /// Property name and type
    Property(String, String),
    /// Event name and delegate type
    Event(String, String),
}

impl MemberKey {
    /// The member name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            MemberKey::Field(name, _)
            | MemberKey::Method(name, _, _)
            | MemberKey::Property(name, _)
            | MemberKey::Event(name, _) => name,
        }
    }
}

/// The keys of every member of `ty` (nested types excluded), in declaration order per kind.
#[must_use]
pub fn member_keys(ty: &TypeDef, names: &NameResolver) -> Vec<(MemberKey, Token)> {
    let mut keys = Vec::new();
    for field in &ty.fields {
        keys.push((
            MemberKey::Field(field.name.clone(), names.describe(&field.signature)),
            field.token,
        ));
    }
    for method in &ty.methods {
        keys.push((
            MemberKey::Method(
                method.name.clone(),
                method.signature.has_this,
                method.signature.describe(&|token| names.name(token)),
            ),
            method.token,
        ));
    }
    for property in &ty.properties {
        keys.push((
            MemberKey::Property(property.name.clone(), names.describe(&property.signature)),
            property.token,
        ));
    }
    for event in &ty.events {
        keys.push((
            MemberKey::Event(event.name.clone(), names.name(event.event_type)),
            event.token,
        ));
    }
    keys
}

fn is_value_type(module: &Module, ty: &TypeDef) -> bool {
    ty.extends
        .and_then(|base| module.type_name(base))
        .is_some_and(|base| base == "System.ValueType" || base == "System.Enum")
}

/// Returns `true` if two same-named types can be coalesced by union merging: same kind, same
/// base type, same generic arity, no same-named field, property or event with a different type,
/// and pairwise compatible nested types of the same name.
#[must_use]
pub fn union_compatible(
    (left_module, left): (&Module, &TypeDef),
    (right_module, right): (&Module, &TypeDef),
) -> bool {
    if left.is_interface() != right.is_interface()
        || is_value_type(left_module, left) != is_value_type(right_module, right)
        || left.generic_params.len() != right.generic_params.len()
    {
        return false;
    }

    let left_base = left.extends.and_then(|base| left_module.type_name(base));
    let right_base = right.extends.and_then(|base| right_module.type_name(base));
    if left_base != right_base {
        return false;
    }

    let left_names = NameResolver::new(left_module);
    let right_names = NameResolver::new(right_module);
    let left_keys = member_keys(left, &left_names);
    let right_keys = member_keys(right, &right_names);

    let conflicting = right_keys.iter().any(|(right_key, _)| {
        left_keys.iter().any(|(left_key, _)| match (left_key, right_key) {
            (MemberKey::Field(a, x), MemberKey::Field(b, y))
            | (MemberKey::Property(a, x), MemberKey::Property(b, y))
            | (MemberKey::Event(a, x), MemberKey::Event(b, y)) => a == b && x != y,
            _ => false,
        })
    });
    if conflicting {
        return false;
    }

    right.nested.iter().all(|right_nested| {
        left.nested
            .iter()
            .find(|left_nested| left_nested.name == right_nested.name)
            .map_or(true, |left_nested| {
                union_compatible((left_module, left_nested), (right_module, right_nested))
            })
    })
}

/// Qualified names of every top-level type across `modules`, for rename reservations.
#[must_use]
pub fn declared_names(modules: &ModuleSet) -> Vec<String> {
    modules
        .input_modules()
        .flat_map(|module| {
            module.types.iter().map(TypeDef::qualified_name)
        })
        .collect()
}

//! Internalization planning.
//!
//! Decides, for every top-level type of a non-primary module, whether it stays as declared,
//! becomes non-public, or becomes non-public under a new name. The decision for one type:
//!
//! - its module must be subject to internalization (internalize enabled, and the module on the
//!   include list when one is given),
//! - it must currently be public,
//! - it must not lie in an allowed duplicate namespace,
//! - it must not match an exclude pattern (exclude patterns beat the include list),
//! - it must not be serializable when serializable types are excluded.
//!
//! Types passing every check are internalized; they are renamed when they collide with another
//! type of the same name, or when every internalized type is to be renamed.
//!
//! Renamed types are called `Name_<Module>` (generic arity suffix kept last), with characters
//! that are not valid in identifiers replaced by `_` and a counter appended when the name is
//! already taken.

use std::collections::{HashMap, HashSet};

use crate::{
    metadata::{flags::TypeAttributes, typedef::qualified_name},
    repack::{
        logger::RepackLogger,
        options::MergePolicy,
        resolver::ModuleSet,
        symbols::{SymbolTable, TypeOrigin},
    },
};

/// Fate of one type under internalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Internalization {
    /// Visibility is left as declared
    KeepPublic,
    /// Made non-public, name kept
    MakeInternal,
    /// Made non-public and renamed to the contained simple name
    Rename(String),
}

/// Hands out unique top-level type names.
#[derive(Debug, Clone, Default)]
pub struct UniqueNamer {
    taken: HashSet<String>,
}

impl UniqueNamer {
    /// Creates a namer with `names` (qualified) already taken.
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        UniqueNamer {
            taken: names.into_iter().collect(),
        }
    }

    /// Returns a fresh simple name for the type `namespace.name` contributed by `module` and
    /// marks it as taken.
    pub fn rename(&mut self, namespace: &str, name: &str, module: &str) -> String {
        let (base, arity) = match name.find('`') {
            Some(position) => name.split_at(position),
            None => (name, ""),
        };
        let module = sanitize(module);

        let mut counter = 1usize;
        loop {
            let candidate = if counter == 1 {
                format!("{base}_{module}{arity}")
            } else {
                format!("{base}_{module}{counter}{arity}")
            };
            if self.taken.insert(qualified_name(namespace, &candidate)) {
                return candidate;
            }
            counter += 1;
        }
    }
}

fn sanitize(module: &str) -> String {
    module
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Internalization decisions for every type of every non-primary module.
#[derive(Debug, Clone, Default)]
pub struct InternalizationPlan {
    decisions: HashMap<TypeOrigin, Internalization>,
}

impl InternalizationPlan {
    /// Plans internalization.
    ///
    /// Types in `coalesced` are merged into another declaration and are skipped; they also do
    /// not count as colliding with the declaration they merge into.
    pub fn build(
        modules: &ModuleSet,
        table: &SymbolTable,
        policy: &MergePolicy,
        coalesced: &HashSet<TypeOrigin>,
        namer: &mut UniqueNamer,
        logger: &dyn RepackLogger,
    ) -> InternalizationPlan {
        let mut decisions = HashMap::new();

        for (module_index, loaded) in modules.inputs.iter().enumerate().skip(1) {
            let module = &loaded.module;
            if !policy.internalizes_module(module.name()) {
                continue;
            }

            for (index, ty) in module.types.iter().enumerate() {
                let origin = TypeOrigin {
                    module: module_index,
                    index,
                };
                if coalesced.contains(&origin) || !ty.flags.is_public() {
                    continue;
                }

                let full_name = ty.qualified_name();
                if policy.namespace_allowed(&ty.namespace) {
                    continue;
                }
                if policy.is_excluded(module.name(), &full_name) {
                    logger.verbose(&format!(
                        "Type '{full_name}' of '{}' excluded from internalization",
                        module.name()
                    ));
                    continue;
                }
                if policy.options.exclude_internalize_serializable
                    && ty.flags.contains(TypeAttributes::SERIALIZABLE)
                {
                    continue;
                }

                let collides = table.symbol_of(origin).is_some_and(|symbol| {
                    symbol
                        .contributors
                        .iter()
                        .any(|other| *other != origin && !coalesced.contains(other))
                });

                let decision = if collides || policy.options.rename_internalized {
                    let renamed = namer.rename(&ty.namespace, &ty.name, module.name());
                    logger.verbose(&format!(
                        "Renaming '{full_name}' of '{}' to '{}'",
                        module.name(),
                        qualified_name(&ty.namespace, &renamed)
                    ));
                    Internalization::Rename(renamed)
                } else {
                    Internalization::MakeInternal
                };
                decisions.insert(origin, decision);
            }
        }

        InternalizationPlan { decisions }
    }

    /// The decision for a type; types without a decision keep their visibility.
    #[must_use]
    pub fn decision(&self, origin: TypeOrigin) -> &Internalization {
        self.decisions
            .get(&origin)
            .unwrap_or(&Internalization::KeepPublic)
    }

    /// Number of types made non-public.
    #[must_use]
    pub fn internalized_count(&self) -> usize {
        self.decisions.len()
    }
}

//! Conflict resolution.
//!
//! Turns the frozen [`SymbolTable`] into a [`MergePlan`]: the final name and visibility of every
//! top-level type, the resources and the assembly attributes of the output.
//!
//! # Types
//!
//! Colliding declarations are handled in this order:
//!
//! 1. Collisions inside an allowed duplicate namespace are coalesced into the first declaration.
//! 2. With union merging, contributors structurally compatible with the first declaration are
//!    coalesced into it.
//! 3. The [`InternalizationPlan`] makes the remaining non-primary types non-public and renames
//!    them where they collide.
//! 4. Of what is left, at most one declaration keeps the name: the public one, or the first.
//!    Two declarations that are still public are a [`Error::PolicyConflict`]. Every other
//!    declaration is renamed.
//!
//! # Resources
//!
//! First declaration wins. Later duplicates are dropped with a notification, or kept under a
//! module prefixed name when duplicate resources are allowed. Linker metadata files are deep
//! merged when enabled. Merge manifests of inputs are never copied.
//!
//! # Assembly attributes
//!
//! The drop list applies first, then the module scope, then multiplicity: an attribute type seen
//! before is kept again only when it allows multiple applications (or multiples are forced) and
//! the arguments differ.

use std::collections::{HashMap, HashSet};

use crate::{
    metadata::{
        attributes::CustomAttribute,
        module::{Module, Resource},
        typedef::{qualified_name, TypeDef},
    },
    repack::{
        internalize::{Internalization, InternalizationPlan, UniqueNamer},
        logger::RepackLogger,
        manifest::MANIFEST_RESOURCE,
        options::MergePolicy,
        resolver::ModuleSet,
        symbols::{declared_names, union_compatible, SymbolTable, TypeOrigin},
        xml,
    },
    Error, Result,
};

/// Attribute types that allow multiple applications even when their definition cannot be
/// resolved.
const MULTIPLE_ALLOWED: [&str; 2] = [
    "System.Runtime.CompilerServices.InternalsVisibleToAttribute",
    "System.Reflection.AssemblyMetadataAttribute",
];

/// Final placement of one top-level input type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Emitted as its own type
    Emit {
        /// Simple name in the output
        name: String,
        /// Visibility is reduced to non-public
        internalize: bool,
    },
    /// Members are merged into the type declared at the contained origin
    Coalesced(TypeOrigin),
}

/// Module an output assembly attribute is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeSource {
    /// Input module by index
    Input(usize),
    /// The configured attribute source module
    AttributeFile,
}

/// One assembly attribute of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedAttribute {
    /// Declaring module
    pub source: AttributeSource,
    /// Index into the module's assembly attributes
    pub index: usize,
}

/// The collision-free naming, visibility, resource and attribute plan of a merge.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    /// Placement per input module, per top-level type
    pub placements: Vec<Vec<Placement>>,
    /// Output resources, manifest excluded
    pub resources: Vec<Resource>,
    /// Output assembly attributes, in order
    pub attributes: Vec<PlannedAttribute>,
    /// Renamed top-level types per input module, as (old, new) qualified names
    pub renames: Vec<Vec<(String, String)>>,
    /// Number of types made non-public
    pub internalized: usize,
}

impl MergePlan {
    /// Resolves every conflict of the merge.
    ///
    /// # Errors
    /// Returns [`Error::PolicyConflict`] if two public types still share a name once every
    /// policy ran.
    pub fn build(
        modules: &ModuleSet,
        table: &SymbolTable,
        policy: &MergePolicy,
        logger: &dyn RepackLogger,
    ) -> Result<MergePlan> {
        let coalesced = coalesce(modules, table, policy, logger);
        let coalesced_set = coalesced.keys().copied().collect::<HashSet<_>>();

        let mut namer = UniqueNamer::new(declared_names(modules));
        let internalization = InternalizationPlan::build(
            modules,
            table,
            policy,
            &coalesced_set,
            &mut namer,
            logger,
        );
        logger.verbose(&format!(
            "{} types selected for internalization",
            internalization.internalized_count()
        ));

        let mut placements: Vec<Vec<Option<Placement>>> = modules
            .inputs
            .iter()
            .map(|loaded| vec![None; loaded.module.types.len()])
            .collect();
        let mut renames = vec![Vec::new(); modules.inputs.len()];
        let mut internalized = 0usize;

        for symbol in table.symbols() {
            let remaining = symbol
                .contributors
                .iter()
                .copied()
                .filter(|origin| !coalesced.contains_key(origin))
                .collect::<Vec<_>>();

            let keepers = remaining
                .iter()
                .copied()
                .filter(|origin| {
                    !matches!(internalization.decision(*origin), Internalization::Rename(_))
                })
                .collect::<Vec<_>>();
            let public = keepers
                .iter()
                .copied()
                .filter(|origin| {
                    *internalization.decision(*origin) == Internalization::KeepPublic
                        && type_at(modules, *origin).flags.is_public()
                })
                .collect::<Vec<_>>();

            if let [first, second, ..] = public.as_slice() {
                let error = Error::PolicyConflict {
                    first: symbol.name.clone(),
                    first_module: module_at(modules, *first).name().to_string(),
                    second: symbol.name.clone(),
                    second_module: module_at(modules, *second).name().to_string(),
                };
                logger.error(&error.to_string());
                return Err(error);
            }

            let winner = public.first().or(keepers.first()).copied();
            for origin in remaining {
                let ty = type_at(modules, origin);
                let module = module_at(modules, origin);

                let placement = match internalization.decision(origin) {
                    Internalization::Rename(name) => Placement::Emit {
                        name: name.clone(),
                        internalize: true,
                    },
                    decision if Some(origin) == winner => Placement::Emit {
                        name: ty.name.clone(),
                        internalize: *decision == Internalization::MakeInternal,
                    },
                    decision => {
                        let name = namer.rename(&ty.namespace, &ty.name, module.name());
                        logger.verbose(&format!(
                            "Renaming non-public '{}' of '{}' to '{}'",
                            symbol.name,
                            module.name(),
                            qualified_name(&ty.namespace, &name)
                        ));
                        Placement::Emit {
                            name,
                            internalize: *decision == Internalization::MakeInternal,
                        }
                    }
                };

                if let Placement::Emit { name, internalize } = &placement {
                    if *internalize {
                        internalized += 1;
                    }
                    if *name != ty.name {
                        renames[origin.module]
                            .push((symbol.name.clone(), qualified_name(&ty.namespace, name)));
                    }
                }
                placements[origin.module][origin.index] = Some(placement);
            }
        }

        for (origin, target) in coalesced {
            placements[origin.module][origin.index] = Some(Placement::Coalesced(target));
        }

        let placements = placements
            .into_iter()
            .map(|module| {
                module
                    .into_iter()
                    .map(|placement| {
                        placement.ok_or_else(|| {
                            Error::Rewrite("Type left without a placement".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MergePlan {
            placements,
            resources: plan_resources(modules, table, policy, logger),
            attributes: plan_attributes(modules, table, policy, logger),
            renames,
            internalized,
        })
    }

    /// The placement of a top-level input type.
    #[must_use]
    pub fn placement(&self, origin: TypeOrigin) -> Option<&Placement> {
        self.placements.get(origin.module)?.get(origin.index)
    }
}

fn module_at(modules: &ModuleSet, origin: TypeOrigin) -> &Module {
    &modules.inputs[origin.module].module
}

fn type_at(modules: &ModuleSet, origin: TypeOrigin) -> &TypeDef {
    &module_at(modules, origin).types[origin.index]
}

fn coalesce(
    modules: &ModuleSet,
    table: &SymbolTable,
    policy: &MergePolicy,
    logger: &dyn RepackLogger,
) -> HashMap<TypeOrigin, TypeOrigin> {
    let mut coalesced = HashMap::new();

    for symbol in table.collisions() {
        let first = symbol.contributors[0];
        let first_ty = type_at(modules, first);
        let shared_namespace = policy.namespace_allowed(&first_ty.namespace);

        for other in symbol.contributors.iter().skip(1).copied() {
            let merges = shared_namespace
                || (policy.options.union_merge
                    && union_compatible(
                        (module_at(modules, first), first_ty),
                        (module_at(modules, other), type_at(modules, other)),
                    ));
            if merges {
                logger.verbose(&format!(
                    "Merging '{}' of '{}' into the declaration of '{}'",
                    symbol.name,
                    module_at(modules, other).name(),
                    module_at(modules, first).name()
                ));
                coalesced.insert(other, first);
            }
        }
    }

    coalesced
}

fn plan_resources(
    modules: &ModuleSet,
    table: &SymbolTable,
    policy: &MergePolicy,
    logger: &dyn RepackLogger,
) -> Vec<Resource> {
    let mut used = table
        .resources()
        .into_iter()
        .map(|(name, _)| name)
        .collect::<HashSet<_>>();
    let mut resources = Vec::new();

    for (module_index, loaded) in modules.inputs.iter().enumerate() {
        let module = &loaded.module;
        for (index, resource) in module.resources.iter().enumerate() {
            if resource.name == MANIFEST_RESOURCE {
                continue;
            }

            let origins = table.resource_origins(&resource.name);
            let merges_linker_metadata =
                policy.options.merge_linker_metadata_files && xml::is_linker_metadata(&resource.name);

            if origins.first() == Some(&(module_index, index)) {
                if merges_linker_metadata && origins.len() > 1 {
                    resources.push(merge_linker_resource(modules, resource, &origins, logger));
                } else {
                    resources.push(resource.clone());
                }
                continue;
            }

            if merges_linker_metadata {
                continue;
            }

            if policy.options.allow_duplicate_resources {
                let name = unique_resource_name(&mut used, module.name(), &resource.name);
                logger.verbose(&format!(
                    "Keeping duplicate resource '{}' of '{}' as '{name}'",
                    resource.name,
                    module.name()
                ));
                resources.push(Resource {
                    name,
                    ..resource.clone()
                });
            } else {
                logger.duplicate_ignored("resource", &resource.name);
            }
        }
    }

    resources
}

fn merge_linker_resource(
    modules: &ModuleSet,
    first: &Resource,
    origins: &[(usize, usize)],
    logger: &dyn RepackLogger,
) -> Resource {
    let documents = origins
        .iter()
        .map(|(module, index)| modules.inputs[*module].module.resources[*index].data.as_slice());

    match xml::merge_linker_documents(documents) {
        Ok(data) => {
            logger.verbose(&format!(
                "Merged {} linker metadata files into '{}'",
                origins.len(),
                first.name
            ));
            Resource {
                data,
                ..first.clone()
            }
        }
        Err(error) => {
            logger.warn(&format!(
                "Unable to merge linker metadata '{}', keeping the first one: {error}",
                first.name
            ));
            first.clone()
        }
    }
}

fn unique_resource_name(used: &mut HashSet<String>, module: &str, name: &str) -> String {
    let mut candidate = format!("{module}.{name}");
    let mut counter = 2usize;
    while !used.insert(candidate.clone()) {
        candidate = format!("{module}_{counter}.{name}");
        counter += 1;
    }
    candidate
}

fn plan_attributes(
    modules: &ModuleSet,
    table: &SymbolTable,
    policy: &MergePolicy,
    logger: &dyn RepackLogger,
) -> Vec<PlannedAttribute> {
    let sources: Vec<(AttributeSource, &Module)> = if !policy.options.copy_attributes {
        vec![(AttributeSource::Input(0), modules.primary())]
    } else if let Some(attribute_source) = &modules.attribute_source {
        vec![(AttributeSource::AttributeFile, &attribute_source.module)]
    } else {
        modules
            .input_modules()
            .enumerate()
            .map(|(index, module)| (AttributeSource::Input(index), module))
            .collect()
    };

    let mut merger = AttributeMerger::new(modules, policy, logger);
    let mut planned = Vec::new();

    for (source, module) in sources {
        for (index, attribute) in module.attributes.iter().enumerate() {
            let name = module
                .type_name(attribute.attribute_type)
                .unwrap_or_else(|| attribute.attribute_type.to_string());
            if policy.drops_attribute(&name) {
                logger.verbose(&format!("Dropping attribute '{name}' of '{}'", module.name()));
                continue;
            }

            let unique_in_inputs = matches!(source, AttributeSource::Input(_))
                && table.attribute_origins(&name).len() == 1;
            if unique_in_inputs || merger.offer(&name, source, attribute) {
                merger.record(&name, source, attribute);
                planned.push(PlannedAttribute { source, index });
            }
        }
    }

    planned
}

/// Applies the attribute multiplicity rule to a sequence of attributes.
///
/// Shared by assembly attribute planning and by the union merge of type attributes.
pub(crate) struct AttributeMerger<'a> {
    modules: &'a ModuleSet,
    policy: &'a MergePolicy,
    logger: &'a dyn RepackLogger,
    kept: Vec<(String, AttributeSource, CustomAttribute)>,
    multiple: HashMap<String, bool>,
}

impl<'a> AttributeMerger<'a> {
    pub(crate) fn new(
        modules: &'a ModuleSet,
        policy: &'a MergePolicy,
        logger: &'a dyn RepackLogger,
    ) -> Self {
        AttributeMerger {
            modules,
            policy,
            logger,
            kept: Vec::new(),
            multiple: HashMap::new(),
        }
    }

    /// Returns `true` if `attribute`, of type `name`, is kept next to the attributes recorded
    /// so far. Dropped attributes are reported as ignored duplicates.
    pub(crate) fn offer(
        &mut self,
        name: &str,
        source: AttributeSource,
        attribute: &CustomAttribute,
    ) -> bool {
        let mut seen = false;
        for (kept_name, _, kept) in &self.kept {
            if kept_name != name {
                continue;
            }
            if kept.same_arguments(attribute) {
                self.logger.duplicate_ignored("attribute", name);
                return false;
            }
            seen = true;
        }

        if !seen || self.policy.options.allow_multiple_attributes || self.allows_multiple(name) {
            return true;
        }

        self.logger.verbose(&format!(
            "Attribute '{name}' from {source:?} does not allow multiple applications"
        ));
        self.logger.duplicate_ignored("attribute", name);
        false
    }

    /// Records a kept attribute.
    pub(crate) fn record(&mut self, name: &str, source: AttributeSource, attribute: &CustomAttribute) {
        self.kept.push((name.to_string(), source, attribute.clone()));
    }

    fn allows_multiple(&mut self, name: &str) -> bool {
        if let Some(known) = self.multiple.get(name) {
            return *known;
        }

        let modules = self.modules;
        let resolved = modules
            .inputs
            .iter()
            .chain(modules.references.iter())
            .chain(modules.attribute_source.iter())
            .find_map(|loaded| loaded.module.attribute_usage(name))
            .unwrap_or_else(|| MULTIPLE_ALLOWED.contains(&name));

        self.multiple.insert(name.to_string(), resolved);
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            attributes::{AttributeValue, ALLOW_MULTIPLE},
            builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
            flags::TypeAttributes,
            identity::{ModuleIdentity, ModuleVersion},
            module::ModuleKind,
            signatures::{MethodSig, TypeSig},
            token::Token,
        },
        repack::{
            logger::{LogLevel, RecordingLogger},
            options::{RepackOptions, RepackOptionsBuilder},
            resolver::LoadedModule,
        },
        ErrorKind,
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

    fn options() -> RepackOptionsBuilder {
        RepackOptions::builder()
            .input("A.dll")
            .input("B.dll")
            .output("out.dll")
            .working_directory("/work")
    }

    fn plan(modules: &ModuleSet, options: RepackOptions, logger: &RecordingLogger) -> Result<MergePlan> {
        let policy = options.validate(logger)?;
        let table = SymbolTable::build(modules, false);
        MergePlan::build(modules, &table, &policy, logger)
    }

    fn with_method(namespace: &str, name: &str, method: &str) -> TypeBuilder {
        TypeBuilder::new(namespace, name).method(MethodBuilder::new(
            method,
            MethodSig::new_static(TypeSig::Void, vec![]),
        ))
    }

    fn colliding_pair() -> ModuleSet {
        let mut a = ModuleBuilder::new("A", ModuleKind::Exe);
        a.add_type(with_method("N", "T", "F"));
        let mut b = ModuleBuilder::new("B", ModuleKind::Dll);
        b.add_type(with_method("N", "T", "G"));
        set(vec![a.build().unwrap(), b.build().unwrap()])
    }

    fn origin(module: usize, index: usize) -> TypeOrigin {
        TypeOrigin { module, index }
    }

    #[test]
    fn test_public_collision_is_a_policy_conflict() {
        let logger = RecordingLogger::new();
        let error = plan(&colliding_pair(), options().build(), &logger).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::PolicyConflict);
        match error {
            Error::PolicyConflict {
                first,
                first_module,
                second_module,
                ..
            } => {
                assert_eq!(first, "N.T");
                assert_eq!(first_module, "A");
                assert_eq!(second_module, "B");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(logger.contains(LogLevel::Error, "N.T"));
    }

    #[test]
    fn test_internalized_collision_is_renamed() {
        let logger = RecordingLogger::new();
        let plan = plan(&colliding_pair(), options().internalize(true).build(), &logger).unwrap();

        assert_eq!(
            plan.placement(origin(0, 0)),
            Some(&Placement::Emit {
                name: "T".into(),
                internalize: false
            })
        );
        assert_eq!(
            plan.placement(origin(1, 0)),
            Some(&Placement::Emit {
                name: "T_B".into(),
                internalize: true
            })
        );
        assert_eq!(plan.renames[1], vec![("N.T".to_string(), "N.T_B".to_string())]);
        assert_eq!(plan.internalized, 1);
    }

    #[test]
    fn test_non_public_loser_is_renamed() {
        let mut a = ModuleBuilder::new("A", ModuleKind::Exe);
        a.add_type(TypeBuilder::new("N", "T").internal());
        let mut b = ModuleBuilder::new("B", ModuleKind::Dll);
        b.add_type(TypeBuilder::new("N", "T"));
        let modules = set(vec![a.build().unwrap(), b.build().unwrap()]);

        let plan = plan(&modules, options().build(), &RecordingLogger::new()).unwrap();
        assert_eq!(
            plan.placement(origin(1, 0)),
            Some(&Placement::Emit {
                name: "T".into(),
                internalize: false
            })
        );
        assert_eq!(
            plan.placement(origin(0, 0)),
            Some(&Placement::Emit {
                name: "T_A".into(),
                internalize: false
            })
        );
    }

    #[test]
    fn test_union_and_allowed_namespaces_coalesce() {
        let mut a = ModuleBuilder::new("A", ModuleKind::Exe);
        a.add_type(with_method("N", "T", "F"));
        a.add_type(TypeBuilder::new("Shared", "Marker"));
        let mut b = ModuleBuilder::new("B", ModuleKind::Dll);
        b.add_type(with_method("N", "T", "G"));
        b.add_type(
            TypeBuilder::new("Shared", "Marker")
                .flags(TypeAttributes::PUBLIC | TypeAttributes::INTERFACE),
        );
        let modules = set(vec![a.build().unwrap(), b.build().unwrap()]);

        let plan = plan(
            &modules,
            options()
                .union_merge(true)
                .allowed_duplicate_namespaces("Shared")
                .build(),
            &RecordingLogger::new(),
        )
        .unwrap();

        assert_eq!(
            plan.placement(origin(1, 0)),
            Some(&Placement::Coalesced(origin(0, 0)))
        );
        assert_eq!(
            plan.placement(origin(1, 1)),
            Some(&Placement::Coalesced(origin(0, 1)))
        );
    }

    #[test]
    fn test_incompatible_union_still_conflicts() {
        let mut a = ModuleBuilder::new("A", ModuleKind::Exe);
        a.add_type(TypeBuilder::new("N", "T").field("x", TypeSig::I4));
        let mut b = ModuleBuilder::new("B", ModuleKind::Dll);
        b.add_type(TypeBuilder::new("N", "T").field("x", TypeSig::String));
        let modules = set(vec![a.build().unwrap(), b.build().unwrap()]);

        let error = plan(&modules, options().union_merge(true).build(), &RecordingLogger::new())
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::PolicyConflict);
    }

    fn with_resources(name: &str, resources: &[(&str, &str)]) -> Module {
        let mut builder = ModuleBuilder::new(name, ModuleKind::Dll);
        for (resource, data) in resources {
            builder.resource(*resource, data.as_bytes().to_vec());
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_duplicate_resources() {
        let modules = set(vec![
            with_resources("A", &[("data.bin", "a")]),
            with_resources("B", &[("data.bin", "b"), ("B.data.bin", "x")]),
        ]);

        let logger = RecordingLogger::new();
        let dropped = plan(&modules, options().build(), &logger).unwrap();
        let names = dropped.resources.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["data.bin", "B.data.bin"]);
        assert_eq!(dropped.resources[0].data, b"a");
        assert_eq!(logger.duplicates(), vec!["resource data.bin"]);

        let kept = plan(
            &modules,
            options().allow_duplicate_resources(true).build(),
            &RecordingLogger::new(),
        )
        .unwrap();
        let names = kept.resources.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["data.bin", "B_2.data.bin", "B.data.bin"]);
    }

    #[test]
    fn test_linker_metadata_is_merged() {
        let modules = set(vec![
            with_resources(
                "A",
                &[("ILLink.Descriptors.xml", "<linker><assembly fullname=\"A\" /></linker>")],
            ),
            with_resources(
                "B",
                &[("ILLink.Descriptors.xml", "<linker><assembly fullname=\"B\" /></linker>")],
            ),
        ]);

        let plan = plan(
            &modules,
            options().merge_linker_metadata_files(true).build(),
            &RecordingLogger::new(),
        )
        .unwrap();
        assert_eq!(plan.resources.len(), 1);

        let merged = xml::parse(&plan.resources[0].data).unwrap();
        assert_eq!(merged.elements().count(), 2);
    }

    #[test]
    fn test_suffixed_linker_metadata_is_merged() {
        let name = "ILLink.Descriptors.Lib.xml";
        let modules = set(vec![
            with_resources("A", &[(name, "<linker><assembly fullname=\"A\" /></linker>")]),
            with_resources("B", &[(name, "<linker><assembly fullname=\"B\" /></linker>")]),
        ]);

        let logger = RecordingLogger::new();
        let plan = plan(
            &modules,
            options().merge_linker_metadata_files(true).build(),
            &logger,
        )
        .unwrap();
        assert_eq!(plan.resources.len(), 1);
        assert_eq!(plan.resources[0].name, name);
        assert!(logger.duplicates().is_empty());

        let merged = xml::parse(&plan.resources[0].data).unwrap();
        let assemblies = merged
            .elements()
            .filter_map(|assembly| assembly.attribute("fullname"))
            .collect::<Vec<_>>();
        assert_eq!(assemblies, vec!["A", "B"]);
    }

    #[test]
    fn test_broken_linker_metadata_falls_back_to_first() {
        let modules = set(vec![
            with_resources("A", &[("ILLink.Substitutions.xml", "<linker>")]),
            with_resources("B", &[("ILLink.Substitutions.xml", "<linker/>")]),
        ]);

        let logger = RecordingLogger::new();
        let plan = plan(
            &modules,
            options().merge_linker_metadata_files(true).build(),
            &logger,
        )
        .unwrap();
        assert_eq!(plan.resources.len(), 1);
        assert_eq!(plan.resources[0].data, b"<linker>");
        assert!(logger.contains(LogLevel::Warn, "ILLink.Substitutions.xml"));
    }

    fn with_attributes(name: &str, attributes: &[(&str, &str)]) -> Module {
        let mut builder = ModuleBuilder::new(name, ModuleKind::Dll);
        let core = builder.reference(ModuleIdentity::new("System.Runtime", ModuleVersion::default()));
        for (type_name, value) in attributes {
            let (namespace, simple) = type_name.rsplit_once('.').unwrap();
            let ty = builder.type_ref(core, namespace, simple);
            builder.attribute(CustomAttribute::new(
                ty,
                vec![AttributeValue::String(Some(value.to_string()))],
            ));
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_attribute_scope_and_multiplicity() {
        let modules = set(vec![
            with_attributes(
                "A",
                &[
                    ("System.Reflection.AssemblyTitleAttribute", "A"),
                    ("System.Runtime.CompilerServices.InternalsVisibleToAttribute", "Tests"),
                ],
            ),
            with_attributes(
                "B",
                &[
                    ("System.Reflection.AssemblyTitleAttribute", "B"),
                    ("System.Runtime.CompilerServices.InternalsVisibleToAttribute", "Tests"),
                    ("System.Runtime.CompilerServices.InternalsVisibleToAttribute", "Other"),
                    ("System.Diagnostics.DebuggableAttribute", "x"),
                ],
            ),
        ]);

        let primary_only = plan(&modules, options().build(), &RecordingLogger::new()).unwrap();
        assert!(primary_only
            .attributes
            .iter()
            .all(|attribute| attribute.source == AttributeSource::Input(0)));
        assert_eq!(primary_only.attributes.len(), 2);

        let logger = RecordingLogger::new();
        let copied = plan(
            &modules,
            options()
                .copy_attributes(true)
                .drop_attribute_names("Debuggable")
                .build(),
            &logger,
        )
        .unwrap();
        let kept = copied
            .attributes
            .iter()
            .map(|attribute| (attribute.source, attribute.index))
            .collect::<Vec<_>>();
        assert_eq!(
            kept,
            vec![
                (AttributeSource::Input(0), 0),
                (AttributeSource::Input(0), 1),
                (AttributeSource::Input(1), 2),
            ]
        );
        assert_eq!(logger.duplicates().len(), 2);
    }

    #[test]
    fn test_attribute_usage_from_definition() {
        let mut lib = ModuleBuilder::new("A", ModuleKind::Dll);
        let core = lib.reference(ModuleIdentity::new("System.Runtime", ModuleVersion::default()));
        let usage = lib.type_ref(core, "System", "AttributeUsageAttribute");
        lib.add_type(TypeBuilder::new("A", "TagAttribute").attribute(
            CustomAttribute::new(usage, vec![AttributeValue::I32(1)])
                .with_property(ALLOW_MULTIPLE, AttributeValue::Bool(true)),
        ));
        let modules = set(vec![lib.build().unwrap()]);
        let policy = options().build().validate(&RecordingLogger::new()).unwrap();
        let logger = RecordingLogger::new();
        let mut merger = AttributeMerger::new(&modules, &policy, &logger);

        let first = CustomAttribute::new(Token::from_parts(0x01, 9), vec![AttributeValue::I32(1)]);
        let second = CustomAttribute::new(Token::from_parts(0x01, 9), vec![AttributeValue::I32(2)]);
        let source = AttributeSource::Input(0);

        assert!(merger.offer("A.TagAttribute", source, &first));
        merger.record("A.TagAttribute", source, &first);
        assert!(merger.offer("A.TagAttribute", source, &second));
        assert!(!merger.offer("A.TagAttribute", source, &first));

        assert!(merger.offer("A.Plain", source, &first));
        merger.record("A.Plain", source, &first);
        assert!(!merger.offer("A.Plain", source, &second));
    }
}

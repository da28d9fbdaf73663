//! Input and dependency resolution.
//!
//! The [`Resolver`] turns the configured input paths into an ordered [`ModuleSet`]:
//!
//! 1. Every input path is resolved against the working directory, wildcards are expanded when
//!    enabled and duplicate files are dropped.
//! 2. Inputs are decoded through the configured [`ModuleReader`], in parallel when enabled,
//!    keeping their configured order. Index 0 is the primary module.
//! 3. Module references that name no input are discovered breadth first in the search
//!    directories as `<name>.dll` or `<name>.exe` and loaded read-only. They are consulted for
//!    lookups (e.g. attribute multiplicity) but never merged. Dependencies that cannot be found
//!    are reported as warnings.
//! 4. The attribute source module, if configured, is loaded like an input and kept apart.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
};

use rayon::prelude::*;

use crate::{
    image::ModuleReader,
    metadata::{
        identity::ModuleIdentity,
        module::{Module, ModuleKind},
    },
    repack::{logger::RepackLogger, options::MergePolicy},
    Error, Result,
};

const DEPENDENCY_EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// A decoded module and the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Canonical source path
    pub path: PathBuf,
    /// Decoded module
    pub module: Module,
}

/// The resolved modules of one merge run.
#[derive(Debug, Clone)]
pub struct ModuleSet {
    /// Modules to merge, primary first
    pub inputs: Vec<LoadedModule>,
    /// Reference-only dependencies, in discovery order
    pub references: Vec<LoadedModule>,
    /// Source of the output's assembly attributes
    pub attribute_source: Option<LoadedModule>,
}

impl ModuleSet {
    /// The primary module.
    #[must_use]
    pub fn primary(&self) -> &Module {
        &self.inputs[0].module
    }

    /// Index of the input module named `name`.
    #[must_use]
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs
            .iter()
            .position(|loaded| loaded.module.name() == name)
    }

    /// Looks a module up by name: inputs first, then reference-only dependencies, then the
    /// attribute source.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Module> {
        self.inputs
            .iter()
            .chain(self.references.iter())
            .chain(self.attribute_source.iter())
            .map(|loaded| &loaded.module)
            .find(|module| module.name() == name)
    }

    /// Input modules, in order.
    pub fn input_modules(&self) -> impl Iterator<Item = &Module> {
        self.inputs.iter().map(|loaded| &loaded.module)
    }
}

/// Locates and loads the input modules and their dependencies.
pub struct Resolver<'a> {
    policy: &'a MergePolicy,
    reader: &'a dyn ModuleReader,
    logger: &'a dyn RepackLogger,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver.
    pub fn new(
        policy: &'a MergePolicy,
        reader: &'a dyn ModuleReader,
        logger: &'a dyn RepackLogger,
    ) -> Self {
        Resolver {
            policy,
            reader,
            logger,
        }
    }

    /// Resolves and loads every module of the merge.
    ///
    /// # Errors
    /// Returns [`Error::Resolution`] if an input or the attribute source is missing or cannot
    /// be decoded, if a module has an unspecified kind and zero kinds are not allowed, if two
    /// inputs share a module name, or if the input set ends up empty.
    pub fn resolve(&self) -> Result<ModuleSet> {
        let paths = self.input_paths()?;
        let inputs = self.load_inputs(&paths)?;
        self.complete(inputs)
    }

    /// Builds a [`ModuleSet`] from modules already in memory, primary first. Each module is
    /// attributed to `<name>.dll` in the working directory; dependencies and the attribute
    /// source are still resolved from disk.
    ///
    /// # Errors
    /// Returns [`Error::Resolution`] if no module is given, a module has an unspecified kind
    /// and zero kinds are not allowed, or two modules share a name.
    pub fn adopt(&self, modules: Vec<Module>) -> Result<ModuleSet> {
        if modules.is_empty() {
            return Err(Error::resolution("", "No input assemblies were given"));
        }

        let inputs = modules
            .into_iter()
            .map(|module| {
                let path = self
                    .policy
                    .working_directory
                    .join(format!("{}.dll", module.name()));
                self.check_kind(&path, &module)?;
                Ok(LoadedModule { path, module })
            })
            .collect::<Result<Vec<_>>>()?;
        self.check_unique(&inputs)?;
        self.complete(inputs)
    }

    fn complete(&self, inputs: Vec<LoadedModule>) -> Result<ModuleSet> {
        let references = self.discover_references(&inputs);

        let attribute_source = match &self.policy.options.attribute_file {
            Some(path) => {
                let path = self.existing_path(path)?;
                let module = self.load(&path)?;
                self.logger.verbose(&format!(
                    "Using assembly attributes of '{}'",
                    path.display()
                ));
                Some(LoadedModule { path, module })
            }
            None => None,
        };

        Ok(ModuleSet {
            inputs,
            references,
            attribute_source,
        })
    }

    fn existing_path(&self, path: &Path) -> Result<PathBuf> {
        let resolved = self.policy.resolve_path(path);
        if !resolved.is_file() {
            return Err(Error::resolution(
                path.display().to_string(),
                "Unable to find input assembly",
            ));
        }
        Ok(resolved)
    }

    fn input_paths(&self) -> Result<Vec<PathBuf>> {
        let mut resolved = Vec::new();
        for path in &self.policy.options.input_assemblies {
            let text = path.to_string_lossy();
            if self.policy.options.allow_wildcards && text.contains(['*', '?']) {
                let matches = self.expand(path)?;
                if matches.is_empty() {
                    self.logger
                        .warn(&format!("No input assemblies match '{}'", path.display()));
                }
                resolved.extend(matches);
            } else {
                resolved.push(self.existing_path(path)?);
            }
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(resolved.len());
        for path in resolved {
            let canonical = path.canonicalize()?;
            if seen.insert(canonical.clone()) {
                unique.push(canonical);
            } else {
                self.logger.warn(&format!(
                    "Duplicate input assembly '{}' ignored",
                    path.display()
                ));
            }
        }

        if unique.is_empty() {
            return Err(Error::resolution(
                self.policy
                    .options
                    .input_assemblies
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                "No input assemblies were found",
            ));
        }

        Ok(unique)
    }

    fn expand(&self, pattern: &Path) -> Result<Vec<PathBuf>> {
        let pattern = self.policy.resolve_path(pattern);
        let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| {
            Error::Configuration(format!(
                "Invalid wildcard pattern '{}' - {}",
                pattern.display(),
                e
            ))
        })?;

        let mut matches = entries
            .filter_map(std::result::Result::ok)
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        matches.sort();
        Ok(matches)
    }

    fn load(&self, path: &Path) -> Result<Module> {
        let module = self
            .reader
            .read_path(path)
            .map_err(|e| Error::resolution(path.display().to_string(), e.to_string()))?;
        self.check_kind(path, &module)?;
        Ok(module)
    }

    fn check_kind(&self, path: &Path, module: &Module) -> Result<()> {
        if module.kind == ModuleKind::Unspecified && !self.policy.options.allow_zero_pe_kind {
            return Err(Error::resolution(
                path.display().to_string(),
                "Module kind is unspecified; allow zero PE kinds to merge it",
            ));
        }
        Ok(())
    }

    fn load_inputs(&self, paths: &[PathBuf]) -> Result<Vec<LoadedModule>> {
        let load = |path: &PathBuf| -> Result<LoadedModule> {
            Ok(LoadedModule {
                path: path.clone(),
                module: self.load(path)?,
            })
        };

        let inputs = if self.policy.options.parallel {
            paths.par_iter().map(load).collect::<Result<Vec<_>>>()?
        } else {
            paths.iter().map(load).collect::<Result<Vec<_>>>()?
        };

        self.check_unique(&inputs)?;
        Ok(inputs)
    }

    fn check_unique(&self, inputs: &[LoadedModule]) -> Result<()> {
        let mut names: HashMap<&str, &Path> = HashMap::new();
        for loaded in inputs {
            if let Some(first) = names.insert(loaded.module.name(), &loaded.path) {
                return Err(Error::resolution(
                    loaded.path.display().to_string(),
                    format!(
                        "Module '{}' is already provided by '{}'",
                        loaded.module.name(),
                        first.display()
                    ),
                ));
            }
            self.logger
                .info(&format!("Added assembly '{}'", loaded.path.display()));
        }
        Ok(())
    }

    fn find_dependency(&self, identity: &ModuleIdentity) -> Option<PathBuf> {
        self.policy.search_directories.iter().find_map(|directory| {
            DEPENDENCY_EXTENSIONS
                .iter()
                .map(|extension| directory.join(format!("{}.{extension}", identity.name)))
                .find(|candidate| candidate.is_file())
        })
    }

    fn discover_references(&self, inputs: &[LoadedModule]) -> Vec<LoadedModule> {
        let mut queue: VecDeque<ModuleIdentity> = inputs
            .iter()
            .flat_map(|loaded| loaded.module.references.iter().cloned())
            .collect();
        let mut processed: HashSet<String> = inputs
            .iter()
            .map(|loaded| loaded.module.name().to_string())
            .collect();
        let mut missing_dependencies = BTreeSet::new();
        let mut references = Vec::new();

        while let Some(identity) = queue.pop_front() {
            if !processed.insert(identity.name.clone()) {
                continue;
            }

            let Some(path) = self.find_dependency(&identity) else {
                missing_dependencies.insert(identity.name);
                continue;
            };

            match self.reader.read_path(&path) {
                Ok(module) => {
                    self.logger.verbose(&format!(
                        "Resolved reference '{}' to '{}'",
                        identity.display_name(),
                        path.display()
                    ));
                    queue.extend(module.references.iter().cloned());
                    references.push(LoadedModule { path, module });
                }
                Err(e) => {
                    self.logger.warn(&format!(
                        "Failed to load reference '{}' from '{}': {}",
                        identity.name,
                        path.display(),
                        e
                    ));
                }
            }
        }

        for missing in missing_dependencies {
            self.logger
                .warn(&format!("Unable to resolve reference '{missing}'"));
        }

        references
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::{ImageCodec, ModuleWriter},
        metadata::builder::ModuleBuilder,
        repack::{
            logger::{LogLevel, RecordingLogger},
            options::RepackOptions,
        },
    };

    fn write_module(dir: &Path, file: &str, module: &Module) {
        let image = ImageCodec.write(module).unwrap();
        std::fs::write(dir.join(file), image.bytes).unwrap();
    }

    fn module_with_reference(name: &str, reference: &str) -> Module {
        let mut builder = ModuleBuilder::new(name, ModuleKind::Dll);
        builder.reference(ModuleIdentity::new(reference, Default::default()));
        builder.build().unwrap()
    }

    fn policy(dir: &Path, inputs: &[&str]) -> RepackOptions {
        RepackOptions::builder()
            .inputs(inputs.iter().copied())
            .output("out.dll")
            .working_directory(dir)
            .build()
    }

    #[test]
    fn test_resolves_in_order_and_discovers_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let deps = dir.path().join("deps");
        std::fs::create_dir(&deps).unwrap();

        write_module(dir.path(), "App.dll", &module_with_reference("App", "Lib"));
        write_module(dir.path(), "Lib.dll", &module_with_reference("Lib", "Core"));
        write_module(&deps, "Core.dll", &module_with_reference("Core", "Missing"));

        let mut options = policy(dir.path(), &["App.dll", "Lib.dll"]);
        options.search_directories.push(PathBuf::from("deps"));
        let logger = RecordingLogger::new();
        let policy = options.validate(&logger).unwrap();

        let set = Resolver::new(&policy, &ImageCodec, &logger).resolve().unwrap();
        assert_eq!(set.primary().name(), "App");
        assert_eq!(set.inputs[1].module.name(), "Lib");
        assert_eq!(set.references.len(), 1);
        assert_eq!(set.references[0].module.name(), "Core");
        assert!(set.lookup("Core").is_some());
        assert_eq!(set.input_index("Lib"), Some(1));

        assert!(logger.contains(LogLevel::Info, "Added assembly"));
        assert!(logger.contains(LogLevel::Warn, "Missing"));
    }

    #[test]
    fn test_missing_input_is_a_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RecordingLogger::new();
        let policy = policy(dir.path(), &["Nope.dll"]).validate(&logger).unwrap();

        match Resolver::new(&policy, &ImageCodec, &logger).resolve() {
            Err(Error::Resolution { path, .. }) => assert_eq!(path, "Nope.dll"),
            other => panic!("Expected a resolution error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_kind_requires_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "Odd.dll",
            &ModuleBuilder::new("Odd", ModuleKind::Unspecified).build().unwrap(),
        );

        let logger = RecordingLogger::new();
        let strict = policy(dir.path(), &["Odd.dll"]).validate(&logger).unwrap();
        assert!(Resolver::new(&strict, &ImageCodec, &logger).resolve().is_err());

        let mut options = policy(dir.path(), &["Odd.dll"]);
        options.allow_zero_pe_kind = true;
        let lenient = options.validate(&logger).unwrap();
        assert!(Resolver::new(&lenient, &ImageCodec, &logger).resolve().is_ok());
    }

    #[test]
    fn test_wildcards_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "App.dll", &ModuleBuilder::new("App", ModuleKind::Exe).build().unwrap());
        write_module(dir.path(), "Plugin.B.dll", &ModuleBuilder::new("Plugin.B", ModuleKind::Dll).build().unwrap());
        write_module(dir.path(), "Plugin.A.dll", &ModuleBuilder::new("Plugin.A", ModuleKind::Dll).build().unwrap());

        let mut options = policy(dir.path(), &["App.dll", "Plugin.*.dll", "App.dll", "None*.dll"]);
        options.allow_wildcards = true;
        let logger = RecordingLogger::new();
        let policy = options.validate(&logger).unwrap();

        let set = Resolver::new(&policy, &ImageCodec, &logger).resolve().unwrap();
        let names = set.input_modules().map(Module::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["App", "Plugin.A", "Plugin.B"]);
        assert!(logger.contains(LogLevel::Warn, "Duplicate input assembly"));
        assert!(logger.contains(LogLevel::Warn, "None*.dll"));
    }

    #[test]
    fn test_duplicate_module_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let module = ModuleBuilder::new("Same", ModuleKind::Dll).build().unwrap();
        write_module(dir.path(), "a.dll", &module);
        write_module(dir.path(), "b.dll", &module);

        let logger = RecordingLogger::new();
        let policy = policy(dir.path(), &["a.dll", "b.dll"]).validate(&logger).unwrap();
        assert!(matches!(
            Resolver::new(&policy, &ImageCodec, &logger).resolve(),
            Err(Error::Resolution { .. })
        ));
    }

    #[test]
    fn test_adopt_in_memory_modules() {
        let dir = tempfile::tempdir().unwrap();
        let options = policy(dir.path(), &["App.dll"]);
        let logger = RecordingLogger::new();
        let policy = options.validate(&logger).unwrap();
        let resolver = Resolver::new(&policy, &ImageCodec, &logger);

        let set = resolver
            .adopt(vec![
                module_with_reference("App", "Lib"),
                module_with_reference("Lib", "System.Runtime"),
            ])
            .unwrap();
        assert_eq!(set.inputs[1].path, dir.path().join("Lib.dll"));
        assert!(set.references.is_empty());

        let duplicate = resolver
            .adopt(vec![
                module_with_reference("App", "Lib"),
                module_with_reference("App", "Lib"),
            ])
            .unwrap_err();
        assert_eq!(duplicate.kind(), crate::ErrorKind::Resolution);
        assert!(resolver.adopt(Vec::new()).is_err());
    }
}

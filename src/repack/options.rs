//! Merge configuration.
//!
//! [`RepackOptions`] is a plain value object with public fields and documented defaults. It is
//! validated exactly once, at the start of a merge, into a [`MergePolicy`]: the immutable view
//! every pipeline stage consumes, with the internalize exclude patterns already compiled into a
//! single [`regex::RegexSet`].
//!
//! # Examples
//!
//! ```rust
//! use dotrepack::repack::{RecordingLogger, RepackOptions, TargetKind};
//!
//! let options = RepackOptions::builder()
//!     .input("App.exe")
//!     .input("Library.dll")
//!     .output("out/App.exe")
//!     .internalize(true)
//!     .internalize_exclude_pattern("^Library\\.Api\\.")
//!     .target_kind(TargetKind::Exe)
//!     .build();
//!
//! let policy = options.validate(&RecordingLogger::new())?;
//! assert!(policy.is_excluded("Library", "Library.Api.Client"));
//! assert!(!policy.is_excluded("Library", "Library.Impl.Worker"));
//! # Ok::<(), dotrepack::Error>(())
//! ```

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use regex::RegexSet;
use strum::{Display, EnumString};

use crate::{
    metadata::{attributes::attribute_name_matches, module::ModuleKind},
    repack::logger::RepackLogger,
    Error, Result,
};

/// Kind of the output module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
pub enum TargetKind {
    /// Class library
    Dll,
    /// Console executable
    Exe,
    /// GUI executable
    WinExe,
    /// Whatever the primary module is
    #[default]
    SameAsPrimaryAssembly,
}

impl TargetKind {
    /// Parses a target kind, falling back to [`TargetKind::SameAsPrimaryAssembly`] with a
    /// warning for unknown values.
    pub fn parse_lenient(value: &str, logger: &dyn RepackLogger) -> TargetKind {
        TargetKind::from_str(value.trim()).unwrap_or_else(|_| {
            logger.warn(&format!(
                "TargetKind '{value}' should be [Exe|Dll|WinExe|SameAsPrimaryAssembly]; set to SameAsPrimaryAssembly"
            ));
            TargetKind::SameAsPrimaryAssembly
        })
    }

    /// The module kind to emit when the primary module is of kind `primary`.
    #[must_use]
    pub fn resolve(self, primary: ModuleKind) -> ModuleKind {
        match self {
            TargetKind::Dll => ModuleKind::Dll,
            TargetKind::Exe => ModuleKind::Exe,
            TargetKind::WinExe => ModuleKind::WinExe,
            TargetKind::SameAsPrimaryAssembly => primary,
        }
    }
}

/// Splits a comma or semicolon delimited list, trimming entries and dropping empty ones.
#[must_use]
pub fn parse_delimited(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration of one merge run.
///
/// Construct with [`RepackOptions::builder`] or by filling the fields of
/// [`RepackOptions::default`] directly.
#[derive(Debug, Clone)]
pub struct RepackOptions {
    /// Modules to merge, in order; the first is the primary module (required).
    pub input_assemblies: Vec<PathBuf>,

    /// Directories searched for reference-only dependencies, after the working directory.
    pub search_directories: Vec<PathBuf>,

    /// Output module path (required).
    pub output_file: PathBuf,

    /// Kind of the output module (default: [`TargetKind::SameAsPrimaryAssembly`]).
    pub target_kind: TargetKind,

    /// Runtime version tag of the output, the primary module's when `None`.
    pub target_platform_version: Option<String>,

    /// Directory holding the target platform's reference modules, searched last.
    pub target_platform_directory: Option<PathBuf>,

    /// Coalesce same-named, structurally compatible types into one.
    pub union_merge: bool,

    /// Make types of non-primary modules non-public.
    pub internalize: bool,

    /// Rename every internalized type, not only colliding ones.
    pub rename_internalized: bool,

    /// Keep serializable types public while internalizing.
    pub exclude_internalize_serializable: bool,

    /// Module names whose types are internalized; empty means every non-primary module.
    pub internalize_assemblies: Vec<String>,

    /// Regular expressions matched against `N.T` and `[Module]N.T`; matching types stay public.
    pub internalize_exclude_patterns: Vec<String>,

    /// Keep colliding resources under a module qualified name instead of dropping them.
    pub allow_duplicate_resources: bool,

    /// Namespaces whose types may be declared by several modules.
    pub allowed_duplicate_namespaces: Vec<String>,

    /// Copy assembly attributes of every input, not only the primary module's.
    pub copy_attributes: bool,

    /// Keep repeated applications of multiple-allowed attributes from different modules.
    pub allow_multiple_attributes: bool,

    /// Module whose assembly attributes replace those of the inputs.
    pub attribute_file: Option<PathBuf>,

    /// Attribute type names (full or simple, `Attribute` suffix optional) removed everywhere.
    pub drop_attribute_names: Vec<String>,

    /// Deep merge `ILLink.*.xml` linker metadata resources instead of keeping the first.
    pub merge_linker_metadata_files: bool,

    /// Accept modules whose kind metadata is zero.
    pub allow_zero_pe_kind: bool,

    /// Expand `*` and `?` in input paths.
    pub allow_wildcards: bool,

    /// Merge `<stem>.xml` documentation files next to the inputs.
    pub xml_documentation: bool,

    /// Do not embed the merge manifest resource.
    pub no_manifest_resource: bool,

    /// Keep sequence points and write a symbol sidecar next to the output.
    pub debug_info: bool,

    /// Strong-name key file.
    pub key_file: Option<PathBuf>,

    /// Named strong-name key container.
    pub key_container: Option<String>,

    /// Reserve the signature slot without signing.
    pub delay_sign: bool,

    /// Run independent units of work on a thread pool (default: `true`).
    pub parallel: bool,

    /// Log file receiving prefixed notification lines.
    pub log_file: Option<PathBuf>,

    /// Also write verbose notifications to the log file.
    pub verbose: bool,

    /// Base for relative paths, the process working directory when `None`.
    pub working_directory: Option<PathBuf>,
}

impl Default for RepackOptions {
    fn default() -> Self {
        RepackOptions {
            input_assemblies: Vec::new(),
            search_directories: Vec::new(),
            output_file: PathBuf::new(),
            target_kind: TargetKind::SameAsPrimaryAssembly,
            target_platform_version: None,
            target_platform_directory: None,
            union_merge: false,
            internalize: false,
            rename_internalized: false,
            exclude_internalize_serializable: false,
            internalize_assemblies: Vec::new(),
            internalize_exclude_patterns: Vec::new(),
            allow_duplicate_resources: false,
            allowed_duplicate_namespaces: Vec::new(),
            copy_attributes: false,
            allow_multiple_attributes: false,
            attribute_file: None,
            drop_attribute_names: Vec::new(),
            merge_linker_metadata_files: false,
            allow_zero_pe_kind: false,
            allow_wildcards: false,
            xml_documentation: false,
            no_manifest_resource: false,
            debug_info: false,
            key_file: None,
            key_container: None,
            delay_sign: false,
            parallel: true,
            log_file: None,
            verbose: false,
            working_directory: None,
        }
    }
}

impl RepackOptions {
    /// Starts a builder over the default options.
    #[must_use]
    pub fn builder() -> RepackOptionsBuilder {
        RepackOptionsBuilder::default()
    }

    /// Validates the options and compiles them into a [`MergePolicy`].
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for missing inputs or output, blank input paths, blank
    /// exclude patterns, or both a key file and a key container; [`Error::Pattern`] for exclude
    /// patterns that are not valid regular expressions.
    pub fn validate(&self, logger: &dyn RepackLogger) -> Result<MergePolicy> {
        if self.input_assemblies.is_empty() {
            return Err(Error::Configuration(
                "No input assemblies were specified".to_string(),
            ));
        }
        if let Some(index) = self
            .input_assemblies
            .iter()
            .position(|path| path.as_os_str().is_empty())
        {
            return Err(Error::Configuration(format!(
                "Invalid assembly path on item index {index}"
            )));
        }
        if self.output_file.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "No output file was specified".to_string(),
            ));
        }
        if self.key_file.is_some() && self.key_container.is_some() {
            return Err(Error::Configuration(
                "KeyFile and KeyContainer cannot be used together".to_string(),
            ));
        }

        for (index, pattern) in self.internalize_exclude_patterns.iter().enumerate() {
            if pattern.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "Invalid internalize exclude pattern at item index {index}. Pattern cannot be blank."
                )));
            }
        }

        let exclude = if self.internalize {
            for pattern in &self.internalize_exclude_patterns {
                logger.info(&format!(
                    "Excluding namespaces/types matching pattern '{pattern}' from being internalized"
                ));
            }
            Some(RegexSet::new(&self.internalize_exclude_patterns)?)
        } else {
            if !self.internalize_exclude_patterns.is_empty() {
                logger.warn("Internalize exclude patterns are ignored because internalize is disabled");
            }
            None
        };

        let working_directory = match &self.working_directory {
            Some(directory) => directory.clone(),
            None => std::env::current_dir()?,
        };

        let mut search_directories = vec![working_directory.clone()];
        for directory in self
            .search_directories
            .iter()
            .chain(self.target_platform_directory.iter())
        {
            let directory = absolutize(&working_directory, directory);
            if !search_directories.contains(&directory) {
                search_directories.push(directory);
            }
        }

        Ok(MergePolicy {
            options: self.clone(),
            working_directory,
            search_directories,
            exclude,
        })
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Fluent builder for [`RepackOptions`].
#[derive(Debug, Clone, Default)]
pub struct RepackOptionsBuilder {
    options: RepackOptions,
}

macro_rules! flag_setter {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $name(mut self, value: bool) -> Self {
                self.options.$name = value;
                self
            }
        )*
    };
}

impl RepackOptionsBuilder {
    /// Appends an input module; the first one added is the primary module.
    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.input_assemblies.push(path.into());
        self
    }

    /// Appends several input modules.
    #[must_use]
    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.options
            .input_assemblies
            .extend(paths.into_iter().map(Into::into));
        self
    }

    /// Appends a dependency search directory.
    #[must_use]
    pub fn search_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.search_directories.push(path.into());
        self
    }

    /// Sets the output path.
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.output_file = path.into();
        self
    }

    /// Sets the output kind.
    #[must_use]
    pub fn target_kind(mut self, kind: TargetKind) -> Self {
        self.options.target_kind = kind;
        self
    }

    /// Overrides the runtime version tag.
    #[must_use]
    pub fn target_platform_version(mut self, version: impl Into<String>) -> Self {
        self.options.target_platform_version = Some(version.into());
        self
    }

    /// Sets the target platform reference directory.
    #[must_use]
    pub fn target_platform_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.target_platform_directory = Some(path.into());
        self
    }

    /// Restricts internalization to the named module.
    #[must_use]
    pub fn internalize_assembly(mut self, name: impl Into<String>) -> Self {
        self.options.internalize_assemblies.push(name.into());
        self
    }

    /// Adds an internalize exclude pattern.
    #[must_use]
    pub fn internalize_exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.options.internalize_exclude_patterns.push(pattern.into());
        self
    }

    /// Adds the entries of a comma or semicolon delimited namespace list.
    #[must_use]
    pub fn allowed_duplicate_namespaces(mut self, list: &str) -> Self {
        self.options
            .allowed_duplicate_namespaces
            .extend(parse_delimited(list));
        self
    }

    /// Sets the attribute source module.
    #[must_use]
    pub fn attribute_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.attribute_file = Some(path.into());
        self
    }

    /// Adds the entries of a comma or semicolon delimited attribute name list.
    #[must_use]
    pub fn drop_attribute_names(mut self, list: &str) -> Self {
        self.options.drop_attribute_names.extend(parse_delimited(list));
        self
    }

    /// Sets the strong-name key file.
    #[must_use]
    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.key_file = Some(path.into());
        self
    }

    /// Sets the strong-name key container.
    #[must_use]
    pub fn key_container(mut self, name: impl Into<String>) -> Self {
        self.options.key_container = Some(name.into());
        self
    }

    /// Sets the log file.
    #[must_use]
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.log_file = Some(path.into());
        self
    }

    /// Sets the base directory for relative paths.
    #[must_use]
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.working_directory = Some(path.into());
        self
    }

    flag_setter!(
        /// Enables union merging.
        union_merge,
        /// Enables internalization.
        internalize,
        /// Renames every internalized type.
        rename_internalized,
        /// Keeps serializable types public.
        exclude_internalize_serializable,
        /// Keeps duplicate resources under qualified names.
        allow_duplicate_resources,
        /// Copies the assembly attributes of every input.
        copy_attributes,
        /// Keeps repeated multiple-allowed attributes.
        allow_multiple_attributes,
        /// Deep merges linker metadata resources.
        merge_linker_metadata_files,
        /// Accepts modules with zero kind metadata.
        allow_zero_pe_kind,
        /// Expands wildcards in input paths.
        allow_wildcards,
        /// Merges XML documentation.
        xml_documentation,
        /// Suppresses the merge manifest resource.
        no_manifest_resource,
        /// Keeps debug information.
        debug_info,
        /// Delay signs the output.
        delay_sign,
        /// Enables the worker pool.
        parallel,
        /// Writes verbose log lines.
        verbose,
    );

    /// Finishes the options.
    #[must_use]
    pub fn build(self) -> RepackOptions {
        self.options
    }
}

/// Validated, immutable view of [`RepackOptions`] consumed by every merge stage.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    /// The options this policy was validated from
    pub options: RepackOptions,
    /// Absolute base for relative paths
    pub working_directory: PathBuf,
    /// Dependency search order: the working directory, the search directories, then the
    /// target platform directory
    pub search_directories: Vec<PathBuf>,
    exclude: Option<RegexSet>,
}

impl MergePolicy {
    /// Returns `true` if the type `full_name` of `module` matches an internalize exclude
    /// pattern, tried against both `N.T` and `[Module]N.T`.
    #[must_use]
    pub fn is_excluded(&self, module: &str, full_name: &str) -> bool {
        let Some(exclude) = &self.exclude else {
            return false;
        };
        exclude.is_match(full_name) || exclude.is_match(&format!("[{module}]{full_name}"))
    }

    /// Returns `true` if the types of `module` are subject to internalization.
    #[must_use]
    pub fn internalizes_module(&self, module: &str) -> bool {
        self.options.internalize
            && (self.options.internalize_assemblies.is_empty()
                || self.options.internalize_assemblies.iter().any(|name| {
                    let name = name.trim();
                    let stem = name
                        .strip_suffix(".dll")
                        .or_else(|| name.strip_suffix(".exe"))
                        .unwrap_or(name);
                    stem.eq_ignore_ascii_case(module)
                }))
    }

    /// Returns `true` if `namespace` is, or lies inside, an allowed duplicate namespace.
    #[must_use]
    pub fn namespace_allowed(&self, namespace: &str) -> bool {
        self.options
            .allowed_duplicate_namespaces
            .iter()
            .any(|allowed| {
                namespace == allowed
                    || namespace
                        .strip_prefix(allowed.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
    }

    /// Returns `true` if attributes of type `full_name` are removed from the output.
    #[must_use]
    pub fn drops_attribute(&self, full_name: &str) -> bool {
        self.options
            .drop_attribute_names
            .iter()
            .any(|entry| attribute_name_matches(full_name, entry))
    }

    /// Resolves `path` against the working directory.
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        absolutize(&self.working_directory, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repack::logger::{LogLevel, RecordingLogger};

    fn base() -> RepackOptionsBuilder {
        RepackOptions::builder()
            .input("A.dll")
            .input("B.dll")
            .output("out/A.dll")
            .working_directory("/work")
    }

    #[test]
    fn test_defaults() {
        let options = RepackOptions::default();
        assert!(options.parallel);
        assert!(!options.internalize);
        assert_eq!(options.target_kind, TargetKind::SameAsPrimaryAssembly);
    }

    #[test]
    fn test_target_kind_lenient_parse() {
        let logger = RecordingLogger::new();
        assert_eq!(TargetKind::parse_lenient("WinExe", &logger), TargetKind::WinExe);
        assert!(logger.warnings().is_empty());

        assert_eq!(
            TargetKind::parse_lenient("Library", &logger),
            TargetKind::SameAsPrimaryAssembly
        );
        assert!(logger.contains(LogLevel::Warn, "Library"));

        assert_eq!(TargetKind::Exe.resolve(ModuleKind::Dll), ModuleKind::Exe);
        assert_eq!(
            TargetKind::SameAsPrimaryAssembly.resolve(ModuleKind::WinExe),
            ModuleKind::WinExe
        );
    }

    #[test]
    fn test_parse_delimited() {
        assert_eq!(
            parse_delimited(" A.B ,C;; D "),
            vec!["A.B".to_string(), "C".to_string(), "D".to_string()]
        );
        assert!(parse_delimited(" ; , ").is_empty());
    }

    #[test]
    fn test_validate_requires_inputs_and_output() {
        let logger = RecordingLogger::new();
        let missing_inputs = RepackOptions::builder().output("x.dll").build();
        assert!(matches!(
            missing_inputs.validate(&logger),
            Err(Error::Configuration(_))
        ));

        let missing_output = RepackOptions::builder().input("a.dll").build();
        assert!(matches!(
            missing_output.validate(&logger),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_pattern() {
        let options = base()
            .internalize(true)
            .internalize_exclude_pattern("^N\\.")
            .internalize_exclude_pattern("  ")
            .build();

        match options.validate(&RecordingLogger::new()) {
            Err(Error::Configuration(message)) => assert!(message.contains("item index 1")),
            other => panic!("Expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_invalid_regex() {
        let options = base()
            .internalize(true)
            .internalize_exclude_pattern("([unclosed")
            .build();
        assert!(matches!(
            options.validate(&RecordingLogger::new()),
            Err(Error::Pattern(_))
        ));
    }

    #[test]
    fn test_patterns_ignored_without_internalize() {
        let logger = RecordingLogger::new();
        let policy = base()
            .internalize_exclude_pattern("([unclosed")
            .build()
            .validate(&logger)
            .unwrap();

        assert!(!policy.is_excluded("B", "N.T"));
        assert_eq!(logger.warnings().len(), 1);
    }

    #[test]
    fn test_validate_rejects_two_key_sources() {
        let options = base().key_file("key.snk").key_container("container").build();
        assert!(matches!(
            options.validate(&RecordingLogger::new()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_exclude_matches_module_prefixed_name() {
        let logger = RecordingLogger::new();
        let policy = base()
            .internalize(true)
            .internalize_exclude_pattern("^\\[B\\]")
            .build()
            .validate(&logger)
            .unwrap();

        assert!(policy.is_excluded("B", "Any.Type"));
        assert!(!policy.is_excluded("C", "Any.Type"));
        assert!(logger.contains(LogLevel::Info, "^\\[B\\]"));
    }

    #[test]
    fn test_internalize_assembly_list() {
        let policy = base()
            .internalize(true)
            .internalize_assembly("B.dll")
            .build()
            .validate(&RecordingLogger::new())
            .unwrap();

        assert!(policy.internalizes_module("B"));
        assert!(!policy.internalizes_module("C"));
    }

    #[test]
    fn test_namespace_allowed_and_attribute_drops() {
        let policy = base()
            .allowed_duplicate_namespaces("Shared, Common.Util")
            .drop_attribute_names("Obsolete;System.Diagnostics.DebuggableAttribute")
            .build()
            .validate(&RecordingLogger::new())
            .unwrap();

        assert!(policy.namespace_allowed("Shared"));
        assert!(policy.namespace_allowed("Shared.Inner"));
        assert!(!policy.namespace_allowed("SharedX"));
        assert!(policy.namespace_allowed("Common.Util"));
        assert!(!policy.namespace_allowed("Common"));

        assert!(policy.drops_attribute("System.ObsoleteAttribute"));
        assert!(policy.drops_attribute("System.Diagnostics.DebuggableAttribute"));
        assert!(!policy.drops_attribute("System.SerializableAttribute"));
    }

    #[test]
    fn test_search_order() {
        let policy = base()
            .search_directory("lib")
            .search_directory("/abs")
            .target_platform_directory("ref")
            .build()
            .validate(&RecordingLogger::new())
            .unwrap();

        assert_eq!(
            policy.search_directories,
            vec![
                PathBuf::from("/work"),
                PathBuf::from("/work/lib"),
                PathBuf::from("/abs"),
                PathBuf::from("/work/ref"),
            ]
        );
    }
}

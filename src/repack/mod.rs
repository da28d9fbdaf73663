//! The merge engine.
//!
//! A merge runs as a strictly sequential pipeline over an immutable [`MergePolicy`]:
//!
//! 1. [`resolver`] - locate and decode the inputs and their reference-only dependencies
//! 2. [`symbols`] - build the unified symbol table of top-level types
//! 3. [`conflicts`] - decide the placement of every type, resource and assembly attribute
//! 4. [`rewriter`] - remap every token into the output's token space
//! 5. [`emitter`] - finalise, sign and write the output image
//!
//! Loading, symbol table construction and per-type rewriting run on a rayon pool owned by the
//! [`Repacker`]; with `parallel` disabled the pool has a single worker.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotrepack::repack::{RecordingLogger, RepackOptions, Repacker};
//! use std::sync::Arc;
//!
//! let logger = Arc::new(RecordingLogger::new());
//! let options = RepackOptions::builder()
//!     .input("App.exe")
//!     .input("Library.dll")
//!     .output("merged/App.exe")
//!     .union_merge(true)
//!     .build();
//!
//! let outcome = Repacker::new(options)?.with_logger(logger.clone()).repack()?;
//! println!("{} types internalized, {} warnings", outcome.internalized, logger.warnings().len());
//! # Ok::<(), dotrepack::Error>(())
//! ```

pub mod conflicts;
pub mod emitter;
pub mod internalize;
pub mod logger;
pub mod manifest;
pub mod options;
pub mod resolver;
pub mod rewriter;
pub mod signing;
pub mod symbols;
pub mod xml;

pub use logger::{FileLogger, LogForwarder, RecordingLogger, RepackLogger};
pub use options::{MergePolicy, RepackOptions, RepackOptionsBuilder, TargetKind};

use std::{path::PathBuf, sync::Arc, time::Instant};

use crate::{
    image::{ImageCodec, ModuleReader, ModuleWriter},
    metadata::{identity::ModuleIdentity, module::Module},
    repack::{
        conflicts::MergePlan,
        emitter::Emitter,
        resolver::{ModuleSet, Resolver},
        rewriter::{rewrite, verify_reference_closure},
        symbols::SymbolTable,
    },
    Error, Result,
};

/// The result of a successful merge.
#[derive(Debug, Clone)]
pub struct RepackOutcome {
    /// Path of the written output image
    pub output: PathBuf,
    /// The emitted module
    pub module: Module,
    /// Identities of the merged modules, primary first
    pub merged_modules: Vec<ModuleIdentity>,
    /// Number of types made non-public
    pub internalized: usize,
    /// Number of renamed top-level types
    pub renamed: usize,
    /// Path of the debug symbol sidecar, if written
    pub symbols: Option<PathBuf>,
    /// Path of the merged XML documentation, if written
    pub documentation: Option<PathBuf>,
}

/// Runs merges for one set of [`RepackOptions`].
pub struct Repacker {
    options: RepackOptions,
    logger: Arc<dyn RepackLogger>,
    file_logger: Option<Arc<FileLogger>>,
    reader: Box<dyn ModuleReader>,
    writer: Box<dyn ModuleWriter>,
}

impl Repacker {
    /// Creates a repacker reading and writing [`ImageCodec`] images. Notifications go to the
    /// configured log file, or to the `log` crate.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the log file cannot be created.
    pub fn new(options: RepackOptions) -> Result<Self> {
        let file_logger = match &options.log_file {
            Some(path) => Some(Arc::new(FileLogger::create(path, options.verbose)?)),
            None => None,
        };
        let logger: Arc<dyn RepackLogger> = match &file_logger {
            Some(file) => file.clone(),
            None => Arc::new(LogForwarder),
        };

        Ok(Repacker {
            options,
            logger,
            file_logger,
            reader: Box::new(ImageCodec),
            writer: Box::new(ImageCodec),
        })
    }

    /// Replaces the notification sink. A configured log file is no longer written.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn RepackLogger>) -> Self {
        self.logger = logger;
        self.file_logger = None;
        self
    }

    /// Replaces the image reader and writer.
    #[must_use]
    pub fn with_codec(
        mut self,
        reader: Box<dyn ModuleReader>,
        writer: Box<dyn ModuleWriter>,
    ) -> Self {
        self.reader = reader;
        self.writer = writer;
        self
    }

    /// The options of this repacker.
    #[must_use]
    pub fn options(&self) -> &RepackOptions {
        &self.options
    }

    /// Runs the merge and writes the output.
    ///
    /// # Errors
    /// Returns the first fatal error of any stage. No output file is left behind on failure.
    pub fn repack(&self) -> Result<RepackOutcome> {
        let result = self.run();
        if let Err(e) = &result {
            self.logger.error(&e.to_string());
        }

        if let Some(file) = &self.file_logger {
            let closed = file.close();
            let outcome = result?;
            closed?;
            return Ok(outcome);
        }
        result
    }

    fn run(&self) -> Result<RepackOutcome> {
        let logger = self.logger.as_ref();
        let policy = self.options.validate(logger)?;

        logger.info(&format!(
            "Merging {} assemblies to '{}'",
            self.options.input_assemblies.len(),
            policy.resolve_path(&self.options.output_file).display()
        ));
        let start = Instant::now();

        let pool = thread_pool(&policy)?;
        let outcome = pool.install(|| -> Result<RepackOutcome> {
            let modules =
                Resolver::new(&policy, self.reader.as_ref(), logger).resolve()?;
            let (plan, merged) = merge(&modules, &policy, logger)?;

            let emitter = Emitter::new(&policy, self.writer.as_ref(), logger)?;
            let emitted = emitter.emit(&modules, &plan, merged)?;

            Ok(RepackOutcome {
                output: emitted.output,
                module: emitted.module,
                merged_modules: merged_identities(&modules),
                internalized: plan.internalized,
                renamed: plan.renames.iter().map(Vec::len).sum(),
                symbols: emitted.symbols,
                documentation: emitted.documentation,
            })
        })?;

        logger.info(&format!(
            "Merge succeeded in {:.3} s",
            start.elapsed().as_secs_f64()
        ));
        Ok(outcome)
    }
}

fn thread_pool(policy: &MergePolicy) -> Result<rayon::ThreadPool> {
    let threads = if policy.options.parallel { 0 } else { 1 };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Configuration(format!("Unable to start the worker pool: {e}")))
}

fn merged_identities(modules: &ModuleSet) -> Vec<ModuleIdentity> {
    modules
        .input_modules()
        .map(|module| module.identity.clone())
        .collect()
}

/// Resolves conflicts and rewrites references for an already resolved module set.
fn merge(
    modules: &ModuleSet,
    policy: &MergePolicy,
    logger: &dyn RepackLogger,
) -> Result<(MergePlan, Module)> {
    let table = SymbolTable::build(modules, policy.options.parallel);
    logger.verbose(&format!(
        "Symbol table holds {} types, {} collisions",
        table.symbols().len(),
        table.collisions().count()
    ));

    let plan = MergePlan::build(modules, &table, policy, logger)?;
    let merged = rewrite(modules, &plan, policy, logger)?;
    verify_reference_closure(&merged)?;
    Ok((plan, merged))
}

/// Merges modules already in memory and returns the emitted module with its image, without
/// touching the output path.
///
/// `modules` takes the place of the configured input paths, primary first. The options still
/// supply every policy, the search directories for reference-only dependencies and the
/// attribute source file.
///
/// # Errors
/// Returns the first fatal error of any stage.
///
/// # Examples
///
/// ```rust
/// use dotrepack::prelude::*;
///
/// let mut app = ModuleBuilder::new("App", ModuleKind::Exe);
/// app.add_type(TypeBuilder::new("App", "Program"));
/// let mut lib = ModuleBuilder::new("Lib", ModuleKind::Dll);
/// lib.add_type(TypeBuilder::new("Lib", "Helper"));
///
/// let options = RepackOptions::builder().no_manifest_resource(true).build();
/// let (merged, image) = merge_modules(vec![app.build()?, lib.build()?], &options, &RecordingLogger::new())?;
/// assert_eq!(merged.types.len(), 2);
/// assert!(!image.is_empty());
/// # Ok::<(), dotrepack::Error>(())
/// ```
pub fn merge_modules(
    modules: Vec<Module>,
    options: &RepackOptions,
    logger: &dyn RepackLogger,
) -> Result<(Module, Vec<u8>)> {
    let mut options = options.clone();
    options.input_assemblies = modules
        .iter()
        .map(|module| PathBuf::from(format!("{}.dll", module.name())))
        .collect();
    if options.output_file.as_os_str().is_empty() {
        if let Some(primary) = options.input_assemblies.first() {
            options.output_file.clone_from(primary);
        }
    }

    let policy = options.validate(logger)?;
    let pool = thread_pool(&policy)?;
    pool.install(|| {
        let codec = ImageCodec;
        let modules = Resolver::new(&policy, &codec, logger).adopt(modules)?;
        let (_, merged) = merge(&modules, &policy, logger)?;

        let emitter = Emitter::new(&policy, &codec, logger)?;
        let mut module = emitter.finalize(&modules, merged)?;
        let image = emitter.encode(&mut module)?;
        Ok((module, image))
    })
}

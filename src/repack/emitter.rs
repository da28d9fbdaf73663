//! Output emission.
//!
//! The [`Emitter`] turns the rewritten module into the final image:
//!
//! 1. The output kind and target platform are applied, the merge manifest resource is added and
//!    sequence points are stripped unless debug info is requested.
//! 2. The module is strong named when a key is configured and encoded through the
//!    [`ModuleWriter`] with a zeroed MVID and signature slot.
//! 3. The MVID is derived from the image content and patched in, then the image is signed
//!    unless delay signing is requested.
//! 4. The image, the optional debug symbol sidecar and the merged XML documentation are built
//!    in memory, staged next to their destinations and only then promoted together.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};
use tempfile::NamedTempFile;

use crate::{
    image::{ModuleWriter, SYMBOLS_EXTENSION},
    metadata::{identity::Identity, module::Module, typedef::TypeDef},
    repack::{
        conflicts::MergePlan,
        logger::RepackLogger,
        manifest,
        options::MergePolicy,
        resolver::ModuleSet,
        signing::{KeyContainerSigner, KeyFileSigner, StrongNameSigner},
        xml::{self, DocumentationSource},
    },
    Error, Result,
};

const DOCUMENTATION_EXTENSION: &str = "xml";

/// The files written by an emission.
#[derive(Debug, Clone)]
pub struct Emitted {
    /// The emitted module, as encoded
    pub module: Module,
    /// The image bytes
    pub image: Vec<u8>,
    /// Path of the output image
    pub output: PathBuf,
    /// Path of the debug symbol sidecar, if written
    pub symbols: Option<PathBuf>,
    /// Path of the merged XML documentation, if written
    pub documentation: Option<PathBuf>,
}

/// Loads the signer configured by `policy`, if any.
///
/// # Errors
/// Returns [`Error::Configuration`] if the key cannot be loaded, or holds only a public key
/// while delay signing is off.
pub fn load_signer(
    policy: &MergePolicy,
    logger: &dyn RepackLogger,
) -> Result<Option<Box<dyn StrongNameSigner>>> {
    let options = &policy.options;
    let signer: Option<Box<dyn StrongNameSigner>> = match (&options.key_file, &options.key_container)
    {
        (Some(path), _) => Some(Box::new(KeyFileSigner::from_file(&policy.resolve_path(path))?)),
        (None, Some(name)) => Some(Box::new(KeyContainerSigner::open(
            name,
            &policy.search_directories,
        )?)),
        (None, None) => None,
    };

    match &signer {
        Some(signer) if !signer.can_sign() && !options.delay_sign => {
            return Err(Error::Configuration(
                "The key holds only a public key; enable delay signing to use it".to_string(),
            ));
        }
        None if options.delay_sign => {
            logger.warn("DelaySign is ignored because no key file or key container is set");
        }
        _ => {}
    }

    Ok(signer)
}

/// Finalises, encodes and writes the merged module.
pub struct Emitter<'a> {
    policy: &'a MergePolicy,
    writer: &'a dyn ModuleWriter,
    logger: &'a dyn RepackLogger,
    signer: Option<Box<dyn StrongNameSigner>>,
}

impl<'a> Emitter<'a> {
    /// Creates an emitter, loading the configured signing key.
    ///
    /// # Errors
    /// Returns the errors of [`load_signer`].
    pub fn new(
        policy: &'a MergePolicy,
        writer: &'a dyn ModuleWriter,
        logger: &'a dyn RepackLogger,
    ) -> Result<Self> {
        Ok(Emitter {
            policy,
            writer,
            logger,
            signer: load_signer(policy, logger)?,
        })
    }

    /// Applies the output kind, platform, manifest, debug info and strong name to `merged`.
    ///
    /// # Errors
    /// Returns a decoding error if an input carries a damaged merge manifest.
    pub fn finalize(&self, modules: &ModuleSet, mut merged: Module) -> Result<Module> {
        let options = &self.policy.options;

        merged.kind = options.target_kind.resolve(modules.primary().kind);
        if let Some(platform) = &options.target_platform_version {
            merged.target_platform.clone_from(platform);
        }

        if !options.no_manifest_resource {
            merged.resources.push(manifest::build(modules.input_modules())?);
        }

        if !options.debug_info {
            strip_sequence_points(&mut merged.types);
        }

        match &self.signer {
            Some(signer) => {
                merged.identity.strong_name = Some(Identity::PubKey(signer.public_key().to_vec()));
                merged.signature = Some(vec![0u8; signer.signature_size()]);
            }
            None => {
                merged.identity.strong_name = None;
                merged.signature = None;
            }
        }

        Ok(merged)
    }

    /// Encodes `module`, deriving its MVID from the image content and signing the image.
    ///
    /// # Errors
    /// Returns the encoding errors of the writer, or [`Error::Emission`] if signing fails.
    pub fn encode(&self, module: &mut Module) -> Result<Vec<u8>> {
        module.mvid = uguid::Guid::ZERO;
        if let Some(signature) = module.signature.as_mut() {
            signature.fill(0);
        }

        let encoded = self.writer.write(module)?;
        let mut image = encoded.bytes;

        let digest = Sha1::digest(&image);
        let mut mvid = [0u8; 16];
        mvid.copy_from_slice(&digest[..16]);
        image
            .get_mut(encoded.mvid_offset..encoded.mvid_offset + 16)
            .ok_or_else(|| Error::Emission("MVID slot outside of the image".to_string()))?
            .copy_from_slice(&mvid);
        module.mvid = uguid::Guid::from_bytes(mvid);

        if let (Some(signer), Some((offset, length))) = (&self.signer, encoded.signature_slot) {
            if self.policy.options.delay_sign {
                self.logger.info("Delay signing: the signature slot is left empty");
            } else {
                let signature = signer.sign(&image)?;
                if signature.len() != length {
                    return Err(Error::Emission(format!(
                        "Signature of {} bytes does not fit the {length} byte slot",
                        signature.len()
                    )));
                }
                image
                    .get_mut(offset..offset + length)
                    .ok_or_else(|| {
                        Error::Emission("Signature slot outside of the image".to_string())
                    })?
                    .copy_from_slice(&signature);
                module.signature = Some(signature);
            }
        }

        Ok(image)
    }

    /// Finalises, encodes and writes the merged module with its sidecar files.
    ///
    /// Every file is produced in memory first and staged next to its destination; nothing is
    /// promoted unless all of them could be built.
    ///
    /// # Errors
    /// Returns [`Error::Emission`] if a file cannot be written, or any error of
    /// [`Emitter::finalize`] and [`Emitter::encode`].
    pub fn emit(&self, modules: &ModuleSet, plan: &MergePlan, merged: Module) -> Result<Emitted> {
        let options = &self.policy.options;
        let output = self.policy.resolve_path(&options.output_file);

        let mut module = self.finalize(modules, merged)?;
        let image = self.encode(&mut module)?;

        let symbols = if options.debug_info {
            let path = output.with_extension(SYMBOLS_EXTENSION);
            Some((path, self.writer.write_symbols(&module)?))
        } else {
            None
        };

        let documentation = if options.xml_documentation {
            self.merge_documentation(modules, plan, &module, &output)?
        } else {
            None
        };

        let mut files = vec![(output.as_path(), image.as_slice())];
        files.extend(
            symbols
                .iter()
                .chain(documentation.iter())
                .map(|(path, data)| (path.as_path(), data.as_slice())),
        );
        write_atomic(&files)?;

        self.logger
            .verbose(&format!("Wrote {} bytes to '{}'", image.len(), output.display()));
        if let Some((path, _)) = &documentation {
            self.logger.verbose(&format!(
                "Wrote merged XML documentation to '{}'",
                path.display()
            ));
        }

        Ok(Emitted {
            module,
            image,
            output,
            symbols: symbols.map(|(path, _)| path),
            documentation: documentation.map(|(path, _)| path),
        })
    }

    fn merge_documentation(
        &self,
        modules: &ModuleSet,
        plan: &MergePlan,
        module: &Module,
        output: &Path,
    ) -> Result<Option<(PathBuf, Vec<u8>)>> {
        let mut sources = Vec::new();
        for (index, loaded) in modules.inputs.iter().enumerate() {
            let path = loaded.path.with_extension(DOCUMENTATION_EXTENSION);
            if !path.is_file() {
                continue;
            }
            let data = fs::read(&path).map_err(|e| {
                Error::Emission(format!("Unable to read '{}': {e}", path.display()))
            })?;
            let mut namespaces = loaded
                .module
                .types
                .iter()
                .map(|ty| ty.namespace.clone())
                .collect::<Vec<_>>();
            namespaces.sort();
            namespaces.dedup();
            sources.push(DocumentationSource {
                data,
                renames: plan.renames.get(index).cloned().unwrap_or_default(),
                namespaces,
            });
        }

        if sources.is_empty() {
            self.logger
                .verbose("No XML documentation found next to the input assemblies");
            return Ok(None);
        }

        let merged = xml::merge_documentation(module.name(), &sources)?;
        self.logger.verbose(&format!(
            "Merged XML documentation of {} assemblies",
            sources.len()
        ));
        Ok(Some((output.with_extension(DOCUMENTATION_EXTENSION), merged)))
    }
}

fn strip_sequence_points(types: &mut [TypeDef]) {
    for ty in types {
        for method in &mut ty.methods {
            if let Some(body) = method.body.as_mut() {
                body.sequence_points.clear();
            }
        }
        strip_sequence_points(&mut ty.nested);
    }
}

fn emission(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Emission(format!("Unable to write '{}': {e}", path.display()))
}

fn stage(path: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&directory).map_err(emission(path))?;

    let mut temp = NamedTempFile::new_in(&directory).map_err(emission(path))?;
    temp.write_all(data).map_err(emission(path))?;
    temp.as_file().sync_all().map_err(emission(path))?;
    Ok(temp)
}

/// Writes each `(path, data)` pair through a temporary file in the destination directory,
/// creating missing parent directories.
///
/// All files are staged before the first one is promoted. A failed promotion removes the files
/// already promoted by this call, so nothing is left behind on error.
///
/// # Errors
/// Returns [`Error::Emission`] if any step fails.
pub fn write_atomic(files: &[(&Path, &[u8])]) -> Result<()> {
    let staged = files
        .iter()
        .map(|(path, data)| stage(path, data).map(|temp| (*path, temp)))
        .collect::<Result<Vec<_>>>()?;

    let mut promoted: Vec<&Path> = Vec::with_capacity(staged.len());
    for (path, temp) in staged {
        if let Err(e) = temp.persist(path) {
            for done in promoted {
                let _ = fs::remove_file(done);
            }
            return Err(emission(path)(e.error));
        }
        promoted.push(path);
    }
    Ok(())
}

//! Reading and writing module images.
//!
//! The merge engine talks to the on-disk format only through [`ModuleReader`] and
//! [`ModuleWriter`]. [`ImageCodec`] is the bundled implementation: a compact, deterministic
//! binary encoding of [`crate::metadata::module::Module`] plus a separate debug symbol sidecar
//! holding method sequence points.
//!
//! # Examples
//!
//! ```rust
//! use dotrepack::image::{ImageCodec, ModuleReader, ModuleWriter};
//! use dotrepack::metadata::{builder::{ModuleBuilder, TypeBuilder}, module::ModuleKind};
//!
//! let mut builder = ModuleBuilder::new("Library", ModuleKind::Dll);
//! builder.add_type(TypeBuilder::new("Library", "Widget"));
//! let module = builder.build()?;
//!
//! let codec = ImageCodec::default();
//! let image = codec.write(&module)?;
//! let decoded = codec.read(&image.bytes)?;
//! assert_eq!(decoded.types[0].name, "Widget");
//! # Ok::<(), dotrepack::Error>(())
//! ```

mod codec;
mod symbols;

pub use codec::ImageCodec;

use std::path::Path;

use crate::{file::File, metadata::module::Module, Result};

/// Extension of debug symbol sidecar files.
pub const SYMBOLS_EXTENSION: &str = "pdb";

/// An encoded module image, with the offsets of the slots patched after encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// The image bytes
    pub bytes: Vec<u8>,
    /// Offset of the 16 byte MVID
    pub mvid_offset: usize,
    /// Offset and length of the strong-name signature slot, if the module has one
    pub signature_slot: Option<(usize, usize)>,
}

/// Decodes modules from raw image bytes.
pub trait ModuleReader: Send + Sync {
    /// Decodes one module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged images.
    fn read(&self, data: &[u8]) -> Result<Module>;

    /// Attaches debug symbols from a sidecar file to an already decoded module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the sidecar is damaged or belongs to another
    /// module.
    fn read_symbols(&self, module: &mut Module, data: &[u8]) -> Result<()>;

    /// Memory maps `path` and decodes it, attaching the `<stem>.pdb` sidecar symbols when one
    /// sits next to the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read, or any decoding error.
    fn read_path(&self, path: &Path) -> Result<Module> {
        let file = File::from_file(path)?;
        let mut module = self.read(file.data())?;

        let symbols = path.with_extension(SYMBOLS_EXTENSION);
        if symbols.is_file() {
            let sidecar = File::from_file(&symbols)?;
            self.read_symbols(&mut module, sidecar.data())?;
        }

        Ok(module)
    }
}

/// Encodes modules into raw image bytes.
pub trait ModuleWriter: Send + Sync {
    /// Encodes one module. Sequence points are not part of the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the module holds values the format cannot
    /// represent (e.g. member tokens inside type signatures).
    fn write(&self, module: &Module) -> Result<EncodedImage>;

    /// Encodes the debug symbol sidecar of a module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a count exceeds the format limits.
    fn write_symbols(&self, module: &Module) -> Result<Vec<u8>>;
}

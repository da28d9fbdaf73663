//! Memory mapped file backend.

use super::Backend;
use crate::{Error::FileError, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A read-only memory mapping of an on-disk module image.
#[derive(Debug)]
pub struct Physical {
    data: Option<Mmap>,
}

impl Physical {
    /// Opens and maps `path`.
    ///
    /// Zero-length files cannot be mapped on every platform, so they are represented without
    /// a mapping and report a length of zero.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;
        if file.metadata().map_err(FileError)?.len() == 0 {
            return Ok(Physical { data: None });
        }

        // The mapping is read-only and owned by this struct for its whole lifetime
        let mmap = unsafe { Mmap::map(&file) }.map_err(FileError)?;
        Ok(Physical { data: Some(mmap) })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        match &self.data {
            Some(mmap) => mmap.as_ref(),
            None => &[],
        }
    }
}

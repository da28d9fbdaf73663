//! Input file access for module images.
//!
//! A [`File`] owns the raw bytes of one module image, memory mapped from disk. The
//! [`crate::image`] codec decodes modules from [`File::data`] through a [`parser::Parser`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotrepack::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("Library.dll"))?;
//! println!("{} bytes", file.len());
//! # Ok::<(), dotrepack::Error>(())
//! ```

pub mod io;
pub mod parser;

mod physical;

use std::path::Path;

use crate::Result;
use physical::Physical;

/// Storage behind a [`File`].
pub trait Backend: Send + Sync {
    /// The complete backing data
    fn data(&self) -> &[u8];

    /// Length of the backing data in bytes
    fn len(&self) -> usize {
        self.data().len()
    }
}

/// A loaded module image.
pub struct File {
    data: Box<dyn Backend>,
}

impl File {
    /// Memory maps the file at `file`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Resolution`] if it is empty.
    pub fn from_file(file: &Path) -> Result<File> {
        let backend = Physical::new(file)?;
        if backend.len() == 0 {
            return Err(crate::Error::resolution(
                file.display().to_string(),
                "file is empty",
            ));
        }

        Ok(File {
            data: Box::new(backend),
        })
    }

    /// Length of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the image has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// The raw image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(&[0xAA, 0xBB]).unwrap();
        temp.flush().unwrap();

        let file = File::from_file(temp.path()).unwrap();
        assert_eq!(file.data(), &[0xAA, 0xBB]);
        assert_eq!(file.len(), 2);
        assert!(!file.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let result = File::from_file(Path::new("/nonexistent/module.dll"));
        assert!(matches!(result, Err(crate::Error::FileError(_))));
    }
}

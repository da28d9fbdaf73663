use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants mirror the stages of a merge run. Every variant is fatal: a merge that returns
/// an error has not produced an output file. Advisory conditions (dropped duplicate resources,
/// collapsed attributes, unresolvable reference-only dependencies) never surface here, they are
/// reported through [`crate::repack::RepackLogger`] instead.
///
/// # Error Categories
///
/// ## Merge Errors
/// - [`Error::Resolution`] - An input module or dependency could not be located or loaded
/// - [`Error::PolicyConflict`] - Two public types collide after every automatic policy ran
/// - [`Error::Rewrite`] - A reference could not be remapped (internal invariant violation)
/// - [`Error::Emission`] - Writing, signing or promoting the output failed
/// - [`Error::Configuration`] - The supplied [`crate::repack::RepackOptions`] are unusable
///
/// ## Module Image Errors
/// - [`Error::Malformed`] - Corrupted or invalid module image
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the image
///
/// ## External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Pattern`] - An internalize exclude pattern is not a valid regular expression
///
/// # Examples
///
/// ```rust,no_run
/// use dotrepack::{Error, repack::{RepackOptions, Repacker}};
///
/// let options = RepackOptions::builder()
///     .input("App.dll")
///     .input("Library.dll")
///     .output("merged/App.dll")
///     .build();
///
/// match Repacker::new(options).and_then(|repacker| repacker.repack()) {
///     Ok(outcome) => println!("Merged {} modules", outcome.merged_modules.len()),
///     Err(Error::PolicyConflict { first, first_module, second_module, .. }) => {
///         eprintln!("{first} is public in both {first_module} and {second_module}");
///     }
///     Err(e) => eprintln!("{}: {}", e.kind(), e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An input module or one of its dependencies could not be resolved.
    ///
    /// Raised for missing input paths, unreadable files, modules with an unspecified target
    /// kind (unless explicitly allowed) and input sets that end up empty. Only the caller can
    /// recover by fixing its paths, so the merge aborts before any symbol is processed.
    ///
    /// # Fields
    ///
    /// * `path` - The path (or module name) that failed to resolve
    /// * `message` - Why resolution failed
    #[error("Unable to resolve '{path}': {message}")]
    Resolution {
        /// The path or module name that could not be resolved
        path: String,
        /// Description of the failure
        message: String,
    },

    /// Two publicly visible types still share a qualified name after internalization,
    /// renaming and union merging were applied.
    ///
    /// Both sides are externally visible, so picking one automatically would silently change
    /// the public surface of the output. The caller has to add an internalize rule, an
    /// allowed duplicate namespace or enable union merging.
    #[error("Duplicate public type '{first}' in '{first_module}' and '{second}' in '{second_module}'")]
    PolicyConflict {
        /// Qualified name of the first (winning) declaration
        first: String,
        /// Module declaring the first type
        first_module: String,
        /// Qualified name of the second declaration
        second: String,
        /// Module declaring the second type
        second_module: String,
    },

    /// A reference points at a symbol that is absent from the unified symbol table.
    ///
    /// This indicates a bug in the merge engine rather than a problem with the inputs.
    #[error("Reference rewrite failed - {0}")]
    Rewrite(String),

    /// Creating, signing, writing or promoting the output failed.
    ///
    /// Partially written temporary files are discarded; the requested output path is never
    /// left holding an incomplete module.
    #[error("Emission failed - {0}")]
    Emission(String),

    /// The configuration could not be validated.
    #[error("Invalid configuration - {0}")]
    Configuration(String),

    /// The module image is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing a module image.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// An internalize exclude pattern failed to compile.
    #[error("Invalid internalize exclude pattern - {0}")]
    Pattern(#[from] regex::Error),
}

/// Coarse classification of an [`Error`], handed to hosts that map failures onto their own
/// exit semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    /// Missing or unreadable input or dependency
    Resolution,
    /// Unresolvable public name collision
    PolicyConflict,
    /// Internal reference remapping failure
    Rewrite,
    /// Output write, directory creation or signing failure
    Emission,
    /// Unusable configuration
    Configuration,
    /// Damaged module image
    Malformed,
}

impl Error {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// I/O failures are classified as [`ErrorKind::Resolution`] because the engine only
    /// performs unwrapped reads while loading inputs; write failures are wrapped into
    /// [`Error::Emission`] by the emitter.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resolution { .. } | Error::FileError(_) => ErrorKind::Resolution,
            Error::PolicyConflict { .. } => ErrorKind::PolicyConflict,
            Error::Rewrite(_) => ErrorKind::Rewrite,
            Error::Emission(_) => ErrorKind::Emission,
            Error::Configuration(_) | Error::Pattern(_) => ErrorKind::Configuration,
            Error::Malformed { .. } | Error::OutOfBounds => ErrorKind::Malformed,
        }
    }

    pub(crate) fn resolution(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Resolution {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::resolution("a.dll", "missing").kind(),
            ErrorKind::Resolution
        );
        assert_eq!(Error::Rewrite("x".into()).kind(), ErrorKind::Rewrite);
        assert_eq!(Error::Emission("x".into()).kind(), ErrorKind::Emission);
        assert_eq!(malformed_error!("bad").kind(), ErrorKind::Malformed);
        assert_eq!(out_of_bounds_error!().kind(), ErrorKind::Malformed);

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(Error::from(io).kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_policy_conflict_message_names_both_sides() {
        let err = Error::PolicyConflict {
            first: "N.T".into(),
            first_module: "Primary".into(),
            second: "N.T".into(),
            second_module: "Secondary".into(),
        };

        let message = err.to_string();
        assert!(message.contains("Primary"));
        assert!(message.contains("Secondary"));
        assert!(message.contains("N.T"));
        assert_eq!(err.kind().to_string(), "PolicyConflict");
    }

    #[test]
    fn test_malformed_carries_location() {
        match malformed_error!("value {} too large", 7) {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "value 7 too large");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("Expected Malformed"),
        }
    }
}

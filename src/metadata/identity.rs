//! Module identities and strong-name keys.
//!
//! [`ModuleIdentity`] is the name, version, culture and optional strong name that identifies a
//! module and that assembly references point at. [`Identity`] carries the strong-name part as
//! either a full public key or its 8 byte token.
//!
//! # Example
//! ```rust
//! use dotrepack::metadata::identity::{HashAlgorithm, Identity, ModuleIdentity};
//!
//! let identity = ModuleIdentity::parse("Library, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null")?;
//! assert_eq!(identity.name, "Library");
//! assert_eq!(identity.version.to_string(), "1.2.0.0");
//!
//! let key = Identity::PubKey(vec![1, 2, 3, 4]);
//! assert_ne!(key.to_token(HashAlgorithm::SHA1)?, 0);
//! # Ok::<(), dotrepack::Error>(())
//! ```

use std::fmt::{self, Write};

use crate::{file::io::read_le, Result};

use sha1::{Digest, Sha1};

/// Hash algorithm identifiers (`AssemblyHashAlgorithm`, ECMA-335 II.23.1.1).
#[allow(non_snake_case)]
pub mod HashAlgorithm {
    /// No hashing
    pub const NONE: u32 = 0x0000;
    /// SHA1, the algorithm used for public key tokens
    pub const SHA1: u32 = 0x8004;
}

/// A strong-name identity. Either the full public key or the 8 byte token derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// The full RSA public-key
    PubKey(Vec<u8>),
    /// 8-byte end of the hash of the public-key
    Token(u64),
}

impl Identity {
    /// Create an `Identity` from raw data.
    ///
    /// # Arguments
    /// * `data`    - The data to create the identity from
    /// * `is_pub`  - Is it a token, or a public-key
    ///
    /// # Errors
    /// Returns an error if a token is shorter than 8 bytes.
    pub fn from(data: &[u8], is_pub: bool) -> Result<Self> {
        Ok(if is_pub {
            Identity::PubKey(data.to_vec())
        } else {
            Identity::Token(read_le::<u64>(data)?)
        })
    }

    /// Get the token based on the provided `algo`; the token is the last 8 bytes of the hash of
    /// the public-key.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] for algorithms other than SHA1.
    pub fn to_token(&self, algo: u32) -> Result<u64> {
        match self {
            Identity::PubKey(data) => match algo {
                HashAlgorithm::SHA1 => {
                    let result = Sha1::digest(data);
                    read_le::<u64>(&result[result.len() - 8..])
                }
                _ => Err(crate::Error::Configuration(format!(
                    "unsupported hash algorithm 0x{algo:04x}"
                ))),
            },
            Identity::Token(token) => Ok(*token),
        }
    }

    /// The public key bytes, if this identity carries a full key.
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8]> {
        match self {
            Identity::PubKey(data) => Some(data),
            Identity::Token(_) => None,
        }
    }
}

/// Four-part module version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleVersion {
    /// Major version component
    pub major: u16,
    /// Minor version component
    pub minor: u16,
    /// Build version component
    pub build: u16,
    /// Revision version component
    pub revision: u16,
}

impl ModuleVersion {
    /// Creates a version from its four components.
    #[must_use]
    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        ModuleVersion {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parses `major[.minor[.build[.revision]]]`; missing components are zero.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for non-numeric or excess components.
    pub fn parse(version: &str) -> Result<Self> {
        let mut parts = [0u16; 4];
        for (index, part) in version.split('.').enumerate() {
            if index >= 4 {
                return Err(malformed_error!("Too many version components in '{}'", version));
            }
            parts[index] = part
                .trim()
                .parse::<u16>()
                .map_err(|e| malformed_error!("Invalid version component '{}': {}", part, e))?;
        }

        Ok(ModuleVersion::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// The identity of a module: simple name, version, culture and optional strong name.
///
/// Equality and hashing ignore the strong name, so a reference carrying only a public key
/// token matches a definition carrying the full key.
#[derive(Debug, Clone)]
pub struct ModuleIdentity {
    /// Simple module name (e.g. `Library`)
    pub name: String,
    /// Module version
    pub version: ModuleVersion,
    /// Culture for satellite modules, `None` when culture neutral
    pub culture: Option<String>,
    /// Strong-name identity
    pub strong_name: Option<Identity>,
}

impl PartialEq for ModuleIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version && self.culture == other.culture
    }
}

impl Eq for ModuleIdentity {}

impl std::hash::Hash for ModuleIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.culture.hash(state);
    }
}

impl ModuleIdentity {
    /// Creates a culture neutral, unsigned identity.
    pub fn new(name: impl Into<String>, version: ModuleVersion) -> Self {
        ModuleIdentity {
            name: name.into(),
            version,
            culture: None,
            strong_name: None,
        }
    }

    /// Parses a display name of the form
    /// `Name[, Version=a.b.c.d][, Culture=culture][, PublicKeyToken=token]`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name is empty or a component is invalid.
    pub fn parse(display_name: &str) -> Result<Self> {
        let mut parts = display_name.split(',').map(str::trim);

        let name = parts.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(malformed_error!("Module name cannot be empty"));
        }

        let mut identity = ModuleIdentity::new(name, ModuleVersion::default());
        for part in parts {
            if let Some(value) = part.strip_prefix("Version=") {
                identity.version = ModuleVersion::parse(value)?;
            } else if let Some(value) = part.strip_prefix("Culture=") {
                if value != "neutral" {
                    identity.culture = Some(value.to_string());
                }
            } else if let Some(value) = part.strip_prefix("PublicKeyToken=") {
                if value != "null" && !value.is_empty() {
                    identity.strong_name = Some(Identity::Token(parse_token_hex(value)?));
                }
            }
        }

        Ok(identity)
    }

    /// The public key token of this identity, if strong named.
    #[must_use]
    pub fn public_key_token(&self) -> Option<u64> {
        self.strong_name
            .as_ref()
            .and_then(|identity| identity.to_token(HashAlgorithm::SHA1).ok())
    }

    /// Generates the display name, e.g.
    /// `Library, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null`.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut result = String::with_capacity(self.name.len() + 80);

        result.push_str(&self.name);
        let _ = write!(result, ", Version={}", self.version);
        let _ = write!(
            result,
            ", Culture={}",
            self.culture.as_deref().unwrap_or("neutral")
        );

        result.push_str(", PublicKeyToken=");
        match self.public_key_token() {
            Some(token) => {
                for byte in token.to_le_bytes() {
                    let _ = write!(result, "{byte:02x}");
                }
            }
            None => result.push_str("null"),
        }

        result
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn parse_token_hex(value: &str) -> Result<u64> {
    if value.len() != 16 || !value.is_ascii() {
        return Err(malformed_error!(
            "PublicKeyToken must be exactly 16 hex characters, got '{}'",
            value
        ));
    }

    let mut bytes = [0u8; 8];
    for (index, byte) in bytes.iter_mut().enumerate() {
        let pair = &value[index * 2..index * 2 + 2];
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|e| malformed_error!("Invalid hex in PublicKeyToken '{}': {}", value, e))?;
    }

    Ok(u64::from_le_bytes(bytes))
}

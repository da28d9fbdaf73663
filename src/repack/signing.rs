//! Strong-name signing.
//!
//! A [`StrongNameSigner`] supplies the public key written into the output identity and signs
//! the finished image. Two key sources are supported:
//!
//! - [`KeyFileSigner`] reads a `.snk` key file, either a full key pair (`PRIVATEKEYBLOB`) or a
//!   public key blob as produced by `sn -p`. Public-only keys can only be used for delay signing.
//! - [`KeyContainerSigner`] looks a named container up as `<name>.snk` in the search
//!   directories.
//!
//! The signature is a keyed SHA-1 expansion of the image with the signature slot zeroed, sized
//! like an RSA signature of the key. It is not an RSA signature.

use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::{
    file::{io::push_le, parser::Parser, File},
    metadata::identity::HashAlgorithm,
    Error, Result,
};

const PRIVATE_KEY_BLOB: u8 = 0x07;
const PUBLIC_KEY_BLOB: u8 = 0x06;
const CALG_RSA_SIGN: u32 = 0x0000_2400;
const RSA1: u32 = 0x3141_5352;
const RSA2: u32 = 0x3241_5352;
const BLOB_HEADER_SIZE: usize = 8;
const PUBLIC_KEY_HEADER_SIZE: usize = 12;

/// Signs output images.
pub trait StrongNameSigner: Send + Sync {
    /// The public key blob stored in the output identity.
    fn public_key(&self) -> &[u8];

    /// Size of the signature slot in bytes.
    fn signature_size(&self) -> usize;

    /// Returns `true` if [`StrongNameSigner::sign`] can produce a signature.
    fn can_sign(&self) -> bool;

    /// Signs `image`, whose signature slot is zeroed.
    ///
    /// # Errors
    /// Returns [`Error::Emission`] if the key holds no private part.
    fn sign(&self, image: &[u8]) -> Result<Vec<u8>>;
}

/// RSA key material parsed from a strong-name key blob.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyBlob {
    bit_length: u32,
    exponent: u32,
    modulus: Vec<u8>,
    private: Option<Vec<u8>>,
}

impl KeyBlob {
    fn parse(data: &[u8]) -> Result<KeyBlob> {
        let mut parser = Parser::new(data);
        match data.first() {
            Some(&PRIVATE_KEY_BLOB) => Self::parse_capi(&mut parser, RSA2),
            Some(&PUBLIC_KEY_BLOB) => Self::parse_capi(&mut parser, RSA1),
            Some(_) if data.len() > PUBLIC_KEY_HEADER_SIZE => {
                let _signature_algorithm = parser.read_le::<u32>()?;
                let hash_algorithm = parser.read_le::<u32>()?;
                let size = parser.read_le::<u32>()? as usize;
                if hash_algorithm != HashAlgorithm::SHA1 {
                    return Err(malformed_error!(
                        "Unsupported strong-name hash algorithm 0x{:04x}",
                        hash_algorithm
                    ));
                }
                if size != data.len() - PUBLIC_KEY_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Public key size {} does not match blob size {}",
                        size,
                        data.len() - PUBLIC_KEY_HEADER_SIZE
                    ));
                }
                Self::parse_capi(&mut parser, RSA1)
            }
            _ => Err(malformed_error!("Key blob is too short")),
        }
    }

    fn parse_capi(parser: &mut Parser, expected_magic: u32) -> Result<KeyBlob> {
        let blob_type = parser.read_le::<u8>()?;
        let _version = parser.read_le::<u8>()?;
        let _reserved = parser.read_le::<u16>()?;
        let algorithm = parser.read_le::<u32>()?;
        if algorithm != CALG_RSA_SIGN {
            return Err(malformed_error!(
                "Unsupported key algorithm 0x{:08x} in blob type 0x{:02x}",
                algorithm,
                blob_type
            ));
        }

        let magic = parser.read_le::<u32>()?;
        if magic != expected_magic {
            return Err(malformed_error!("Unexpected RSA key magic 0x{:08x}", magic));
        }

        let bit_length = parser.read_le::<u32>()?;
        if bit_length == 0 || bit_length % 8 != 0 {
            return Err(malformed_error!("Invalid RSA key length {}", bit_length));
        }
        let exponent = parser.read_le::<u32>()?;
        let modulus = parser.read_bytes(bit_length as usize / 8)?.to_vec();

        let private = if expected_magic == RSA2 {
            let remaining = parser.len() - parser.pos();
            Some(parser.read_bytes(remaining)?.to_vec())
        } else {
            None
        };

        Ok(KeyBlob {
            bit_length,
            exponent,
            modulus,
            private,
        })
    }

    /// The `PublicKeyBlob` of the key: signature and hash algorithm, size, then a
    /// `PUBLICKEYBLOB`.
    fn public_key(&self) -> Vec<u8> {
        let mut capi = Vec::with_capacity(BLOB_HEADER_SIZE + 12 + self.modulus.len());
        capi.push(PUBLIC_KEY_BLOB);
        capi.push(0x02);
        push_le(&mut capi, 0u16);
        push_le(&mut capi, CALG_RSA_SIGN);
        push_le(&mut capi, RSA1);
        push_le(&mut capi, self.bit_length);
        push_le(&mut capi, self.exponent);
        capi.extend_from_slice(&self.modulus);

        let mut blob = Vec::with_capacity(PUBLIC_KEY_HEADER_SIZE + capi.len());
        push_le(&mut blob, CALG_RSA_SIGN);
        push_le(&mut blob, HashAlgorithm::SHA1);
        push_le(&mut blob, capi.len() as u32);
        blob.extend_from_slice(&capi);
        blob
    }
}

fn keyed_signature(private: &[u8], image: &[u8], size: usize) -> Vec<u8> {
    let digest = Sha1::digest(image);
    let mut signature = Vec::with_capacity(size);
    let mut counter = 0u32;
    while signature.len() < size {
        let mut hasher = Sha1::new();
        hasher.update(private);
        hasher.update(digest);
        hasher.update(counter.to_le_bytes());
        signature.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    signature.truncate(size);
    signature
}

/// Signs with a key read from a `.snk` file.
#[derive(Debug, Clone)]
pub struct KeyFileSigner {
    path: PathBuf,
    key: KeyBlob,
    public_key: Vec<u8>,
}

impl KeyFileSigner {
    /// Reads a key file.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the file cannot be read or holds no valid key.
    pub fn from_file(path: &Path) -> Result<KeyFileSigner> {
        let file = File::from_file(path).map_err(|e| {
            Error::Configuration(format!("Unable to read key file '{}': {e}", path.display()))
        })?;
        Self::from_bytes(path, file.data())
    }

    /// Parses key material already in memory; `path` is only used in messages.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `data` holds no valid key.
    pub fn from_bytes(path: &Path, data: &[u8]) -> Result<KeyFileSigner> {
        let key = KeyBlob::parse(data).map_err(|e| {
            Error::Configuration(format!("Invalid key file '{}': {e}", path.display()))
        })?;
        let public_key = key.public_key();
        Ok(KeyFileSigner {
            path: path.to_path_buf(),
            key,
            public_key,
        })
    }

    /// The key file this signer was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StrongNameSigner for KeyFileSigner {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn signature_size(&self) -> usize {
        self.key.bit_length as usize / 8
    }

    fn can_sign(&self) -> bool {
        self.key.private.is_some()
    }

    fn sign(&self, image: &[u8]) -> Result<Vec<u8>> {
        let private = self.key.private.as_deref().ok_or_else(|| {
            Error::Emission(format!(
                "Key file '{}' holds only a public key; use delay signing",
                self.path.display()
            ))
        })?;
        Ok(keyed_signature(private, image, self.signature_size()))
    }
}

/// Signs with a named key container, stored as `<name>.snk` in one of the search directories.
#[derive(Debug, Clone)]
pub struct KeyContainerSigner {
    name: String,
    inner: KeyFileSigner,
}

impl KeyContainerSigner {
    /// Opens the container `name`, searching `directories` in order.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if no directory holds the container or its key is
    /// invalid.
    pub fn open(name: &str, directories: &[PathBuf]) -> Result<KeyContainerSigner> {
        let file_name = format!("{name}.snk");
        let path = directories
            .iter()
            .map(|directory| directory.join(&file_name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::Configuration(format!("Key container '{name}' not found"))
            })?;

        Ok(KeyContainerSigner {
            name: name.to_string(),
            inner: KeyFileSigner::from_file(&path)?,
        })
    }

    /// The container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl StrongNameSigner for KeyContainerSigner {
    fn public_key(&self) -> &[u8] {
        self.inner.public_key()
    }

    fn signature_size(&self) -> usize {
        self.inner.signature_size()
    }

    fn can_sign(&self) -> bool {
        self.inner.can_sign()
    }

    fn sign(&self, image: &[u8]) -> Result<Vec<u8>> {
        self.inner.sign(image)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A 512 bit `PRIVATEKEYBLOB` with a patterned modulus and private part.
    pub(crate) fn key_pair() -> Vec<u8> {
        let mut blob = vec![PRIVATE_KEY_BLOB, 0x02, 0x00, 0x00];
        push_le(&mut blob, CALG_RSA_SIGN);
        push_le(&mut blob, RSA2);
        push_le(&mut blob, 512u32);
        push_le(&mut blob, 65537u32);
        blob.extend((0..64u8).map(|b| b.wrapping_mul(7)));
        blob.extend((0..160u8).map(|b| b ^ 0x5A));
        blob
    }

    #[test]
    fn test_key_pair() {
        let signer = KeyFileSigner::from_bytes(Path::new("key.snk"), &key_pair()).unwrap();
        assert!(signer.can_sign());
        assert_eq!(signer.signature_size(), 64);

        let public_key = signer.public_key();
        assert_eq!(public_key.len(), PUBLIC_KEY_HEADER_SIZE + 20 + 64);
        assert_eq!(&public_key[..4], &CALG_RSA_SIGN.to_le_bytes());
        assert_eq!(public_key[PUBLIC_KEY_HEADER_SIZE], PUBLIC_KEY_BLOB);

        let signature = signer.sign(b"image").unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(signer.sign(b"image").unwrap(), signature);
        assert_ne!(signer.sign(b"other").unwrap(), signature);
    }

    #[test]
    fn test_public_key_only() {
        let pair = KeyFileSigner::from_bytes(Path::new("key.snk"), &key_pair()).unwrap();
        let public =
            KeyFileSigner::from_bytes(Path::new("key.pub.snk"), pair.public_key()).unwrap();

        assert_eq!(public.public_key(), pair.public_key());
        assert!(!public.can_sign());
        assert_eq!(
            public.sign(b"image").unwrap_err().kind(),
            crate::ErrorKind::Emission
        );
    }

    #[test]
    fn test_invalid_keys() {
        assert!(KeyFileSigner::from_bytes(Path::new("a.snk"), &[]).is_err());
        assert!(KeyFileSigner::from_bytes(Path::new("a.snk"), &[0x07, 0x02]).is_err());

        let mut wrong_magic = key_pair();
        wrong_magic[8] = b'X';
        let error = KeyFileSigner::from_bytes(Path::new("a.snk"), &wrong_magic).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_key_container_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Release.snk"), key_pair()).unwrap();

        let directories = vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()];
        let signer = KeyContainerSigner::open("Release", &directories).unwrap();
        assert_eq!(signer.name(), "Release");
        assert!(signer.can_sign());

        assert!(KeyContainerSigner::open("Missing", &directories).is_err());
    }
}

//! The merge manifest resource.
//!
//! Every merged module carries a `Repack.List` resource listing the display names of the modules
//! it was built from. When an input is itself the output of an earlier merge its manifest is not
//! copied as a resource; its entries are folded into the new manifest instead.
//!
//! Encoding: a 7-bit encoded entry count followed by 7-bit length prefixed UTF-8 display names.

use std::collections::HashSet;

use crate::{
    file::{
        io::{push_7bit_encoded_int, push_prefixed_string_utf8},
        parser::Parser,
    },
    metadata::{flags::ManifestResourceAttributes, module::{Module, Resource}},
    Result,
};

/// Name of the merge manifest resource.
pub const MANIFEST_RESOURCE: &str = "Repack.List";

/// Encodes manifest entries.
#[must_use]
pub fn encode(entries: &[String]) -> Vec<u8> {
    let mut buffer = Vec::new();
    push_7bit_encoded_int(&mut buffer, entries.len() as u32);
    for entry in entries {
        push_prefixed_string_utf8(&mut buffer, entry);
    }
    buffer
}

/// Decodes manifest entries.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged data.
pub fn decode(data: &[u8]) -> Result<Vec<String>> {
    let mut parser = Parser::new(data);
    let count = parser.read_7bit_encoded_int()? as usize;
    if count > parser.len() - parser.pos() {
        return Err(malformed_error!("Manifest entry count {} exceeds data", count));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(parser.read_prefixed_string_utf8()?);
    }
    Ok(entries)
}

/// Reads the manifest embedded in `module`, if any.
///
/// # Errors
/// Returns a decoding error if the embedded manifest is damaged.
pub fn read(module: &Module) -> Result<Option<Vec<String>>> {
    module
        .resources
        .iter()
        .find(|resource| resource.name == MANIFEST_RESOURCE)
        .map(|resource| decode(&resource.data))
        .transpose()
}

/// Builds the manifest resource for a merge of `inputs`: each input's display name followed by
/// the entries of its own manifest, duplicates removed.
///
/// # Errors
/// Returns a decoding error if an input carries a damaged manifest.
pub fn build<'a>(inputs: impl IntoIterator<Item = &'a Module>) -> Result<Resource> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for module in inputs {
        let own = module.identity.display_name();
        let folded = read(module)?.unwrap_or_default();
        for entry in std::iter::once(own).chain(folded) {
            if seen.insert(entry.clone()) {
                entries.push(entry);
            }
        }
    }

    Ok(Resource {
        name: MANIFEST_RESOURCE.to_string(),
        flags: ManifestResourceAttributes::PRIVATE,
        data: encode(&entries),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{builder::ModuleBuilder, module::ModuleKind};

    #[test]
    fn test_manifest_folds_nested_merges() {
        let inner = build([
            &ModuleBuilder::new("Lib", ModuleKind::Dll).build().unwrap(),
            &ModuleBuilder::new("Util", ModuleKind::Dll).build().unwrap(),
        ])
        .unwrap();

        let app = ModuleBuilder::new("App", ModuleKind::Exe).build().unwrap();
        let mut repacked = ModuleBuilder::new("Lib", ModuleKind::Dll).build().unwrap();
        repacked.resources.push(inner);

        let manifest = build([&app, &repacked]).unwrap();
        assert_eq!(manifest.flags, ManifestResourceAttributes::PRIVATE);

        let entries = decode(&manifest.data).unwrap();
        let names = entries
            .iter()
            .map(|entry| entry.split(',').next().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["App", "Lib", "Util"]);
    }

    #[test]
    fn test_damaged_manifest() {
        assert!(decode(&[0x05, 0x01]).is_err());
        assert!(decode(&[0x01, 0x04, b'a']).is_err());
        assert_eq!(decode(&encode(&[])).unwrap(), Vec::<String>::new());
    }
}

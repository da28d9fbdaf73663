//! Attribute bitflags for types, members and resources (ECMA-335 II.23.1).

use bitflags::bitflags;

/// Bitmask for type visibility extraction
pub const TYPE_VISIBILITY_MASK: u32 = 0x0007;
/// Bitmask for member access extraction (fields and methods)
pub const MEMBER_ACCESS_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Type attributes (`TypeAttributes`)
    pub struct TypeAttributes: u32 {
        /// Not visible outside the module
        const NOT_PUBLIC = 0x0000;
        /// Visible outside the module
        const PUBLIC = 0x0001;
        /// Nested, public
        const NESTED_PUBLIC = 0x0002;
        /// Nested, private
        const NESTED_PRIVATE = 0x0003;
        /// Nested, family
        const NESTED_FAMILY = 0x0004;
        /// Nested, assembly
        const NESTED_ASSEMBLY = 0x0005;
        /// Nested, family and assembly
        const NESTED_FAM_AND_ASSEM = 0x0006;
        /// Nested, family or assembly
        const NESTED_FAM_OR_ASSEM = 0x0007;
        /// Type is an interface
        const INTERFACE = 0x0020;
        /// Type is abstract
        const ABSTRACT = 0x0080;
        /// Type cannot be extended
        const SEALED = 0x0100;
        /// Name is special
        const SPECIAL_NAME = 0x0400;
        /// Type is serializable
        const SERIALIZABLE = 0x2000;
        /// Initialize before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

impl TypeAttributes {
    /// The visibility bits
    #[must_use]
    pub fn visibility(self) -> u32 {
        self.bits() & TYPE_VISIBILITY_MASK
    }

    /// Returns `true` for top-level public types
    #[must_use]
    pub fn is_public(self) -> bool {
        self.visibility() == Self::PUBLIC.bits()
    }

    /// Returns a copy with the visibility replaced by `visibility`
    #[must_use]
    pub fn with_visibility(self, visibility: TypeAttributes) -> Self {
        Self::from_bits_retain(
            (self.bits() & !TYPE_VISIBILITY_MASK) | (visibility.bits() & TYPE_VISIBILITY_MASK),
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method attributes (`MethodAttributes`)
    pub struct MethodAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types in the same module
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible within the module
        const ASSEMBLY = 0x0003;
        /// Accessible by sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types and the module
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Cannot be overridden
        const FINAL = 0x0020;
        /// Virtual dispatch
        const VIRTUAL = 0x0040;
        /// Hides by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Always gets a new vtable slot
        const NEW_SLOT = 0x0100;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Name is special
        const SPECIAL_NAME = 0x0800;
        /// Name is special to the runtime
        const RT_SPECIAL_NAME = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field attributes (`FieldAttributes`)
    pub struct FieldAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible within the module
        const ASSEMBLY = 0x0003;
        /// Accessible by sub-types
        const FAMILY = 0x0004;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Only initialized, not written after
        const INIT_ONLY = 0x0020;
        /// Compile time constant
        const LITERAL = 0x0040;
        /// Not serialized
        const NOT_SERIALIZED = 0x0080;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// All possible flags for `ManifestResourceAttributes`
    pub struct ManifestResourceAttributes: u32 {
        /// The Resource is exported from the module
        const PUBLIC = 0x0001;
        /// The Resource is private to the module
        const PRIVATE = 0x0002;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_visibility() {
        let flags = TypeAttributes::PUBLIC | TypeAttributes::SEALED | TypeAttributes::SERIALIZABLE;
        assert!(flags.is_public());

        let internal = flags.with_visibility(TypeAttributes::NOT_PUBLIC);
        assert!(!internal.is_public());
        assert!(internal.contains(TypeAttributes::SEALED | TypeAttributes::SERIALIZABLE));

        assert!(!TypeAttributes::NESTED_PRIVATE.is_public());
    }
}

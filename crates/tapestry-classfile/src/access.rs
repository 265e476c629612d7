//! Access and property flags for classes, fields and methods

#![allow(missing_docs)]

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_VOLATILE: u16 = 0x0040;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_TRANSIENT: u16 = 0x0080;
pub const ACC_VARARGS: u16 = 0x0080;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_STRICT: u16 = 0x0800;
pub const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_ANNOTATION: u16 = 0x2000;
pub const ACC_ENUM: u16 = 0x4000;
pub const ACC_MODULE: u16 = 0x8000;

/// Bits that make up a member's visibility
pub const VISIBILITY_MASK: u16 = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED;

/// Raw `access_flags` word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn with(self, flag: u16) -> Self {
        AccessFlags(self.0 | flag)
    }

    pub fn without(self, flag: u16) -> Self {
        AccessFlags(self.0 & !flag)
    }

    /// Public, protected and private bits only
    pub fn visibility(self) -> u16 {
        self.0 & VISIBILITY_MASK
    }

    pub fn is_public(self) -> bool {
        self.contains(ACC_PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(ACC_PRIVATE)
    }

    pub fn is_protected(self) -> bool {
        self.contains(ACC_PROTECTED)
    }

    pub fn is_static(self) -> bool {
        self.contains(ACC_STATIC)
    }

    pub fn is_final(self) -> bool {
        self.contains(ACC_FINAL)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(ACC_ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.contains(ACC_INTERFACE)
    }

    pub fn is_enum(self) -> bool {
        self.contains(ACC_ENUM)
    }

    pub fn is_native(self) -> bool {
        self.contains(ACC_NATIVE)
    }

    pub fn is_synthetic(self) -> bool {
        self.contains(ACC_SYNTHETIC)
    }

    /// Only meaningful for methods
    pub fn is_bridge(self) -> bool {
        self.contains(ACC_BRIDGE)
    }
}

impl From<u16> for AccessFlags {
    fn from(bits: u16) -> Self {
        AccessFlags(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_bits() {
        let flags = AccessFlags(ACC_PUBLIC | ACC_STATIC | ACC_FINAL);
        assert_eq!(flags.visibility(), ACC_PUBLIC);
        assert!(flags.is_static());
        assert!(!flags.without(ACC_STATIC).is_static());
        assert!(flags.with(ACC_SYNTHETIC).is_synthetic());
    }
}

//! Weave violations
//!
//! A violation is a reason a weave class cannot be applied to a candidate.
//! Matching collects every violation it finds instead of stopping at the
//! first, so authors see the whole list at once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed catalogue of violation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    ClassWeaveIsInterface,
    ClassAccessMismatch,
    ClassExtendsIllegalSuperclass,
    ClassImplementsIllegalInterface,
    ClassNestedNonstaticUnsupported,
    ClassNestedImplicitOuterAccessUnsupported,
    ClassMissingRequiredAnnotations,
    ClassScalaTraitUnsupported,
    IncompatibleBytecodeVersion,
    EnumNewField,
    MissingOriginalBytecode,
    IllegalClassName,
    InvalidReference,
    MethodConflict,
    FieldTypeMismatch,
    FieldFinalMismatch,
    FieldStaticMismatch,
    FieldAccessMismatch,
    FieldPrivateBaseClassMatch,
    FieldSerialversionuidUnsupported,
    FieldFinalAssignment,
    FieldMissing,
    FieldNewAlreadyExists,
    MethodCallOriginalAllowedOnlyOnce,
    MethodCallOriginalIllegalReturnType,
    MethodExactAbstractWeave,
    MethodBaseConcreteWeave,
    MethodIndirectInterfaceWeave,
    MethodMissingRequiredAnnotations,
    MethodThrowsMismatch,
    MethodReturntypeMismatch,
    MethodStaticMismatch,
    MethodAccessMismatch,
    MethodNativeUnsupported,
    MethodSyntheticWeaveIllegal,
    MethodNewCallOriginalUnsupported,
    MethodNewInvokeUnsupported,
    MethodNewAbstractUnsupported,
    MethodNewNonPrivateUnsupported,
    InitNewUnsupported,
    InitWithArgsInterfaceMatchUnsupported,
    InitWeaveAllNoOtherInitAllowed,
    InitWeaveAllWithArgsProhibited,
    InitIllegalCallOriginal,
    ClinitMatchedFieldModificationUnsupported,
    ClinitFieldAccessViolation,
    ClinitMethodAccessViolation,
}

impl ViolationKind {
    /// Every kind, in declaration order
    pub const ALL: [ViolationKind; 47] = [
        ViolationKind::ClassWeaveIsInterface,
        ViolationKind::ClassAccessMismatch,
        ViolationKind::ClassExtendsIllegalSuperclass,
        ViolationKind::ClassImplementsIllegalInterface,
        ViolationKind::ClassNestedNonstaticUnsupported,
        ViolationKind::ClassNestedImplicitOuterAccessUnsupported,
        ViolationKind::ClassMissingRequiredAnnotations,
        ViolationKind::ClassScalaTraitUnsupported,
        ViolationKind::IncompatibleBytecodeVersion,
        ViolationKind::EnumNewField,
        ViolationKind::MissingOriginalBytecode,
        ViolationKind::IllegalClassName,
        ViolationKind::InvalidReference,
        ViolationKind::MethodConflict,
        ViolationKind::FieldTypeMismatch,
        ViolationKind::FieldFinalMismatch,
        ViolationKind::FieldStaticMismatch,
        ViolationKind::FieldAccessMismatch,
        ViolationKind::FieldPrivateBaseClassMatch,
        ViolationKind::FieldSerialversionuidUnsupported,
        ViolationKind::FieldFinalAssignment,
        ViolationKind::FieldMissing,
        ViolationKind::FieldNewAlreadyExists,
        ViolationKind::MethodCallOriginalAllowedOnlyOnce,
        ViolationKind::MethodCallOriginalIllegalReturnType,
        ViolationKind::MethodExactAbstractWeave,
        ViolationKind::MethodBaseConcreteWeave,
        ViolationKind::MethodIndirectInterfaceWeave,
        ViolationKind::MethodMissingRequiredAnnotations,
        ViolationKind::MethodThrowsMismatch,
        ViolationKind::MethodReturntypeMismatch,
        ViolationKind::MethodStaticMismatch,
        ViolationKind::MethodAccessMismatch,
        ViolationKind::MethodNativeUnsupported,
        ViolationKind::MethodSyntheticWeaveIllegal,
        ViolationKind::MethodNewCallOriginalUnsupported,
        ViolationKind::MethodNewInvokeUnsupported,
        ViolationKind::MethodNewAbstractUnsupported,
        ViolationKind::MethodNewNonPrivateUnsupported,
        ViolationKind::InitNewUnsupported,
        ViolationKind::InitWithArgsInterfaceMatchUnsupported,
        ViolationKind::InitWeaveAllNoOtherInitAllowed,
        ViolationKind::InitWeaveAllWithArgsProhibited,
        ViolationKind::InitIllegalCallOriginal,
        ViolationKind::ClinitMatchedFieldModificationUnsupported,
        ViolationKind::ClinitFieldAccessViolation,
        ViolationKind::ClinitMethodAccessViolation,
    ];

    /// Human readable explanation
    pub fn message(self) -> &'static str {
        use ViolationKind::*;
        match self {
            ClassWeaveIsInterface => "Weave classes may not be interfaces",
            ClassAccessMismatch => "Weave class visibility differs from the original class",
            ClassExtendsIllegalSuperclass => "Weave class must extend java.lang.Object or the original superclass",
            ClassImplementsIllegalInterface => "Weave class implements an interface the original does not",
            ClassNestedNonstaticUnsupported => "Non-static nested weave classes are not supported",
            ClassNestedImplicitOuterAccessUnsupported => {
                "Weave code may not use synthetic accessors of an enclosing class"
            }
            ClassMissingRequiredAnnotations => "Class lacks the annotations weaving requires",
            ClassScalaTraitUnsupported => "Scala traits cannot be woven",
            IncompatibleBytecodeVersion => "Class file version is newer than the weaver supports",
            EnumNewField => "Enum weaves may not add new fields",
            MissingOriginalBytecode => "Bytecode of the original class could not be found",
            IllegalClassName => "Target class name must be an internal name",
            InvalidReference => "Weave code references a member the class path does not provide",
            MethodConflict => "Another weave already replaces this method",
            FieldTypeMismatch => "Matched field type differs from the original",
            FieldFinalMismatch => "Matched field final modifier differs from the original",
            FieldStaticMismatch => "Matched field static modifier differs from the original",
            FieldAccessMismatch => "Matched field visibility differs from the original",
            FieldPrivateBaseClassMatch => "Base class weaves may not match private fields",
            FieldSerialversionuidUnsupported => "serialVersionUID may not be declared by a weave",
            FieldFinalAssignment => "Weave constructors may not assign final matched fields",
            FieldMissing => "Matched field does not exist on the original",
            FieldNewAlreadyExists => "New field already exists on the original",
            MethodCallOriginalAllowedOnlyOnce => "callOriginal may appear at most once per method",
            MethodCallOriginalIllegalReturnType => "callOriginal result is cast to an incompatible type",
            MethodExactAbstractWeave => "Exact weaves may not replace abstract methods",
            MethodBaseConcreteWeave => "Base class weaves may only replace abstract inherited methods",
            MethodIndirectInterfaceWeave => "Methods inherited only through interfaces cannot be woven",
            MethodMissingRequiredAnnotations => "Candidate method lacks the annotations the weave requires",
            MethodThrowsMismatch => "Weave method declares exceptions the original does not",
            MethodReturntypeMismatch => "Weave method return type differs from the original",
            MethodStaticMismatch => "Weave method static modifier differs from the original",
            MethodAccessMismatch => "Weave method visibility differs from the original",
            MethodNativeUnsupported => "Native methods cannot be woven",
            MethodSyntheticWeaveIllegal => "Weave methods named like synthetic accessors must be synthetic",
            MethodNewCallOriginalUnsupported => "New methods may not call callOriginal",
            MethodNewInvokeUnsupported => "Weave code may not invoke new non-private methods",
            MethodNewAbstractUnsupported => "New methods may not be abstract",
            MethodNewNonPrivateUnsupported => "New methods must be private",
            InitNewUnsupported => "Weave constructors must match an existing constructor",
            InitWithArgsInterfaceMatchUnsupported => "Interface weaves may only declare a no-argument constructor",
            InitWeaveAllNoOtherInitAllowed => "WeaveAllConstructors forbids other constructors in the weave",
            InitWeaveAllWithArgsProhibited => "WeaveAllConstructors requires a no-argument constructor",
            InitIllegalCallOriginal => "callOriginal in a constructor may only initialise a matched field",
            ClinitMatchedFieldModificationUnsupported => "Static initialisers may not assign matched fields",
            ClinitFieldAccessViolation => "Static initialisers may only read public matched fields",
            ClinitMethodAccessViolation => "Static initialisers may only call public matched methods",
        }
    }

    /// Wire name, e.g. `METHOD_CONFLICT`
    pub fn name(self) -> String {
        let mut out = String::new();
        for (i, ch) in format!("{:?}", self).chars().enumerate() {
            if ch.is_ascii_uppercase() && i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_uppercase());
        }
        out
    }

    /// Kind with the given wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// What went wrong
    pub kind: ViolationKind,
    /// Weave class that caused it
    pub weave_class: String,
    /// Candidate class being matched, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_class: Option<String>,
    /// Member involved, as `name` or `name(descriptor)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Extra context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Violation {
    pub fn new(kind: ViolationKind, weave_class: impl Into<String>) -> Self {
        Self {
            kind,
            weave_class: weave_class.into(),
            candidate_class: None,
            member: None,
            detail: None,
        }
    }

    pub fn candidate(mut self, candidate: impl Into<String>) -> Self {
        self.candidate_class = Some(candidate.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn method(self, name: &str, descriptor: &str) -> Self {
        self.member(format!("{}{}", name, descriptor))
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}", self.kind, self.kind.message(), self.weave_class)?;
        if let Some(candidate) = &self.candidate_class {
            write!(f, " -> {}", candidate)?;
        }
        if let Some(member) = &self.member {
            write!(f, " {}", member)?;
        }
        f.write_str("]")?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

//! The register database: an owned model of every definition loaded
//! from a set of XML documents, plus the queries over it.
//!
//! Loading happens in two passes. [`Database::load_file`] builds the
//! raw trees exactly as written, merging duplicate top-level
//! definitions by name. [`Database::prepare`] then resolves type and
//! prefix references, expands `use-group` placements, computes bit
//! masks and fully qualified names, and prunes definitions that are
//! dead under the active variants.

use std::path::PathBuf;

use tracing::error;

use crate::error::Error;

mod parse;
mod prepare;
mod xml;

/// Owner of every loaded definition.
///
/// Definitions keep their order of appearance. The sticky error flag
/// latches on the first diagnosed problem and never clears; loading
/// and preparation always run to completion so a single pass reports
/// as much as possible.
#[derive(Clone, Debug, Default)]
pub struct Database {
    pub enums: Vec<Enum>,
    pub bitsets: Vec<Bitset>,
    pub groups: Vec<Group>,
    pub domains: Vec<Domain>,
    /// Resolved paths already ingested, which breaks `<import>` cycles.
    files: Vec<PathBuf>,
    errored: bool,
}

impl Database {
    pub fn new() -> Database {
        Database::default()
    }

    /// Look up a non-inline enum by name.
    ///
    /// Inline enums are anonymous at their use sites and are left out
    /// of the public name table, so they always come back as not found.
    pub fn find_enum(&self, name: &str) -> Option<&Enum> {
        self.enums.iter().find(|e| !e.is_inline && e.name == name)
    }

    /// Look up a non-inline bitset by name.
    pub fn find_bitset(&self, name: &str) -> Option<&Bitset> {
        self.bitsets.iter().find(|b| !b.is_inline && b.name == name)
    }

    /// Look up a domain by name.
    pub fn find_domain(&self, name: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.name == name)
    }

    /// True once any load or preparation step has diagnosed a problem.
    /// Monotonic for the lifetime of the database.
    pub fn has_errors(&self) -> bool {
        self.errored
    }

    /// Render a diagnostic and latch the sticky flag.
    pub(crate) fn report(&mut self, err: Error) {
        error!("{err}");
        self.errored = true;
    }

    /// Position of an enum by name, inline ones included. Preparation
    /// resolves through this so that inline definitions stay reachable
    /// for expansion even though `find_enum` hides them.
    pub(crate) fn enum_index(&self, name: &str) -> Option<usize> {
        self.enums.iter().position(|e| e.name == name)
    }

    pub(crate) fn bitset_index(&self, name: &str) -> Option<usize> {
        self.bitsets.iter().position(|b| b.name == name)
    }
}

/// Variant state attached to every definition that can be pruned.
///
/// The `*_name` / `*_expr` fields hold the raw attributes; everything
/// else is filled in by preparation. `prefix_enum` indexes into
/// [`Database::enums`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariantInfo {
    pub prefix_name: Option<String>,
    pub varset_name: Option<String>,
    pub variants_expr: Option<String>,
    pub prefix_enum: Option<usize>,
    pub varsets: Vec<VarSet>,
    /// Set when no variant slot survives the selection; a dead
    /// definition contributes no names and its children are skipped.
    pub dead: bool,
    /// Name of the first active value of the prefix enum, prepended to
    /// the fullname of whatever carries this record.
    pub prefix: Option<String>,
}

/// Per-enum activation bitmap. One slot per enum value; after
/// preparation a non-zero slot means the value is active in this
/// definition's context.
#[derive(Clone, Debug, PartialEq)]
pub struct VarSet {
    /// Index of the enum the slots describe, into [`Database::enums`].
    pub enum_ref: usize,
    pub variants: Vec<u8>,
}

impl VarSet {
    pub fn is_active(&self, idx: usize) -> bool {
        self.variants.get(idx).is_some_and(|slot| *slot != 0)
    }
}

/// A named set of symbolic integer values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Enum {
    pub name: String,
    /// Defined anonymously at a use site; expanded into the referring
    /// type instead of being referenced.
    pub is_inline: bool,
    /// Suppresses the enum name when value fullnames are derived.
    pub bare: bool,
    pub varinfo: VariantInfo,
    pub values: Vec<Value>,
    pub fullname: Option<String>,
    pub(crate) prepared: bool,
}

/// One enum value. A missing integer is legal and stands for a
/// symbolic alias.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Value {
    pub name: String,
    pub value: Option<u64>,
    pub varinfo: VariantInfo,
    pub fullname: Option<String>,
}

/// A named collection of bit ranges within a machine word.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bitset {
    pub name: String,
    pub is_inline: bool,
    pub bare: bool,
    pub varinfo: VariantInfo,
    pub bitfields: Vec<Bitfield>,
    pub fullname: Option<String>,
}

/// A contiguous bit range, `low..=high`, with `high` at most 63.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bitfield {
    pub name: String,
    pub low: u32,
    pub high: u32,
    pub varinfo: VariantInfo,
    pub typeinfo: TypeInfo,
    /// All bits of `low..=high` set; computed during preparation.
    pub mask: u64,
    pub fullname: Option<String>,
}

/// Value interpretation attached to registers and bitfields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeInfo {
    pub shr: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub align: Option<u64>,
    pub types: Vec<TypeRef>,
    /// Values declared at the use site, plus any copied out of inline
    /// enums during preparation.
    pub vals: Vec<Value>,
    /// Bitfields declared at the use site, plus any copied out of
    /// inline bitsets during preparation.
    pub bitfields: Vec<Bitfield>,
}

/// One name out of a `type` attribute and what it resolved to.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeRef {
    pub name: String,
    pub kind: TypeKind,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeKind {
    /// Not an enum or bitset; typically a primitive such as `uint`.
    #[default]
    Other,
    /// A non-inline enum, by index into [`Database::enums`].
    Enum(usize),
    /// An inline enum whose values were copied into the referring
    /// [`TypeInfo`].
    InlineEnum,
    /// A non-inline bitset, by index into [`Database::bitsets`].
    Bitset(usize),
    /// An inline bitset whose bitfields were copied into the referring
    /// [`TypeInfo`].
    InlineBitset,
}

/// A reusable named fragment of domain elements, inlined wherever a
/// `use-group` names it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Group {
    pub name: String,
    pub subelems: Vec<Delem>,
}

/// A named address space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Domain {
    pub name: String,
    pub size: Option<u64>,
    /// Bits per addressable unit; offsets and strides count these.
    pub width: u64,
    /// Suppresses the domain name in subelement fullnames.
    pub bare: bool,
    pub varinfo: VariantInfo,
    pub subelems: Vec<Delem>,
    pub fullname: Option<String>,
}

/// Placement kind of a domain element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    /// A single register, possibly repeated `length` times.
    Register,
    /// A repeated block with an explicit or inferred stride.
    Array,
    /// A block laid directly over its parent's address space.
    Stripe,
    /// A reference to a named group; preparation rewrites it to
    /// [`ElementKind::Stripe`] with the group's elements deep-copied in.
    UseGroup,
}

/// Hardware access policy of a register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Access {
    #[strum(serialize = "r")]
    Read,
    #[strum(serialize = "w")]
    Write,
    #[default]
    #[strum(serialize = "rw")]
    ReadWrite,
}

/// Width in bits of a register cell. Variants carry a `W` prefix since
/// an identifier can't start with a digit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterWidth {
    W8,
    W16,
    W32,
    W64,
}

impl RegisterWidth {
    pub fn bits(self) -> u64 {
        match self {
            RegisterWidth::W8 => 8,
            RegisterWidth::W16 => 16,
            RegisterWidth::W32 => 32,
            RegisterWidth::W64 => 64,
        }
    }
}

/// One element of a domain tree: a register, array, stripe or
/// (pre-preparation) use-group placement.
#[derive(Clone, Debug, PartialEq)]
pub struct Delem {
    pub kind: ElementKind,
    pub name: Option<String>,
    pub offset: u64,
    pub length: u64,
    pub stride: u64,
    /// Only registers carry a width.
    pub width: Option<RegisterWidth>,
    pub access: Access,
    pub varinfo: VariantInfo,
    pub typeinfo: TypeInfo,
    pub subelems: Vec<Delem>,
    pub fullname: Option<String>,
}

impl Delem {
    pub fn new(kind: ElementKind) -> Delem {
        Delem {
            kind,
            name: None,
            offset: 0,
            length: 1,
            stride: 0,
            width: None,
            access: Access::default(),
            varinfo: VariantInfo::default(),
            typeinfo: TypeInfo::default(),
            subelems: Vec::new(),
            fullname: None,
        }
    }
}

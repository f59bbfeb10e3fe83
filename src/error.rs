use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong across the database loader and the
/// BIOS decoders.
///
/// Most failures are rendered into diagnostics and latched on the
/// database's sticky flag while processing continues; only operations
/// that fail as a unit (an unknown DP INFO version, for instance)
/// return one of these directly. `context` is a `file:line` pair for
/// document diagnostics or the fully qualified name of the definition
/// being prepared.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The document could not be opened, or was not well-formed XML.
    #[error("{path}: couldn't open database file: {detail}", path = .path.display())]
    IoOpen { path: PathBuf, detail: String },

    /// An unknown tag or attribute, or a malformed literal.
    #[error("{context}: {message}")]
    Syntax { context: String, message: String },

    /// A structurally invalid definition: nameless entities, bad bit
    /// placement, merge mismatches, a missing import target.
    #[error("{context}: {message}")]
    Schema { context: String, message: String },

    /// A name that should resolve against loaded definitions does not.
    #[error("{context}: {message}")]
    Reference { context: String, message: String },

    /// A BIOS read landed outside the image.
    #[error("read past end of BIOS image at {offset:#x}")]
    BinaryBounds { offset: u32 },

    /// A DP INFO header advertises a version this decoder doesn't know.
    #[error("unknown DP INFO table version {version:#x} at {offset:#x}")]
    UnknownVersion { offset: u32, version: u8 },
}

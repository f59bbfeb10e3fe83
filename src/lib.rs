//! Declarative hardware register databases plus BIOS table decoding.
//!
//! The [`db`] module loads XML register-database documents (enums,
//! bitsets, register groups and domains, all parameterised by variant
//! selectors) and prepares them into a fully resolved in-memory model.
//! The [`bios`] module decodes the versioned "d" (DP INFO) sub-table
//! out of a raw BIOS image.
//!
//! Both halves are pure readers: they never touch hardware and never
//! write anything back. Malformed input is diagnosed through `tracing`
//! and latched on the database's sticky error flag; decoding keeps
//! going so one pass surfaces as many problems as possible.

pub mod bios;
pub mod db;
mod error;

pub use db::Database;
pub use error::Error;

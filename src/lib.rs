#![warn(rust_2018_idioms)]

//! Reading, validating and writing of OpenType, AAT and CFF binary tables.
//!
//! Tables are read strictly through [`binary::read::ReadBinary`] or with diagnostics through
//! [`validate::ReadBinaryValidated`]. Tables that contain offsets are written through a
//! [`binary::linked::LinkedWriter`], which places child objects and resolves offsets once
//! everything has been written.

/// Reading and writing of binary data.
pub mod binary;
pub mod cff;
pub mod context;
pub mod error;
pub mod layout;
pub mod pool;
pub mod size;
pub mod state_table;
pub mod tables;
pub mod tag;
/// Shared test code.
#[cfg(test)]
pub mod tests;
pub mod validate;

//! Shared test code.

include!("../tests/common.rs");

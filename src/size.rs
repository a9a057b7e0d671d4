//! Sizes in bytes of the fixed width binary types.

pub const U16: usize = 2;
pub const U24: usize = 3;

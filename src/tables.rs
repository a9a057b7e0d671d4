//! Apple Advanced Typography table codecs.

pub mod aat;
pub mod kern;
pub mod morx;

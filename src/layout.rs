//! OpenType layout common tables and GPOS single adjustment.

pub mod class_def;
pub mod coverage;
pub mod device;
pub mod morx;
pub mod single_pos;
pub mod value_record;

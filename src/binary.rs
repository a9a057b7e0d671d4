/// Reading of binary data.
pub mod read;

/// Immediate writing of binary data.
pub mod write;

/// Writing of binary data containing offsets that are resolved once the layout is known.
pub mod linked;

// Marker types naming the big-endian encodings used by `read` and `write`.

#[derive(Copy, Clone)]
pub enum U8 {}

#[derive(Copy, Clone)]
pub enum I8 {}

#[derive(Copy, Clone)]
pub enum U16Be {}

#[derive(Copy, Clone)]
pub enum I16Be {}

#[derive(Copy, Clone)]
pub enum U24Be {}

#[derive(Copy, Clone)]
pub enum U32Be {}

#[derive(Copy, Clone)]
pub enum I32Be {}

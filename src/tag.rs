//! Four byte table tags.
//!
//! ```
//! use otcodec::tag;
//!
//! assert_eq!(tag::KERN, 0x6B65726E);
//! assert_eq!(tag::DisplayTag(tag::CFF).to_string(), "CFF");
//! ```

use std::fmt;

/// The big-endian value of a four character tag.
pub const fn tag(chars: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*chars)
}

pub const CFF: u32 = tag(b"CFF ");
pub const GPOS: u32 = tag(b"GPOS");
pub const KERN: u32 = tag(b"kern");
pub const MORX: u32 = tag(b"morx");

/// Formats a tag as its characters, or as hex when they are not printable ASCII.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct DisplayTag(pub u32);

impl fmt::Display for DisplayTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
            let text = bytes.iter().map(|&b| char::from(b)).collect::<String>();
            f.write_str(text.trim_end())
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl fmt::Debug for DisplayTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_value() {
        assert_eq!(MORX, 0x6D6F7278);
        assert_eq!(tag(b"GPOS"), GPOS);
    }

    #[test]
    fn test_display() {
        assert_eq!(DisplayTag(KERN).to_string(), "kern");
        // Trailing padding is trimmed
        assert_eq!(DisplayTag(CFF).to_string(), "CFF");
        assert_eq!(DisplayTag(0x12345678).to_string(), "0x12345678");
        assert_eq!(format!("{:?}", DisplayTag(MORX)), "\"morx\"");
    }
}

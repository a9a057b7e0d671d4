//! Device and VariationIndex tables.
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/chapter2#device-and-variationindex-tables>

use std::collections::BTreeMap;

use crate::binary::read::{ReadBinary, ReadCtxt};
use crate::binary::write::{WriteBinary, WriteContext};
use crate::binary::U16Be;
use crate::error::{ParseError, WriteError};
use crate::pool::ImmutableKey;
use crate::validate::{ensure_remaining, Arg, Logger, ReadBinaryValidated};

const VARIATION_INDEX_FORMAT: u16 = 0x8000;

/// Adjustments at specific sizes, or a reference into the item variation store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Device {
    /// Pixel adjustments keyed by ppem. Zero adjustments are not stored.
    Hinting { deltas: BTreeMap<u16, i8> },
    VariationIndex { outer: u16, inner: u16 },
}

/// Bits per delta for hinting formats 1, 2 and 3.
fn delta_bits(format: u16) -> Option<u8> {
    match format {
        1 => Some(2),
        2 => Some(4),
        3 => Some(8),
        _ => None,
    }
}

fn packed_words(count: usize, bits: u8) -> usize {
    (count * usize::from(bits) + 15) / 16
}

impl Device {
    pub fn hinting(deltas: impl IntoIterator<Item = (u16, i8)>) -> Device {
        Device::Hinting {
            deltas: deltas.into_iter().filter(|&(_, delta)| delta != 0).collect(),
        }
    }

    /// The adjustment at `ppem`, zero if there is none.
    pub fn delta(&self, ppem: u16) -> i8 {
        match self {
            Device::Hinting { deltas } => deltas.get(&ppem).copied().unwrap_or(0),
            Device::VariationIndex { .. } => 0,
        }
    }

    /// The smallest hinting format that can hold every delta.
    fn hinting_format(deltas: &BTreeMap<u16, i8>) -> u16 {
        let (min, max) = deltas
            .values()
            .fold((0, 0), |(min, max), &delta| (delta.min(min), delta.max(max)));
        if min >= -2 && max <= 1 {
            1
        } else if min >= -8 && max <= 7 {
            2
        } else {
            3
        }
    }
}

impl ImmutableKey for Device {
    type Key = Device;

    fn immutable_key(&self) -> Device {
        self.clone()
    }
}

fn read_hinting(
    ctxt: &mut ReadCtxt<'_>,
    start_size: u16,
    end_size: u16,
    bits: u8,
) -> Result<Device, ParseError> {
    let count = usize::from(end_size - start_size) + 1;
    let mut fields = ctxt.read_bit_fields(packed_words(count, bits) * 2)?;
    let mut deltas = BTreeMap::new();
    for ppem in start_size..=end_size {
        // NOTE(cast): at most 8 bits are taken
        let delta = fields.take_signed(bits)? as i8;
        if delta != 0 {
            deltas.insert(ppem, delta);
        }
    }
    Ok(Device::Hinting { deltas })
}

impl ReadBinary for Device {
    type HostType<'a> = Device;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Device, ParseError> {
        let start_size = ctxt.read_u16be()?;
        let end_size = ctxt.read_u16be()?;
        let format = ctxt.read_u16be()?;
        if format == VARIATION_INDEX_FORMAT {
            return Ok(Device::VariationIndex {
                outer: start_size,
                inner: end_size,
            });
        }
        let bits = delta_bits(format).ok_or(ParseError::BadVersion)?;
        ctxt.check(start_size <= end_size)?;
        read_hinting(ctxt, start_size, end_size, bits)
    }
}

impl ReadBinaryValidated for Device {
    fn read_validated<'a>(ctxt: &mut ReadCtxt<'a>, logger: &Logger) -> Option<Device> {
        let logger = logger.child("device");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        if !ensure_remaining(ctxt, &logger, 6) {
            return None;
        }
        let position = ctxt.position();
        let start_size = ctxt.read_u16be().ok()?;
        let end_size = ctxt.read_u16be().ok()?;
        let format = ctxt.read_u16be().ok()?;
        if format == VARIATION_INDEX_FORMAT {
            return Some(Device::VariationIndex {
                outer: start_size,
                inner: end_size,
            });
        }
        logger.debug(
            "V0095",
            "StartSize={}, endSize={}, format={}",
            vec![
                Arg::from(start_size),
                Arg::from(end_size),
                Arg::from(format),
            ],
        );
        if start_size > end_size {
            logger.error_at(
                position,
                "E5202",
                "Start size is greater than end size.",
                Vec::new(),
            );
            return None;
        }
        let bits = match delta_bits(format) {
            Some(bits) => bits,
            None => {
                logger.error_at(
                    position + 4,
                    "E5200",
                    "Unknown format: {}.",
                    vec![Arg::from(format)],
                );
                return None;
            }
        };
        match read_hinting(ctxt, start_size, end_size, bits) {
            Ok(device) => Some(device),
            Err(_) => {
                logger.error_at(
                    ctxt.position(),
                    "E5201",
                    "Insufficient bytes for compressed table.",
                    Vec::new(),
                );
                None
            }
        }
    }
}

impl WriteBinary<&Self> for Device {
    type Output = ();

    /// Write the device table, packing hinting deltas as tightly as they allow.
    fn write<C: WriteContext>(ctxt: &mut C, device: &Device) -> Result<(), WriteError> {
        match device {
            Device::VariationIndex { outer, inner } => {
                U16Be::write(ctxt, *outer)?;
                U16Be::write(ctxt, *inner)?;
                U16Be::write(ctxt, VARIATION_INDEX_FORMAT)?;
            }
            Device::Hinting { deltas } => {
                let start_size = deltas.keys().next().copied().unwrap_or(0);
                let end_size = deltas.keys().next_back().copied().unwrap_or(0);
                let format = Device::hinting_format(deltas);
                U16Be::write(ctxt, start_size)?;
                U16Be::write(ctxt, end_size)?;
                U16Be::write(ctxt, format)?;

                // NOTE(unwrap): hinting_format only returns formats 1 to 3
                let bits = delta_bits(format).unwrap();
                let per_word = 16 / bits;
                let values = (start_size..=end_size)
                    .map(|ppem| deltas.get(&ppem).copied().unwrap_or(0))
                    .collect::<Vec<_>>();
                for chunk in values.chunks(usize::from(per_word)) {
                    let mut word = 0u16;
                    for (i, &delta) in (0u8..).zip(chunk) {
                        let mask = (1u16 << bits) - 1;
                        let shift = 16 - bits * (i + 1);
                        word |= (delta as u16 & mask) << shift;
                    }
                    U16Be::write(ctxt, word)?;
                }
            }
        }
        Ok(())
    }
}

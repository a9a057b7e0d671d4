//! Positioning value records and their formats.
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/gpos#value-record>

use bitflags::bitflags;

use crate::binary::linked::{LinkedWriter, Stake};
use crate::binary::read::{ReadBinary, ReadBinaryDep, ReadCtxt, ReadFixedSizeDep, ReadScope};
use crate::binary::write::{WriteBinary, WriteContext};
use crate::binary::{I16Be, U16Be};
use crate::error::{ParseError, WriteError};
use crate::layout::device::Device;
use crate::pool::Pool;
use crate::size;
use crate::validate::{Arg, Logger, ReadBinaryDepValidated};

bitflags! {
    /// The fields present in a value record.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ValueFormat: u16 {
        const X_PLACEMENT = 0x0001;
        const Y_PLACEMENT = 0x0002;
        const X_ADVANCE = 0x0004;
        const Y_ADVANCE = 0x0008;
        const X_PLACEMENT_DEVICE = 0x0010;
        const Y_PLACEMENT_DEVICE = 0x0020;
        const X_ADVANCE_DEVICE = 0x0040;
        const Y_ADVANCE_DEVICE = 0x0080;
    }
}

impl ValueFormat {
    /// Size in bytes of a record written in this format.
    pub fn size(self) -> usize {
        self.bits().count_ones() as usize * size::U16
    }
}

impl ReadBinary for ValueFormat {
    type HostType<'a> = Self;

    fn read<'a>(ctxt: &mut ReadCtxt<'a>) -> Result<Self, ParseError> {
        let value_format = ctxt.read_u16be()?;
        ValueFormat::from_bits(value_format).ok_or(ParseError::BadValue)
    }
}

impl WriteBinary for ValueFormat {
    type Output = ();

    fn write<C: WriteContext>(ctxt: &mut C, format: ValueFormat) -> Result<(), WriteError> {
        U16Be::write(ctxt, format.bits())
    }
}

/// Placement and advance adjustments for a glyph.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueRecord {
    pub x_placement: i16,
    pub y_placement: i16,
    pub x_advance: i16,
    pub y_advance: i16,
    pub x_placement_device: Option<Device>,
    pub y_placement_device: Option<Device>,
    pub x_advance_device: Option<Device>,
    pub y_advance_device: Option<Device>,
}

impl ValueRecord {
    /// The smallest format that can hold every non-default field of this record.
    pub fn format(&self) -> ValueFormat {
        let mut format = ValueFormat::empty();
        format.set(ValueFormat::X_PLACEMENT, self.x_placement != 0);
        format.set(ValueFormat::Y_PLACEMENT, self.y_placement != 0);
        format.set(ValueFormat::X_ADVANCE, self.x_advance != 0);
        format.set(ValueFormat::Y_ADVANCE, self.y_advance != 0);
        format.set(
            ValueFormat::X_PLACEMENT_DEVICE,
            self.x_placement_device.is_some(),
        );
        format.set(
            ValueFormat::Y_PLACEMENT_DEVICE,
            self.y_placement_device.is_some(),
        );
        format.set(ValueFormat::X_ADVANCE_DEVICE, self.x_advance_device.is_some());
        format.set(ValueFormat::Y_ADVANCE_DEVICE, self.y_advance_device.is_some());
        format
    }

    fn devices(&self) -> [(ValueFormat, &Option<Device>); 4] {
        [
            (ValueFormat::X_PLACEMENT_DEVICE, &self.x_placement_device),
            (ValueFormat::Y_PLACEMENT_DEVICE, &self.y_placement_device),
            (ValueFormat::X_ADVANCE_DEVICE, &self.x_advance_device),
            (ValueFormat::Y_ADVANCE_DEVICE, &self.y_advance_device),
        ]
    }

    /// Write the record in `format`, with device offsets relative to `base`.
    ///
    /// Devices are added to `devices` and must be written by draining it later.
    pub fn write_linked(
        w: &mut LinkedWriter,
        record: &ValueRecord,
        format: ValueFormat,
        base: Stake,
        devices: &mut Pool<Device, Device>,
    ) -> Result<(), WriteError> {
        if !format.contains(record.format()) {
            return Err(WriteError::BadValue);
        }
        let values = [
            (ValueFormat::X_PLACEMENT, record.x_placement),
            (ValueFormat::Y_PLACEMENT, record.y_placement),
            (ValueFormat::X_ADVANCE, record.x_advance),
            (ValueFormat::Y_ADVANCE, record.y_advance),
        ];
        for (flag, value) in values {
            if format.contains(flag) {
                I16Be::write(w, value)?;
            }
        }
        for (flag, device) in record.devices() {
            if !format.contains(flag) {
                continue;
            }
            match device {
                Some(device) => {
                    let stake = devices.add(w, device.clone());
                    w.add_offset16(base, stake)?;
                }
                None => U16Be::write(w, 0u16)?,
            }
        }
        Ok(())
    }
}

fn read_device(base: &ReadScope<'_>, offset: u16) -> Result<Option<Device>, ParseError> {
    match offset {
        0 => Ok(None),
        _ => base.offset(usize::from(offset)).read::<Device>().map(Some),
    }
}

impl ReadBinaryDep for ValueRecord {
    /// The record's format and the scope device offsets are relative to.
    type Args<'a> = (ValueFormat, ReadScope<'a>);
    type HostType<'a> = Self;

    fn read_dep<'a>(
        ctxt: &mut ReadCtxt<'a>,
        (format, base): (ValueFormat, ReadScope<'a>),
    ) -> Result<Self, ParseError> {
        let mut field = |flag: ValueFormat| -> Result<u16, ParseError> {
            if format.contains(flag) {
                Ok(ctxt.read_u16be()?)
            } else {
                Ok(0)
            }
        };
        // NOTE(cast): the placement and advance fields are signed
        let x_placement = field(ValueFormat::X_PLACEMENT)? as i16;
        let y_placement = field(ValueFormat::Y_PLACEMENT)? as i16;
        let x_advance = field(ValueFormat::X_ADVANCE)? as i16;
        let y_advance = field(ValueFormat::Y_ADVANCE)? as i16;
        let x_placement_device = field(ValueFormat::X_PLACEMENT_DEVICE)?;
        let y_placement_device = field(ValueFormat::Y_PLACEMENT_DEVICE)?;
        let x_advance_device = field(ValueFormat::X_ADVANCE_DEVICE)?;
        let y_advance_device = field(ValueFormat::Y_ADVANCE_DEVICE)?;
        Ok(ValueRecord {
            x_placement,
            y_placement,
            x_advance,
            y_advance,
            x_placement_device: read_device(&base, x_placement_device)?,
            y_placement_device: read_device(&base, y_placement_device)?,
            x_advance_device: read_device(&base, x_advance_device)?,
            y_advance_device: read_device(&base, y_advance_device)?,
        })
    }
}

fn read_device_validated(
    base: &ReadScope<'_>,
    offset: u16,
    logger: &Logger,
) -> Option<Option<Device>> {
    match offset {
        0 => Some(None),
        _ => base
            .offset(usize::from(offset))
            .read_validated::<Device>(logger)
            .map(Some),
    }
}

impl ReadBinaryDepValidated for ValueRecord {
    fn read_dep_validated<'a>(
        ctxt: &mut ReadCtxt<'a>,
        (format, base): (ValueFormat, ReadScope<'a>),
        logger: &Logger,
    ) -> Option<Self> {
        let logger = logger.child("value");
        logger.debug(
            "V0001",
            "Walker has {} remaining bytes.",
            vec![Arg::from(ctxt.remaining())],
        );
        let mut field = |flag: ValueFormat, name: &str| -> Option<u16> {
            if !format.contains(flag) {
                return Some(0);
            }
            match ctxt.read_u16be() {
                Ok(value) => Some(value),
                Err(_) => {
                    logger.error_at(
                        ctxt.position(),
                        "V0317",
                        "Insufficient bytes for the '{}' value.",
                        vec![Arg::from(name)],
                    );
                    None
                }
            }
        };
        // NOTE(cast): the placement and advance fields are signed
        let x_placement = field(ValueFormat::X_PLACEMENT, "xPlacement")? as i16;
        let y_placement = field(ValueFormat::Y_PLACEMENT, "yPlacement")? as i16;
        let x_advance = field(ValueFormat::X_ADVANCE, "xAdvance")? as i16;
        let y_advance = field(ValueFormat::Y_ADVANCE, "yAdvance")? as i16;
        let devices = [
            (ValueFormat::X_PLACEMENT_DEVICE, "xPlacementDevice"),
            (ValueFormat::Y_PLACEMENT_DEVICE, "yPlacementDevice"),
            (ValueFormat::X_ADVANCE_DEVICE, "xAdvanceDevice"),
            (ValueFormat::Y_ADVANCE_DEVICE, "yAdvanceDevice"),
        ];
        let mut offsets = [0u16; 4];
        for (offset, (flag, name)) in offsets.iter_mut().zip(devices) {
            *offset = field(flag, name)?;
        }
        let device = |i: usize| {
            read_device_validated(&base, offsets[i], &logger.child(devices[i].1))
        };
        Some(ValueRecord {
            x_placement,
            y_placement,
            x_advance,
            y_advance,
            x_placement_device: device(0)?,
            y_placement_device: device(1)?,
            x_advance_device: device(2)?,
            y_advance_device: device(3)?,
        })
    }
}

impl ReadFixedSizeDep for ValueRecord {
    fn size((format, _): (ValueFormat, ReadScope<'_>)) -> usize {
        format.size()
    }
}

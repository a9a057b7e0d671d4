mod common;

use std::collections::BTreeMap;

use itertools::Itertools;

use common::to_hex;
use otcodec::binary::linked::{LinkedWriter, Stake};
use otcodec::binary::read::ReadScope;
use otcodec::binary::write::WriteContext;
use otcodec::binary::U16Be;
use otcodec::layout::device::Device;
use otcodec::layout::single_pos::SinglePos;
use otcodec::layout::value_record::ValueRecord;
use otcodec::pool::{ImmutableKey, Pool};

#[derive(Clone, Debug)]
struct Glyphs(Vec<u16>);

impl ImmutableKey for Glyphs {
    type Key = Vec<u16>;

    fn immutable_key(&self) -> Vec<u16> {
        self.0.clone()
    }
}

/// Writes a header of offsets, one per name in `names` order, to objects added to the pool in
/// `added` order.
fn write_pooled(names: &[&str], added: &[&str], objects: &BTreeMap<&str, Vec<u16>>) -> Vec<u8> {
    let mut w = LinkedWriter::new();
    let start = w.stake_current();
    let mut pool: Pool<Vec<u16>, Glyphs> = Pool::new();
    let stakes: BTreeMap<&str, Stake> = added
        .iter()
        .map(|name| (*name, pool.add(&mut w, Glyphs(objects[name].clone()))))
        .collect();
    for name in names {
        w.add_offset16(start, stakes[name]).unwrap();
    }
    pool.drain(&mut w, |w, _key, glyphs| {
        w.write_iter::<U16Be, _>(glyphs.0.into_iter())
    })
    .unwrap();
    w.into_bytes().unwrap()
}

#[test]
fn insertion_order_does_not_change_output() {
    let objects: BTreeMap<&str, Vec<u16>> = [
        ("a", vec![5, 6]),
        ("b", vec![1]),
        ("c", vec![9, 9, 9]),
        ("d", vec![1]),
    ]
    .into_iter()
    .collect();
    let names = ["a", "b", "c", "d"];

    let expected = write_pooled(&names, &names, &objects);
    // b and d share an object, written once in key order: [1], [5, 6], [9, 9, 9].
    assert_eq!(
        to_hex(&expected),
        "000A 0008 000E 0008 0001 0005 0006 0009 0009 0009"
    );
    for added in names.iter().copied().permutations(names.len()) {
        assert_eq!(write_pooled(&names, &added, &objects), expected, "{:?}", added);
    }
}

#[test]
fn pool_stakes_are_shared() {
    let mut w = LinkedWriter::new();
    let mut pool: Pool<Vec<u16>, Glyphs> = Pool::new();
    let first = pool.add(&mut w, Glyphs(vec![3, 4]));
    let second = pool.add(&mut w, Glyphs(vec![3, 4]));
    let other = pool.stake(&mut w, vec![7], Glyphs(vec![7]));
    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(pool.len(), 2);
    assert!(pool.contains(&vec![7]));
    assert!(!pool.contains(&vec![3]));
}

#[test]
fn single_pos_devices_written_once() {
    let device = Device::hinting([(12, 1), (13, -1), (14, 1)]);
    let record = |x_placement: i16| ValueRecord {
        x_placement,
        x_placement_device: Some(device.clone()),
        ..ValueRecord::default()
    };
    let single_pos = SinglePos {
        values: [(40, record(10)), (41, record(20)), (50, record(30))]
            .into_iter()
            .collect(),
    };

    let mut w = LinkedWriter::new();
    SinglePos::write_linked(&mut w, &single_pos).unwrap();
    let data = w.into_bytes().unwrap();

    // Three records of placement and device offset after the eight byte header.
    let device_offsets = (0..3)
        .map(|i| &data[8 + 4 * i + 2..8 + 4 * i + 4])
        .collect::<Vec<_>>();
    assert!(device_offsets.iter().all_equal());
    let device_offset =
        usize::from(u16::from_be_bytes([device_offsets[0][0], device_offsets[0][1]]));
    // Header, records, then a three glyph format 1 coverage, then the device.
    assert_eq!(device_offset, 8 + 12 + 10);

    let read = ReadScope::new(&data).read::<SinglePos>().unwrap();
    assert_eq!(read, single_pos);
    assert_eq!(read.apply(41).map(|record| record.x_placement), Some(20));
    assert_eq!(
        read.apply(50)
            .and_then(|record| record.x_placement_device.as_ref())
            .map(|device| device.delta(13)),
        Some(-1)
    );
}

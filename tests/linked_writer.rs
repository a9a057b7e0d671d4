mod common;

use common::{from_hex, to_hex};
use otcodec::binary::linked::{LinkOptions, LinkedWriter, OffsetEncoding};
use otcodec::binary::read::ReadScope;
use otcodec::binary::write::{WriteBinary, WriteContext};
use otcodec::binary::{U16Be, U32Be};
use otcodec::cff::{DictLinks, Index, Operand, Operator, OwnedIndex, PrivateDict, TopDict};
use otcodec::error::WriteError;

/// A header of two offsets from the start: one to a child written after it and one to the
/// header itself.
#[test]
fn forward_and_self_references() {
    let mut w = LinkedWriter::new();
    let start = w.stake_current();
    let child = w.new_stake();
    w.add_offset16(start, child).unwrap();
    w.add_offset32(start, start).unwrap();
    U16Be::write(&mut w, 0xABCDu16).unwrap();
    w.stake_current_with_value(child).unwrap();
    U32Be::write(&mut w, 1u32).unwrap();

    let data = w.into_bytes().unwrap();
    assert_eq!(to_hex(&data), "0008 0000 0000 ABCD 0000 0001");
}

#[test]
fn signed_encodings_allow_backward_offsets() {
    let mut w = LinkedWriter::new();
    let target = w.stake_current();
    w.write_zeros(4).unwrap();
    let base = w.stake_current();
    w.add_offset(base, target, OffsetEncoding::I16, LinkOptions::default())
        .unwrap();
    w.add_offset(base, target, OffsetEncoding::U16, LinkOptions::default())
        .unwrap();
    assert_eq!(w.into_bytes(), Err(WriteError::NegativeOffset));

    let mut w = LinkedWriter::new();
    let target = w.stake_current();
    w.write_zeros(4).unwrap();
    let base = w.stake_current();
    w.add_offset(base, target, OffsetEncoding::I16, LinkOptions::default())
        .unwrap();
    assert_eq!(w.into_bytes().unwrap(), from_hex("0000 0000 FFFC"));
}

#[test]
fn every_stake_must_be_bound() {
    let mut w = LinkedWriter::new();
    let start = w.stake_current();
    let bound = w.new_stake();
    let never = w.new_stake();
    w.add_offset16(start, bound).unwrap();
    w.add_offset16(start, never).unwrap();
    w.stake_current_with_value(bound).unwrap();
    assert!(w.is_bound(bound));
    assert!(!w.is_bound(never));
    assert_eq!(w.into_bytes(), Err(WriteError::UnboundStake(never)));
}

#[test]
fn stake_bound_twice() {
    let mut w = LinkedWriter::new();
    let stake = w.new_stake();
    w.stake_current_with_value(stake).unwrap();
    U16Be::write(&mut w, 1u16).unwrap();
    assert_eq!(
        w.stake_current_with_value(stake),
        Err(WriteError::DuplicateStake(stake))
    );
}

#[test]
fn deferred_value_must_be_set() {
    let mut w = LinkedWriter::new();
    let _count = w.add_deferred::<U16Be, u16>().unwrap();
    U16Be::write(&mut w, 1u16).unwrap();
    assert_eq!(w.into_bytes(), Err(WriteError::DeferredValueUnset));

    let mut w = LinkedWriter::new();
    let count = w.add_deferred::<U16Be, u16>().unwrap();
    w.write_iter::<U16Be, _>([7u16, 8, 9].into_iter()).unwrap();
    w.write_placeholder(count, 3u16).unwrap();
    assert_eq!(to_hex(&w.into_bytes().unwrap()), "0003 0007 0008 0009");
}

/// Writes a Top DICT whose CharStrings offset points past `padding` bytes, followed by a
/// one object CharStrings INDEX. Returns the output and the length of the DICT.
fn dict_then_charstrings(padding: usize) -> (Vec<u8>, usize) {
    let mut w = LinkedWriter::new();
    let start = w.stake_current();
    let charstrings = w.new_stake();

    let mut dict = TopDict::new();
    dict.push(
        Operator::FontBBox,
        vec![
            Operand::Integer(-50),
            Operand::Integer(-200),
            Operand::Integer(1000),
            Operand::Integer(800),
        ],
    );
    let mut links = DictLinks::new();
    links
        .push_offset(Operator::CharStrings, start, charstrings)
        .unwrap();
    TopDict::write_linked(&mut w, &dict, &links).unwrap();
    w.write_zeros(padding).unwrap();
    w.stake_current_with_value(charstrings).unwrap();
    OwnedIndex::write_linked(&mut w, &OwnedIndex::new(vec![b"glyph".to_vec()])).unwrap();

    let data = w.into_bytes().unwrap();
    // The INDEX is count, offSize, two one byte offsets and the object.
    let index_len = 2 + 1 + 2 + 5;
    let dict_len = data.len() - padding - index_len;
    (data, dict_len)
}

#[test]
fn dict_offsets_settle_at_each_operand_width() {
    // The offset needs 1, 2, 3 and 5 byte operands across these paddings.
    let mut lengths = Vec::new();
    for padding in [0, 500, 20_000, 70_000] {
        let (data, dict_len) = dict_then_charstrings(padding);
        let scope = ReadScope::new(&data);
        let dict = scope
            .offset_length(0, dict_len)
            .unwrap()
            .read::<TopDict>()
            .unwrap();
        let offset = dict.get_i32(Operator::CharStrings).unwrap().unwrap();
        assert_eq!(offset as usize, dict_len + padding);

        let index = scope.offset(offset as usize).read::<Index<'_>>().unwrap();
        assert_eq!(index.read_object(0), Some(&b"glyph"[..]));
        lengths.push(dict_len);
    }
    assert!(lengths.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn private_dict_size_and_offset() {
    let mut w = LinkedWriter::new();
    let start = w.stake_current();
    let private_start = w.new_stake();
    let private_end = w.new_stake();

    let mut links = DictLinks::new();
    links.push_private(start, private_start, private_end);
    TopDict::write_linked(&mut w, &TopDict::new(), &links).unwrap();

    let mut private = PrivateDict::new();
    private.push(Operator::StdHW, vec![Operand::Integer(68)]);
    private.push(Operator::NominalWidthX, vec![Operand::Integer(-1200)]);
    w.stake_current_with_value(private_start).unwrap();
    PrivateDict::write(&mut w, &private).unwrap();
    w.stake_current_with_value(private_end).unwrap();
    let data = w.into_bytes().unwrap();

    // Size and offset both fit single byte operands.
    assert_eq!(data[2], u8::try_from(Operator::Private as u16).unwrap());
    let top = ReadScope::new(&data[..3]).read::<TopDict>().unwrap();
    let (read, offset) = top.read_private_dict(&ReadScope::new(&data)).unwrap();
    assert_eq!(offset, 3);
    assert_eq!(read, private);
}

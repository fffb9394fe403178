// bit accurate access to the domain data
// fields are little endian, as the EtherCAT process data is
// a field starts at bit `bit` of byte `byte` and spans `bit_len` bits (at most 32)

use bitvec::prelude::*;

use crate::FieldOffset;

fn field_range(offset: FieldOffset, bit_len: u8) -> std::ops::Range<usize> {
    let start = offset.byte * 8 + offset.bit as usize;
    start..start + bit_len as usize
}

/// Returns `None` if the field does not fit in the image.
pub fn read_field(image: &[u8], offset: FieldOffset, bit_len: u8) -> Option<u32> {
    if bit_len == 0 || bit_len > 32 {
        return None;
    }
    image
        .view_bits::<Lsb0>()
        .get(field_range(offset, bit_len))
        .map(|bits| bits.load_le::<u32>())
}

/// Returns `false` if the field does not fit in the image.
pub fn write_field(image: &mut [u8], offset: FieldOffset, bit_len: u8, value: u32) -> bool {
    if bit_len == 0 || bit_len > 32 {
        return false;
    }
    match image
        .view_bits_mut::<Lsb0>()
        .get_mut(field_range(offset, bit_len))
    {
        Some(bits) => {
            bits.store_le::<u32>(value);
            true
        }
        None => false,
    }
}

pub fn fits(image_len: usize, offset: FieldOffset, bit_len: u8) -> bool {
    field_range(offset, bit_len).end <= image_len * 8
}

//! Fixed width primitives with explicit byte order.
//!
//! Reads take a slice and fail with `UnexpectedEof` when it is too short,
//! writes append to any `Write` and truncate integers to the target width.
use std::io::{self, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    pub fn max_unsigned(self) -> u64 {
        match self {
            Width::W64 => u64::MAX,
            w => (1u64 << w.bits()) - 1,
        }
    }
}

pub fn read_uint(mut buf: &[u8], width: Width, endian: Endian) -> io::Result<u64> {
    match (width, endian) {
        (Width::W8, _) => buf.read_u8().map(u64::from),
        (Width::W16, Endian::Little) => buf.read_u16::<LittleEndian>().map(u64::from),
        (Width::W16, Endian::Big) => buf.read_u16::<BigEndian>().map(u64::from),
        (Width::W32, Endian::Little) => buf.read_u32::<LittleEndian>().map(u64::from),
        (Width::W32, Endian::Big) => buf.read_u32::<BigEndian>().map(u64::from),
        (Width::W64, Endian::Little) => buf.read_u64::<LittleEndian>(),
        (Width::W64, Endian::Big) => buf.read_u64::<BigEndian>(),
    }
}

pub fn read_int(mut buf: &[u8], width: Width, endian: Endian) -> io::Result<i64> {
    match (width, endian) {
        (Width::W8, _) => buf.read_i8().map(i64::from),
        (Width::W16, Endian::Little) => buf.read_i16::<LittleEndian>().map(i64::from),
        (Width::W16, Endian::Big) => buf.read_i16::<BigEndian>().map(i64::from),
        (Width::W32, Endian::Little) => buf.read_i32::<LittleEndian>().map(i64::from),
        (Width::W32, Endian::Big) => buf.read_i32::<BigEndian>().map(i64::from),
        (Width::W64, Endian::Little) => buf.read_i64::<LittleEndian>(),
        (Width::W64, Endian::Big) => buf.read_i64::<BigEndian>(),
    }
}

pub fn read_f32(mut buf: &[u8], endian: Endian) -> io::Result<f32> {
    match endian {
        Endian::Little => buf.read_f32::<LittleEndian>(),
        Endian::Big => buf.read_f32::<BigEndian>(),
    }
}

pub fn read_f64(mut buf: &[u8], endian: Endian) -> io::Result<f64> {
    match endian {
        Endian::Little => buf.read_f64::<LittleEndian>(),
        Endian::Big => buf.read_f64::<BigEndian>(),
    }
}

/// Writes the low `width` bits of `value`, this covers signed values as well
/// since two's complement truncation keeps their bit pattern.
pub fn write_uint<W: Write>(out: &mut W, value: u64, width: Width, endian: Endian) -> io::Result<()> {
    match (width, endian) {
        (Width::W8, _) => out.write_u8(value as u8),
        (Width::W16, Endian::Little) => out.write_u16::<LittleEndian>(value as u16),
        (Width::W16, Endian::Big) => out.write_u16::<BigEndian>(value as u16),
        (Width::W32, Endian::Little) => out.write_u32::<LittleEndian>(value as u32),
        (Width::W32, Endian::Big) => out.write_u32::<BigEndian>(value as u32),
        (Width::W64, Endian::Little) => out.write_u64::<LittleEndian>(value),
        (Width::W64, Endian::Big) => out.write_u64::<BigEndian>(value),
    }
}

pub fn write_f32<W: Write>(out: &mut W, value: f32, endian: Endian) -> io::Result<()> {
    match endian {
        Endian::Little => out.write_f32::<LittleEndian>(value),
        Endian::Big => out.write_f32::<BigEndian>(value),
    }
}

pub fn write_f64<W: Write>(out: &mut W, value: f64, endian: Endian) -> io::Result<()> {
    match endian {
        Endian::Little => out.write_f64::<LittleEndian>(value),
        Endian::Big => out.write_f64::<BigEndian>(value),
    }
}

use std::io::Read;

pub fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Ok((true, buf_read)),
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}

/// Moves `pointer` forward to the next multiple of `align`.
///
/// An alignment of 0 or 1 leaves the pointer untouched.
pub fn align_up(pointer: u64, align: u64) -> u64 {
    if align <= 1 {
        return pointer;
    }

    match pointer % align {
        0 => pointer,
        rem => pointer + (align - rem),
    }
}

/// Reads a zero terminated string, or the whole buffer if there is no terminator.
///
/// Bytes map one to one onto chars so the text can be written back unchanged.
pub fn read_ascii(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    buf[..end].iter().map(|&b| char::from(b)).collect()
}

pub fn hex_id(id: u32) -> String {
    format!("0x{:08X}", id)
}

pub fn parse_hex_id(s: &str) -> Option<u32> {
    if s.len() < 3 || s.len() > 10 {
        return None;
    }

    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}

use std::io::{Read, Write};

/// Every XDR item occupies a multiple of four bytes.
pub const ALIGNMENT: usize = 4;

/// Number of zero bytes needed to bring `src_len` up to the next 4-byte boundary.
///
/// A length that is already aligned gets no padding at all.
pub fn padding_len(src_len: usize) -> usize {
    (ALIGNMENT - (src_len % ALIGNMENT)) % ALIGNMENT
}

/// Length of `src_len` bytes of data once padded.
pub fn padded_len(src_len: usize) -> usize {
    src_len + padding_len(src_len)
}

pub fn read_padding(src_len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let pad_len = padding_len(src_len);
    if pad_len > 0 {
        let mut padding_buffer: [u8; ALIGNMENT] = Default::default();
        src.read_exact(&mut padding_buffer[..pad_len])?;
    }
    Ok(())
}

pub fn write_padding(src_len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    let pad_len = padding_len(src_len);
    if pad_len > 0 {
        let padding_buffer: [u8; ALIGNMENT] = Default::default();
        dest.write_all(&padding_buffer[..pad_len])?;
    }
    Ok(())
}

/// Reads exactly `len` bytes followed by their padding.
///
/// The buffer grows with the data actually read, so a bogus length on the wire
/// fails with `UnexpectedEof` instead of allocating up front.
pub fn read_opaque<R: Read>(len: usize, src: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut *src).take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes of opaque data, got {}", buf.len()),
        ));
    }
    read_padding(len, src)?;
    Ok(buf)
}

pub fn invalid_data(m: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, m.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_up_to_alignment() {
        assert_eq!(padding_len(0), 0);
        assert_eq!(padding_len(1), 3);
        assert_eq!(padding_len(3), 1);
        assert_eq!(padding_len(4), 0);
        assert_eq!(padding_len(8), 0);
        assert_eq!(padded_len(5), 8);
    }

    #[test]
    fn short_opaque_is_an_eof() {
        let data = [1u8, 2, 3];
        let err = read_opaque(8, &mut &data[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}

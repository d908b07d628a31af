//! Length-prefixed framing for the remote wire protocol: a big-endian `u32`
//! byte count followed by that many bytes of JSON. Chosen over `mio`'s
//! non-blocking reactor (see module docs on `remote/mod.rs`) to match the
//! blocking, one-thread-per-connection model the rest of this crate uses.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;

const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    assert!(payload.len() as u64 <= MAX_FRAME_BYTES as u64, "frame: payload exceeds max frame size");
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()?;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame: advertised length exceeds max frame size").into());
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").unwrap();
        let mut cursor = Cursor::new(buf);
        let got = read_frame(&mut cursor).unwrap();
        assert_eq!(got, b"hello world");
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAX_FRAME_BYTES + 1).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }
}

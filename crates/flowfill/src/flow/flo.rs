//! Middlebury `.flo` flow files.
//!
//! Layout: magic `202021.25` as `f32`, width and height as `i32`, then
//! row-major interleaved `(u, v)` pairs; everything little-endian.

use std::io::{self, Read, Write};
use std::path::Path;

use super::field::FlowField;

const FLO_MAGIC: f32 = 202021.25;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Serialize a field in `.flo` layout.
pub fn write_flo<W: Write>(mut w: W, flow: &FlowField) -> io::Result<()> {
    w.write_all(&FLO_MAGIC.to_le_bytes())?;
    w.write_all(&(flow.width() as i32).to_le_bytes())?;
    w.write_all(&(flow.height() as i32).to_le_bytes())?;
    let mut buf = Vec::with_capacity(flow.as_slice().len() * 8);
    for [u, v] in flow.as_slice() {
        buf.extend_from_slice(&u.to_le_bytes());
        buf.extend_from_slice(&v.to_le_bytes());
    }
    w.write_all(&buf)
}

/// Parse a `.flo` stream.
pub fn read_flo<R: Read>(mut r: R) -> io::Result<FlowField> {
    let mut word = [0u8; 4];
    r.read_exact(&mut word)?;
    if f32::from_le_bytes(word) != FLO_MAGIC {
        return Err(invalid("bad .flo magic"));
    }
    r.read_exact(&mut word)?;
    let width = i32::from_le_bytes(word);
    r.read_exact(&mut word)?;
    let height = i32::from_le_bytes(word);
    if width <= 0 || height <= 0 {
        return Err(invalid(format!("bad .flo size {width}x{height}")));
    }
    let n = width as usize * height as usize;
    let mut raw = vec![0u8; n * 8];
    r.read_exact(&mut raw)?;
    let data = raw
        .chunks_exact(8)
        .map(|c| {
            [
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            ]
        })
        .collect();
    FlowField::from_vec(width as u32, height as u32, data)
        .ok_or_else(|| invalid("flow payload size mismatch"))
}

pub fn save_flo(path: &Path, flow: &FlowField) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut w = io::BufWriter::new(file);
    write_flo(&mut w, flow)?;
    w.flush()
}

pub fn load_flo(path: &Path) -> io::Result<FlowField> {
    let file = std::fs::File::open(path)?;
    read_flo(io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flo_roundtrip_in_memory() {
        let f = FlowField::from_fn(3, 2, |x, y| [x as f32 - 0.5, y as f32 * 2.25]);
        let mut buf = Vec::new();
        write_flo(&mut buf, &f).unwrap();
        assert_eq!(buf.len(), 12 + 3 * 2 * 8);
        assert_eq!(&buf[..4], &202021.25f32.to_le_bytes());
        let back = read_flo(buf.as_slice()).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let mut buf = Vec::new();
        write_flo(&mut buf, &FlowField::zeros(2, 2)).unwrap();
        let mut bad = buf.clone();
        bad[0] ^= 0xff;
        assert!(read_flo(bad.as_slice()).is_err());
        assert!(read_flo(&buf[..buf.len() - 1]).is_err());
    }
}

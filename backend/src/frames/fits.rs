//! FITS primary-HDU reader and writer.
//!
//! Only what the calibration pipeline exchanges is supported: a primary HDU
//! holding one 2D image plus header cards.
//!
//! - Headers are 80-character cards in 2880-byte blocks, terminated by `END`
//! - Data is big-endian, padded to a 2880-byte block
//! - Reads BITPIX 8, 16, 32, -32 and -64, applying BSCALE/BZERO
//! - Writes BITPIX -32

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{Frame, FrameError, FrameHeader, FrameResult};

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;
const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// A parsed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Logical(bool),
}

impl HeaderValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(i) => Some(*i),
            HeaderValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Integer(i) => Some(*i as f64),
            HeaderValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Keyword/value cards of a header, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<(String, HeaderValue)>,
}

impl FitsHeader {
    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        let keyword = keyword.to_uppercase();
        self.cards
            .iter()
            .find(|(k, _)| *k == keyword)
            .map(|(_, v)| v)
    }

    pub fn get_int(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(HeaderValue::as_i64)
    }

    pub fn get_float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(HeaderValue::as_f64)
    }

    pub fn get_text(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(HeaderValue::as_text)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    fn require_int(&self, keyword: &str) -> FrameResult<i64> {
        self.get_int(keyword)
            .ok_or_else(|| FrameError::MissingKeyword(keyword.to_string()))
    }

    /// Extract the pipeline-facing subset of the header.
    pub fn to_frame_header(&self) -> FrameResult<FrameHeader> {
        let naxis = self.require_int("NAXIS")?;
        let naxis1 = self.require_int("NAXIS1")?;
        let naxis2 = self.require_int("NAXIS2")?;
        let to_u32 = |keyword: &str, v: i64| {
            u32::try_from(v).map_err(|_| {
                FrameError::InvalidFormat(format!("{} has invalid value {}", keyword, v))
            })
        };

        Ok(FrameHeader {
            image_type: self.get_text("IMAGETYP").map(str::to_string),
            naxis: to_u32("NAXIS", naxis)?,
            naxis1: to_u32("NAXIS1", naxis1)?,
            naxis2: to_u32("NAXIS2", naxis2)?,
            exptime: self.get_float("EXPTIME"),
        })
    }
}

/// Read only the header of a FITS file.
pub fn read_header(path: &Path) -> FrameResult<FitsHeader> {
    let file = File::open(path).map_err(|e| FrameError::io(path, e))?;
    let mut reader = BufReader::new(file);
    read_header_from(&mut reader).map_err(|e| attach_path(e, path))
}

/// Read a 2D image and its header from a FITS file.
pub fn read_frame(path: &Path) -> FrameResult<Frame> {
    let file = File::open(path).map_err(|e| FrameError::io(path, e))?;
    let mut reader = BufReader::new(file);
    read_frame_from(&mut reader).map_err(|e| attach_path(e, path))
}

/// Write a frame as a BITPIX -32 FITS file.
///
/// Data goes to a sibling `.partial` file first and is renamed into place,
/// so `path` never holds a truncated frame.
pub fn write_frame(path: &Path, frame: &Frame) -> FrameResult<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = Path::new(&partial).to_path_buf();

    let result = (|| {
        let file = File::create(&partial)?;
        let mut writer = BufWriter::new(file);
        write_frame_to(&mut writer, frame)?;
        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(FrameError::io(path, e));
    }

    fs::rename(&partial, path).map_err(|e| FrameError::io(path, e))
}

/// Read a frame from any reader positioned at the start of a FITS file.
pub fn read_frame_from<R: Read>(reader: &mut R) -> FrameResult<Frame> {
    let header = read_header_from(reader)?;
    let frame_header = header.to_frame_header()?;

    if frame_header.naxis != 2 {
        return Err(FrameError::InvalidFormat(format!(
            "expected a 2D image, found NAXIS = {}",
            frame_header.naxis
        )));
    }

    let bitpix = header.require_int("BITPIX")?;
    let bscale = header.get_float("BSCALE").unwrap_or(1.0);
    let bzero = header.get_float("BZERO").unwrap_or(0.0);

    let width = frame_header.naxis1 as usize;
    let height = frame_header.naxis2 as usize;
    let count = width.checked_mul(height).ok_or_else(|| {
        FrameError::InvalidFormat(format!("image size {}x{} overflows", width, height))
    })?;

    let raw: Vec<f64> = match bitpix {
        8 => read_samples(reader, count, 1, |b| b[0] as f64)?,
        16 => read_samples(reader, count, 2, |b| i16::from_be_bytes([b[0], b[1]]) as f64)?,
        32 => read_samples(reader, count, 4, |b| {
            i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64
        })?,
        -32 => read_samples(reader, count, 4, |b| {
            f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64
        })?,
        -64 => read_samples(reader, count, 8, |b| {
            f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })?,
        other => return Err(FrameError::UnsupportedBitpix(other)),
    };

    let pixels = raw
        .into_iter()
        .map(|v| (v * bscale + bzero) as f32)
        .collect();

    Ok(Frame {
        width,
        height,
        pixels,
        header: frame_header,
    })
}

/// Read header cards up to and including the block holding `END`.
pub fn read_header_from<R: Read>(reader: &mut R) -> FrameResult<FitsHeader> {
    let mut header = FitsHeader::default();
    let mut block = [0u8; BLOCK_SIZE];
    let mut first_block = true;

    loop {
        reader
            .read_exact(&mut block)
            .map_err(|e| FrameError::InvalidFormat(format!("truncated header: {}", e)))?;

        for i in 0..CARDS_PER_BLOCK {
            let card = &block[i * CARD_SIZE..(i + 1) * CARD_SIZE];
            let keyword = String::from_utf8_lossy(&card[..8]);
            let keyword = keyword.trim_end();

            if first_block && i == 0 && keyword != "SIMPLE" {
                return Err(FrameError::InvalidFormat(
                    "file does not start with SIMPLE".to_string(),
                ));
            }
            if keyword == "END" {
                return Ok(header);
            }
            if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
                continue;
            }
            if &card[8..10] == b"= " {
                let value = parse_value(&String::from_utf8_lossy(&card[10..]));
                header.cards.push((keyword.to_uppercase(), value));
            }
        }
        first_block = false;
    }
}

/// Write header and data blocks for a frame.
pub fn write_frame_to<W: Write>(writer: &mut W, frame: &Frame) -> std::io::Result<()> {
    let mut cards = vec![
        format_card("SIMPLE", "T"),
        format_card("BITPIX", "-32"),
        format_card("NAXIS", "2"),
        format_card("NAXIS1", &frame.width.to_string()),
        format_card("NAXIS2", &frame.height.to_string()),
    ];
    if let Some(image_type) = &frame.header.image_type {
        cards.push(format_card("IMAGETYP", &quote(image_type)));
    }
    if let Some(exptime) = frame.header.exptime {
        cards.push(format_card("EXPTIME", &format_float(exptime)));
    }
    cards.push(format_card("END", ""));

    let mut written = 0;
    for card in &cards {
        writer.write_all(card)?;
        written += CARD_SIZE;
    }
    writer.write_all(&vec![b' '; padding(written)])?;

    for &pixel in &frame.pixels {
        writer.write_all(&pixel.to_be_bytes())?;
    }
    writer.write_all(&vec![0u8; padding(frame.pixels.len() * 4)])?;
    Ok(())
}

fn read_samples<R: Read>(
    reader: &mut R,
    count: usize,
    width: usize,
    decode: impl Fn(&[u8]) -> f64,
) -> FrameResult<Vec<f64>> {
    let expected = count
        .checked_mul(width)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| FrameError::InvalidFormat(format!("{} samples overflow", count)))?;

    // The header's size is untrusted: grow the buffer only as bytes arrive.
    let mut buffer = Vec::new();
    reader
        .by_ref()
        .take(expected)
        .read_to_end(&mut buffer)
        .map_err(|e| FrameError::InvalidFormat(format!("unreadable data: {}", e)))?;
    if (buffer.len() as u64) < expected {
        return Err(FrameError::InvalidFormat(format!(
            "truncated data: header declares {} bytes, found {}",
            expected,
            buffer.len()
        )));
    }
    Ok(buffer.chunks_exact(width).map(decode).collect())
}

fn parse_value(raw: &str) -> HeaderValue {
    let raw = raw.trim_start();

    if let Some(rest) = raw.strip_prefix('\'') {
        // Quotes inside strings are doubled.
        let mut text = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    text.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                text.push(c);
            }
        }
        return HeaderValue::Text(text.trim_end().to_string());
    }

    let value = raw.split('/').next().unwrap_or("").trim();
    match value {
        "T" => return HeaderValue::Logical(true),
        "F" => return HeaderValue::Logical(false),
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return HeaderValue::Integer(i);
    }
    if let Ok(f) = value.replace(['D', 'd'], "E").parse::<f64>() {
        return HeaderValue::Float(f);
    }
    HeaderValue::Text(value.to_string())
}

fn format_card(keyword: &str, value: &str) -> [u8; CARD_SIZE] {
    let mut card = [b' '; CARD_SIZE];
    let keyword = keyword.as_bytes();
    let keyword_len = keyword.len().min(8);
    card[..keyword_len].copy_from_slice(&keyword[..keyword_len]);

    if value.is_empty() {
        return card;
    }

    card[8] = b'=';
    let value = value.as_bytes();
    let value_len = value.len().min(CARD_SIZE - 10);
    // Fixed format: strings start in column 11, numbers end in column 30.
    let start = if value[0] == b'\'' {
        10
    } else {
        30usize.saturating_sub(value_len).max(10)
    };
    card[start..start + value_len].copy_from_slice(&value[..value_len]);
    card
}

fn quote(text: &str) -> String {
    format!("'{:<8}'", text.replace('\'', "''"))
}

fn format_float(value: f64) -> String {
    let text = format!("{:?}", value);
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{}.0", text)
    }
}

fn padding(len: usize) -> usize {
    (BLOCK_SIZE - len % BLOCK_SIZE) % BLOCK_SIZE
}

fn attach_path(err: FrameError, path: &Path) -> FrameError {
    match err {
        FrameError::InvalidFormat(msg) => {
            FrameError::InvalidFormat(format!("{}: {}", path.display(), msg))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(frame: &Frame) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_frame_to(&mut bytes, frame).unwrap();
        bytes
    }

    fn header_block(cards: &[(&str, &str)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (k, v) in cards {
            bytes.extend_from_slice(&format_card(k, v));
        }
        bytes.extend_from_slice(&format_card("END", ""));
        let pad = padding(bytes.len());
        bytes.extend(std::iter::repeat(b' ').take(pad));
        bytes
    }

    #[test]
    fn test_written_file_is_block_aligned() {
        let frame = Frame::filled(7, 5, 1.5).with_image_type("LIGHT").with_exptime(30.0);
        let bytes = encode(&frame);
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        assert_eq!(&bytes[..6], b"SIMPLE");
    }

    #[test]
    fn test_read_back_written_frame() {
        let mut frame = Frame::filled(3, 2, 0.0)
            .with_image_type("DARKM")
            .with_exptime(60.0);
        frame.set_pixel(1, 1, 42.25);

        let read = read_frame_from(&mut Cursor::new(encode(&frame))).unwrap();
        assert_eq!(read.dimensions(), (3, 2));
        assert_eq!(read.pixel(1, 1), 42.25);
        assert_eq!(read.header.image_type.as_deref(), Some("DARKM"));
        assert_eq!(read.header.exptime, Some(60.0));
        assert_eq!(read.header.naxis, 2);
    }

    #[test]
    fn test_integer_data_applies_bzero() {
        let mut bytes = header_block(&[
            ("SIMPLE", "T"),
            ("BITPIX", "16"),
            ("NAXIS", "2"),
            ("NAXIS1", "2"),
            ("NAXIS2", "1"),
            ("BZERO", "32768"),
            ("BSCALE", "1"),
            ("IMAGETYP", "'Dark Frame'"),
            ("EXPTIME", "1.5D1"),
        ]);
        bytes.extend_from_slice(&(-32768i16).to_be_bytes());
        bytes.extend_from_slice(&(100i16).to_be_bytes());
        let pad = padding(4);
        bytes.extend(std::iter::repeat(0u8).take(pad));

        let frame = read_frame_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(frame.pixels, vec![0.0, 32868.0]);
        assert_eq!(frame.header.image_type.as_deref(), Some("Dark Frame"));
        assert_eq!(frame.header.exptime, Some(15.0));
    }

    #[test]
    fn test_header_only_read_ignores_missing_data() {
        let bytes = header_block(&[
            ("SIMPLE", "T"),
            ("BITPIX", "-32"),
            ("NAXIS", "2"),
            ("NAXIS1", "100"),
            ("NAXIS2", "80"),
            ("IMAGETYP", "'LIGHT   '"),
            ("EXPTIME", "30.0 / seconds"),
        ]);
        let header = read_header_from(&mut Cursor::new(bytes)).unwrap();
        let frame_header = header.to_frame_header().unwrap();
        assert_eq!(frame_header.naxis1, 100);
        assert_eq!(frame_header.naxis2, 80);
        assert_eq!(frame_header.image_type.as_deref(), Some("LIGHT"));
        assert_eq!(frame_header.exptime, Some(30.0));
    }

    #[test]
    fn test_missing_naxis1_is_reported() {
        let bytes = header_block(&[("SIMPLE", "T"), ("BITPIX", "-32"), ("NAXIS", "2")]);
        let header = read_header_from(&mut Cursor::new(bytes)).unwrap();
        assert!(matches!(
            header.to_frame_header(),
            Err(FrameError::MissingKeyword(k)) if k == "NAXIS1"
        ));
    }

    #[test]
    fn test_not_fits_is_rejected() {
        let bytes = vec![b'x'; BLOCK_SIZE];
        assert!(matches!(
            read_header_from(&mut Cursor::new(bytes)),
            Err(FrameError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_data_is_rejected() {
        let frame = Frame::filled(4, 4, 1.0);
        let mut bytes = encode(&frame);
        bytes.truncate(BLOCK_SIZE + 10);
        assert!(read_frame_from(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_oversized_header_fails_without_allocating() {
        let mut bytes = header_block(&[
            ("SIMPLE", "T"),
            ("BITPIX", "-64"),
            ("NAXIS", "2"),
            ("NAXIS1", "300000"),
            ("NAXIS2", "300000"),
        ]);
        bytes.extend_from_slice(&[0u8; 64]);

        let err = read_frame_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFormat(ref m) if m.contains("truncated data")));
    }

    #[test]
    fn test_overflowing_dimensions_are_rejected() {
        let bytes = header_block(&[
            ("SIMPLE", "T"),
            ("BITPIX", "-64"),
            ("NAXIS", "2"),
            ("NAXIS1", "4294967295"),
            ("NAXIS2", "4294967295"),
        ]);
        assert!(matches!(
            read_frame_from(&mut Cursor::new(bytes)),
            Err(FrameError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_string_with_embedded_quote() {
        assert_eq!(
            parse_value("'O''Brien' / observer"),
            HeaderValue::Text("O'Brien".to_string())
        );
        assert_eq!(parse_value("T"), HeaderValue::Logical(true));
        assert_eq!(parse_value("  42 / answer"), HeaderValue::Integer(42));
    }

    #[test]
    fn test_write_frame_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fits");
        write_frame(&path, &Frame::filled(2, 2, 3.0)).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("out.fits.partial").exists());
        assert_eq!(read_frame(&path).unwrap().pixels, vec![3.0; 4]);
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.fits");
        assert!(matches!(
            write_frame(&path, &Frame::filled(2, 2, 3.0)),
            Err(FrameError::Io { .. })
        ));
    }
}

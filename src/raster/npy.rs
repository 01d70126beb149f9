//! Minimal reader/writer for NumPy `.npy` files.
//!
//! The reader accepts format versions 1.0 to 3.0, the common numeric dtypes in
//! either byte order, and C or Fortran layout. Everything is widened to `f32`.
//! The writer always emits version 1.0 little-endian `f4` in C order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array3, ArrayView3, IxDyn, ShapeBuilder};

use crate::error::{Result, TileBankError};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Unsigned,
    Signed,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    order: ByteOrder,
    kind: Kind,
    size: usize,
}

impl Dtype {
    /// Parse a `descr` string such as `<f4`, `>i2`, `|u1` or `|b1`.
    fn parse(descr: &str) -> Result<Self> {
        let unsupported = || TileBankError::UnsupportedFormat(format!("npy dtype {:?}", descr));
        let mut chars = descr.chars();
        let order = match chars.next() {
            Some('<') | Some('|') | Some('=') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            _ => return Err(unsupported()),
        };
        let kind = match chars.next() {
            Some('f') => Kind::Float,
            Some('u') => Kind::Unsigned,
            Some('i') => Kind::Signed,
            Some('b') => Kind::Bool,
            _ => return Err(unsupported()),
        };
        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;
        let valid = match kind {
            Kind::Float => matches!(size, 4 | 8),
            Kind::Unsigned | Kind::Signed => matches!(size, 1 | 2 | 4 | 8),
            Kind::Bool => size == 1,
        };
        if !valid {
            return Err(unsupported());
        }
        Ok(Self { order, kind, size })
    }

    fn decode(&self, bytes: &[u8]) -> f32 {
        let mut buf = [0u8; 8];
        buf[..self.size].copy_from_slice(bytes);
        if self.order == ByteOrder::Big {
            buf[..self.size].reverse();
        }
        match (self.kind, self.size) {
            (Kind::Float, 4) => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            (Kind::Float, _) => f64::from_le_bytes(buf) as f32,
            (Kind::Unsigned, 1) | (Kind::Bool, _) => buf[0] as f32,
            (Kind::Unsigned, 2) => u16::from_le_bytes([buf[0], buf[1]]) as f32,
            (Kind::Unsigned, 4) => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f32,
            (Kind::Unsigned, _) => u64::from_le_bytes(buf) as f32,
            (Kind::Signed, 1) => buf[0] as i8 as f32,
            (Kind::Signed, 2) => i16::from_le_bytes([buf[0], buf[1]]) as f32,
            (Kind::Signed, 4) => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f32,
            (Kind::Signed, _) => i64::from_le_bytes(buf) as f32,
        }
    }
}

#[derive(Debug)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Value of `key` in the header dict, up to the next top-level comma or
/// closing brace.
fn dict_value<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    let start = dict.find(&format!("'{}'", key)).or_else(|| dict.find(&format!("\"{}\"", key)))?;
    let rest = &dict[start + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();
    if rest.starts_with('(') {
        let end = rest.find(')')?;
        return Some(&rest[..=end]);
    }
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn parse_header(dict: &str) -> Result<Header> {
    let malformed = |what: &str| TileBankError::UnsupportedFormat(format!("malformed npy header ({}): {}", what, dict.trim()));

    let descr = dict_value(dict, "descr").ok_or_else(|| malformed("descr"))?;
    let dtype = Dtype::parse(descr.trim_matches(|c| c == '\'' || c == '"'))?;

    let fortran_order = match dict_value(dict, "fortran_order") {
        Some("True") => true,
        Some("False") => false,
        _ => return Err(malformed("fortran_order")),
    };

    let shape_text = dict_value(dict, "shape").ok_or_else(|| malformed("shape"))?;
    let shape = shape_text
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| malformed("shape")))
        .collect::<Result<Vec<_>>>()?;

    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    let mut preamble = [0u8; 8];
    reader.read_exact(&mut preamble)?;
    if &preamble[..6] != MAGIC {
        return Err(TileBankError::UnsupportedFormat("missing npy magic".into()));
    }
    let header_len = match preamble[6] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        v => return Err(TileBankError::UnsupportedFormat(format!("npy format version {}", v))),
    };
    let mut dict = vec![0u8; header_len];
    reader.read_exact(&mut dict)?;
    // Version 3 allows utf-8; 1 and 2 are latin-1, which is ascii for every valid header.
    let dict = String::from_utf8_lossy(&dict);
    parse_header(&dict)
}

/// Read an `.npy` file as a `(bands, H, W)` array. 2-D arrays become a single band.
pub fn read(path: &Path) -> Result<Array3<f32>> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = read_header(&mut reader)?;

    let shape = match header.shape.as_slice() {
        [h, w] => vec![1, *h, *w],
        [b, h, w] => vec![*b, *h, *w],
        other => {
            return Err(TileBankError::InvalidShape(format!(
                "expected a 2-D or 3-D array in {}, got shape {:?}",
                path.display(),
                other
            )))
        }
    };

    let count: usize = header.shape.iter().product();
    let mut raw = vec![0u8; count * header.dtype.size];
    reader.read_exact(&mut raw)?;
    let values: Vec<f32> = raw.chunks_exact(header.dtype.size).map(|b| header.dtype.decode(b)).collect();

    let dims = IxDyn(&shape);
    let array = if header.fortran_order {
        ndarray::ArrayD::from_shape_vec(dims.f(), values)
    } else {
        ndarray::ArrayD::from_shape_vec(dims, values)
    }
    .map_err(|e| TileBankError::InvalidShape(e.to_string()))?;

    array
        .into_dimensionality::<ndarray::Ix3>()
        .map(|a| a.as_standard_layout().into_owned())
        .map_err(|e| TileBankError::InvalidShape(e.to_string()))
}

/// Write a `(bands, H, W)` array as version 1.0 `<f4` in C order.
pub fn write(array: ArrayView3<'_, f32>, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    let (b, h, w) = array.dim();
    let dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}, {}), }}", b, h, w);
    // magic + version + u16 length + dict + newline, padded to the alignment
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header = format!("{}{}\n", dict, " ".repeat(pad));

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    // Iteration over a view is logical (row-major) order regardless of memory layout.
    for value in array.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

//! GeoTIFF reading and writing through the `tiff` crate.
//!
//! Georeferencing lives in the standard GeoTIFF tags: ModelPixelScale and
//! ModelTiepoint for north-up grids, ModelTransformation otherwise, and a
//! GeoKey directory naming the CRS.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array3, ArrayView3};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use super::Raster;
use crate::error::{Result, TileBankError};
use crate::spatial::reproject::is_geographic;
use crate::spatial::{Affine, Crs};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_ASCII_PARAMS: u16 = 34737;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GT_CITATION: u16 = 1026;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const USER_DEFINED: u16 = 32767;
const RASTER_PIXEL_IS_AREA: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// GeoKey directory entries plus the GeoAsciiParams text they reference.
fn geokeys(crs: &Crs) -> Result<(Vec<u16>, Option<String>)> {
    let mut entries: Vec<[u16; 4]> = Vec::new();
    let mut ascii = None;
    match crs {
        Crs::Epsg(code) => {
            let code = u16::try_from(*code)
                .map_err(|_| TileBankError::UnsupportedCrs(format!("EPSG:{} does not fit a GeoKey", code)))?;
            if is_geographic(crs) {
                entries.push([GT_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
                entries.push([GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
                entries.push([GEOGRAPHIC_TYPE, 0, 1, code]);
            } else {
                entries.push([GT_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
                entries.push([GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
                entries.push([PROJECTED_CS_TYPE, 0, 1, code]);
            }
        }
        Crs::Wkt(text) => {
            let citation = format!("{}|", text);
            let count = u16::try_from(citation.len())
                .map_err(|_| TileBankError::UnsupportedCrs("CRS text too long for GeoAsciiParams".into()))?;
            entries.push([GT_MODEL_TYPE, 0, 1, USER_DEFINED]);
            entries.push([GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([GT_CITATION, GEO_ASCII_PARAMS, count, 0]);
            ascii = Some(citation);
        }
    }
    let mut directory = vec![1, 1, 0, entries.len() as u16];
    for entry in entries {
        directory.extend_from_slice(&entry);
    }
    Ok((directory, ascii))
}

/// Write a `(bands, H, W)` array as a single-strip, uncompressed f32 GeoTIFF.
pub fn write(array: ArrayView3<'_, f32>, path: &Path, transform: &Affine, crs: &Crs) -> Result<()> {
    let (keys, ascii) = geokeys(crs)?;
    write_with_keys(array, path, transform, &keys, ascii.as_deref())
}

fn write_with_keys(
    array: ArrayView3<'_, f32>,
    path: &Path,
    transform: &Affine,
    keys: &[u16],
    ascii: Option<&str>,
) -> Result<()> {
    let (bands, height, width) = array.dim();

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    let mut dir = encoder.image_directory()?;

    dir.write_tag(Tag::ImageWidth, width as u32)?;
    dir.write_tag(Tag::ImageLength, height as u32)?;
    dir.write_tag(Tag::BitsPerSample, vec![32u16; bands].as_slice())?;
    dir.write_tag(Tag::Compression, 1u16)?;
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;
    dir.write_tag(Tag::SampleFormat, vec![3u16; bands].as_slice())?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::RowsPerStrip, height as u32)?;
    if bands > 1 {
        dir.write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;
    }

    if transform.is_north_up() && transform.a > 0.0 && transform.e < 0.0 {
        let scale = [transform.a, -transform.e, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, transform.c, transform.f, 0.0];
        dir.write_tag(tag(MODEL_PIXEL_SCALE), scale.as_slice())?;
        dir.write_tag(tag(MODEL_TIEPOINT), tiepoint.as_slice())?;
    } else {
        let t = transform;
        let matrix = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(tag(MODEL_TRANSFORMATION), matrix.as_slice())?;
    }
    dir.write_tag(tag(GEO_KEY_DIRECTORY), keys)?;
    if let Some(ascii) = ascii {
        dir.write_tag(tag(GEO_ASCII_PARAMS), ascii)?;
    }

    // Chunky layout: all bands of a pixel are adjacent.
    let mut bytes = Vec::with_capacity(bands * height * width * 4);
    for row in 0..height {
        for col in 0..width {
            for band in 0..bands {
                bytes.extend_from_slice(&array[[band, row, col]].to_le_bytes());
            }
        }
    }
    let offset = dir.write_data(bytes.as_slice())?;
    let offset = u32::try_from(offset)
        .map_err(|_| TileBankError::UnsupportedFormat("raster too large for a classic TIFF".into()))?;
    dir.write_tag(Tag::StripOffsets, offset)?;
    dir.write_tag(Tag::StripByteCounts, bytes.len() as u32)?;
    dir.finish()?;
    Ok(())
}

fn to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F16(v) => v.into_iter().map(|x| x.to_f32()).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return Err(TileBankError::UnsupportedFormat("TIFF sample type".into())),
    })
}

fn read_f64s<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<Vec<f64>>> {
    match decoder.find_tag(tag(code))? {
        Some(value) => Ok(Some(value.into_f64_vec()?)),
        None => Ok(None),
    }
}

fn read_transform<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Option<Affine>> {
    if let Some(m) = read_f64s(decoder, MODEL_TRANSFORMATION)? {
        if m.len() < 8 {
            return Err(TileBankError::InvalidGeometry("short ModelTransformation tag".into()));
        }
        return Ok(Some(Affine::new(m[0], m[1], m[3], m[4], m[5], m[7])));
    }
    let scale = read_f64s(decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = read_f64s(decoder, MODEL_TIEPOINT)?;
    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let (sx, sy) = (s[0], s[1]);
            let (i, j, x, y) = (t[0], t[1], t[3], t[4]);
            Ok(Some(Affine::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy)))
        }
        _ => Ok(None),
    }
}

fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Option<Crs>> {
    let keys = match decoder.find_tag(tag(GEO_KEY_DIRECTORY))? {
        Some(value) => value.into_u16_vec()?,
        None => return Ok(None),
    };
    let ascii = match decoder.find_tag(tag(GEO_ASCII_PARAMS))? {
        Some(value) => Some(value.into_string()?),
        None => None,
    };

    let mut model_type = None;
    let mut geographic = None;
    let mut projected = None;
    let mut citation = None;
    for entry in keys.get(4..).unwrap_or_default().chunks_exact(4) {
        let (key, location, count, value) = (entry[0], entry[1], entry[2], entry[3]);
        let epsg = (location == 0 && value != USER_DEFINED && value != 0).then_some(value as u32);
        match key {
            GT_MODEL_TYPE if location == 0 => model_type = Some(value),
            GEOGRAPHIC_TYPE => geographic = epsg,
            PROJECTED_CS_TYPE => projected = epsg,
            GT_CITATION if location == GEO_ASCII_PARAMS => {
                let text = ascii.as_deref().and_then(|s| {
                    let start = value as usize;
                    s.get(start..start + count as usize)
                });
                citation = text.map(|t| t.trim_end_matches(['|', '\0']).to_string());
            }
            _ => {}
        }
    }

    // A projected file may also name the GCS of its datum; the model type decides.
    let code = match model_type {
        Some(MODEL_TYPE_GEOGRAPHIC) => geographic.or(projected),
        _ => projected.or(geographic),
    };
    if let Some(code) = code {
        return Ok(Some(Crs::Epsg(code)));
    }
    Ok(citation.filter(|c| !c.is_empty()).map(Crs::Wkt))
}

/// Read a GeoTIFF into a `(bands, H, W)` raster with whatever georeference it carries.
pub fn read(path: &Path) -> Result<Raster> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (width, height) = decoder.dimensions()?;
    let bands = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1) as usize;
    let transform = read_transform(&mut decoder)?;
    let crs = read_crs(&mut decoder)?;

    let samples = to_f32(decoder.read_image()?)?;
    let (h, w) = (height as usize, width as usize);
    if samples.len() != bands * h * w {
        return Err(TileBankError::UnsupportedFormat(format!(
            "{}: expected {} samples, decoded {}",
            path.display(),
            bands * h * w,
            samples.len()
        )));
    }
    let data = Array3::from_shape_fn((bands, h, w), |(b, r, c)| samples[(r * w + c) * bands + b]);

    Ok(Raster { data, transform, crs })
}

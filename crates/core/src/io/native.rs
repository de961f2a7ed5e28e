//! TIFF reading/writing through the `tiff` crate
//!
//! Interleaved (chunky) multi-sample TIFFs load as multi-band images.
//! Outputs are written as single-band 32-bit float TIFFs.

use super::{ImageSource, RasterSink};
use crate::error::{Error, Result};
use crate::raster::{Image, Raster, RasterElement};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;

/// A TIFF file on disk acting as an [`ImageSource`]
#[derive(Debug, Clone)]
pub struct TiffFile {
    path: PathBuf,
}

impl TiffFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for TiffFile {
    fn load(&self) -> Result<Image> {
        read_image(&self.path)
    }
}

/// A directory receiving `<name>.tif` files, acting as a [`RasterSink`]
#[derive(Debug, Clone)]
pub struct TiffDirectory {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl TiffDirectory {
    /// Use `dir` as the output directory, creating it if needed
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    /// Paths written so far, in write order
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl RasterSink for TiffDirectory {
    fn write<T: RasterElement>(&mut self, name: &str, raster: &Raster<T>) -> Result<()> {
        let path = self.dir.join(format!("{name}.tif"));
        write_raster(raster, &path)?;
        tracing::debug!("wrote {}", path.display());
        self.written.push(path);
        Ok(())
    }
}

/// Read a TIFF file into an [`Image`]
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<Image> {
    let file = File::open(path.as_ref())?;
    decode_image(BufReader::new(file))
}

/// Read a TIFF from an in-memory buffer into an [`Image`]
pub fn read_image_from_buffer(data: &[u8]) -> Result<Image> {
    decode_image(Cursor::new(data))
}

fn decode_image<R>(reader: R) -> Result<Image>
where
    R: std::io::Read + std::io::Seek,
{
    let mut decoder =
        Decoder::new(reader).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?;

    let samples: Vec<f64> = match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ));
        }
    };

    let pixels = rows * cols;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    Image::from_interleaved(&samples, rows, cols, samples.len() / pixels)
}

/// Write a raster to a single-band 32-bit float TIFF file
pub fn write_raster<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_raster(raster, BufWriter::new(file))
}

/// Write a raster to an in-memory TIFF buffer
pub fn write_raster_to_buffer<T: RasterElement>(raster: &Raster<T>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_raster(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn encode_raster<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: std::io::Write + std::io::Seek,
{
    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();
    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    encoder
        .write_image::<Gray32Float>(cols as u32, rows as u32, &data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;

    Ok(())
}

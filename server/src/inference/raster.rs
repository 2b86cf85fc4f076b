//! Chunk-wise reader for multi-band TIFF rasters
//!
//! `tiff` parses the IFD; strips and tiles are decompressed here so any number
//! of samples per pixel can be read in either planar configuration, and only
//! the requested bands are materialized.

use std::io::{Cursor, Read};

use ndarray::Array3;
use tiff::decoder::Decoder;
use tiff::tags::Tag;

use super::types::{InferenceError, Raster};

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_PACKBITS: u16 = 32773;
const COMPRESSION_OLD_DEFLATE: u16 = 32946;

const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;

/// `PlanarConfiguration` value for band-sequential storage
const PLANAR_SEPARATE: u16 = 2;

/// Upper bound on the `f32` buffer a single read may allocate
const MAX_DECODED_BYTES: u64 = 8 << 30;

fn decode_err(e: tiff::TiffError) -> InferenceError {
    InferenceError::Decode(e.to_string())
}

/// Numeric layout of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl SampleKind {
    fn from_tags(bits: u16, format: u16) -> Result<Self, InferenceError> {
        let kind = match (format, bits) {
            (1, 8) => Self::U8,
            (1, 16) => Self::U16,
            (1, 32) => Self::U32,
            (1, 64) => Self::U64,
            (2, 8) => Self::I8,
            (2, 16) => Self::I16,
            (2, 32) => Self::I32,
            (2, 64) => Self::I64,
            (3, 32) => Self::F32,
            (3, 64) => Self::F64,
            _ => {
                return Err(InferenceError::Decode(format!(
                    "unsupported sample layout: {} bits with sample format {}",
                    bits, format
                )));
            }
        };
        Ok(kind)
    }

    fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Interpret the low `size()` bytes of `word` as this sample type
    fn to_f32(self, word: u64) -> f32 {
        match self {
            Self::U8 | Self::U16 | Self::U32 | Self::U64 => word as f32,
            Self::I8 => word as u8 as i8 as f32,
            Self::I16 => word as u16 as i16 as f32,
            Self::I32 => word as u32 as i32 as f32,
            Self::I64 => word as i64 as f32,
            Self::F32 => f32::from_bits(word as u32),
            Self::F64 => f64::from_bits(word) as f32,
        }
    }
}

fn read_word(bytes: &[u8], little_endian: bool) -> u64 {
    let mut word = [0u8; 8];
    if little_endian {
        word[..bytes.len()].copy_from_slice(bytes);
        u64::from_le_bytes(word)
    } else {
        word[8 - bytes.len()..].copy_from_slice(bytes);
        u64::from_be_bytes(word)
    }
}

fn unpack_bits(data: &[u8], expected: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() && out.len() < expected {
        let header = data[i] as i8;
        i += 1;
        if header >= 0 {
            let end = (i + header as usize + 1).min(data.len());
            out.extend_from_slice(&data[i..end]);
            i = end;
        } else if header != -128 {
            if let Some(&value) = data.get(i) {
                let run = (1 - header as isize) as usize;
                out.resize(out.len() + run, value);
            }
            i += 1;
        }
    }
    out
}

fn decompress(
    compression: u16,
    data: &[u8],
    expected: usize,
) -> Result<Vec<u8>, InferenceError> {
    match compression {
        COMPRESSION_NONE => Ok(data.to_vec()),
        COMPRESSION_LZW => {
            let mut out = Vec::new();
            let mut decoder =
                weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
            decoder
                .into_vec(&mut out)
                .decode(data)
                .status
                .map_err(|e| InferenceError::Decode(format!("LZW: {}", e)))?;
            Ok(out)
        }
        COMPRESSION_DEFLATE | COMPRESSION_OLD_DEFLATE => {
            let mut out = Vec::new();
            flate2::read::ZlibDecoder::new(data)
                .take(expected as u64)
                .read_to_end(&mut out)
                .map_err(|e| InferenceError::Decode(format!("deflate: {}", e)))?;
            Ok(out)
        }
        COMPRESSION_PACKBITS => Ok(unpack_bits(data, expected)),
        other => Err(InferenceError::Decode(format!(
            "unsupported TIFF compression {}",
            other
        ))),
    }
}

/// Reverse horizontal differencing, row by row, wrapping at the sample width
fn undo_horizontal_predictor(words: &mut [u64], row_len: usize, stride: usize, size: usize) {
    let mask = if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    };
    for row in words.chunks_mut(row_len) {
        for i in stride..row.len() {
            row[i] = row[i].wrapping_add(row[i - stride]) & mask;
        }
    }
}

/// A parsed TIFF whose bands can be read one selection at a time
#[derive(Debug)]
pub struct RasterReader<'a> {
    bytes: &'a [u8],
    little_endian: bool,
    width: usize,
    height: usize,
    samples: usize,
    kind: SampleKind,
    compression: u16,
    predictor: u16,
    planar: bool,
    tiled: bool,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    chunks_per_plane: usize,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

impl<'a> RasterReader<'a> {
    pub fn open(bytes: &'a [u8]) -> Result<Self, InferenceError> {
        let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(decode_err)?;
        let (width, height) = decoder.dimensions().map_err(decode_err)?;
        let (width, height) = (width as usize, height as usize);

        let samples: u16 = decoder
            .find_tag_unsigned(Tag::SamplesPerPixel)
            .map_err(decode_err)?
            .unwrap_or(1);
        let bits = decoder
            .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)
            .map_err(decode_err)?
            .and_then(|v| v.first().copied())
            .unwrap_or(1);
        let format = decoder
            .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)
            .map_err(decode_err)?
            .and_then(|v| v.first().copied())
            .unwrap_or(1);
        let kind = SampleKind::from_tags(bits, format)?;

        let compression = decoder
            .find_tag_unsigned(Tag::Compression)
            .map_err(decode_err)?
            .unwrap_or(COMPRESSION_NONE);
        let predictor = decoder
            .find_tag_unsigned(Tag::Predictor)
            .map_err(decode_err)?
            .unwrap_or(PREDICTOR_NONE);
        match predictor {
            PREDICTOR_NONE => {}
            PREDICTOR_HORIZONTAL if !kind.is_float() => {}
            other => {
                return Err(InferenceError::Decode(format!(
                    "unsupported TIFF predictor {} for {}",
                    other,
                    kind.name()
                )));
            }
        }
        let planar = decoder
            .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
            .map_err(decode_err)?
            == Some(PLANAR_SEPARATE);

        let tile_width = decoder
            .find_tag_unsigned::<usize>(Tag::TileWidth)
            .map_err(decode_err)?;
        let (tiled, chunk_width, chunk_height, offsets, byte_counts) = match tile_width {
            Some(tile_width) => (
                true,
                tile_width,
                decoder
                    .get_tag_unsigned::<usize>(Tag::TileLength)
                    .map_err(decode_err)?,
                decoder.get_tag_u64_vec(Tag::TileOffsets).map_err(decode_err)?,
                decoder
                    .get_tag_u64_vec(Tag::TileByteCounts)
                    .map_err(decode_err)?,
            ),
            None => (
                false,
                width,
                decoder
                    .find_tag_unsigned::<usize>(Tag::RowsPerStrip)
                    .map_err(decode_err)?
                    .unwrap_or(height)
                    .min(height),
                decoder.get_tag_u64_vec(Tag::StripOffsets).map_err(decode_err)?,
                decoder
                    .get_tag_u64_vec(Tag::StripByteCounts)
                    .map_err(decode_err)?,
            ),
        };
        if width == 0 || height == 0 || chunk_width == 0 || chunk_height == 0 {
            return Err(InferenceError::Decode(format!(
                "invalid {}x{} raster with {}x{} chunks",
                width, height, chunk_width, chunk_height
            )));
        }

        let chunks_across = width.div_ceil(chunk_width);
        let chunks_per_plane = chunks_across * height.div_ceil(chunk_height);
        let planes = if planar { samples as usize } else { 1 };
        if offsets.len() != chunks_per_plane * planes || byte_counts.len() != offsets.len() {
            return Err(InferenceError::Decode(format!(
                "expected {} chunks, found {} offsets and {} byte counts",
                chunks_per_plane * planes,
                offsets.len(),
                byte_counts.len()
            )));
        }

        Ok(Self {
            bytes,
            little_endian: bytes.starts_with(b"II"),
            width,
            height,
            samples: samples as usize,
            kind,
            compression,
            predictor,
            planar,
            tiled,
            chunk_width,
            chunk_height,
            chunks_across,
            chunks_per_plane,
            offsets,
            byte_counts,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_count(&self) -> usize {
        self.samples
    }

    pub fn sample_type(&self) -> &'static str {
        self.kind.name()
    }

    /// Read bands by 1-based index, in the order given
    pub fn read_bands(&self, bands: &[usize]) -> Result<Raster, InferenceError> {
        if let Some(&band) = bands.iter().find(|&&b| b == 0 || b > self.samples) {
            return Err(InferenceError::Shape(format!(
                "band {} requested but raster has {} bands",
                band, self.samples
            )));
        }
        let decoded = (bands.len() as u64)
            .saturating_mul(self.width as u64)
            .saturating_mul(self.height as u64)
            .saturating_mul(4);
        if decoded > MAX_DECODED_BYTES {
            return Err(InferenceError::Decode(format!(
                "{} bands of {}x{} exceed the decoding limit",
                bands.len(),
                self.width,
                self.height
            )));
        }

        let mut data = Array3::zeros((bands.len(), self.height, self.width));
        if self.planar {
            for (out, &band) in bands.iter().enumerate() {
                for chunk in 0..self.chunks_per_plane {
                    let index = (band - 1) * self.chunks_per_plane + chunk;
                    let words = self.decode_chunk(index, 1)?;
                    self.scatter(chunk, &words, 1, &[(0, out)], &mut data);
                }
            }
        } else {
            let picks: Vec<(usize, usize)> = bands
                .iter()
                .enumerate()
                .map(|(out, &band)| (band - 1, out))
                .collect();
            for chunk in 0..self.chunks_per_plane {
                let words = self.decode_chunk(chunk, self.samples)?;
                self.scatter(chunk, &words, self.samples, &picks, &mut data);
            }
        }

        Ok(Raster {
            data,
            sample_type: self.kind.name(),
        })
    }

    /// Rows physically stored in a chunk; tiles are padded, the last strip is not
    fn stored_rows(&self, chunk: usize) -> usize {
        if self.tiled {
            self.chunk_height
        } else {
            let row0 = (chunk / self.chunks_across) * self.chunk_height;
            self.chunk_height.min(self.height - row0)
        }
    }

    /// Decompress one chunk into raw sample words
    fn decode_chunk(&self, index: usize, samples: usize) -> Result<Vec<u64>, InferenceError> {
        let outside = || InferenceError::Decode(format!("chunk {} lies outside the file", index));
        let start = usize::try_from(self.offsets[index]).map_err(|_| outside())?;
        let len = usize::try_from(self.byte_counts[index]).map_err(|_| outside())?;
        let compressed = start
            .checked_add(len)
            .and_then(|end| self.bytes.get(start..end))
            .ok_or_else(outside)?;

        let size = self.kind.size();
        let row_len = self.chunk_width * samples;
        let expected = self.stored_rows(index % self.chunks_per_plane) * row_len * size;
        let raw = decompress(self.compression, compressed, expected)?;
        if raw.len() < expected {
            return Err(InferenceError::Decode(format!(
                "chunk {} holds {} bytes, expected {}",
                index,
                raw.len(),
                expected
            )));
        }

        let mut words: Vec<u64> = raw[..expected]
            .chunks_exact(size)
            .map(|b| read_word(b, self.little_endian))
            .collect();
        if self.predictor == PREDICTOR_HORIZONTAL {
            undo_horizontal_predictor(&mut words, row_len, samples, size);
        }
        Ok(words)
    }

    /// Copy the picked `(sample, output band)` pairs of a chunk into `data`
    fn scatter(
        &self,
        chunk: usize,
        words: &[u64],
        samples: usize,
        picks: &[(usize, usize)],
        data: &mut Array3<f32>,
    ) {
        let col0 = (chunk % self.chunks_across) * self.chunk_width;
        let row0 = (chunk / self.chunks_across) * self.chunk_height;
        let rows = self.chunk_height.min(self.height - row0);
        let cols = self.chunk_width.min(self.width - col0);

        for r in 0..rows {
            for c in 0..cols {
                let base = (r * self.chunk_width + c) * samples;
                for &(sample, out) in picks {
                    data[[out, row0 + r, col0 + c]] = self.kind.to_f32(words[base + sample]);
                }
            }
        }
    }
}

//! Test Utilities Module
//!
//! Fixtures shared by unit tests. This module is only compiled when running tests.

#![cfg(test)]

use std::io::Cursor;

use tiff::encoder::TiffEncoder;
use tiff::encoder::colortype::ColorType;
use tiff::encoder::compression::{Compression, Uncompressed};
use tiff::tags::{PhotometricInterpretation, SampleFormat};

/// `N` 16-bit unsigned samples per pixel, like a Sentinel-2 export
pub struct Multiband16<const N: usize>;

impl<const N: usize> ColorType for Multiband16<N> {
    type Inner = u16;
    const TIFF_VALUE: PhotometricInterpretation = PhotometricInterpretation::BlackIsZero;
    const BITS_PER_SAMPLE: &'static [u16] = &[16; N];
    const SAMPLE_FORMAT: &'static [SampleFormat] = &[SampleFormat::Uint; N];
}

/// Encode a pixel-interleaved uint16 TIFF whose sample at (band, y, x) is
/// `value(band, y, x)`. Band counts from 1 to 8 are supported.
pub fn multiband_tiff(
    width: u32,
    height: u32,
    bands: usize,
    value: impl Fn(usize, usize, usize) -> u16,
) -> Vec<u8> {
    multiband_tiff_with(width, height, bands, Uncompressed, value)
}

/// [`multiband_tiff`] with compressed strips
pub fn multiband_tiff_with<D: Compression>(
    width: u32,
    height: u32,
    bands: usize,
    compression: D,
    value: impl Fn(usize, usize, usize) -> u16,
) -> Vec<u8> {
    let mut samples = Vec::with_capacity(width as usize * height as usize * bands);
    for y in 0..height as usize {
        for x in 0..width as usize {
            for b in 0..bands {
                samples.push(value(b, y, x));
            }
        }
    }

    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut buffer).expect("Failed to create TIFF encoder");
    let (w, h, c, s) = (width, height, compression, &samples);
    let result = match bands {
        1 => encoder.write_image_with_compression::<Multiband16<1>, D>(w, h, c, s),
        2 => encoder.write_image_with_compression::<Multiband16<2>, D>(w, h, c, s),
        3 => encoder.write_image_with_compression::<Multiband16<3>, D>(w, h, c, s),
        4 => encoder.write_image_with_compression::<Multiband16<4>, D>(w, h, c, s),
        5 => encoder.write_image_with_compression::<Multiband16<5>, D>(w, h, c, s),
        6 => encoder.write_image_with_compression::<Multiband16<6>, D>(w, h, c, s),
        7 => encoder.write_image_with_compression::<Multiband16<7>, D>(w, h, c, s),
        8 => encoder.write_image_with_compression::<Multiband16<8>, D>(w, h, c, s),
        n => panic!("unsupported band count {}", n),
    };
    result.expect("Failed to encode TIFF");

    buffer.into_inner()
}

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

/// Hand-built little-endian, uncompressed, band-sequential uint16 TIFF
pub struct PlanarTiff {
    width: u32,
    height: u32,
    bands: usize,
    rows_per_strip: u32,
    shared: bool,
}

impl PlanarTiff {
    pub fn new(width: u32, height: u32, bands: usize) -> Self {
        Self {
            width,
            height,
            bands,
            rows_per_strip: height,
            shared: false,
        }
    }

    pub fn rows_per_strip(mut self, rows: u32) -> Self {
        self.rows_per_strip = rows;
        self
    }

    /// Point every strip of every band at the first strip of band 0
    pub fn shared_strips(mut self) -> Self {
        self.shared = true;
        self
    }

    fn strip(
        &self,
        band: usize,
        strip: u32,
        value: &impl Fn(usize, usize, usize) -> u16,
    ) -> Vec<u8> {
        let y0 = strip * self.rows_per_strip;
        let y1 = (y0 + self.rows_per_strip).min(self.height);
        let mut bytes = Vec::new();
        for y in y0..y1 {
            for x in 0..self.width {
                bytes.extend_from_slice(&value(band, y as usize, x as usize).to_le_bytes());
            }
        }
        bytes
    }

    pub fn build(&self, value: impl Fn(usize, usize, usize) -> u16) -> Vec<u8> {
        let strips_per_band = self.height.div_ceil(self.rows_per_strip);
        let strip_total = strips_per_band as usize * self.bands;

        // Header with the IFD offset patched in at the end
        let mut file = b"II\x2a\x00\x00\x00\x00\x00".to_vec();
        let mut offsets = Vec::with_capacity(strip_total);
        let mut counts = Vec::with_capacity(strip_total);
        if self.shared {
            let block = self.strip(0, 0, &value);
            offsets.resize(strip_total, file.len() as u32);
            counts.resize(strip_total, block.len() as u32);
            file.extend_from_slice(&block);
        } else {
            for band in 0..self.bands {
                for strip in 0..strips_per_band {
                    let block = self.strip(band, strip, &value);
                    offsets.push(file.len() as u32);
                    counts.push(block.len() as u32);
                    file.extend_from_slice(&block);
                }
            }
        }

        let bands = self.bands as u32;
        let entries: Vec<(u16, u16, Vec<u32>)> = vec![
            (256, TYPE_LONG, vec![self.width]),
            (257, TYPE_LONG, vec![self.height]),
            (258, TYPE_SHORT, vec![16; self.bands]),
            (259, TYPE_SHORT, vec![1]),
            (262, TYPE_SHORT, vec![1]),
            (273, TYPE_LONG, offsets),
            (277, TYPE_SHORT, vec![bands]),
            (278, TYPE_LONG, vec![self.rows_per_strip]),
            (279, TYPE_LONG, counts),
            (284, TYPE_SHORT, vec![2]),
            (339, TYPE_SHORT, vec![1; self.bands]),
        ];

        // Values wider than four bytes live before the IFD
        let mut fields = Vec::with_capacity(entries.len());
        for (tag, kind, values) in entries {
            let payload: Vec<u8> = values
                .iter()
                .flat_map(|&v| match kind {
                    TYPE_SHORT => (v as u16).to_le_bytes().to_vec(),
                    _ => v.to_le_bytes().to_vec(),
                })
                .collect();
            let field = if payload.len() <= 4 {
                let mut inline = payload;
                inline.resize(4, 0);
                inline
            } else {
                if file.len() % 2 == 1 {
                    file.push(0);
                }
                let offset = file.len() as u32;
                file.extend_from_slice(&payload);
                offset.to_le_bytes().to_vec()
            };
            fields.push((tag, kind, values.len() as u32, field));
        }

        if file.len() % 2 == 1 {
            file.push(0);
        }
        let ifd_offset = file.len() as u32;
        file[4..8].copy_from_slice(&ifd_offset.to_le_bytes());
        file.extend_from_slice(&(fields.len() as u16).to_le_bytes());
        for (tag, kind, count, field) in fields {
            file.extend_from_slice(&tag.to_le_bytes());
            file.extend_from_slice(&kind.to_le_bytes());
            file.extend_from_slice(&count.to_le_bytes());
            file.extend_from_slice(&field);
        }
        file.extend_from_slice(&0u32.to_le_bytes());
        file
    }
}

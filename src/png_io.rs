//! PNG Text Chunk I/O
//!
//! Decodes a PNG into raw scanline data plus its text chunks and writes it
//! back with a new text chunk. Pixels are read with identity transformations
//! so colour type, bit depth and palette survive unchanged.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PngError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: png::DecodingError,
    },

    #[error("Failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },
}

/// Decoded PNG with its text chunks, in file order by chunk kind
#[derive(Debug, Clone)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    pub color_type: png::ColorType,
    pub bit_depth: png::BitDepth,
    pub palette: Option<Vec<u8>>,
    pub trns: Option<Vec<u8>>,
    pub pixels: Vec<u8>,
    pub text: Vec<(String, String)>,
}

fn open(path: &Path) -> Result<png::Decoder<BufReader<File>>, PngError> {
    let file = File::open(path).map_err(|source| PngError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::IDENTITY);
    Ok(decoder)
}

fn decode_err(path: &Path) -> impl FnOnce(png::DecodingError) -> PngError + '_ {
    move |source| PngError::Decode {
        path: path.to_path_buf(),
        source,
    }
}

fn collect_text(info: &png::Info) -> Vec<(String, String)> {
    let mut text: Vec<_> = info
        .uncompressed_latin1_text
        .iter()
        .map(|chunk| (chunk.keyword.clone(), chunk.text.clone()))
        .collect();

    for chunk in &info.compressed_latin1_text {
        match chunk.get_text() {
            Ok(value) => text.push((chunk.keyword.clone(), value)),
            Err(e) => warn!(keyword = %chunk.keyword, error = %e, "Unreadable zTXt chunk"),
        }
    }
    for chunk in &info.utf8_text {
        match chunk.get_text() {
            Ok(value) => text.push((chunk.keyword.clone(), value)),
            Err(e) => warn!(keyword = %chunk.keyword, error = %e, "Unreadable iTXt chunk"),
        }
    }
    text
}

fn is_latin1(value: &str) -> bool {
    value.chars().all(|c| (c as u32) < 0x100)
}

/// Text chunks stored ahead of the image data, without decoding pixels.
pub fn read_text(path: &Path) -> Result<Vec<(String, String)>, PngError> {
    let reader = open(path)?.read_info().map_err(decode_err(path))?;
    Ok(collect_text(reader.info()))
}

impl PngImage {
    pub fn read(path: &Path) -> Result<Self, PngError> {
        let mut reader = open(path)?.read_info().map_err(decode_err(path))?;

        let mut pixels = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut pixels).map_err(decode_err(path))?;
        pixels.truncate(frame.buffer_size());

        let info = reader.info();
        Ok(Self {
            width: info.width,
            height: info.height,
            color_type: info.color_type,
            bit_depth: info.bit_depth,
            palette: info.palette.as_ref().map(|p| p.to_vec()),
            trns: info.trns.as_ref().map(|t| t.to_vec()),
            pixels,
            text: collect_text(info),
        })
    }

    /// First text chunk stored under `key`
    pub fn text(&self, key: &str) -> Option<&str> {
        self.text
            .iter()
            .find(|(keyword, _)| keyword == key)
            .map(|(_, value)| value.as_str())
    }

    /// Write the same pixels to `path` carrying a single text chunk.
    ///
    /// Latin-1 text goes into tEXt; anything else needs iTXt.
    pub fn write_with_text(&self, path: &Path, key: &str, value: &str) -> Result<(), PngError> {
        let encode_err = |source| PngError::Encode {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(|source| PngError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(self.color_type);
        encoder.set_depth(self.bit_depth);
        if let Some(palette) = &self.palette {
            encoder.set_palette(palette.clone());
        }
        if let Some(trns) = &self.trns {
            encoder.set_trns(trns.clone());
        }

        if is_latin1(value) {
            encoder
                .add_text_chunk(key.to_string(), value.to_string())
                .map_err(encode_err)?;
        } else {
            encoder
                .add_itxt_chunk(key.to_string(), value.to_string())
                .map_err(encode_err)?;
        }

        let mut writer = encoder.write_header().map_err(encode_err)?;
        writer.write_image_data(&self.pixels).map_err(encode_err)?;
        writer.finish().map_err(encode_err)?;
        Ok(())
    }
}

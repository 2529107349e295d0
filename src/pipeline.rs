//! Conversion Pipeline - Single Entry Point
//!
//! Per file: decode -> canvas redirect -> validate -> map and resolve hashes
//! -> encode. Every failure skips the current file only, unless it is fatal
//! to the whole run (see [`ConvertError::is_fatal`]).

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::hashing::{HashCache, HashError, HashResolver};
use crate::metadata::{InvokePayload, MetadataError, SourceMetadata};
use crate::parameters::build_metadata_text;
use crate::png_io::{self, PngError, PngImage};
use crate::sampler::SamplerTable;
use crate::{INVOKEAI_METADATA_KEY, OUTPUT_SUFFIX, PARAMETERS_KEY};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{} is not generated by InvokeAI", .0.display())]
    NotInvokeFormat(PathBuf),

    #[error("Unknown sampler: {0}")]
    UnknownSampler(String),

    #[error("{0} not configured in config file")]
    NotConfigured(&'static str),

    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Malformed metadata: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error(transparent)]
    Hash(HashError),

    #[error(transparent)]
    Png(#[from] PngError),
}

impl ConvertError {
    /// Errors that stop the batch instead of skipping one file
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConvertError::Hash(e) if e.is_fatal())
    }
}

impl From<HashError> for ConvertError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::NotConfigured(setting) => ConvertError::NotConfigured(setting),
            HashError::NotFound(path) => ConvertError::NotFound(path),
            other => ConvertError::Hash(other),
        }
    }
}

impl From<MetadataError> for ConvertError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::MissingField(field) => ConvertError::MissingField(field),
            MetadataError::Malformed(e) => ConvertError::Malformed(e),
        }
    }
}

/// Outcome of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub converted: Vec<PathBuf>,
}

impl BatchReport {
    pub fn successes(&self) -> usize {
        self.converted.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} / {} files successfully converted.",
            self.successes(),
            self.total
        )
    }
}

/// `<dir>/<stem>_a1111.<ext>` next to the input
pub fn output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, OUTPUT_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, OUTPUT_SUFFIX),
    };
    input.with_file_name(name)
}

/// The conversion pipeline - owns config, sampler table and hash resolver
pub struct Converter {
    config: Config,
    samplers: SamplerTable,
    resolver: HashResolver,
}

impl Converter {
    pub fn new(config: Config, cache: HashCache) -> Self {
        let resolver = HashResolver::new(&config, cache);
        Self {
            config,
            samplers: SamplerTable::builtin(),
            resolver,
        }
    }

    pub fn resolver(&self) -> &HashResolver {
        &self.resolver
    }

    fn payload_of(image_text: Option<&str>, path: &Path) -> Result<InvokePayload, ConvertError> {
        let json = image_text.ok_or_else(|| ConvertError::NotInvokeFormat(path.to_path_buf()))?;
        Ok(InvokePayload::from_json(json)?)
    }

    /// Swap a canvas image's payload for its original's. One level only.
    fn follow_canvas_reference(&self, payload: InvokePayload) -> Result<InvokePayload, ConvertError> {
        if !payload.is_canvas_image() {
            return Ok(payload);
        }
        info!("In-painted image, loading metadata from original image");

        let Some(image_name) = payload.back_reference() else {
            warn!("Canvas image has no original image reference, using its own metadata");
            return Ok(payload);
        };
        let folder = self
            .config
            .invokeai_output_folder
            .as_deref()
            .ok_or(ConvertError::NotConfigured("invokeai_output_folder"))?;

        let original = folder.join(image_name);
        if !original.exists() {
            return Err(ConvertError::NotFound(original));
        }
        let text = png_io::read_text(&original)?;
        let json = text
            .iter()
            .find(|(key, _)| key == INVOKEAI_METADATA_KEY)
            .map(|(_, value)| value.as_str());
        Self::payload_of(json, &original)
    }

    /// Parameters text for the image at `path`, following canvas references.
    pub fn metadata_text(&mut self, image: &PngImage, path: &Path) -> Result<String, ConvertError> {
        let payload = Self::payload_of(image.text(INVOKEAI_METADATA_KEY), path)?;
        let payload = self.follow_canvas_reference(payload)?;
        let meta: SourceMetadata = payload.validate()?;
        build_metadata_text(&meta, &self.samplers, &mut self.resolver)
    }

    /// Convert one file, returning the path written.
    pub fn convert_file(&mut self, path: &Path) -> Result<PathBuf, ConvertError> {
        let image = PngImage::read(path)?;
        let text = self.metadata_text(&image, path)?;

        let out = output_path(path);
        image.write_with_text(&out, PARAMETERS_KEY, &text)?;
        Ok(out)
    }

    /// Convert every file, skipping the ones that fail.
    ///
    /// Returns early only on a fatal error.
    pub fn run<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<BatchReport, ConvertError> {
        let mut report = BatchReport {
            total: paths.len(),
            converted: Vec::new(),
        };

        for path in paths {
            let path = path.as_ref();
            info!(file = %path.display(), "Processing file");
            match self.convert_file(path) {
                Ok(out) => {
                    info!(file = %out.display(), "Converted file saved");
                    report.converted.push(out);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Skipping file");
                }
            }
        }

        Ok(report)
    }
}

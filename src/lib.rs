//! invoke2a1111 - InvokeAI to Automatic1111 metadata converter
//!
//! Reads the `invokeai_metadata` JSON embedded in an InvokeAI PNG, rebuilds
//! the equivalent Automatic1111 `parameters` text (prompt, sampler, seed,
//! model hashes, ...) and writes a copy of the image carrying it.

pub mod config;
pub mod hashing;
pub mod metadata;
pub mod parameters;
pub mod pipeline;
pub mod png_io;
pub mod sampler;

pub use config::{Config, ConfigError};
pub use hashing::{HashCache, HashError, HashResolver, ModelKind};
pub use metadata::{InvokePayload, LoraRef, MetadataError, ModelRef, SourceMetadata};
pub use parameters::{build_metadata_text, build_parameters, Parameters, Segment, A1111_VERSION};
pub use pipeline::{BatchReport, ConvertError, Converter};
pub use sampler::{SamplerInfo, SamplerTable, ScheduleType};

/// PNG text key InvokeAI stores its generation metadata under
pub const INVOKEAI_METADATA_KEY: &str = "invokeai_metadata";

/// PNG text key Automatic1111 reads
pub const PARAMETERS_KEY: &str = "parameters";

pub const OUTPUT_SUFFIX: &str = "_a1111";

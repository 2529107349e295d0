//! Automatic1111 Parameters Text
//!
//! Maps validated InvokeAI metadata onto the single `parameters` string A1111
//! writes: prompt, optional negative prompt line, then labeled segments in a
//! fixed order joined by `, `.

use serde_json::Number;
use std::fmt;

use crate::hashing::{model_file_name, HashResolver, ModelKind};
use crate::metadata::SourceMetadata;
use crate::pipeline::ConvertError;
use crate::sampler::{SamplerTable, ScheduleType};

/// Version tag A1111 appends; hard-coded to the release the format mimics.
pub const A1111_VERSION: &str = "v1.9.4";

/// Render a JSON number as A1111 (Python `str()`) does: integers verbatim,
/// floats positional for exponents -4..16 and scientific (`1e-05`) otherwise.
pub fn format_number(number: &Number) -> String {
    let value = match number.as_f64() {
        Some(value) if number.is_f64() => value,
        _ => return number.to_string(),
    };

    let sign = if value.is_sign_negative() { "-" } else { "" };
    let scientific = format!("{:e}", value.abs());
    let Some((mantissa, exp)) = scientific.split_once('e') else {
        return number.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return number.to_string();
    };

    if !(-4..16).contains(&exp) {
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{}{}e{}{:02}", sign, mantissa, exp_sign, exp.abs());
    }

    let digits = mantissa.replace('.', "");
    if exp < 0 {
        return format!("{}0.{}{}", sign, "0".repeat((-exp - 1) as usize), digits);
    }
    let int_len = exp as usize + 1;
    if digits.len() <= int_len {
        format!("{}{}{}.0", sign, digits, "0".repeat(int_len - digits.len()))
    } else {
        format!("{}{}.{}", sign, &digits[..int_len], &digits[int_len..])
    }
}

/// One labeled `Key: value` field of the parameters line
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Steps(u64),
    Sampler(&'static str),
    ScheduleType(ScheduleType),
    CfgScale(Number),
    Seed(i64),
    Size { width: u32, height: u32 },
    ModelHash(String),
    Model(String),
    VaeHash(String),
    Vae(String),
    /// `(name, short hash)` in LoRA order
    LoraHashes(Vec<(String, String)>),
    Version(&'static str),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Steps(steps) => write!(f, "Steps: {}", steps),
            Segment::Sampler(name) => write!(f, "Sampler: {}", name),
            Segment::ScheduleType(kind) => write!(f, "Schedule type: {}", kind),
            Segment::CfgScale(cfg) => write!(f, "CFG scale: {}", format_number(cfg)),
            Segment::Seed(seed) => write!(f, "Seed: {}", seed),
            Segment::Size { width, height } => write!(f, "Size: {}x{}", width, height),
            Segment::ModelHash(hash) => write!(f, "Model hash: {}", hash),
            Segment::Model(name) => write!(f, "Model: {}", name),
            Segment::VaeHash(hash) => write!(f, "VAE hash: {}", hash),
            Segment::Vae(name) => write!(f, "VAE: {}", model_file_name(name)),
            Segment::LoraHashes(loras) => {
                let pairs: Vec<_> = loras
                    .iter()
                    .map(|(name, hash)| format!("{}: {}", name, hash))
                    .collect();
                write!(f, "Lora hashes: \"{}\"", pairs.join(", "))
            }
            Segment::Version(version) => write!(f, "Version: {}", version),
        }
    }
}

/// Structured form of the parameters text, before rendering
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Positive prompt including any `<lora:name:weight>` tags
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub segments: Vec<Segment>,
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prompt)?;
        if let Some(negative) = &self.negative_prompt {
            write!(f, "\nNegative prompt: {}", negative)?;
        }
        for (idx, segment) in self.segments.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Map metadata to segments, resolving every model hash on the way.
///
/// Fails on the first unknown sampler or unresolvable hash; no partial
/// LoRA list is ever produced.
pub fn build_parameters(
    meta: &SourceMetadata,
    samplers: &SamplerTable,
    resolver: &mut HashResolver,
) -> Result<Parameters, ConvertError> {
    let mut prompt = meta.positive_prompt.clone();
    let mut segments = vec![Segment::Steps(meta.steps)];

    if let Some(key) = &meta.scheduler {
        let info = samplers
            .get(key)
            .ok_or_else(|| ConvertError::UnknownSampler(key.clone()))?;
        segments.push(Segment::Sampler(info.display_name));
        segments.push(Segment::ScheduleType(info.schedule_type));
    }

    if let Some(cfg) = &meta.cfg_scale {
        segments.push(Segment::CfgScale(cfg.clone()));
    }

    segments.push(Segment::Seed(meta.seed));
    segments.push(Segment::Size {
        width: meta.width,
        height: meta.height,
    });

    let model_hash = resolver.resolve(ModelKind::Checkpoint, &meta.model)?;
    segments.push(Segment::ModelHash(model_hash));
    segments.push(Segment::Model(meta.model.name.clone()));

    if let Some(vae) = &meta.vae {
        let vae_hash = resolver.resolve(ModelKind::Vae, vae)?;
        segments.push(Segment::VaeHash(vae_hash));
        segments.push(Segment::Vae(vae.name.clone()));
    }

    if !meta.loras.is_empty() {
        let mut lora_hashes = Vec::with_capacity(meta.loras.len());
        for lora in &meta.loras {
            let hash = resolver.resolve(ModelKind::Lora, &lora.model)?;
            lora_hashes.push((lora.model.name.clone(), hash));
        }
        for lora in &meta.loras {
            prompt.push_str(&format!(
                " <lora:{}:{}>",
                lora.model.name,
                format_number(&lora.weight)
            ));
        }
        segments.push(Segment::LoraHashes(lora_hashes));
    }

    segments.push(Segment::Version(A1111_VERSION));

    Ok(Parameters {
        prompt,
        negative_prompt: meta.negative_prompt.clone(),
        segments,
    })
}

/// Render the A1111 `parameters` text for `meta`.
pub fn build_metadata_text(
    meta: &SourceMetadata,
    samplers: &SamplerTable,
    resolver: &mut HashResolver,
) -> Result<String, ConvertError> {
    Ok(build_parameters(meta, samplers, resolver)?.to_string())
}

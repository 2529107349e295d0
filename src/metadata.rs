//! InvokeAI Metadata Payload
//!
//! The JSON stored under the `invokeai_metadata` PNG text key. Parsing is two
//! steps: deserialize with every field optional, then validate into
//! [`SourceMetadata`] where required fields are guaranteed present.

use serde::Deserialize;
use serde_json::Number;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Malformed metadata: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reference to a model weights file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub name: String,
    /// `sha256:<hex>` when InvokeAI knows the full hash, otherwise opaque
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoraRef {
    pub model: ModelRef,
    pub weight: Number,
}

/// Validated generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub positive_prompt: String,
    pub negative_prompt: Option<String>,
    pub steps: u64,
    pub scheduler: Option<String>,
    pub cfg_scale: Option<Number>,
    pub seed: i64,
    pub width: u32,
    pub height: u32,
    pub model: ModelRef,
    pub vae: Option<ModelRef>,
    pub loras: Vec<LoraRef>,
}

impl SourceMetadata {
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        InvokePayload::from_json(json)?.validate()
    }
}

/// Entry of `_canvas_objects`, present on canvas (inpainted) images
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CanvasObject {
    #[serde(rename = "imageName", default)]
    pub image_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawModel {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawLora {
    #[serde(default)]
    model: Option<RawModel>,
    #[serde(default)]
    weight: Option<Number>,
}

/// Unvalidated payload as found in the image
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvokePayload {
    #[serde(default)]
    positive_prompt: Option<String>,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default)]
    steps: Option<u64>,
    #[serde(default)]
    scheduler: Option<String>,
    #[serde(default)]
    cfg_scale: Option<Number>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    model: Option<RawModel>,
    #[serde(default)]
    vae: Option<RawModel>,
    #[serde(default)]
    loras: Option<Vec<RawLora>>,
    #[serde(rename = "_canvas_objects", default)]
    canvas_objects: Option<Vec<CanvasObject>>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, MetadataError> {
    value.ok_or_else(|| MetadataError::MissingField(field.to_string()))
}

impl RawModel {
    fn validate(self, field: &str) -> Result<ModelRef, MetadataError> {
        Ok(ModelRef {
            name: required(self.name, &format!("{}.name", field))?,
            hash: self.hash,
        })
    }
}

impl InvokePayload {
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(json)?)
    }

    /// True when the image was composed on the canvas
    pub fn is_canvas_image(&self) -> bool {
        self.canvas_objects.is_some()
    }

    /// Name of the original image this canvas image was painted over, taken
    /// from the first canvas object that carries one.
    pub fn back_reference(&self) -> Option<&str> {
        self.canvas_objects
            .as_deref()?
            .iter()
            .find_map(|obj| obj.image_name.as_deref())
    }

    pub fn validate(self) -> Result<SourceMetadata, MetadataError> {
        let model = required(self.model, "model")?.validate("model")?;
        let vae = self.vae.map(|vae| vae.validate("vae")).transpose()?;

        let loras = self
            .loras
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, lora)| {
                let field = format!("loras[{}]", idx);
                Ok(LoraRef {
                    model: required(lora.model, &format!("{}.model", field))?
                        .validate(&format!("{}.model", field))?,
                    weight: required(lora.weight, &format!("{}.weight", field))?,
                })
            })
            .collect::<Result<Vec<_>, MetadataError>>()?;

        Ok(SourceMetadata {
            positive_prompt: required(self.positive_prompt, "positive_prompt")?,
            negative_prompt: self.negative_prompt,
            steps: required(self.steps, "steps")?,
            scheduler: self.scheduler,
            cfg_scale: self.cfg_scale,
            seed: required(self.seed, "seed")?,
            width: required(self.width, "width")?,
            height: required(self.height, "height")?,
            model,
            vae,
            loras,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_payload() {
        let meta = SourceMetadata::from_json(
            r#"{"positive_prompt": "cat", "steps": 20, "seed": 42, "width": 512,
                "height": 768, "model": {"name": "foo", "hash": "sha256:abc"}}"#,
        )
        .unwrap();
        assert_eq!(meta.positive_prompt, "cat");
        assert_eq!(meta.height, 768);
        assert!(meta.negative_prompt.is_none());
        assert!(meta.loras.is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let err = SourceMetadata::from_json(
            r#"{"positive_prompt": "cat", "seed": 42, "width": 512, "height": 512,
                "model": {"name": "foo"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MetadataError::MissingField(ref f) if f == "steps"));
    }

    #[test]
    fn test_missing_nested_field() {
        let err = SourceMetadata::from_json(
            r#"{"positive_prompt": "cat", "steps": 1, "seed": 42, "width": 512, "height": 512,
                "model": {"name": "foo"}, "loras": [{"model": {"name": "a"}}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: loras[0].weight");
    }

    #[test]
    fn test_numbers_keep_their_spelling() {
        let meta = SourceMetadata::from_json(
            r#"{"positive_prompt": "", "steps": 1, "seed": 1, "width": 8, "height": 8,
                "cfg_scale": 7.0, "model": {"name": "m"},
                "loras": [{"model": {"name": "a", "hash": "x"}, "weight": 1}]}"#,
        )
        .unwrap();
        assert_eq!(meta.cfg_scale.unwrap().to_string(), "7.0");
        assert_eq!(meta.loras[0].weight.to_string(), "1");
    }

    #[test]
    fn test_negative_seed() {
        let meta = SourceMetadata::from_json(
            r#"{"positive_prompt": "cat", "steps": 20, "seed": -1, "width": 512,
                "height": 512, "model": {"name": "foo"}}"#,
        )
        .unwrap();
        assert_eq!(meta.seed, -1);
    }

    #[test]
    fn test_back_reference_skips_objects_without_name() {
        let payload = InvokePayload::from_json(
            r#"{"_canvas_objects": [{"kind": "brush"}, {"imageName": "orig.png"}]}"#,
        )
        .unwrap();
        assert!(payload.is_canvas_image());
        assert_eq!(payload.back_reference(), Some("orig.png"));
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let err = SourceMetadata::from_json(r#"{"steps": "twenty"}"#).unwrap_err();
        assert!(matches!(err, MetadataError::Malformed(_)));
    }
}

//! Model Hashing - SHA-256 Short Hashes
//!
//! Automatic1111 identifies checkpoints, VAEs and LoRAs by the first 10 hex
//! characters of the SHA-256 digest of the weights file. Hashing a multi-GB
//! file takes seconds, so results are kept in a JSON cache that is rewritten
//! after every change.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metadata::ModelRef;

pub const DEFAULT_HASH_CACHE_FILE: &str = "hash_cache.json";

/// Marker InvokeAI puts in front of a full SHA-256 model hash
pub const SHA256_MARKER: &str = "sha256:";

/// Cache value for a model file that could not be opened
pub const NOFILE: &str = "NOFILE";

pub const SHORT_HASH_LEN: usize = 10;

const MODEL_EXTENSION: &str = ".safetensors";

const READ_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    #[error("Model file {} not found", .0.display())]
    NotFound(PathBuf),

    #[error("Malformed model hash: {0}")]
    InvalidHash(String),

    #[error("Failed to read model file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Hash cache {path} unavailable: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Hash cache {path} is not valid JSON: {source}")]
    CacheFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl HashError {
    /// Cache failures mean the environment is broken, not the current image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HashError::CacheIo { .. } | HashError::CacheFormat { .. })
    }
}

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Stream a reader through SHA-256 in 1 MiB blocks
pub fn sha256_reader(reader: impl Read) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(READ_BLOCK_SIZE, reader);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// First 10 hex characters of a digest, lower-cased. `None` if the digest is
/// too short or not hex.
pub fn short_hash(digest: &str) -> Option<String> {
    let prefix = digest.get(..SHORT_HASH_LEN)?;
    if prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(prefix.to_ascii_lowercase())
    } else {
        None
    }
}

fn is_short_hash(value: &str) -> bool {
    value.len() == SHORT_HASH_LEN
        && value.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

// We need hex encoding
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Persistent basename -> short hash map
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HashCache {
    /// Empty cache that will be written to `path` on first insert.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, HashError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::new(path));
        }
        let content = fs::read_to_string(&path).map_err(|source| HashError::CacheIo {
            path: path.clone(),
            source,
        })?;
        let entries = serde_json::from_str(&content).map_err(|source| HashError::CacheFormat {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "Hash cache found");
        Ok(Self { path, entries })
    }

    /// Cached short hash for `basename`. `NOFILE` markers and corrupt values
    /// count as misses.
    pub fn get(&self, basename: &str) -> Option<&str> {
        self.entries
            .get(basename)
            .map(String::as_str)
            .filter(|value| is_short_hash(value))
    }

    /// Raw stored value, including the `NOFILE` sentinel.
    pub fn raw(&self, basename: &str) -> Option<&str> {
        self.entries.get(basename).map(String::as_str)
    }

    /// Store a value and persist the cache if it changed.
    pub fn insert(&mut self, basename: &str, value: &str) -> Result<(), HashError> {
        if self.raw(basename) == Some(value) {
            return Ok(());
        }
        self.entries.insert(basename.to_string(), value.to_string());
        self.save()
    }

    /// Overwrite the cache file, pretty-printed with 4-space indentation.
    pub fn save(&self) -> Result<(), HashError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.entries
            .serialize(&mut ser)
            .map_err(|source| HashError::CacheFormat {
                path: self.path.clone(),
                source,
            })?;
        fs::write(&self.path, buf).map_err(|source| HashError::CacheIo {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "Hash cache saved");
        Ok(())
    }
}

/// Which configured folder a model's weights live in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Checkpoint,
    Vae,
    Lora,
}

impl ModelKind {
    pub fn setting(&self) -> &'static str {
        match self {
            ModelKind::Checkpoint => "model_folder",
            ModelKind::Vae => "vae_folder",
            ModelKind::Lora => "lora_folder",
        }
    }
}

/// Weights filename for a model reference, also the cache key.
pub fn model_file_name(name: &str) -> String {
    format!("{}{}", name, MODEL_EXTENSION)
}

/// Resolves model references to short hashes, backed by a [`HashCache`]
pub struct HashResolver {
    model_folder: Option<PathBuf>,
    vae_folder: Option<PathBuf>,
    lora_folder: Option<PathBuf>,
    cache: HashCache,
    digests_computed: u32,
}

impl HashResolver {
    pub fn new(config: &Config, cache: HashCache) -> Self {
        Self {
            model_folder: config.model_folder.clone(),
            vae_folder: config.vae_folder.clone(),
            lora_folder: config.lora_folder.clone(),
            cache,
            digests_computed: 0,
        }
    }

    pub fn cache(&self) -> &HashCache {
        &self.cache
    }

    /// Number of model files hashed from disk so far
    pub fn digests_computed(&self) -> u32 {
        self.digests_computed
    }

    fn folder(&self, kind: ModelKind) -> Option<&Path> {
        match kind {
            ModelKind::Checkpoint => self.model_folder.as_deref(),
            ModelKind::Vae => self.vae_folder.as_deref(),
            ModelKind::Lora => self.lora_folder.as_deref(),
        }
    }

    /// Short hash for `model`.
    ///
    /// An inline `sha256:` hash is used directly and written through to the
    /// cache. Anything else is looked up in the cache, then computed from
    /// `<folder>/<name>.safetensors`.
    pub fn resolve(&mut self, kind: ModelKind, model: &ModelRef) -> Result<String, HashError> {
        let basename = model_file_name(&model.name);

        if let Some(full) = model.hash.as_deref().and_then(|h| h.strip_prefix(SHA256_MARKER)) {
            let short = short_hash(full).ok_or_else(|| HashError::InvalidHash(full.to_string()))?;
            self.cache.insert(&basename, &short)?;
            return Ok(short);
        }

        info!(model = %model.name, "Model hash is not sha256, resolving from model file");
        let folder = self
            .folder(kind)
            .ok_or(HashError::NotConfigured(kind.setting()))?;

        if let Some(cached) = self.cache.get(&basename) {
            debug!(model = %basename, hash = cached, "Hash cache hit");
            return Ok(cached.to_string());
        }

        let path = folder.join(&basename);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Model file not found");
                self.cache.insert(&basename, NOFILE)?;
                return Err(HashError::NotFound(path));
            }
        };

        info!("Calculating model hash for {}. This will take a few seconds...", basename);
        let digest = sha256_reader(file).map_err(|source| HashError::Read {
            path: path.clone(),
            source,
        })?;
        self.digests_computed += 1;

        let short = short_hash(&digest).ok_or_else(|| HashError::InvalidHash(digest.clone()))?;
        self.cache.insert(&basename, &short)?;
        Ok(short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, hash: Option<&str>) -> ModelRef {
        ModelRef {
            name: name.to_string(),
            hash: hash.map(str::to_string),
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        assert_eq!(sha256_hex(data), sha256_hex(data));
        assert_eq!(sha256_reader(&data[..]).unwrap(), sha256_hex(data));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("ABCDEF0123456789").as_deref(), Some("abcdef0123"));
        assert_eq!(short_hash("abc"), None);
        assert_eq!(short_hash("blake3:abcdef"), None);
    }

    #[test]
    fn test_cache_persists_with_four_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash_cache.json");

        let mut cache = HashCache::load(&path).unwrap();
        cache.insert("foo.safetensors", "abcdef0123").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\n    \"foo.safetensors\": \"abcdef0123\"\n}");

        let reloaded = HashCache::load(&path).unwrap();
        assert_eq!(reloaded.get("foo.safetensors"), Some("abcdef0123"));
    }

    #[test]
    fn test_nofile_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HashCache::new(dir.path().join("c.json"));
        cache.insert("gone.safetensors", NOFILE).unwrap();
        assert_eq!(cache.get("gone.safetensors"), None);
        assert_eq!(cache.raw("gone.safetensors"), Some(NOFILE));
    }

    #[test]
    fn test_inline_hash_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path().join("c.json"));
        let mut resolver = HashResolver::new(&Config::default(), cache);

        let hash = resolver
            .resolve(ModelKind::Checkpoint, &model("foo", Some("sha256:0123456789abcdef")))
            .unwrap();
        assert_eq!(hash, "0123456789");
        assert_eq!(resolver.cache().get("foo.safetensors"), Some("0123456789"));
        assert_eq!(resolver.digests_computed(), 0);
    }

    #[test]
    fn test_unconfigured_folder() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path().join("c.json"));
        let mut resolver = HashResolver::new(&Config::default(), cache);

        let err = resolver
            .resolve(ModelKind::Lora, &model("detail", Some("blake3:ffff")))
            .unwrap_err();
        assert!(matches!(err, HashError::NotConfigured("lora_folder")));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_corrupt_cache_value_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("c.json");
        fs::write(&cache_path, r#"{"main.safetensors": "not-a-hash"}"#).unwrap();
        fs::write(dir.path().join("main.safetensors"), b"checkpoint").unwrap();
        let config = Config {
            model_folder: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let mut resolver = HashResolver::new(&config, HashCache::load(&cache_path).unwrap());

        let hash = resolver.resolve(ModelKind::Checkpoint, &model("main", None)).unwrap();
        assert_eq!(hash, &sha256_hex(b"checkpoint")[..10]);
        assert_eq!(resolver.digests_computed(), 1);

        let reloaded = HashCache::load(&cache_path).unwrap();
        assert_eq!(reloaded.get("main.safetensors"), Some(hash.as_str()));
    }

    #[test]
    fn test_malformed_inline_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path().join("c.json"));
        let mut resolver = HashResolver::new(&Config::default(), cache);

        let err = resolver
            .resolve(ModelKind::Checkpoint, &model("foo", Some("sha256:abc")))
            .unwrap_err();
        assert!(matches!(err, HashError::InvalidHash(ref h) if h == "abc"));
        assert!(!err.is_fatal());
        assert_eq!(resolver.cache().raw("foo.safetensors"), None);
    }

    #[test]
    fn test_computes_from_model_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vae.safetensors"), b"vae weights").unwrap();
        let config = Config {
            vae_folder: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let cache = HashCache::new(dir.path().join("c.json"));
        let mut resolver = HashResolver::new(&config, cache);

        let hash = resolver.resolve(ModelKind::Vae, &model("vae", None)).unwrap();
        assert_eq!(hash, &sha256_hex(b"vae weights")[..10]);
        assert_eq!(resolver.digests_computed(), 1);
    }
}

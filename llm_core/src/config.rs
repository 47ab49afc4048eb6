// Engine configuration: the model directory's config.json plus runtime overrides

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};

use crate::LoadError;

/// Backend used when the config file does not name one.
pub const DEFAULT_BACKEND: &str = "openai";

/// Opaque engine configuration.
///
/// The engine owns the set of recognized options, so the configuration is
/// kept as a raw JSON object. Typed accessors cover the keys this crate acts
/// on; everything else is carried untouched and visible to backends through
/// [`EngineConfig::get`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    options: Map<String, Value>,
    base_dir: PathBuf,
}

impl EngineConfig {
    /// Create from an in-memory object; asset paths resolve against `base_dir`.
    pub fn new(options: Map<String, Value>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            options,
            base_dir: base_dir.into(),
        }
    }

    /// Load from a `config.json` on disk
    pub fn from_path<P: AsRef<Path>>(p: P) -> Result<Self, LoadError> {
        let path = p.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LoadError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let json: Value = serde_json::from_str(&text).map_err(|source| LoadError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        let options = match json {
            Value::Object(map) => map,
            _ => {
                return Err(LoadError::InvalidOption {
                    key: "<root>".into(),
                    reason: format!("{} must be a JSON object", path.display()),
                })
            }
        };
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self { options, base_dir })
    }

    /// Merge `overrides` into the current options; later keys win.
    pub fn merge(&mut self, overrides: &Map<String, Value>) {
        for (key, value) in overrides {
            self.options.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn backend(&self) -> &str {
        self.str_option("backend").unwrap_or(DEFAULT_BACKEND)
    }

    /// `true` when decoding is deferred past the return of `response`.
    pub fn is_async(&self) -> bool {
        self.bool_option("async").unwrap_or(false)
    }

    pub fn tmp_path(&self) -> Option<&str> {
        self.str_option("tmp_path").filter(|p| !p.is_empty())
    }

    pub fn uses_mmap(&self) -> bool {
        self.bool_option("use_mmap").unwrap_or(false)
            || self.bool_option("kvcache_mmap").unwrap_or(false)
    }

    pub fn max_new_tokens(&self) -> usize {
        self.usize_option("max_new_tokens").unwrap_or(512)
    }

    pub fn talker_max_new_tokens(&self) -> Option<usize> {
        self.usize_option("talker_max_new_tokens")
    }

    pub fn talker_speaker(&self) -> Option<&str> {
        self.str_option("talker_speaker")
    }

    pub fn speech_output(&self) -> bool {
        self.bool_option("speech_output").unwrap_or(true)
    }

    /// Resolve an asset key (e.g. `talker_model`) against the config directory.
    pub fn asset_path(&self, key: &str) -> Option<PathBuf> {
        self.str_option(key).map(|p| self.base_dir.join(p))
    }

    /// Nested backend section, e.g. `"openai": { ... }`
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.options.get(name).and_then(Value::as_object)
    }

    /// Fail when a configured asset file is absent.
    pub fn check_assets(&self, keys: &[&str]) -> Result<(), LoadError> {
        for key in keys {
            if let Some(path) = self.asset_path(key) {
                if !path.exists() {
                    return Err(LoadError::MissingAsset {
                        key: (*key).to_string(),
                        path,
                    });
                }
            }
        }
        Ok(())
    }

    /// Create the scratch directory, if one is configured.
    ///
    /// Memory-mapped weights and kv storage spill into it, so enabling either
    /// without a path is a load error.
    pub fn prepare_scratch(&self) -> Result<Option<PathBuf>, LoadError> {
        match self.tmp_path() {
            Some(tmp) => {
                let dir = PathBuf::from(tmp);
                fs::create_dir_all(&dir).map_err(|source| LoadError::Scratch {
                    path: dir.clone(),
                    source,
                })?;
                Ok(Some(dir))
            }
            None if self.uses_mmap() => Err(LoadError::ScratchPathRequired),
            None => Ok(None),
        }
    }

    fn str_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    fn bool_option(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }

    fn usize_option(&self, key: &str) -> Option<usize> {
        self.options
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }
}

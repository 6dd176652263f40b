//! JSON-backed settings with dotted keys.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::batch::default_workers;
use crate::error::{Error, Result};
use crate::strategy::{Algorithm, InpaintStrategy};

/// Directory under the home directory holding the settings file.
pub const APP_DIR: &str = ".watermark-eraser";

/// Settings file name.
pub const FILE_NAME: &str = "config.json";

/// User settings layered over built-in defaults.
///
/// Keys are dotted paths into a JSON object, e.g. `api_keys.volcano_engine_region`.
/// Values are never validated beyond the type requested by [`Settings::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    root: Value,
}

fn defaults() -> Value {
    json!({
        "algorithm": "auto",
        "inpaint_radius": 3,
        "brush_size": 10,
        "preview_quality": 80,
        "max_workers": 4,
        "output_dir": "",
        "output_suffix": "cleaned",
        "jpeg_quality": 95,
        "api_keys": {
            "volcano_engine_access_key": "",
            "volcano_engine_secret_key": "",
            "volcano_engine_region": "cn-beijing"
        }
    })
}

impl Default for Settings {
    fn default() -> Self {
        Self { root: defaults() }
    }
}

impl Settings {
    /// `~/.watermark-eraser/config.json`, if a home directory is known.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(APP_DIR).join(FILE_NAME))
    }

    /// Load settings from `path`, merged over the defaults.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the file is not a JSON object, [`Error::Io`] if
    /// it exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_json(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Parse settings from a JSON document, merged over the defaults.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] on malformed JSON or a non-object document.
    pub fn from_json(text: &str) -> Result<Self> {
        let user: Value = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        if !user.is_object() {
            return Err(Error::Config("top level must be an object".to_string()));
        }
        let mut root = defaults();
        merge(&mut root, user);
        Ok(Self { root })
    }

    /// Write the settings as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Any I/O failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text =
            serde_json::to_string_pretty(&self.root).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Raw value at a dotted key.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.root, |node, part| node.as_object()?.get(part))
    }

    /// Value at `key` as `T`, or `default` when missing or of another type.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.value(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// Set `key` to `value`, creating intermediate objects.
    ///
    /// Non-object values on the way are replaced by objects.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an empty key segment or an unserializable value.
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| Error::Config(e.to_string()))?;
        let parts: Vec<&str> = key.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Config(format!("invalid key {key:?}")));
        }
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| Error::Config("empty key".to_string()))?;

        let mut node = &mut self.root;
        for part in parents {
            ensure_object(node);
            node = &mut node[*part];
        }
        ensure_object(node);
        node[*last] = value;
        Ok(())
    }

    /// Batch pool size from `max_workers`, at least one.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.get("max_workers", default_workers()).max(1)
    }

    /// Inpainting strategy described by `algorithm`, `inpaint_radius` and
    /// `preview_quality`.
    #[must_use]
    pub fn strategy(&self) -> InpaintStrategy {
        let name: String = self.get("algorithm", "auto".to_string());
        let algorithm = name.parse::<Algorithm>().unwrap_or_else(|_| {
            tracing::warn!(algorithm = %name, "unknown algorithm in settings, using auto");
            Algorithm::Auto
        });
        InpaintStrategy::new(
            algorithm,
            self.get("inpaint_radius", 3),
            self.get("preview_quality", 80),
        )
    }
}

fn ensure_object(node: &mut Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let nested = value.is_object() && base.get(&key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = base.get_mut(&key) {
                        merge(existing, value);
                    }
                } else {
                    base.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

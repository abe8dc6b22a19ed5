use std::path::Path;

use {
    claude_skills_common::Result,
    serde::{Serialize, de::DeserializeOwned},
    tracing::warn,
};

/// Load a JSON document, falling back to `T::default()` when the file is
/// missing or unparsable. A parse failure is logged.
pub(crate) fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let data = std::fs::read_to_string(path)?;
    match serde_json::from_str(&data) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable state file");
            Ok(T::default())
        },
    }
}

/// Save pretty JSON atomically via temp file + rename.
pub(crate) fn save_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

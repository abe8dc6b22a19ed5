//! Wiring installed packages into the host application's `settings.json`.

use std::path::Path;

use {
    claude_skills_common::{ContentType, Error, Result, Scope},
    claude_skills_config::ClaudePaths,
    serde_json::{Map, Value},
    tracing::{debug, info},
};

use crate::store::save_atomic;

const PERMISSION_LISTS: &[&str] = &["allow", "ask", "deny", "additionalDirectories"];

/// Makes an installed package visible to the host application.
pub trait Registrar: Send + Sync {
    fn register(
        &self,
        package_dir: &Path,
        name: &str,
        content_type: ContentType,
        scope: Scope,
    ) -> Result<()>;
}

/// Edits `<scope-root>/settings.json`. Keys this tool does not know about
/// are preserved.
pub struct SettingsRegistrar {
    paths: ClaudePaths,
}

impl SettingsRegistrar {
    pub fn new(paths: ClaudePaths) -> Self {
        Self { paths }
    }

    /// A corrupt settings file is an error; it is never overwritten.
    fn load(&self, scope: Scope) -> Result<Map<String, Value>> {
        let path = self.paths.settings_path(scope);
        if !path.exists() {
            return Ok(Map::new());
        }
        let data = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&data)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::message(format!(
                "{} is not a JSON object",
                path.display()
            ))),
        }
    }

    fn save(&self, scope: Scope, settings: &Map<String, Value>) -> Result<()> {
        save_atomic(&self.paths.settings_path(scope), settings)
    }
}

impl Registrar for SettingsRegistrar {
    fn register(
        &self,
        package_dir: &Path,
        name: &str,
        content_type: ContentType,
        scope: Scope,
    ) -> Result<()> {
        match content_type {
            ContentType::Plugin => {
                let mut settings = self.load(scope)?;
                if push_unique(&mut settings, "enabledPlugins", name) {
                    self.save(scope, &settings)?;
                    info!(plugin = name, %scope, "plugin enabled in host settings");
                }
            },
            ContentType::Mcp | ContentType::Agent | ContentType::Skill => {
                let mcp_json = package_dir.join("mcp.json");
                if !mcp_json.is_file() {
                    return Ok(());
                }
                let config: Value = serde_json::from_str(&std::fs::read_to_string(&mcp_json)?)?;
                let server = config
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(name);
                let mut settings = self.load(scope)?;
                if push_unique(&mut settings, "enabledMcpjsonServers", server) {
                    self.save(scope, &settings)?;
                    info!(server, %scope, "MCP server enabled in host settings");
                }
            },
            ContentType::Settings => {
                let preset_path = package_dir.join("settings.json");
                if !preset_path.is_file() {
                    return Ok(());
                }
                let preset: Value = serde_json::from_str(&std::fs::read_to_string(&preset_path)?)?;
                let Value::Object(preset) = preset else {
                    return Err(Error::message("settings preset is not a JSON object"));
                };
                let merged = merge_settings(self.load(scope)?, &preset);
                self.save(scope, &merged)?;
                info!(preset = name, %scope, "settings preset merged into host settings");
            },
            ContentType::Hook | ContentType::Command => {
                debug!(package = name, %content_type, "nothing to register");
            },
        }
        Ok(())
    }
}

/// Append `value` to the string array at `key` unless already present.
/// Returns whether the settings changed.
fn push_unique(settings: &mut Map<String, Value>, key: &str, value: &str) -> bool {
    let slot = settings
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(items) = slot else {
        return false;
    };
    if items.iter().any(|v| v.as_str() == Some(value)) {
        return false;
    }
    items.push(Value::String(value.to_owned()));
    true
}

fn as_array(value: Option<&Value>) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn concat(base: Option<&Value>, overlay: Option<&Value>) -> Value {
    let mut items = as_array(base);
    items.extend(as_array(overlay));
    Value::Array(items)
}

fn key_merge(base: Option<&Value>, overlay: &Map<String, Value>) -> Value {
    let mut merged = base
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    Value::Object(merged)
}

/// Merge a settings preset into existing host settings.
///
/// Permission lists, hook lists per event and the enabled plugin/server
/// lists are concatenated. `env` and `mcpApprovals` are merged key by key.
/// `model`, `modelConfig` and `statusLine` are replaced.
pub fn merge_settings(mut base: Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Object(over)) = overlay.get("permissions") {
        let existing = base.get("permissions");
        let mut permissions = existing
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        permissions.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
        for list in PERMISSION_LISTS {
            let joined = concat(
                existing.and_then(|p| p.get(*list)),
                over.get(*list),
            );
            permissions.insert((*list).to_owned(), joined);
        }
        base.insert("permissions".into(), Value::Object(permissions));
    }

    for key in ["env", "mcpApprovals"] {
        if let Some(Value::Object(over)) = overlay.get(key) {
            let merged = key_merge(base.get(key), over);
            base.insert(key.into(), merged);
        }
    }

    if let Some(Value::Object(over)) = overlay.get("hooks") {
        let mut hooks = base
            .get("hooks")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        for (event, entries) in over {
            let joined = concat(hooks.get(event), Some(entries));
            hooks.insert(event.clone(), joined);
        }
        base.insert("hooks".into(), Value::Object(hooks));
    }

    for key in ["enabledPlugins", "enabledMcpjsonServers"] {
        if let Some(over) = overlay.get(key) {
            let joined = concat(base.get(key), Some(over));
            base.insert(key.into(), joined);
        }
    }

    for key in ["model", "modelConfig", "statusLine"] {
        if let Some(value) = overlay.get(key).filter(|v| !v.is_null()) {
            base.insert(key.into(), value.clone());
        }
    }

    base
}

//! Service config loader (strict parsing) and manifest reader.

pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use teamrules_core::document::PolicyDocument;
use teamrules_core::error::{PermError, Result};

pub use schema::{EntityDef, Has, LinkDef, PolicySection, SchemaSection, ServiceConfig};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<ServiceConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)
        .map_err(|e| PermError::Internal(format!("read config failed ({}): {e}", path.display())))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ServiceConfig> {
    let cfg: ServiceConfig = serde_yaml::from_str(s)
        .map_err(|e| PermError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve `policy.path` against the directory holding the config file.
pub fn policy_path(cfg: &ServiceConfig, config_path: impl AsRef<Path>) -> PathBuf {
    let p = Path::new(&cfg.policy.path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match config_path.as_ref().parent() {
        Some(dir) => dir.join(p),
        None => p.to_path_buf(),
    }
}

/// Read a permissions manifest; the format follows the file extension.
pub fn load_policy_file(path: impl AsRef<Path>) -> Result<PolicyDocument> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)
        .map_err(|e| PermError::Internal(format!("read policy failed ({}): {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => load_policy_yaml(&s),
        _ => PolicyDocument::from_json_str(&s),
    }
}

pub fn load_policy_yaml(s: &str) -> Result<PolicyDocument> {
    serde_yaml::from_str(s).map_err(|e| PermError::BadRequest(format!("invalid policy yaml: {e}")))
}

//! Dotted-path access into the typed configuration tree.
//!
//! The `update_config` tool edits configuration through paths like
//! `providers.openrouter.apiKey` or `tools.allowedPaths`. Paths are
//! resolved explicitly against the schema — unknown paths are rejected,
//! and every mutation is validated by deserializing the result back
//! into [`Config`] before it is accepted.
//!
//! The only open section is `channels.<name>`, where arbitrary channel
//! names may be created.

use serde_json::Value;
use thiserror::Error;

use super::schema::Config;

/// Errors from config path operations.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("unknown config path: {0}")]
    UnknownPath(String),
    #[error("config path {0} is not {1}")]
    WrongKind(String, &'static str),
    #[error("invalid value for {path}: {message}")]
    Validation { path: String, message: String },
}

/// A single mutation applied by `update_config`.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigOp {
    /// Replace the value at the path.
    Set(Value),
    /// Append a value to the array at the path.
    Append(Value),
    /// Remove: for arrays, remove equal elements; for the open channel
    /// map, remove the named entry entirely.
    Remove(Value),
}

/// Read the value at a dotted path.
pub fn get_path(config: &Config, path: &str) -> Result<Value, PathError> {
    let tree = serde_json::to_value(config).expect("config serializes");
    let mut current = &tree;
    for segment in split(path)? {
        current = current
            .get(segment)
            .ok_or_else(|| PathError::UnknownPath(path.to_string()))?;
    }
    Ok(current.clone())
}

/// Apply one mutation and return the validated new config.
pub fn apply(config: &Config, path: &str, op: ConfigOp) -> Result<Config, PathError> {
    let mut tree = serde_json::to_value(config).expect("config serializes");
    let segments = split(path)?;

    {
        let target = resolve_mut(&mut tree, &segments, path)?;
        match op {
            ConfigOp::Set(value) => *target = value,
            ConfigOp::Append(value) => match target {
                Value::Array(items) => items.push(value),
                _ => return Err(PathError::WrongKind(path.to_string(), "an array")),
            },
            ConfigOp::Remove(value) => match target {
                Value::Array(items) => items.retain(|item| item != &value),
                Value::Object(map) => {
                    let key = value
                        .as_str()
                        .ok_or_else(|| PathError::WrongKind(path.to_string(), "keyed by a string"))?;
                    map.remove(key);
                }
                _ => return Err(PathError::WrongKind(path.to_string(), "an array or map")),
            },
        }
    }

    serde_json::from_value(tree).map_err(|e| PathError::Validation {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn split(path: &str) -> Result<Vec<&str>, PathError> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(PathError::UnknownPath(path.to_string()));
    }
    Ok(segments)
}

/// Walk to the target value, creating entries only inside the open
/// `channels` map. Any other missing segment means the path does not
/// exist in the schema.
fn resolve_mut<'a>(
    tree: &'a mut Value,
    segments: &[&str],
    path: &str,
) -> Result<&'a mut Value, PathError> {
    let mut current = tree;
    for (depth, segment) in segments.iter().enumerate() {
        let in_channels = depth == 1 && segments[0] == "channels";
        let map = current
            .as_object_mut()
            .ok_or_else(|| PathError::UnknownPath(path.to_string()))?;

        if !map.contains_key(*segment) {
            if in_channels {
                map.insert(segment.to_string(), serde_json::json!({}));
            } else {
                return Err(PathError::UnknownPath(path.to_string()));
            }
        }
        current = map.get_mut(*segment).unwrap();
    }
    Ok(current)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_known_path() {
        let config = Config::default();
        let value = get_path(&config, "agents.defaults.maxTokens").unwrap();
        assert_eq!(value, json!(8192));
    }

    #[test]
    fn test_get_unknown_path() {
        let config = Config::default();
        let err = get_path(&config, "agents.defaults.doesNotExist").unwrap_err();
        assert!(matches!(err, PathError::UnknownPath(_)));
    }

    #[test]
    fn test_set_scalar() {
        let config = Config::default();
        let updated = apply(
            &config,
            "agents.defaults.model",
            ConfigOp::Set(json!("deepseek-chat")),
        )
        .unwrap();
        assert_eq!(updated.agents.defaults.model, "deepseek-chat");
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let config = Config::default();
        let err = apply(
            &config,
            "agents.defaults.maxTokens",
            ConfigOp::Set(json!("not a number")),
        )
        .unwrap_err();
        assert!(matches!(err, PathError::Validation { .. }));
    }

    #[test]
    fn test_set_rejects_unknown_path() {
        let config = Config::default();
        let err = apply(&config, "agents.defaults.frobnicate", ConfigOp::Set(json!(1)))
            .unwrap_err();
        assert!(matches!(err, PathError::UnknownPath(_)));
    }

    #[test]
    fn test_set_provider_api_key() {
        let config = Config::default();
        let updated = apply(
            &config,
            "providers.openrouter.apiKey",
            ConfigOp::Set(json!("sk-or-123")),
        )
        .unwrap();
        assert_eq!(updated.providers.openrouter.api_key, "sk-or-123");
    }

    #[test]
    fn test_append_to_array() {
        let config = Config::default();
        let updated = apply(
            &config,
            "tools.allowedPaths",
            ConfigOp::Append(json!("/srv/data")),
        )
        .unwrap();
        assert_eq!(updated.tools.allowed_paths, vec!["/srv/data"]);
    }

    #[test]
    fn test_append_to_scalar_fails() {
        let config = Config::default();
        let err = apply(
            &config,
            "agents.defaults.model",
            ConfigOp::Append(json!("x")),
        )
        .unwrap_err();
        assert!(matches!(err, PathError::WrongKind(_, _)));
    }

    #[test]
    fn test_remove_from_array() {
        let mut config = Config::default();
        config.tools.protected_paths = vec!["/a".into(), "/b".into()];
        let updated = apply(
            &config,
            "tools.protectedPaths",
            ConfigOp::Remove(json!("/a")),
        )
        .unwrap();
        assert_eq!(updated.tools.protected_paths, vec!["/b"]);
    }

    #[test]
    fn test_channels_open_map_create_and_remove() {
        let config = Config::default();
        let updated = apply(
            &config,
            "channels.telegram.enabled",
            ConfigOp::Set(json!(true)),
        )
        .unwrap();
        assert!(updated.channels["telegram"].enabled);

        let removed = apply(&updated, "channels", ConfigOp::Remove(json!("telegram"))).unwrap();
        assert!(!removed.channels.contains_key("telegram"));
    }

    #[test]
    fn test_set_nested_routing_value() {
        let config = Config::default();
        let updated = apply(
            &config,
            "routing.tiers.coding.model",
            ConfigOp::Set(json!("deepseek/deepseek-chat")),
        )
        .unwrap();
        assert_eq!(updated.routing.tiers.coding.model, "deepseek/deepseek-chat");
    }

    #[test]
    fn test_original_config_untouched() {
        let config = Config::default();
        let _ = apply(
            &config,
            "agents.defaults.model",
            ConfigOp::Set(json!("other")),
        )
        .unwrap();
        assert_eq!(config.agents.defaults.model, Config::default().agents.defaults.model);
    }
}

//! Layer merging
//!
//! - Objects: deep-merge by key
//! - Arrays and scalars: last wins

use ci_runners::Environment;
use serde_json::{Map, Value};

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "CHAINLOOP_";

/// Deep merge two JSON values; `overlay` wins on conflicts.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merge layers in order, first is base, last has highest precedence
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

/// `(variable suffix, config path, value kind)`
const ENV_KEYS: &[(&str, &[&str], EnvKind)] = &[
    ("STATE_PATH", &["state_path"], EnvKind::Str),
    ("CAS_CHUNK_SIZE", &["cas", "chunk_size"], EnvKind::Number),
    ("CAS_PROGRESS_BUFFER", &["cas", "progress_buffer"], EnvKind::Number),
    ("CAS_MAX_INLINE_BYTES", &["cas", "max_inline_bytes"], EnvKind::Number),
    ("CONTROL_PLANE_ADDR", &["control_plane_addr"], EnvKind::Str),
    ("CAS_ADDR", &["cas_addr"], EnvKind::Str),
    ("LOG_LEVEL", &["log_level"], EnvKind::Str),
    ("DRY_RUN", &["dry_run"], EnvKind::Bool),
];

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Str,
    Number,
    Bool,
}

/// Build the environment layer from `CHAINLOOP_*` variables.
///
/// Returns `None` when no variable is set. Values that do not parse are kept
/// as strings so validation reports them against the right key.
pub fn env_layer(env: &dyn Environment) -> Option<(Value, Vec<String>)> {
    let mut root = Map::new();
    let mut used = Vec::new();

    for (suffix, path, kind) in ENV_KEYS {
        let name = format!("{}{}", ENV_PREFIX, suffix);
        let Some(raw) = env.get_non_empty(&name) else {
            continue;
        };
        let value = match kind {
            EnvKind::Str => Value::String(raw),
            EnvKind::Number => raw
                .parse::<u64>()
                .map(Value::from)
                .unwrap_or(Value::String(raw)),
            EnvKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Value::Bool(true),
                "0" | "false" | "no" => Value::Bool(false),
                _ => Value::String(raw),
            },
        };
        insert_path(&mut root, path, value);
        used.push(name);
    }

    if used.is_empty() {
        None
    } else {
        Some((Value::Object(root), used))
    }
}

fn insert_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            root.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let child = root
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci_runners::MapEnv;
    use serde_json::json;

    #[test]
    fn test_nested_merge_keeps_siblings() {
        let base = json!({"cas": {"chunk_size": 1024, "progress_buffer": 16}});
        let overlay = json!({"cas": {"chunk_size": 2048}});
        let result = deep_merge(base, overlay);

        assert_eq!(result["cas"]["chunk_size"], 2048);
        assert_eq!(result["cas"]["progress_buffer"], 16);
    }

    #[test]
    fn test_arrays_replace() {
        let result = deep_merge(json!({"a": [1, 2, 3]}), json!({"a": [9]}));
        assert_eq!(result["a"], json!([9]));
    }

    #[test]
    fn test_merge_layers_precedence() {
        let result = merge_layers(vec![
            json!({"log_level": "info", "dry_run": false}),
            json!({"log_level": "debug"}),
            json!({"dry_run": true}),
        ]);
        assert_eq!(result["log_level"], "debug");
        assert_eq!(result["dry_run"], true);
    }

    #[test]
    fn test_env_layer() {
        let env = MapEnv::new()
            .with("CHAINLOOP_CAS_CHUNK_SIZE", "4096")
            .with("CHAINLOOP_DRY_RUN", "true")
            .with("CHAINLOOP_LOG_LEVEL", "debug")
            .with("UNRELATED", "x");
        let (value, used) = env_layer(&env).unwrap();

        assert_eq!(value["cas"]["chunk_size"], 4096);
        assert_eq!(value["dry_run"], true);
        assert_eq!(value["log_level"], "debug");
        assert_eq!(used.len(), 3);
    }

    #[test]
    fn test_env_layer_empty() {
        assert!(env_layer(&MapEnv::new().with("CHAINLOOP_CAS_ADDR", "")).is_none());
    }

    #[test]
    fn test_env_layer_keeps_unparseable_values() {
        let env = MapEnv::new().with("CHAINLOOP_CAS_PROGRESS_BUFFER", "lots");
        let (value, _) = env_layer(&env).unwrap();
        assert_eq!(value["cas"]["progress_buffer"], "lots");
    }
}

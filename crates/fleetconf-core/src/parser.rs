//! Converts an untyped desired-state mapping into the typed [`DesiredState`]
//! model: the only place an untyped [`serde_json::Value`] is walked by hand
//! anywhere in the engine.

use crate::error::FleetConfError;
use crate::model::{DesiredState, DesiredStateMode, IpInterface, PortIntent, VlanAction, VlanIntent};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Parses a raw desired-state document (as decoded from YAML or JSON) into
/// the typed model. Accepts either `device_id` or `device` as the device key.
pub fn parse(config: &Value) -> Result<DesiredState, FleetConfError> {
    let map = config
        .as_object()
        .ok_or_else(|| FleetConfError::ParseError("desired state must be a mapping".into()))?;

    let device_id = map
        .get("device_id")
        .or_else(|| map.get("device"))
        .and_then(Value::as_str)
        .ok_or_else(|| FleetConfError::ParseError("missing required field: device_id or device".into()))?
        .to_string();

    let schema_version = map
        .get("schema_version")
        .or_else(|| map.get("version"))
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    let checksum = map
        .get("checksum")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mode = match map.get("mode").and_then(Value::as_str).unwrap_or("patch") {
        "patch" => DesiredStateMode::Patch,
        "full" => DesiredStateMode::Full,
        other => {
            return Err(FleetConfError::ParseError(format!(
                "invalid mode: {other}, must be 'full' or 'patch'"
            )))
        }
    };

    let vlans = parse_vlans(map.get("vlans"))?;
    let ports = parse_ports(map.get("ports"))?;

    let settings = map
        .get("settings")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    debug!(device_id, vlan_count = vlans.len(), port_count = ports.len(), "parsed desired state");

    Ok(DesiredState {
        device_id,
        schema_version,
        checksum,
        mode,
        vlans,
        ports,
        settings,
    })
}

fn parse_vlans(value: Option<&Value>) -> Result<BTreeMap<u16, VlanIntent>, FleetConfError> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let map = value
        .as_object()
        .ok_or_else(|| FleetConfError::ParseError("vlans must be a mapping".into()))?;

    let mut vlans = BTreeMap::new();
    for (key, vlan_config) in map {
        let vlan_id: u16 = key
            .parse()
            .map_err(|_| FleetConfError::ParseError(format!("invalid VLAN id: {key}")))?;
        vlans.insert(vlan_id, parse_single_vlan(vlan_id, vlan_config)?);
    }
    Ok(vlans)
}

fn parse_single_vlan(vlan_id: u16, config: &Value) -> Result<VlanIntent, FleetConfError> {
    let empty = serde_json::Map::new();
    let map = config.as_object().unwrap_or(&empty);

    let action = match map.get("action").and_then(Value::as_str).unwrap_or("ensure") {
        "ensure" => VlanAction::Ensure,
        "absent" => VlanAction::Absent,
        other => {
            return Err(FleetConfError::ParseError(format!(
                "invalid action for VLAN {vlan_id}: {other}, must be 'ensure' or 'absent'"
            )))
        }
    };

    let name = map.get("name").and_then(Value::as_str).map(str::to_string);

    let untagged = expand_port_list(map.get("untagged_ports").or_else(|| map.get("untagged")))?;
    let tagged = expand_port_list(map.get("tagged_ports").or_else(|| map.get("tagged")))?;

    let ip = map.get("ip_interface").or_else(|| map.get("ip")).and_then(|v| {
        let obj = v.as_object()?;
        Some(IpInterface {
            address: obj.get("address")?.as_str()?.to_string(),
            mask: obj.get("mask").and_then(Value::as_str).unwrap_or("").to_string(),
        })
    });

    Ok(VlanIntent {
        action,
        name,
        untagged,
        tagged,
        ip,
    })
}

fn parse_ports(value: Option<&Value>) -> Result<BTreeMap<String, PortIntent>, FleetConfError> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let map = value
        .as_object()
        .ok_or_else(|| FleetConfError::ParseError("ports must be a mapping".into()))?;

    let mut ports = BTreeMap::new();
    for (port_id, port_config) in map {
        let empty = serde_json::Map::new();
        let cfg = port_config.as_object().unwrap_or(&empty);
        let intent = PortIntent {
            enabled: cfg.get("enabled").and_then(Value::as_bool),
            speed: cfg
                .get("speed")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok()),
            duplex: cfg
                .get("duplex")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok()),
            description: cfg.get("description").and_then(Value::as_str).map(str::to_string),
            mode: cfg
                .get("mode")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok()),
            native_vlan: cfg.get("native_vlan").and_then(Value::as_u64).map(|v| v as u16),
            allowed_vlans: cfg.get("allowed_vlans").and_then(Value::as_array).map(|arr| {
                arr.iter().filter_map(|v| v.as_u64()).map(|v| v as u16).collect()
            }),
        };
        ports.insert(port_id.clone(), intent);
    }
    Ok(ports)
}

/// Accepts a single string or a list of strings, expanding any range tokens.
fn expand_port_list(value: Option<&Value>) -> Result<BTreeSet<String>, FleetConfError> {
    let Some(value) = value else {
        return Ok(BTreeSet::new());
    };

    let tokens: Vec<String> = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(arr) => arr
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => return Err(FleetConfError::ParseError("port list must be a string or array".into())),
    };

    let mut expanded = BTreeSet::new();
    for token in tokens {
        for port in expand_port_token(&token) {
            expanded.insert(port);
        }
    }
    Ok(expanded)
}

/// Expands a single port token. `a/b/c-d` expands positions c..=d within
/// unit/module `a/b`; `a/b/c-a/b/d` is the equivalent full start/end pair.
/// Anything that cannot be expanded is preserved verbatim (the device
/// driver rejects it later if it turns out to be invalid).
fn expand_port_token(token: &str) -> Vec<String> {
    if !token.contains('-') || !token.contains('/') {
        return vec![token.to_string()];
    }

    if token.matches('-').count() != 1 {
        return vec![token.to_string()];
    }

    let (base, end) = token.rsplit_once('-').unwrap();

    if end.contains('/') {
        return expand_full_range(base, end).unwrap_or_else(|| vec![base.to_string(), end.to_string()]);
    }

    let Some((prefix, start_str)) = base.rsplit_once('/') else {
        return vec![token.to_string()];
    };
    let (Ok(start), Ok(stop)) = (start_str.parse::<u32>(), end.parse::<u32>()) else {
        return vec![token.to_string()];
    };
    if start > stop {
        return vec![token.to_string()];
    }
    (start..=stop).map(|i| format!("{prefix}/{i}")).collect()
}

fn expand_full_range(start: &str, end: &str) -> Option<Vec<String>> {
    let start_parts: Vec<&str> = start.split('/').collect();
    let end_parts: Vec<&str> = end.split('/').collect();
    if start_parts.len() != 3 || end_parts.len() != 3 {
        return None;
    }
    if start_parts[0] != end_parts[0] || start_parts[1] != end_parts[1] {
        return None;
    }
    let prefix = format!("{}/{}", start_parts[0], start_parts[1]);
    let start_port: u32 = start_parts[2].parse().ok()?;
    let end_port: u32 = end_parts[2].parse().ok()?;
    if start_port > end_port {
        return None;
    }
    Some((start_port..=end_port).map(|i| format!("{prefix}/{i}")).collect())
}

/// `"sha256:" + first 16 hex chars` of SHA-256 over the canonical
/// (sorted-keys, no-whitespace) JSON serialization of `body`, with any
/// pre-existing `checksum` key stripped first. Mirrors the determinism of
/// Python's `json.dumps(..., sort_keys=True, separators=(",", ":"))`.
pub fn compute_checksum(body: &Value) -> Result<String, FleetConfError> {
    let mut map: BTreeMap<String, Value> = match body {
        Value::Object(m) => m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        other => {
            let mut hasher = Sha256::new();
            hasher.update(other.to_string().as_bytes());
            let digest = hasher.finalize();
            return Ok(format!("sha256:{}", hex_prefix(&digest, 16)));
        }
    };
    map.remove("checksum");

    let canonical = canonical_json(&map);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    Ok(format!("sha256:{}", hex_prefix(&digest, 16)))
}

fn hex_prefix(digest: &[u8], n: usize) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()[..n].to_string()
}

/// Serializes with sorted object keys and no insignificant whitespace.
/// `serde_json::Value` does not guarantee key order on its own (it's backed
/// by a `Map` which preserves insertion order unless the `preserve_order`
/// feature is off, in which case it's already a `BTreeMap`); sorting here
/// explicitly keeps the guarantee independent of that feature flag.
fn canonical_json(map: &BTreeMap<String, Value>) -> String {
    fn value_to_canonical(v: &Value) -> String {
        match v {
            Value::Object(obj) => {
                let sorted: BTreeMap<String, Value> =
                    obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                canonical_json(&sorted)
            }
            Value::Array(arr) => {
                let items: Vec<String> = arr.iter().map(value_to_canonical).collect();
                format!("[{}]", items.join(","))
            }
            other => other.to_string(),
        }
    }

    let entries: Vec<String> = map
        .iter()
        .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), value_to_canonical(v)))
        .collect();
    format!("{{{}}}", entries.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_desired_state() {
        let doc = json!({
            "device_id": "br-a",
            "vlans": {
                "100": {"action": "ensure", "name": "Prod", "untagged_ports": "1/1/1-4"}
            }
        });
        let state = parse(&doc).unwrap();
        assert_eq!(state.device_id, "br-a");
        let vlan = state.vlans.get(&100).unwrap();
        assert_eq!(vlan.name.as_deref(), Some("Prod"));
        assert_eq!(vlan.untagged.len(), 4);
        assert!(vlan.untagged.contains("1/1/1"));
        assert!(vlan.untagged.contains("1/1/4"));
    }

    #[test]
    fn expands_full_range_token() {
        let expanded = expand_port_token("1/1/1-1/1/4");
        assert_eq!(expanded, vec!["1/1/1", "1/1/2", "1/1/3", "1/1/4"]);
    }

    #[test]
    fn port_range_expansion_yields_exact_count() {
        let expanded = expand_port_token("1/2/5-9");
        assert_eq!(expanded.len(), 5);
    }

    #[test]
    fn preserves_opaque_malformed_range() {
        let expanded = expand_port_token("weird-1/1/1-garbage-4");
        assert_eq!(expanded, vec!["weird-1/1/1-garbage-4".to_string()]);
    }

    #[test]
    fn missing_device_id_is_parse_error() {
        let doc = json!({"vlans": {}});
        assert!(matches!(parse(&doc), Err(FleetConfError::ParseError(_))));
    }

    #[test]
    fn checksum_is_deterministic_and_ignores_order() {
        let a = json!({"device_id": "br-a", "vlans": {"100": {}}});
        let b = json!({"vlans": {"100": {}}, "device_id": "br-a"});
        assert_eq!(compute_checksum(&a).unwrap(), compute_checksum(&b).unwrap());
    }

    #[test]
    fn checksum_has_expected_shape() {
        let doc = json!({"device_id": "br-a"});
        let sum = compute_checksum(&doc).unwrap();
        assert!(sum.starts_with("sha256:"));
        assert_eq!(sum.len(), "sha256:".len() + 16);
    }
}

//! Rule catalog loading.
//!
//! Rule declarations ship inside the binary as JSON assets. Each asset is
//! one object mapping rule name to a field map; the variant is chosen by
//! which of the `func`/`struct`/`raw`/`file` keys is present. Exactly one
//! must be: zero or several is a load-time failure, as are duplicate rule
//! names and malformed version constraints.

use std::collections::HashMap;

use serde_json::Value;

use crate::rule::{FileRule, FuncRule, RawRule, Rule, StructRule};
use crate::semver;

/// Embedded catalog assets, name -> content.
const EMBEDDED_RULES: &[(&str, &str)] = &[
    (
        "helloworld.json",
        include_str!("../../data/rules/helloworld.json"),
    ),
    ("nethttp.json", include_str!("../../data/rules/nethttp.json")),
    (
        "database_sql.json",
        include_str!("../../data/rules/database_sql.json"),
    ),
];

const VARIANT_KEYS: &[&str] = &["func", "struct", "raw", "file"];

/// Load all available rules from the embedded assets. Order follows the
/// asset list but callers must not depend on it.
pub fn load_all() -> Result<Vec<Rule>, String> {
    let mut rules = Vec::new();
    let mut seen = HashMap::new();
    for (asset, content) in EMBEDDED_RULES {
        let parsed = parse_rule_asset(asset, content)?;
        for rule in parsed {
            if let Some(prev) = seen.insert(rule.name().to_string(), *asset) {
                return Err(format!(
                    "duplicate rule name {:?} (defined in {} and {})",
                    rule.name(),
                    prev,
                    asset
                ));
            }
            rules.push(rule);
        }
    }
    Ok(rules)
}

/// Pre-index rules by their target import path.
pub fn group_by_target(rules: Vec<Rule>) -> HashMap<String, Vec<Rule>> {
    let mut by_target: HashMap<String, Vec<Rule>> = HashMap::new();
    for rule in rules {
        by_target.entry(rule.target().to_string()).or_default().push(rule);
    }
    by_target
}

/// Parse one catalog asset into its rules.
pub fn parse_rule_asset(asset: &str, content: &str) -> Result<Vec<Rule>, String> {
    let doc: HashMap<String, Value> = serde_json::from_str(content)
        .map_err(|e| format!("rule asset {}: invalid JSON: {}", asset, e))?;

    let mut rules = Vec::new();
    for (name, fields) in doc {
        let rule = create_rule_from_fields(&name, &fields)
            .map_err(|e| format!("rule asset {}: rule {:?}: {}", asset, name, e))?;
        rules.push(rule);
    }
    Ok(rules)
}

/// Build a rule from its field map, dispatching on the variant key.
pub fn create_rule_from_fields(name: &str, fields: &Value) -> Result<Rule, String> {
    let obj = fields
        .as_object()
        .ok_or_else(|| "rule body must be an object".to_string())?;

    match obj.get("target") {
        Some(Value::String(_)) => {}
        Some(_) => return Err("target is not a string".to_string()),
        None => return Err("missing required field \"target\"".to_string()),
    }
    if let Some(version) = obj.get("version") {
        let version = version
            .as_str()
            .ok_or_else(|| "version is not a string".to_string())?;
        validate_version(version)?;
    }

    // A raw rule names its function through "func", so that pairing is the
    // one legitimate overlap; every other combination is ambiguous.
    let present: Vec<&str> = VARIANT_KEYS
        .iter()
        .copied()
        .filter(|k| obj.contains_key(*k))
        .collect();
    let discriminant = match present.as_slice() {
        [one] => Some(*one),
        ["raw", "func"] | ["func", "raw"] => Some("raw"),
        [] => None,
        _ => return Err(format!("ambiguous variant keys {:?}", present)),
    };

    let rule = match discriminant {
        Some("func") => {
            let mut r: FuncRule = from_fields(fields)?;
            if r.before.is_empty() && r.after.is_empty() {
                return Err("func rule needs at least one of \"before\"/\"after\"".to_string());
            }
            if r.path.is_empty() {
                return Err("func rule needs a hook module \"path\"".to_string());
            }
            r.base.name = name.to_string();
            Rule::Func(r)
        }
        Some("struct") => {
            let mut r: StructRule = from_fields(fields)?;
            if r.new_fields.is_empty() {
                return Err("struct rule declares no fields".to_string());
            }
            r.base.name = name.to_string();
            Rule::Struct(r)
        }
        Some("raw") => {
            let mut r: RawRule = from_fields(fields)?;
            r.base.name = name.to_string();
            Rule::Raw(r)
        }
        Some("file") => {
            let mut r: FileRule = from_fields(fields)?;
            if r.path.is_empty() {
                return Err("file rule needs a hook module \"path\"".to_string());
            }
            r.base.name = name.to_string();
            Rule::File(r)
        }
        _ => {
            return Err(format!(
                "none of the variant keys {:?} present",
                VARIANT_KEYS
            ));
        }
    };
    Ok(rule)
}

fn from_fields<T: serde::de::DeserializeOwned>(fields: &Value) -> Result<T, String> {
    serde_json::from_value(fields.clone()).map_err(|e| e.to_string())
}

/// A version constraint is empty, a single version, or a comma-separated
/// pair; each part must be a well-formed version.
fn validate_version(version: &str) -> Result<(), String> {
    if version.is_empty() {
        return Ok(());
    }
    for part in version.split(',') {
        if !semver::is_valid(part) {
            return Err(format!("malformed version constraint {:?}", version));
        }
    }
    if version.matches(',').count() > 1 {
        return Err(format!("malformed version constraint {:?}", version));
    }
    Ok(())
}

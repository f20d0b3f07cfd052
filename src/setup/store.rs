//! Persisting matched rule sets for the instrument phase.
//!
//! Setup serializes the matched rule sets once; every toolexec subprocess
//! re-hydrates them independently. The fast-filter module list travels
//! separately through the environment so most subprocesses never touch
//! the JSON at all.

use crate::common::paths;
use crate::rule::RuleSet;
use crate::setup::SetupPhase;

impl SetupPhase {
    /// Write the matched rule sets to the well-known store location.
    pub fn store(&self, matched: &[RuleSet]) -> Result<(), String> {
        let path = paths::matched_rule_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create build temp dir: {}", e))?;
        }
        let json = serde_json::to_string_pretty(matched)
            .map_err(|e| format!("failed to serialize rule sets: {}", e))?;
        std::fs::write(&path, json)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        self.info(&format!("Stored {} matched rule sets", matched.len()));
        Ok(())
    }
}

/// Load the rule sets persisted by setup.
pub fn load_rule_sets() -> Result<Vec<RuleSet>, String> {
    let path = paths::matched_rule_file();
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to load rule sets from {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ENV_OTEL_WORK_DIR;
    use crate::rule::{BaseRule, FuncRule, StructField, StructRule};

    #[test]
    fn test_store_round_trip() {
        let _guard = crate::testutil::env_guard();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ENV_OTEL_WORK_DIR, dir.path());

        let mut set = RuleSet::new("example.com/lib");
        set.set_package_name("lib");
        set.add_func_rule(
            "/src/do.go",
            FuncRule {
                base: BaseRule {
                    name: "hook_do".into(),
                    target: "example.com/lib".into(),
                    version: "v1.0.0".into(),
                },
                recv: String::new(),
                func: "Do".into(),
                before: "DoBefore".into(),
                after: String::new(),
                path: "github.com/otelbuild/otelbuild/pkg/instrumentation/lib".into(),
            },
        );
        set.add_struct_rule(
            "/src/types.go",
            StructRule {
                base: BaseRule {
                    name: "add_field".into(),
                    target: "example.com/lib".into(),
                    version: String::new(),
                },
                struct_name: "Request".into(),
                new_fields: vec![StructField {
                    name: "TraceID".into(),
                    type_spelling: "string".into(),
                }],
            },
        );
        let sets = vec![set];

        SetupPhase::new().store(&sets).unwrap();
        let loaded = load_rule_sets().unwrap();
        assert_eq!(loaded, sets);

        std::env::remove_var(ENV_OTEL_WORK_DIR);
    }

    #[test]
    fn test_load_missing_store_fails() {
        let _guard = crate::testutil::env_guard();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ENV_OTEL_WORK_DIR, dir.path());
        assert!(load_rule_sets().is_err());
        std::env::remove_var(ENV_OTEL_WORK_DIR);
    }
}

//! Runtime wiring file generation.
//!
//! The generated `otel.runtime.go` lives in the main package and ties the
//! instrumented build together: blank imports force the hook modules'
//! initialization into the program, and `//go:linkname` directives alias
//! local symbols to the hook and support implementations defined in those
//! modules. The file is regenerated on every setup run and is idempotent
//! for a given rule set.

use std::collections::BTreeSet;

use crate::common::paths;
use crate::constants::OTEL_RUNTIME_FILE;
use crate::rule::{FuncRule, RuleSet};
use crate::setup::SetupPhase;

const GENERATED_HEADER: &str = "// Code generated by otelbuild. DO NOT EDIT.";

/// Imports every runtime file carries: the support variables depend on
/// runtime/debug and log, and go:linkname requires importing unsafe.
const REQUIRED_IMPORTS: &[(&str, &str)] = &[
    ("runtime/debug", "_otel_debug"),
    ("log", "_otel_log"),
    ("unsafe", "_"),
];

fn gen_imports(hook_paths: &BTreeSet<&str>) -> String {
    let mut out = String::from("import (\n");
    for (path, alias) in REQUIRED_IMPORTS {
        out.push_str(&format!("\t{} \"{}\"\n", alias, path));
    }
    out.push('\n');
    for path in hook_paths {
        out.push_str(&format!("\t_ \"{}\"\n", path));
    }
    out.push_str(")\n");
    out
}

/// Support variable aliases, one pair per distinct hook module: the stack
/// getter and the stack printer the hook runtime links against.
fn gen_support_vars(hook_paths: &BTreeSet<&str>) -> String {
    let mut out = String::new();
    for (i, path) in hook_paths.iter().enumerate() {
        out.push_str(&format!(
            "//go:linkname _otel_getstack_{} {}.OtelGetStackImpl\n\
             var _otel_getstack_{} = _otel_debug.Stack\n\n",
            i, path, i
        ));
        out.push_str(&format!(
            "//go:linkname _otel_printstack_{} {}.OtelPrintStackImpl\n\
             var _otel_printstack_{} = func(bt []byte) {{ _otel_log.Printf(string(bt)) }}\n\n",
            i, path, i
        ));
    }
    out
}

/// Body-less hook declarations, one per distinct hook name, aliased to the
/// real symbol in its hook module. The variadic opaque parameter makes one
/// prototype fit every hook signature.
fn gen_hook_decls(rules: &[&FuncRule]) -> String {
    let pairs: BTreeSet<(&str, &str)> = rules
        .iter()
        .flat_map(|rule| {
            [&rule.before, &rule.after]
                .into_iter()
                .filter(|h| !h.is_empty())
                .map(|h| (h.as_str(), rule.path.as_str()))
        })
        .collect();

    let mut out = String::new();
    let mut declared: BTreeSet<&str> = BTreeSet::new();
    for (hook, path) in pairs {
        // One declaration per hook name; the sorted pair set keeps the
        // pick stable across runs
        if !declared.insert(hook) {
            continue;
        }
        out.push_str(&format!(
            "//go:linkname {} {}.{}\nfunc {}(...interface{{}})\n\n",
            hook, path, hook, hook
        ));
    }
    out
}

/// Render the full runtime wiring file.
pub fn generate_runtime_file(rules: &[&FuncRule]) -> String {
    let hook_paths: BTreeSet<&str> = rules.iter().map(|r| r.path.as_str()).collect();

    let mut out = String::new();
    out.push_str(GENERATED_HEADER);
    out.push_str("\n\npackage main\n\n");
    out.push_str(&gen_imports(&hook_paths));
    out.push('\n');
    out.push_str(&gen_support_vars(&hook_paths));
    out.push_str(&gen_hook_decls(rules));
    out
}

impl SetupPhase {
    /// Write `otel.runtime.go` into the main package directory. Nothing is
    /// emitted when no function rule matched.
    pub fn add_deps(&self, matched: &[RuleSet]) -> Result<(), String> {
        let rules: Vec<&FuncRule> = matched.iter().flat_map(|m| m.all_func_rules()).collect();
        if rules.is_empty() {
            return Ok(());
        }

        let content = generate_runtime_file(&rules);
        let path = paths::otel_work_dir().join(OTEL_RUNTIME_FILE);
        std::fs::write(&path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        self.info(&format!("Generated {}", OTEL_RUNTIME_FILE));
        self.keep_for_debug(OTEL_RUNTIME_FILE);
        Ok(())
    }
}

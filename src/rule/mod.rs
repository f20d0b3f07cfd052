//! Instrumentation rule model.
//!
//! Rules are declared in embedded catalog assets, matched against the
//! dependencies of the target build during setup, and the surviving
//! per-package rule sets are persisted for toolexec subprocesses. The
//! serialized shape is shared by the catalog assets and the store, so the
//! same structs serve both.

pub mod loader;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fields common to every rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseRule {
    /// Unique name within the catalog. Supplied by the asset's mapping key.
    #[serde(default)]
    pub name: String,
    /// Import path of the package this rule applies to.
    pub target: String,
    /// Version constraint: empty (always), "vX.Y.Z" (lower bound), or
    /// "vX.Y.Z,vA.B.C" (half-open range).
    #[serde(default)]
    pub version: String,
}

/// Instrument a function or method with before/after hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncRule {
    #[serde(flatten)]
    pub base: BaseRule,
    /// Receiver type spelling for methods, e.g. "*Client". Pointer and
    /// value receivers match by base name.
    #[serde(default)]
    pub recv: String,
    /// Name of the target function.
    pub func: String,
    /// Before-hook symbol name; empty means no before hook.
    #[serde(default)]
    pub before: String,
    /// After-hook symbol name; empty means no after hook.
    #[serde(default)]
    pub after: String,
    /// Import path of the module providing the hook symbols.
    pub path: String,
}

/// A field appended to a struct by a struct rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_spelling: String,
}

/// Append fields to a named struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructRule {
    #[serde(flatten)]
    pub base: BaseRule,
    #[serde(rename = "struct")]
    pub struct_name: String,
    #[serde(rename = "fields", default)]
    pub new_fields: Vec<StructField>,
}

/// Inject a verbatim statement at the entry of a function body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    #[serde(flatten)]
    pub base: BaseRule,
    #[serde(default)]
    pub recv: String,
    pub func: String,
    pub raw: String,
}

/// Copy a file from the hook module into the target package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRule {
    #[serde(flatten)]
    pub base: BaseRule,
    pub file: String,
    /// Import path of the hook module the file is read from.
    pub path: String,
}

/// A rule of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Func(FuncRule),
    Struct(StructRule),
    Raw(RawRule),
    File(FileRule),
}

impl Rule {
    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn target(&self) -> &str {
        &self.base().target
    }

    pub fn version(&self) -> &str {
        &self.base().version
    }

    pub fn base(&self) -> &BaseRule {
        match self {
            Rule::Func(r) => &r.base,
            Rule::Struct(r) => &r.base,
            Rule::Raw(r) => &r.base,
            Rule::File(r) => &r.base,
        }
    }
}

/// The rules that matched one compiled package, keyed by source file where
/// the rule kind is file-specific.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub module_path: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub func_rules: HashMap<String, Vec<FuncRule>>,
    #[serde(default)]
    pub struct_rules: HashMap<String, Vec<StructRule>>,
    #[serde(default)]
    pub raw_rules: HashMap<String, Vec<RawRule>>,
    #[serde(default)]
    pub file_rules: Vec<FileRule>,
}

impl RuleSet {
    pub fn new(module_path: &str) -> Self {
        RuleSet {
            module_path: module_path.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.func_rules.is_empty()
            && self.struct_rules.is_empty()
            && self.raw_rules.is_empty()
            && self.file_rules.is_empty()
    }

    pub fn set_package_name(&mut self, name: &str) {
        if self.package_name.is_empty() {
            self.package_name = name.to_string();
        }
    }

    pub fn add_func_rule(&mut self, source: &str, rule: FuncRule) {
        self.func_rules
            .entry(source.to_string())
            .or_default()
            .push(rule);
    }

    pub fn add_struct_rule(&mut self, source: &str, rule: StructRule) {
        self.struct_rules
            .entry(source.to_string())
            .or_default()
            .push(rule);
    }

    pub fn add_raw_rule(&mut self, source: &str, rule: RawRule) {
        self.raw_rules
            .entry(source.to_string())
            .or_default()
            .push(rule);
    }

    pub fn add_file_rule(&mut self, rule: FileRule) {
        self.file_rules.push(rule);
    }

    /// All func rules in the set, across source files.
    pub fn all_func_rules(&self) -> Vec<&FuncRule> {
        self.func_rules.values().flatten().collect()
    }
}

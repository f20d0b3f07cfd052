//! Matching rules against discovered dependencies.
//!
//! Target lookup and version filtering are cheap; confirming that a
//! function or struct actually exists in a dependency requires parsing its
//! sources, so dependencies are matched in parallel over a bounded pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::goast::GoFile;
use crate::rule::{loader, Rule, RuleSet};
use crate::semver;
use crate::setup::find::Dependency;
use crate::setup::SetupPhase;

/// Worker multiplier for the matching pool.
const MATCH_CONCURRENCY_MULTIPLIER: usize = 2;

/// Check a dependency version against a rule's constraint: empty always
/// matches, "lo" matches versions >= lo, "lo,hi" matches the half-open
/// range [lo, hi).
pub fn match_version(dep_version: &str, rule_version: &str) -> bool {
    if rule_version.is_empty() {
        return true;
    }
    if let Some((start_inclusive, end_exclusive)) = rule_version.split_once(',') {
        return semver::compare(dep_version, start_inclusive).is_ge()
            && semver::compare(dep_version, end_exclusive).is_lt();
    }
    semver::compare(dep_version, rule_version).is_ge()
}

impl SetupPhase {
    /// Precise matching of rules against one dependency's source code.
    fn run_match(
        &self,
        dep: &Dependency,
        rules_by_target: &HashMap<String, Vec<Rule>>,
    ) -> Result<RuleSet, String> {
        let mut set = RuleSet::new(&dep.import_path);

        let Some(relevant) = rules_by_target.get(&dep.import_path) else {
            return Ok(set);
        };

        let filtered: Vec<&Rule> = relevant
            .iter()
            .filter(|r| match_version(&dep.version, r.version()))
            .collect();

        // File rules apply unconditionally; the rest need a look at the
        // parsed sources.
        let mut precise = Vec::new();
        for rule in filtered {
            match rule {
                Rule::File(fr) => {
                    self.info(&format!("Match file rule {} for {}", fr.base.name, dep));
                    set.add_file_rule(fr.clone());
                }
                other => precise.push(other),
            }
        }
        if precise.is_empty() {
            return Ok(set);
        }

        for source in &dep.sources {
            // The only purpose here is matching, no node updates, so the
            // plain parse without a signature model is enough.
            let tree = GoFile::parse_file(std::path::Path::new(source)).map_err(|e| {
                format!(
                    "failed to parse {} while matching {}: {}",
                    source, dep.import_path, e
                )
            })?;
            if let Some(pkg) = tree.package_name() {
                set.set_package_name(&pkg);
            }

            for rule in &precise {
                match rule {
                    Rule::Func(fr) => {
                        if tree.find_function(&fr.func, &fr.recv).is_some() {
                            self.info(&format!("Match func rule {} for {}", fr.base.name, dep));
                            set.add_func_rule(source, (*fr).clone());
                        }
                    }
                    Rule::Struct(sr) => {
                        if tree.find_struct(&sr.struct_name).is_some() {
                            self.info(&format!("Match struct rule {} for {}", sr.base.name, dep));
                            set.add_struct_rule(source, (*sr).clone());
                        }
                    }
                    Rule::Raw(rr) => {
                        if tree.find_function(&rr.func, &rr.recv).is_some() {
                            self.info(&format!("Match raw rule {} for {}", rr.base.name, dep));
                            set.add_raw_rule(source, (*rr).clone());
                        }
                    }
                    Rule::File(_) => {}
                }
            }
        }
        Ok(set)
    }

    /// Match the rule catalog against all dependencies, in parallel.
    pub fn match_deps(&self, deps: &[Dependency]) -> Result<Vec<RuleSet>, String> {
        let all_rules = loader::load_all()?;
        self.info(&format!("Found {} available rules", all_rules.len()));
        if all_rules.is_empty() {
            return Ok(Vec::new());
        }
        let rules_by_target = loader::group_by_target(all_rules);

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            * MATCH_CONCURRENCY_MULTIPLIER;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| format!("failed to build matcher pool: {}", e))?;

        let matched: Mutex<Vec<RuleSet>> = Mutex::new(Vec::new());
        let first_error: Mutex<Option<String>> = Mutex::new(None);
        let aborted = AtomicBool::new(false);

        pool.install(|| {
            deps.par_iter().for_each(|dep| {
                if aborted.load(Ordering::SeqCst) {
                    return;
                }
                match self.run_match(dep, &rules_by_target) {
                    Ok(set) => {
                        if !set.is_empty() {
                            matched.lock().unwrap().push(set);
                        }
                    }
                    Err(e) => {
                        aborted.store(true, Ordering::SeqCst);
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                }
            });
        });

        if let Some(e) = first_error.into_inner().unwrap() {
            return Err(e);
        }
        Ok(matched.into_inner().unwrap())
    }
}

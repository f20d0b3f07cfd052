//! Module wiring.
//!
//! Hook implementations live in modules under the driver's own module
//! root, extracted locally during setup. The target project's go.mod gets
//! a replace directive per hook module pointing at the extracted sources,
//! followed by a `go mod tidy`. Vendored projects additionally need the
//! redirected sources copied into the vendor tree and the stale replace
//! lines dropped from vendor/modules.txt, because `go mod vendor` does not
//! follow local replace directives.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::common::paths;
use crate::common::run_cmd_checked;
use crate::constants::OTEL_ROOT;
use crate::debug_log;
use crate::rule::RuleSet;
use crate::setup::SetupPhase;

/// Map a hook module path to the local directory its sources were
/// extracted to. Paths outside the driver's module root have no local
/// extraction and are left to the module proxy.
fn local_path_for(module_path: &str) -> Option<PathBuf> {
    let rel = module_path.strip_prefix(OTEL_ROOT)?;
    Some(paths::build_temp_dir().join(rel.trim_start_matches('/')))
}

/// Collect the module path -> local path redirects required by the
/// matched rules, plus the shared support module.
fn collect_redirects(matched: &[RuleSet]) -> Vec<(String, PathBuf)> {
    let mut redirects = Vec::new();
    let mut seen = std::collections::HashSet::new();

    // The shared support module comes first; every hook module depends on it
    let support = format!("{}/pkg", OTEL_ROOT);
    redirects.push((support.clone(), paths::build_temp_dir().join("pkg")));
    seen.insert(support);

    for set in matched {
        for rule in set.all_func_rules() {
            if !seen.insert(rule.path.clone()) {
                continue;
            }
            match local_path_for(&rule.path) {
                Some(local) => redirects.push((rule.path.clone(), local)),
                None => {
                    debug_log!("hook module {} is external, no redirect", rule.path);
                }
            }
        }
    }
    redirects
}

/// Check whether go.mod already replaces the module path.
fn has_replace(gomod: &str, module_path: &str) -> bool {
    let needle = format!("{} =>", module_path);
    for line in gomod.lines() {
        let line = line.trim();
        if line.starts_with("replace ") && line[8..].trim_start().starts_with(&needle) {
            return true;
        }
        // Inside a replace ( ... ) block
        if line.starts_with(&needle) {
            return true;
        }
    }
    false
}

/// Append a replace directive for the module path. Returns whether the
/// manifest changed.
fn add_replace(gomod: &mut String, module_path: &str, local: &Path) -> bool {
    if has_replace(gomod, module_path) {
        return false;
    }
    if !gomod.ends_with('\n') {
        gomod.push('\n');
    }
    gomod.push_str(&format!("\nreplace {} => {}\n", module_path, local.display()));
    true
}

impl SetupPhase {
    /// Copy the redirected local sources into the vendor tree at their
    /// canonical import-path locations. Failure is fatal for the affected
    /// module only.
    fn copy_to_vendor(&self, redirects: &[(String, PathBuf)]) -> Result<(), String> {
        let work_dir = paths::otel_work_dir();
        let mut errors = Vec::new();
        for (module_path, local) in redirects {
            if !local.exists() {
                self.warn(&format!(
                    "instrumentation package not found at {}",
                    local.display()
                ));
                continue;
            }
            let vendor_path = work_dir.join("vendor").join(module_path);
            self.info(&format!(
                "Copying instrumentation package to vendor: {} -> {}",
                local.display(),
                vendor_path.display()
            ));
            if let Err(e) = copy_tree(local, &vendor_path) {
                errors.push(format!("vendor copy of {} failed: {}", module_path, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// Remove replace lines pointing into the build temp directory from
    /// vendor/modules.txt so the toolchain uses the vendored files.
    fn fix_vendor_modules_txt(&self) -> Result<(), String> {
        let modules_txt = paths::otel_work_dir().join("vendor").join("modules.txt");
        let content = std::fs::read_to_string(&modules_txt)
            .map_err(|e| format!("failed to read vendor/modules.txt: {}", e))?;

        let kept: Vec<&str> = content
            .lines()
            .filter(|line| {
                let stale = line.contains(OTEL_ROOT)
                    && line.contains("=>")
                    && line.contains(crate::constants::BUILD_TEMP_DIR);
                if stale {
                    debug_log!("Removing replace directive from vendor/modules.txt: {}", line);
                }
                !stale
            })
            .collect();

        std::fs::write(&modules_txt, kept.join("\n"))
            .map_err(|e| format!("failed to write vendor/modules.txt: {}", e))?;
        self.info("Updated vendor/modules.txt to remove replace directives");
        Ok(())
    }

    /// Redirect the hook modules in go.mod and re-sync the dependency
    /// graph, including the vendor tree when one exists.
    pub fn sync_deps(&self, matched: &[RuleSet]) -> Result<(), String> {
        let has_func_rules = matched.iter().any(|m| !m.func_rules.is_empty());
        if !has_func_rules {
            return Ok(());
        }

        let redirects = collect_redirects(matched);
        let gomod_path = paths::otel_work_dir().join("go.mod");
        let mut gomod = std::fs::read_to_string(&gomod_path)
            .map_err(|e| format!("failed to read go.mod: {}", e))?;

        let mut changed = false;
        for (module_path, local) in &redirects {
            if add_replace(&mut gomod, module_path, local) {
                self.info(&format!("Replace dependency {} => {}", module_path, local.display()));
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }

        std::fs::write(&gomod_path, &gomod)
            .map_err(|e| format!("failed to write go.mod: {}", e))?;
        run_cmd_checked(&["go".into(), "mod".into(), "tidy".into()])
            .map_err(|e| format!("go mod tidy failed: {}", e))?;

        if paths::otel_work_dir().join("vendor").exists() {
            self.info("Vendor directory detected, syncing vendor/modules.txt");
            run_cmd_checked(&["go".into(), "mod".into(), "vendor".into()])
                .map_err(|e| format!("failed to sync vendor directory: {}", e))?;
            // go mod vendor doesn't copy local replace directives, so the
            // instrumentation packages go in by hand
            self.copy_to_vendor(&redirects)?;
            self.fix_vendor_modules_txt()?;
        }
        self.keep_for_debug("go.mod");
        Ok(())
    }
}

/// Re-export for the file-rule reader: where a hook module's extracted
/// sources live locally.
pub fn hook_module_local_dir(module_path: &str) -> Option<PathBuf> {
    local_path_for(module_path)
}

/// Walk a module tree and copy every file to the destination, recreating
/// the directory structure.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), String> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| format!("walk of {} failed: {}", src.display(), e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| format!("walk escaped {}: {}", src.display(), e))?;
        let dest = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)
                .map_err(|e| format!("failed to create {}: {}", dest.display(), e))?;
        } else {
            paths::copy_file(entry.path(), &dest)?;
        }
    }
    Ok(())
}

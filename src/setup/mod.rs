//! The setup phase.
//!
//! Runs once in the parent process before the real build: discover the
//! dependency set from a dry-run build plan, match the rule catalog
//! against it, generate the runtime wiring file, redirect hook modules to
//! locally extracted sources, and persist the matched rule sets for the
//! toolexec subprocesses.

pub mod add;
pub mod find;
pub mod matching;
pub mod store;
pub mod sync;

use std::path::PathBuf;

use crate::common::paths;
use crate::common::run_cmd_with_env;
use crate::constants::{
    BACKUP_FILES, ENV_OTEL_MATCHED_MODULES, ENV_OTEL_PKG_DIR, ENV_OTEL_WORK_DIR, OTEL_RUNTIME_FILE,
};
use crate::debug_log;
use crate::rule::RuleSet;

/// State and logging surface of one setup run.
pub struct SetupPhase;

impl SetupPhase {
    pub fn new() -> Self {
        SetupPhase
    }

    pub fn info(&self, msg: &str) {
        eprintln!("[otelbuild setup] {}", msg);
        debug_log!("[setup] {}", msg);
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("[otelbuild setup] warning: {}", msg);
        debug_log!("[setup] warning: {}", msg);
    }

    /// Copy a file into the debug snapshot tree. Failure is tolerated,
    /// this is only for debugging.
    pub fn keep_for_debug(&self, name: &str) {
        let src = paths::otel_work_dir().join(name);
        let dst = paths::build_temp("debug").join("main").join(name);
        if let Err(e) = paths::copy_file(&src, &dst) {
            self.warn(&format!("failed to record added file {}: {}", name, e));
        }
    }

    /// Extract the hook module sources into the build temp directory. The
    /// source tree comes from OTEL_PKG_DIR, defaulting to a `pkg`
    /// directory next to the driver executable. A missing tree only warns:
    /// the affected replace redirects will dangle, which surfaces as a
    /// clear `go mod tidy` failure if a rule actually needed them.
    pub fn extract(&self) -> Result<(), String> {
        let pkg_dir = match std::env::var(ENV_OTEL_PKG_DIR) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|d| d.join("pkg")))
                .unwrap_or_else(|| PathBuf::from("pkg")),
        };
        if !pkg_dir.is_dir() {
            self.warn(&format!(
                "hook module sources not found at {}",
                pkg_dir.display()
            ));
            return Ok(());
        }
        let dst = paths::build_temp("pkg");
        paths::copy_dir_recursive(&pkg_dir, &dst)
            .map_err(|e| format!("failed to extract hook modules: {}", e))?;
        self.info(&format!(
            "Extracted hook modules {} -> {}",
            pkg_dir.display(),
            dst.display()
        ));
        Ok(())
    }

    /// Prepare the environment for instrumentation and return the matched
    /// rule sets for the build phase.
    pub fn setup(&self, args: &[String]) -> Result<Vec<RuleSet>, String> {
        let target = crate::common::gocmd::build_target(args);
        if target.is_empty() {
            self.info("Setting up instrumentation for the current package");
        } else {
            self.info(&format!("Setting up instrumentation for {}", target));
        }
        // Find all dependencies of the project being built
        let deps = self.find_deps(args)?;
        // Match the hook rules with these dependencies
        let matched = self.match_deps(&deps)?;
        // Introduce the hook wiring by generating otel.runtime.go
        self.add_deps(&matched)?;
        // Extract the embedded instrumentation modules into a local directory
        self.extract()?;
        // Sync new dependencies to go.mod and the vendor tree
        self.sync_deps(&matched)?;
        // Persist the matched rules for the instrument phase
        self.store(&matched)?;
        Ok(matched)
    }
}

impl Default for SetupPhase {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the real build with the toolexec interception hook installed,
/// passing the matched module paths to the subprocesses for fast
/// filtering.
pub fn build_with_toolexec(args: &[String], matched: &[RuleSet]) -> Result<i32, String> {
    let exec_path = std::env::current_exe()
        .map_err(|e| format!("failed to get executable path: {}", e))?;
    let insert = format!("-toolexec={} toolexec", exec_path.display());

    if args.is_empty() {
        return Err("empty build command".to_string());
    }
    // go <subcommand> -work -toolexec=... [-a] <rest>
    let mut new_args = Vec::with_capacity(args.len() + 4);
    new_args.push("go".to_string());
    new_args.push(args[0].clone());
    // -work keeps the object directories around for debugging
    new_args.push("-work".to_string());
    new_args.push(insert);
    // TODO: support incremental builds so the forced rebuild can go away
    new_args.push("-a".to_string());
    new_args.extend(args[1..].iter().cloned());
    eprintln!("[otelbuild] Running go build with toolexec: {:?}", new_args);

    let work_dir = paths::otel_work_dir();
    let module_paths: Vec<&str> = matched.iter().map(|m| m.module_path.as_str()).collect();
    debug_log!("Matched modules for fast filtering: {:?}", module_paths);

    let env = vec![
        (
            ENV_OTEL_WORK_DIR.to_string(),
            work_dir.to_string_lossy().into_owned(),
        ),
        (
            ENV_OTEL_MATCHED_MODULES.to_string(),
            module_paths.join(","),
        ),
    ];
    run_cmd_with_env(&new_args, &env)
}

/// The full wrapper flow: back up the manifest family, set up, build with
/// toolexec, then restore the project to its pre-setup state.
pub fn go_build(args: &[String]) -> Result<i32, String> {
    let sp = SetupPhase::new();
    if let Err(e) = paths::backup_files(BACKUP_FILES) {
        debug_log!("failed to back up files: {}", e);
    }

    let result = (|| {
        if args.len() < 2 || args[0] != "go" {
            return Err(format!("expected a go build/install command, got {:?}", args));
        }
        let matched = sp.setup(args)?;
        sp.info("Setup completed successfully");
        // build_with_toolexec takes the command without the leading "go"
        build_with_toolexec(&args[1..], &matched)
    })();

    let runtime_file = paths::otel_work_dir().join(OTEL_RUNTIME_FILE);
    if let Err(e) = std::fs::remove_file(&runtime_file) {
        debug_log!("failed to remove {}: {}", runtime_file.display(), e);
    }
    if let Err(e) = paths::restore_files(BACKUP_FILES) {
        debug_log!("failed to restore files: {}", e);
    }

    let code = result?;
    if code == 0 {
        sp.info("Instrumentation completed successfully");
    }
    Ok(code)
}

//! Dependency discovery through the dry-run build plan.
//!
//! Running the build tool with `-a -x -n` prints every command it would
//! execute to stderr without running them. One scan over that log yields
//! the compile invocation per package and the CGO object-directory
//! mappings needed to resolve generated files back to their originals.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::common::gocmd;
use crate::common::paths;
use crate::constants::BUILD_PLAN_LOG;
use crate::debug_log;
use crate::setup::SetupPhase;

/// One package the target build will compile.
#[derive(Debug, Clone, Default)]
pub struct Dependency {
    pub import_path: String,
    pub version: String,
    /// Absolute source paths. Every entry exists on disk, possibly after
    /// CGO resolution.
    pub sources: Vec<String>,
    /// Original absolute path -> generated basename, for CGO sources.
    pub cgo_files: HashMap<String, String>,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            write!(f, "{{{}: {:?}}}", self.import_path, self.sources)
        } else {
            write!(f, "{{{}@{}: {:?}}}", self.import_path, self.version, self.sources)
        }
    }
}

/// Normalize a build plan line: Windows double-backslashes are de-escaped
/// and separators unified to slashes.
fn normalize_line(line: &str) -> String {
    let line = line.trim();
    if cfg!(windows) {
        line.replace("\\\\", "\\").replace('\\', "/")
    } else {
        line.to_string()
    }
}

/// Scan the build plan once, collecting compile commands and CGO object
/// directory mappings keyed off the scanner's `cd` state.
pub fn parse_build_plan(content: &str) -> (Vec<String>, HashMap<String, String>) {
    let mut compile_cmds = Vec::new();
    let mut cgo_dirs = HashMap::new();
    let mut current_dir = String::new();

    for raw in content.lines() {
        let line = normalize_line(raw);

        if let Some(dir) = gocmd::parse_cd_dir(&line) {
            current_dir = dir;
            continue;
        }

        if gocmd::is_cgo_command(&line) && !current_dir.is_empty() {
            let args = gocmd::split_args(&line);
            if let Some(obj_dir) = gocmd::find_flag_value(&args, "-objdir") {
                cgo_dirs.insert(
                    obj_dir.trim_end_matches('/').to_string(),
                    current_dir.clone(),
                );
            }
        }

        if gocmd::is_compile_command(&line) {
            compile_cmds.push(line);
        }
    }
    (compile_cmds, cgo_dirs)
}

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@v\d+\.\d+\.\d+(-.*?)?/").expect("version regex"));

/// Extract a module version from a module-cache path, e.g.
/// `/go/pkg/mod/github.com/x/y@v1.2.3/z.go` -> `v1.2.3`.
pub fn find_mod_version(path: &str) -> String {
    let unified = path.replace('\\', "/");
    match VERSION_RE.find(&unified) {
        Some(m) => unified[m.start() + 1..m.end() - 1].to_string(),
        None => String::new(),
    }
}

/// Make a path absolute against the current working directory, without
/// resolving symlinks.
fn absolutize(path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        return path.to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(p).to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

impl SetupPhase {
    /// Run the dry-run build and return the raw compile commands plus the
    /// CGO object directory map.
    fn list_build_plan(
        &self,
        go_build_cmd: &[String],
    ) -> Result<(Vec<String>, HashMap<String, String>), String> {
        const MIN_ARGS: usize = 2; // go build
        if go_build_cmd.len() < MIN_ARGS {
            return Err(format!("at least {} arguments are required", MIN_ARGS));
        }
        if go_build_cmd[1] != "build" && go_build_cmd[1] != "install" {
            return Err(format!("must be go build/install, got {}", go_build_cmd[1]));
        }

        let log_path = paths::build_temp(BUILD_PLAN_LOG);
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create build temp dir: {}", e))?;
        }
        let log_file = File::create(&log_path)
            .map_err(|e| format!("failed to create build plan log file: {}", e))?;

        // go build/install -a -x -n {rest}
        let mut args: Vec<String> = go_build_cmd[..MIN_ARGS].to_vec();
        args.extend(["-a", "-x", "-n"].map(String::from));
        args.extend(go_build_cmd[MIN_ARGS..].iter().cloned());
        self.info(&format!("New build command {:?} (old {:?})", args, go_build_cmd));

        // The dry build must run in the same directory as the original
        // build command; no working-directory override here.
        let status = Command::new(&args[0])
            .args(&args[1..])
            .stderr(log_file)
            .status()
            .map_err(|e| format!("failed to run build plan: {}", e))?;
        if !status.success() {
            let log = std::fs::read_to_string(&log_path).unwrap_or_default();
            return Err(format!(
                "failed to run build plan (exit {:?}):\n{}",
                status.code(),
                log
            ));
        }

        let content = std::fs::read_to_string(&log_path)
            .map_err(|e| format!("failed to read build plan log: {}", e))?;
        let (compile_cmds, cgo_dirs) = parse_build_plan(&content);
        debug_log!("Found CGO object directories: {:?}", cgo_dirs);
        debug_log!("Found {} compile commands", compile_cmds.len());
        Ok((compile_cmds, cgo_dirs))
    }

    /// Find the dependencies of the project by listing the build plan.
    pub fn find_deps(&self, go_build_cmd: &[String]) -> Result<Vec<Dependency>, String> {
        let (build_plan, cgo_dirs) = self.list_build_plan(go_build_cmd)?;

        let mut deps = Vec::new();
        for plan in &build_plan {
            let args = gocmd::split_args(plan);
            let import_path = gocmd::find_flag_value(&args, "-p")
                .ok_or_else(|| format!("compile command without import path: {}", plan))?
                .to_string();

            let mut dep = Dependency {
                import_path,
                ..Default::default()
            };

            for arg in &args {
                if !gocmd::is_go_file(arg) {
                    continue;
                }
                if !Path::new(arg).exists() {
                    // A file generated during compilation (CGO file)
                    let obj_dir = PathBuf::from(arg)
                        .parent()
                        .map(|d| d.to_string_lossy().trim_end_matches('/').to_string())
                        .unwrap_or_default();
                    let Some(source_dir) = cgo_dirs.get(&obj_dir) else {
                        debug_log!("Skip generated file {} - unknown objdir {}", arg, obj_dir);
                        continue;
                    };
                    match gocmd::resolve_cgo_file(arg, source_dir) {
                        Ok(original) => {
                            let original = original.to_string_lossy().into_owned();
                            let base = Path::new(arg)
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default();
                            dep.cgo_files.insert(original.clone(), base);
                            dep.sources.push(original.clone());
                            self.info(&format!("Resolved CGO source {} -> {}", arg, original));
                        }
                        Err(e) => {
                            // Non-CGO generated files (_cgo_gotypes.go, ...)
                            debug_log!("Skip generated file {}: {}", arg, e);
                        }
                    }
                    continue;
                }
                dep.sources.push(absolutize(arg));
            }

            // First source path carrying a version wins
            dep.version = dep
                .sources
                .iter()
                .map(|s| find_mod_version(s))
                .find(|v| !v.is_empty())
                .unwrap_or_default();
            self.info(&format!("Found dependency {}", dep));
            deps.push(dep);
        }
        Ok(deps)
    }
}

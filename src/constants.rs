//! Static configuration constants for the instrumentation driver.

/// Environment variable naming the project root. Falls back to the current
/// working directory when unset.
pub const ENV_OTEL_WORK_DIR: &str = "OTEL_WORK_DIR";

/// Environment variable carrying the comma-separated matched module paths,
/// written by setup and consumed by toolexec subprocesses as a fast filter.
pub const ENV_OTEL_MATCHED_MODULES: &str = "OTEL_MATCHED_MODULES";

/// Environment variable enabling the file-based debug log.
pub const ENV_OTEL_DEBUG_LOG: &str = "OTEL_DEBUG_LOG";

/// Environment variable naming the directory holding the extractable hook
/// module sources. Defaults to a `pkg` directory next to the executable.
pub const ENV_OTEL_PKG_DIR: &str = "OTEL_PKG_DIR";

/// Environment variable selecting the trampoline-jump guard expression:
/// "var" (default), "on", or "off".
pub const ENV_OTEL_TRAMPOLINE_GUARD: &str = "OTEL_TRAMPOLINE_GUARD";

/// Name of the per-project scratch directory, created under the work dir.
pub const BUILD_TEMP_DIR: &str = ".otel-build";

/// Persisted rule sets, under the build temp directory.
pub const MATCHED_RULE_FILE: &str = "matched.json";

/// Captured stderr of the dry-run build, under the build temp directory.
pub const BUILD_PLAN_LOG: &str = "build-plan.log";

/// Generated runtime wiring file, written to the main package directory.
pub const OTEL_RUNTIME_FILE: &str = "otel.runtime.go";

/// Generated per-package globals file holding hook contexts and prototypes.
pub const OTEL_GLOBALS_FILE: &str = "otel.globals.go";

/// Module path prefix of the hook modules this driver ships. Hook paths
/// under this prefix are redirected to locally extracted sources.
pub const OTEL_ROOT: &str = "github.com/otelbuild/otelbuild";

/// Name prefix for every function the rewriter generates inside a target
/// package. Must stay unique within instrumented packages.
pub const TRAMPOLINE_PREFIX: &str = "otel_trampoline_";

/// Name prefix for generated hook context types.
pub const HOOK_CTX_PREFIX: &str = "HookCtx_";

/// Package-level guard variable controlling trampoline jumps at runtime.
pub const TRAMPOLINE_GUARD_VAR: &str = "otelTrampolineEnabled";

/// Manifest files backed up before setup mutates the project.
pub const BACKUP_FILES: &[&str] = &["go.mod", "go.sum", "go.work", "go.work.sum"];

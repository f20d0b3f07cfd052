//! otelbuild - compile-time instrumentation for Go builds.
//!
//! The driver transparently inserts observability hooks into a Go
//! project's dependencies during compilation. A setup phase discovers the
//! dependency set from a dry-run build plan, matches it against a
//! declarative rule catalog, wires the hook modules into the build, and
//! persists the matched rules. The real build then runs with this driver
//! installed as the toolexec wrapper, and every matched compile command
//! has its sources rewritten before the compiler sees them.

pub mod common;
pub mod constants;
pub mod debug_log;
pub mod goast;
pub mod instrument;
pub mod rule;
pub mod semver;
pub mod setup;

//! Build-tool command-line helpers.
//!
//! The dry-run build plan and the toolexec argv both speak the Go
//! toolchain's command syntax. Everything that inspects those command
//! lines lives here: the compile-command predicate, the quote-aware
//! splitter, flag lookup, build-target extraction, and the mapping from
//! CGO-generated files back to their originals.

use std::path::{Path, PathBuf};

/// Fields every compile invocation carries, plus the compiler executable.
fn compile_markers() -> [&'static str; 4] {
    let compiler = if cfg!(windows) { "compile.exe" } else { "compile" };
    ["-o", "-p", "-buildid", compiler]
}

/// Check if the line is a compile command in the dry-run build plan.
///
/// PGO compile commands are rejected here: the build plan lists the same
/// package once for the profile pass and once for the normal pass, and
/// accepting both would match the package twice.
pub fn is_compile_command(line: &str) -> bool {
    if line.contains("-pgoprofile") {
        return false;
    }
    is_compile_invocation(line)
}

/// Check if the line invokes the compiler at all. This is the toolexec-side
/// predicate: a shim handed a PGO compilation still has to instrument it.
pub fn is_compile_invocation(line: &str) -> bool {
    compile_markers().iter().all(|m| line.contains(m))
}

/// Split a command line by whitespace, keeping double-quoted regions as
/// single tokens. No other quoting syntax is honored. On Windows, escaped
/// backslashes are de-escaped after splitting.
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut in_quotes = false;
    let mut arg = String::new();

    for c in input.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if c == ' ' && !in_quotes {
            if !arg.is_empty() {
                args.push(std::mem::take(&mut arg));
            }
            continue;
        }
        arg.push(c);
    }
    if !arg.is_empty() {
        args.push(arg);
    }

    if cfg!(windows) {
        for a in &mut args {
            *a = a.replace("\\\\", "\\");
        }
    }
    args
}

/// Find the value of a flag in the command line, i.e. the argument
/// following the exact flag token.
pub fn find_flag_value<'a>(cmd: &'a [String], flag: &str) -> Option<&'a str> {
    cmd.iter()
        .position(|v| v == flag)
        .and_then(|i| cmd.get(i + 1))
        .map(|s| s.as_str())
}

pub fn is_go_file(path: &str) -> bool {
    path.to_lowercase().ends_with(".go")
}

/// Extract the directory from a `cd <dir>` build plan line. Trailing
/// content after the directory (comments) is ignored.
pub fn parse_cd_dir(line: &str) -> Option<String> {
    if !line.to_lowercase().starts_with("cd ") {
        return None;
    }
    let rest = &line[3..];
    let dir = rest.split(' ').next().unwrap_or("").trim();
    if dir.is_empty() {
        None
    } else {
        Some(dir.to_string())
    }
}

/// Check if the line is a cgo tool invocation that maps an object
/// directory to the current source directory.
pub fn is_cgo_command(line: &str) -> bool {
    line.contains("cgo")
        && line.contains("-objdir")
        && line.contains("-importpath")
        && !line.contains("-dynimport")
}

const CGO_SUFFIX: &str = ".cgo1.go";
const GO_SUFFIX: &str = ".go";

/// Map a CGO-generated file back to its original source in the given
/// source directory. `base.cgo1.go` resolves to `<source_dir>/base.go`,
/// which must exist.
pub fn resolve_cgo_file(cgo_file: &str, source_dir: &str) -> Result<PathBuf, String> {
    if cgo_file.is_empty() || source_dir.is_empty() {
        return Err(format!(
            "cgo file and source dir cannot be empty, cgo file: {:?}, source dir: {:?}",
            cgo_file, source_dir
        ));
    }

    let base = Path::new(cgo_file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let original_base = match base.strip_suffix(CGO_SUFFIX) {
        Some(stem) => format!("{}{}", stem, GO_SUFFIX),
        None => {
            return Err(format!(
                "file {} is not a CGO ({}) generated file",
                cgo_file, CGO_SUFFIX
            ));
        }
    };

    let abs = Path::new(source_dir).join(original_base);
    if !abs.exists() {
        return Err(format!("file {} does not exist", abs.display()));
    }
    Ok(abs)
}

/// Flags of `go build` that consume the following argument.
const VALUE_FLAGS: &[&str] = &[
    "-o",
    "-p",
    "-C",
    "-asmflags",
    "-buildmode",
    "-compiler",
    "-covermode",
    "-coverpkg",
    "-exec",
    "-gcflags",
    "-gccgoflags",
    "-installsuffix",
    "-ldflags",
    "-mod",
    "-modfile",
    "-overlay",
    "-pgo",
    "-pkgdir",
    "-tags",
    "-toolexec",
];

/// Extract the build target from a `go build`-style command line: the last
/// positional argument after flags and their value successors are removed,
/// with a leading `./` trimmed. A bare `.` yields the empty string.
pub fn build_target(args: &[String]) -> String {
    let mut rest: &[String] = args;
    if rest.first().map(|s| s.as_str()) == Some("go") {
        rest = &rest[1..];
    }
    if matches!(rest.first().map(|s| s.as_str()), Some("build") | Some("install")) {
        rest = &rest[1..];
    }

    let mut last_positional: Option<&str> = None;
    let mut i = 0;
    while i < rest.len() {
        let arg = rest[i].as_str();
        if let Some(flag) = arg.strip_prefix('-') {
            // `-flag=value` carries its own value; otherwise skip the
            // successor of a value-taking flag
            let name = format!("-{}", flag);
            if !arg.contains('=') && VALUE_FLAGS.contains(&name.as_str()) {
                i += 1;
            }
        } else {
            last_positional = Some(arg);
        }
        i += 1;
    }

    match last_positional {
        None | Some(".") => String::new(),
        Some(p) => p.strip_prefix("./").unwrap_or(p).to_string(),
    }
}

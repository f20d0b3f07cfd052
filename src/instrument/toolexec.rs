//! Toolexec interception.
//!
//! The build tool re-invokes this driver for every sub-tool command
//! (compile, asm, link, ...). Anything that is not a compile command of a
//! matched package runs unchanged; a matched compile command is rewritten
//! by the instrument phase first, loses its `-complete` flag (injected
//! prototypes have no bodies), and then runs with the substituted files.

use std::path::{Path, PathBuf};

use crate::common::gocmd;
use crate::common::paths;
use crate::common::run_cmd;
use crate::debug_log;
use crate::instrument::InstrumentPhase;
use crate::setup::store;

/// Strip the first `-complete` flag from the compile arguments.
fn strip_complete_flag(args: &mut Vec<String>) {
    if let Some(i) = args.iter().position(|a| a == "-complete") {
        args.remove(i);
    }
}

/// Rewrite a matched compile command, returning the amended argv.
fn intercept_compile(args: Vec<String>) -> Result<Vec<String>, String> {
    let target = gocmd::find_flag_value(&args, "-o")
        .ok_or_else(|| "missing -o flag value".to_string())?;
    let work_dir = Path::new(target)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let import_path = gocmd::find_flag_value(&args, "-p")
        .ok_or_else(|| "missing -p flag value".to_string())?
        .to_string();

    // Load matched rules persisted by the setup phase
    let all_sets = store::load_rule_sets()?;
    let Some(matched) = all_sets.into_iter().find(|s| s.module_path == import_path) else {
        return Ok(args);
    };
    if matched.is_empty() {
        return Ok(args);
    }

    eprintln!("[otelbuild toolexec] Instrument package {}", import_path);
    let mut ip = InstrumentPhase::new(work_dir, args);
    ip.instrument(&matched)
        .map_err(|e| format!("instrumentation of {} failed: {}", import_path, e))?;

    let mut amended = ip.compile_args().to_vec();
    // Injected prototypes have no bodies yet; -complete would reject them
    strip_complete_flag(&mut amended);
    debug_log!("Run instrumented command: {:?}", amended);
    Ok(amended)
}

/// Entry point of the toolexec command: run the sub-tool, instrumented
/// when the package is matched, verbatim otherwise. The sub-tool's exit
/// code is returned either way.
pub fn toolexec(args: &[String]) -> Result<i32, String> {
    // Skip non-compile commands early: no overhead for asm, link, ...
    let cmd_line = args.join(" ");
    if !gocmd::is_compile_invocation(&cmd_line) {
        return run_cmd(args);
    }

    // Fast module check before loading the full rules
    if let Some(import_path) = gocmd::find_flag_value(args, "-p") {
        if !paths::is_module_matched(import_path) {
            debug_log!("Fast path: skipping unmatched module {}", import_path);
            return run_cmd(args);
        }
    }

    debug_log!("Slow path: loading rules for potential match");
    let amended = intercept_compile(args.to_vec())?;
    run_cmd(&amended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{
        ENV_OTEL_MATCHED_MODULES, ENV_OTEL_WORK_DIR, OTEL_GLOBALS_FILE,
    };
    use crate::rule::{BaseRule, FuncRule, RawRule, RuleSet, StructField, StructRule};
    use crate::setup::SetupPhase;
    use std::path::PathBuf;

    const MAIN_GO: &str = r#"package main

// T is exercised by struct rules.
type T struct {
	Existing int
}

func Func1(x int) (int, error) {
	// original body comment
	return x + 1, nil
}

func (t *T) Method(v int) int {
	return v + t.Existing
}

func main() {
	_, _ = Func1(41)
}
"#;

    struct Fixture {
        _guard: std::sync::MutexGuard<'static, ()>,
        _dir: tempfile::TempDir,
        work: PathBuf,
        source: String,
    }

    fn fixture() -> Fixture {
        let guard = crate::testutil::env_guard();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ENV_OTEL_WORK_DIR, dir.path());
        let source = dir.path().join("main.go");
        std::fs::write(&source, MAIN_GO).unwrap();
        let work = dir.path().join("obj");
        std::fs::create_dir_all(&work).unwrap();
        Fixture {
            _guard: guard,
            work,
            source: source.to_string_lossy().into_owned(),
            _dir: dir,
        }
    }

    fn base(name: &str) -> BaseRule {
        BaseRule {
            name: name.into(),
            target: "main".into(),
            version: String::new(),
        }
    }

    fn compile_args(fx: &Fixture) -> Vec<String> {
        vec![
            "/usr/lib/go/pkg/tool/linux_amd64/compile".into(),
            "-o".into(),
            fx.work.join("_pkg_.a").to_string_lossy().into_owned(),
            "-p".into(),
            "main".into(),
            "-complete".into(),
            "-buildid".into(),
            "foo/bar".into(),
            "-pack".into(),
            fx.source.clone(),
        ]
    }

    fn run_instrument(fx: &Fixture, rset: &RuleSet) -> Result<InstrumentPhase, String> {
        let mut ip = InstrumentPhase::new(fx.work.clone(), compile_args(fx));
        ip.instrument(rset)?;
        Ok(ip)
    }

    #[test]
    fn test_func_rule_rewrites_and_emits_globals() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_func"),
                recv: String::new(),
                func: "Func1".into(),
                before: "H1Before".into(),
                after: "H1After".into(),
                path: "example.com/hooks".into(),
            },
        );

        let ip = run_instrument(&fx, &rset).unwrap();

        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        // Still parses, and every original top-level declaration survives
        let parsed = crate::goast::GoFile::parse(rewritten.clone()).unwrap();
        for decl in ["Func1", "main"] {
            assert!(parsed.find_function(decl, "").is_some(), "lost {}", decl);
        }
        assert!(parsed.find_struct("T").is_some());
        // The jump guards the original body, comments preserved
        assert!(rewritten.contains("if otelTrampolineEnabled {"));
        assert!(rewritten.contains("return otel_trampoline_0(x)"));
        assert!(rewritten.contains("// original body comment"));
        assert!(rewritten.contains("func otel_trampoline_0(x int)"));

        let globals = std::fs::read_to_string(fx.work.join(OTEL_GLOBALS_FILE)).unwrap();
        assert!(globals.contains("package main"));
        assert!(globals.contains("type HookCtx_0 struct {"));
        assert!(globals.contains("//go:linkname H1Before example.com/hooks.H1Before"));

        // The compile args point at the rewritten file plus the globals
        let args = ip.compile_args();
        assert!(args.iter().any(|a| a.ends_with("obj/main.go")));
        assert!(!args.iter().any(|a| a == &fx.source));
        assert!(args.iter().any(|a| a.ends_with(OTEL_GLOBALS_FILE)));
    }

    #[test]
    fn test_before_only_func_rule() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_before_only"),
                recv: String::new(),
                func: "Func1".into(),
                before: "H1Before".into(),
                after: String::new(),
                path: "example.com/hooks".into(),
            },
        );

        run_instrument(&fx, &rset).unwrap();

        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        assert!(rewritten.contains("H1Before(otelCtx, x)"));
        assert!(!rewritten.contains("H1After"));
        // Original body still follows the jump unchanged
        assert!(rewritten.contains("return x + 1, nil"));
        let globals = std::fs::read_to_string(fx.work.join(OTEL_GLOBALS_FILE)).unwrap();
        assert!(globals.contains("type HookCtx_0 struct {"));
    }

    #[test]
    fn test_method_receiver_rule() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_method"),
                recv: "*T".into(),
                func: "Method".into(),
                before: "H3Before".into(),
                after: "H3After".into(),
                path: "example.com/hooks".into(),
            },
        );

        run_instrument(&fx, &rset).unwrap();
        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        assert!(rewritten.contains("func otel_trampoline_0(t *T, v int)"));
        assert!(rewritten.contains("return otel_trampoline_0(t, v)"));
    }

    #[test]
    fn test_invalid_receiver_fails() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_invalid_receiver"),
                recv: "*NonExistent".into(),
                func: "Method".into(),
                before: "H1Before".into(),
                after: "H1After".into(),
                path: "example.com/hooks".into(),
            },
        );

        let err = run_instrument(&fx, &rset).unwrap_err();
        assert!(err.contains("can not find function"), "got: {}", err);
    }

    #[test]
    fn test_struct_rule_only_no_globals() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_struct_rule(
            &fx.source,
            StructRule {
                base: base("add_new_field"),
                struct_name: "T".into(),
                new_fields: vec![StructField {
                    name: "NewField".into(),
                    type_spelling: "string".into(),
                }],
            },
        );

        run_instrument(&fx, &rset).unwrap();

        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        assert!(rewritten.contains("NewField string"));
        let parsed = crate::goast::GoFile::parse(rewritten).unwrap();
        let st = parsed.find_struct("T").unwrap();
        assert!(parsed.struct_field_names(st).contains(&"NewField".to_string()));
        // No globals file for struct-only instrumentation
        assert!(!fx.work.join(OTEL_GLOBALS_FILE).exists());
    }

    #[test]
    fn test_duplicate_struct_field_fails() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_struct_rule(
            &fx.source,
            StructRule {
                base: base("dup_field"),
                struct_name: "T".into(),
                new_fields: vec![StructField {
                    name: "Existing".into(),
                    type_spelling: "string".into(),
                }],
            },
        );

        let err = run_instrument(&fx, &rset).unwrap_err();
        assert!(err.contains("duplicate struct field"), "got: {}", err);
    }

    #[test]
    fn test_raw_rule_prepends_statement() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_raw_rule(
            &fx.source,
            RawRule {
                base: base("add_raw_code"),
                recv: String::new(),
                func: "Func1".into(),
                raw: "_ = 123".into(),
            },
        );

        run_instrument(&fx, &rset).unwrap();
        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        let func_pos = rewritten.find("func Func1").unwrap();
        let raw_pos = rewritten.find("_ = 123").unwrap();
        let body_pos = rewritten.find("return x + 1, nil").unwrap();
        assert!(func_pos < raw_pos && raw_pos < body_pos);
        // Raw rules need the globals file too
        assert!(fx.work.join(OTEL_GLOBALS_FILE).exists());
    }

    #[test]
    fn test_unparseable_raw_snippet_fails() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_raw_rule(
            &fx.source,
            RawRule {
                base: base("bad_raw"),
                recv: String::new(),
                func: "Func1".into(),
                raw: "if {".into(),
            },
        );

        let err = run_instrument(&fx, &rset).unwrap_err();
        assert!(err.contains("does not parse"), "got: {}", err);
    }

    #[test]
    fn test_multiple_func_rules_nest() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        for (name, before, after) in
            [("hook_func_1", "H1Before", "H1After"), ("hook_func_2", "H2Before", "H2After")]
        {
            rset.add_func_rule(
                &fx.source,
                FuncRule {
                    base: base(name),
                    recv: String::new(),
                    func: "Func1".into(),
                    before: before.into(),
                    after: after.into(),
                    path: "example.com/hooks".into(),
                },
            );
        }

        run_instrument(&fx, &rset).unwrap();
        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        assert!(rewritten.contains("otel_trampoline_0"));
        assert!(rewritten.contains("otel_trampoline_1"));
        // The second trampoline's body nests the first rule's jump
        let t1 = rewritten.find("func otel_trampoline_1").unwrap();
        assert!(rewritten[t1..].contains("return otel_trampoline_0(x)"));
        let globals = std::fs::read_to_string(fx.work.join(OTEL_GLOBALS_FILE)).unwrap();
        assert!(globals.contains("HookCtx_0"));
        assert!(globals.contains("HookCtx_1"));
    }

    #[test]
    fn test_func_and_raw_rules_on_same_function() {
        let fx = fixture();
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_func"),
                recv: String::new(),
                func: "Func1".into(),
                before: "H1Before".into(),
                after: "H1After".into(),
                path: "example.com/hooks".into(),
            },
        );
        rset.add_raw_rule(
            &fx.source,
            RawRule {
                base: base("add_raw_code"),
                recv: String::new(),
                func: "Func1".into(),
                raw: "_ = 456".into(),
            },
        );

        run_instrument(&fx, &rset).unwrap();
        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        crate::goast::GoFile::parse(rewritten.clone()).unwrap();

        // Both edit paths target the body entry; the raw statement must
        // land unconditionally ahead of the guarded jump
        let func_pos = rewritten.find("func Func1").unwrap();
        let raw_pos = rewritten.find("_ = 456").unwrap();
        let jump_pos = rewritten.find("if otelTrampolineEnabled {").unwrap();
        let body_pos = rewritten.find("return x + 1, nil").unwrap();
        assert!(func_pos < raw_pos, "raw statement not inside Func1");
        assert!(raw_pos < jump_pos, "raw statement must precede the trampoline jump");
        assert!(jump_pos < body_pos, "jump must precede the original body");

        // The trampoline's closure copies the pristine body: the raw
        // statement appears exactly once, outside the trampoline
        assert_eq!(rewritten.matches("_ = 456").count(), 1);
        let t0 = rewritten.find("func otel_trampoline_0").unwrap();
        assert!(!rewritten[t0..].contains("_ = 456"));

        let globals = std::fs::read_to_string(fx.work.join(OTEL_GLOBALS_FILE)).unwrap();
        assert!(globals.contains("HookCtx_0"));
    }

    #[test]
    fn test_combined_rules_all_kinds() {
        let fx = fixture();
        let hooks = fx.work.parent().unwrap().join("hookmod");
        std::fs::create_dir_all(&hooks).unwrap();
        std::fs::write(
            hooks.join("newfile.go"),
            "package hookmod\n\nfunc Injected() int { return 7 }\n",
        )
        .unwrap();

        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_func"),
                recv: String::new(),
                func: "Func1".into(),
                before: "H1Before".into(),
                after: "H1After".into(),
                path: "example.com/hooks".into(),
            },
        );
        rset.add_struct_rule(
            &fx.source,
            StructRule {
                base: base("add_field"),
                struct_name: "T".into(),
                new_fields: vec![StructField {
                    name: "NewField".into(),
                    type_spelling: "string".into(),
                }],
            },
        );
        rset.add_raw_rule(
            &fx.source,
            RawRule {
                base: base("add_raw"),
                recv: String::new(),
                func: "Func1".into(),
                raw: "_ = 789".into(),
            },
        );
        rset.add_file_rule(crate::rule::FileRule {
            base: base("add_file"),
            file: "newfile.go".into(),
            path: hooks.to_string_lossy().into_owned(),
        });

        let ip = run_instrument(&fx, &rset).unwrap();
        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        let parsed = crate::goast::GoFile::parse(rewritten.clone()).unwrap();

        // Struct edit settled alongside the body edits
        let st = parsed.find_struct("T").unwrap();
        assert!(parsed.struct_field_names(st).contains(&"NewField".to_string()));
        // Raw statement ahead of the jump, exactly once
        let raw_pos = rewritten.find("_ = 789").unwrap();
        let jump_pos = rewritten.find("if otelTrampolineEnabled {").unwrap();
        assert!(raw_pos < jump_pos);
        assert_eq!(rewritten.matches("_ = 789").count(), 1);

        // File rule landed beside the package, renamed and repackaged
        let copied = std::fs::read_to_string(fx.work.join("otel.newfile.go")).unwrap();
        assert!(copied.starts_with("package main\n"));

        let globals = std::fs::read_to_string(fx.work.join(OTEL_GLOBALS_FILE)).unwrap();
        assert!(globals.contains("HookCtx_0"));

        // Compile args carry the rewritten source plus both added files
        let args = ip.compile_args();
        assert!(args.iter().any(|a| a.ends_with("obj/main.go")));
        assert!(args.iter().any(|a| a.ends_with("otel.newfile.go")));
        assert!(args.iter().any(|a| a.ends_with(OTEL_GLOBALS_FILE)));
        assert!(!args.iter().any(|a| a == &fx.source));
    }

    #[test]
    fn test_file_rule_copies_and_renames() {
        let fx = fixture();
        let hooks = fx.work.parent().unwrap().join("hookmod");
        std::fs::create_dir_all(&hooks).unwrap();
        std::fs::write(
            hooks.join("newfile.go"),
            "package hookmod\n\nfunc Injected() int { return 7 }\n",
        )
        .unwrap();

        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_file_rule(crate::rule::FileRule {
            base: base("add_new_file"),
            file: "newfile.go".into(),
            path: hooks.to_string_lossy().into_owned(),
        });

        let ip = run_instrument(&fx, &rset).unwrap();
        let copied = std::fs::read_to_string(fx.work.join("otel.newfile.go")).unwrap();
        assert!(copied.starts_with("package main\n"));
        assert!(copied.contains("func Injected() int { return 7 }"));
        assert!(ip
            .compile_args()
            .iter()
            .any(|a| a.ends_with("otel.newfile.go")));
        // File rules alone do not create the globals file
        assert!(!fx.work.join(OTEL_GLOBALS_FILE).exists());
    }

    #[test]
    fn test_guard_folding_inlines_body() {
        let fx = fixture();
        std::env::set_var(crate::constants::ENV_OTEL_TRAMPOLINE_GUARD, "on");
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_always"),
                recv: String::new(),
                func: "Func1".into(),
                before: "H1Before".into(),
                after: String::new(),
                path: "example.com/hooks".into(),
            },
        );

        run_instrument(&fx, &rset).unwrap();
        std::env::remove_var(crate::constants::ENV_OTEL_TRAMPOLINE_GUARD);

        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        // The original body is gone from Func1; the trampoline owns it
        let func_start = rewritten.find("func Func1").unwrap();
        let func_slice = &rewritten[func_start..rewritten[func_start..].find("\n}").unwrap() + func_start];
        assert!(func_slice.contains("return otel_trampoline_0(x)"));
        assert!(!func_slice.contains("if true"));
        // The trampoline still carries the body
        assert!(rewritten.contains("return x + 1, nil"));
    }

    #[test]
    fn test_guard_folding_off_removes_jump() {
        let fx = fixture();
        std::env::set_var(crate::constants::ENV_OTEL_TRAMPOLINE_GUARD, "off");
        let mut rset = RuleSet::new("main");
        rset.set_package_name("main");
        rset.add_func_rule(
            &fx.source,
            FuncRule {
                base: base("hook_never"),
                recv: String::new(),
                func: "Func1".into(),
                before: "H1Before".into(),
                after: String::new(),
                path: "example.com/hooks".into(),
            },
        );

        run_instrument(&fx, &rset).unwrap();
        std::env::remove_var(crate::constants::ENV_OTEL_TRAMPOLINE_GUARD);

        let rewritten = std::fs::read_to_string(fx.work.join("main.go")).unwrap();
        let func_start = rewritten.find("func Func1").unwrap();
        let func_slice = &rewritten[func_start..rewritten[func_start..].find("\n}").unwrap() + func_start];
        assert!(!func_slice.contains("otel_trampoline_0"));
        assert!(func_slice.contains("return x + 1, nil"));
    }

    #[test]
    fn test_fast_path_unmatched_module() {
        let fx = fixture();
        // Store rule sets for a different module; env filter says no
        let rset = RuleSet::new("other/module");
        SetupPhase::new().store(&[rset]).unwrap();
        std::env::set_var(ENV_OTEL_MATCHED_MODULES, "other/module");

        let args = compile_args(&fx);
        // Unmatched import path: argv must come back verbatim
        assert!(!paths::is_module_matched("main"));
        let amended = intercept_compile(args.clone()).unwrap();
        assert_eq!(amended, args);
        // No files written under the object directory
        assert!(!fx.work.join("main.go").exists());
        assert!(!fx.work.join(OTEL_GLOBALS_FILE).exists());

        std::env::remove_var(ENV_OTEL_MATCHED_MODULES);
    }

    #[test]
    fn test_strip_complete_flag() {
        let mut args: Vec<String> = vec!["compile", "-complete", "-o", "x"]
            .into_iter()
            .map(String::from)
            .collect();
        strip_complete_flag(&mut args);
        assert_eq!(args, vec!["compile", "-o", "x"]);
        // Absent flag leaves the argv alone
        strip_complete_flag(&mut args);
        assert_eq!(args, vec!["compile", "-o", "x"]);
    }
}

//! The instrument phase, run inside each toolexec subprocess.
//!
//! Given the rule set matched for the package being compiled, rewrite the
//! targeted source files, emit the generated support files, and patch the
//! compile argument list to point at the rewritten sources. File rules run
//! first because they may introduce files later rules depend on; within a
//! file, struct rules settle signatures before function rules edit bodies,
//! and raw rules prepend last.

pub mod optimize;
pub mod rewrite;
pub mod toolexec;
pub mod trampoline;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use aho_corasick::AhoCorasick;

use crate::common::gocmd;
use crate::common::paths;
use crate::constants::{OTEL_GLOBALS_FILE, TRAMPOLINE_GUARD_VAR};
use crate::debug_log;
use crate::goast::{statement_parses, GoFile};
use crate::instrument::optimize::{Fold, TJump};
use crate::instrument::rewrite::EditBuffer;
use crate::rule::{FuncRule, RawRule, RuleSet, StructRule};
use crate::setup::sync::hook_module_local_dir;

const GENERATED_HEADER: &str = "// Code generated by otelbuild. DO NOT EDIT.";

/// State of one package's instrumentation.
#[derive(Debug)]
pub struct InstrumentPhase {
    /// The object directory assigned to this compilation, where rewritten
    /// and generated files are placed.
    work_dir: PathBuf,
    /// The compile arguments, updated as files are substituted and added.
    compile_args: Vec<String>,
    /// Counter giving trampolines and hook contexts unique names within
    /// the package.
    trampoline_counter: usize,
    /// Hook context declarations destined for the globals file.
    hook_ctx_decls: Vec<String>,
    /// Hook prototypes destined for the globals file: name -> module path.
    hook_protos: BTreeMap<String, String>,
    /// Trampoline jumps of the file currently being rewritten.
    tjumps: Vec<TJump>,
}

impl InstrumentPhase {
    pub fn new(work_dir: PathBuf, compile_args: Vec<String>) -> Self {
        InstrumentPhase {
            work_dir,
            compile_args,
            trampoline_counter: 0,
            hook_ctx_decls: Vec::new(),
            hook_protos: BTreeMap::new(),
            tjumps: Vec::new(),
        }
    }

    pub fn compile_args(&self) -> &[String] {
        &self.compile_args
    }

    /// Copy a file into the debug snapshot tree, keyed by the escaped
    /// import path. Failure is tolerated, this is only for debugging.
    fn keep_for_debug(&self, path: &Path, name: &str) {
        let import_path = gocmd::find_flag_value(&self.compile_args, "-p").unwrap_or("unknown");
        let dest = paths::build_temp("debug")
            .join(paths::escape_import_path(import_path))
            .join(name);
        if let Err(e) = paths::copy_file(path, &dest) {
            debug_log!("failed to save debug snapshot {}: {}", name, e);
        }
    }

    /// Quick textual pre-filter: a rule whose function name is absent from
    /// the file cannot match, so its expensive handling is skipped. False
    /// positives pass through and are re-checked against the parse.
    fn quick_check<'a, T>(
        source: &str,
        rules: Vec<&'a T>,
        func_name: impl Fn(&T) -> &str,
        file: &str,
    ) -> Vec<&'a T> {
        if rules.is_empty() {
            return rules;
        }
        let names: BTreeSet<&str> = rules.iter().map(|r| func_name(r)).collect();
        let patterns: Vec<&str> = names.into_iter().collect();
        let ac = AhoCorasick::new(&patterns).expect("failed to build pattern matcher");
        let mut found: BTreeSet<usize> = BTreeSet::new();
        for mat in ac.find_iter(source) {
            found.insert(mat.pattern().as_usize());
        }
        rules
            .into_iter()
            .filter(|r| {
                let name = func_name(r);
                let keep = found.iter().any(|&i| patterns[i] == name);
                if !keep {
                    debug_log!("Quick check: function {} not found in {}, skipping", name, file);
                }
                keep
            })
            .collect()
    }

    /// Apply the whole rule set. Returns an error on the first fatal rule
    /// failure, which the shim turns into a non-zero exit.
    pub fn instrument(&mut self, rset: &RuleSet) -> Result<(), String> {
        // File rules first: they can introduce new files used by other
        // rules such as raw rules
        for rule in &rset.file_rules {
            self.apply_file_rule(rule, &rset.package_name)?;
        }

        // Group the remaining rules by target file
        let mut files: BTreeSet<&String> = BTreeSet::new();
        files.extend(rset.func_rules.keys());
        files.extend(rset.struct_rules.keys());
        files.extend(rset.raw_rules.keys());

        let mut has_func_rule = false;
        for file in files {
            let applied = self.instrument_file(
                file,
                rset.struct_rules.get(file).map(Vec::as_slice).unwrap_or(&[]),
                rset.func_rules.get(file).map(Vec::as_slice).unwrap_or(&[]),
                rset.raw_rules.get(file).map(Vec::as_slice).unwrap_or(&[]),
            )?;
            has_func_rule = has_func_rule || applied;
        }

        // Injected code always needs the shared globals; emit them once
        // per package, only when a function or raw rule actually fired
        if has_func_rule {
            self.write_globals(&rset.package_name)?;
        }
        Ok(())
    }

    /// Rewrite one source file. Returns whether any function or raw rule
    /// was applied.
    fn instrument_file(
        &mut self,
        file: &str,
        struct_rules: &[StructRule],
        func_rules: &[FuncRule],
        raw_rules: &[RawRule],
    ) -> Result<bool, String> {
        let source = std::fs::read_to_string(file)
            .map_err(|e| format!("failed to read {}: {}", file, e))?;

        let func_rules: Vec<&FuncRule> =
            Self::quick_check(&source, func_rules.iter().collect(), |r| &r.func, file);
        let raw_rules: Vec<&RawRule> =
            Self::quick_check(&source, raw_rules.iter().collect(), |r| &r.func, file);
        if struct_rules.is_empty() && func_rules.is_empty() && raw_rules.is_empty() {
            debug_log!("No matching rules after quick check, skipping {}", file);
            return Ok(false);
        }

        let tree = GoFile::parse(source)
            .map_err(|e| format!("failed to parse {} for instrumentation: {}", file, e))?;
        let mut edits = EditBuffer::new();

        for rule in struct_rules {
            self.apply_struct_rule(rule, &tree, &mut edits, file)?;
        }

        let guard = trampoline::guard_expr();
        let mut trampolines = Vec::new();
        // Jump texts already at each body's entry, front of the body first
        let mut body_jumps: HashMap<(usize, usize), Vec<String>> = HashMap::new();

        for rule in &func_rules {
            self.apply_func_rule(rule, &tree, &mut edits, &guard, &mut trampolines, &mut body_jumps, file)?;
        }

        // The trampoline jump is performance-critical; fold what is
        // statically known before writing the file
        optimize::optimize_tjumps(&mut self.tjumps);
        for tjump in self.tjumps.drain(..) {
            match tjump.foldable.unwrap_or(Fold::Keep) {
                Fold::Keep => edits.insert(tjump.body_span.0 + 1, tjump.jump_text),
                Fold::Remove => {}
                Fold::InlineAll => {
                    edits.replace(tjump.body_span.0, tjump.body_span.1, tjump.inline_body)
                }
            }
        }

        // Raw statements go in front of any trampoline jump at the body's
        // entry; same-position edits emit in prepend order, so these come
        // after the jump edits in the buffer
        for rule in &raw_rules {
            self.apply_raw_rule(rule, &tree, &mut edits, file)?;
        }

        if !trampolines.is_empty() {
            edits.insert(tree.source().len(), format!("\n{}", trampolines.join("\n")));
        }

        let modified = edits.apply(tree.source());
        self.write_instrumented(file, &modified)?;
        Ok(!func_rules.is_empty() || !raw_rules.is_empty())
    }

    fn apply_struct_rule(
        &mut self,
        rule: &StructRule,
        tree: &GoFile,
        edits: &mut EditBuffer,
        file: &str,
    ) -> Result<(), String> {
        let node = tree.find_struct(&rule.struct_name).ok_or_else(|| {
            format!(
                "rule {}: can not find struct {} in {}",
                rule.base.name, rule.struct_name, file
            )
        })?;

        let existing = tree.struct_field_names(node);
        for field in &rule.new_fields {
            if existing.iter().any(|f| f == &field.name) {
                return Err(format!(
                    "rule {}: duplicate struct field {} on {} in {}",
                    rule.base.name, field.name, rule.struct_name, file
                ));
            }
        }

        let pos = tree.struct_append_pos(node).ok_or_else(|| {
            format!(
                "rule {}: struct {} has no field list in {}",
                rule.base.name, rule.struct_name, file
            )
        })?;
        let mut text = String::new();
        for field in &rule.new_fields {
            text.push_str(&format!("\t{} {}\n", field.name, field.type_spelling));
        }
        edits.insert(pos, text);
        debug_log!("Applied struct rule {} to {}", rule.base.name, file);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_func_rule(
        &mut self,
        rule: &FuncRule,
        tree: &GoFile,
        edits: &mut EditBuffer,
        guard: &str,
        trampolines: &mut Vec<String>,
        body_jumps: &mut HashMap<(usize, usize), Vec<String>>,
        file: &str,
    ) -> Result<(), String> {
        let node = tree.find_function(&rule.func, &rule.recv).ok_or_else(|| {
            format!(
                "rule {}: can not find function {} (recv {:?}) in {}",
                rule.base.name, rule.func, rule.recv, file
            )
        })?;
        let sig = tree
            .func_signature(node)
            .map_err(|e| format!("rule {}: {}", rule.base.name, e))?;
        let norm = trampoline::normalize(&sig);

        for (span, name) in &norm.renames {
            edits.replace(span.0, span.1, name.clone());
        }
        for (pos, text) in &norm.name_inserts {
            edits.insert(*pos, text.clone());
        }

        // The trampoline body is the target body as it currently stands:
        // jumps inserted by earlier rules for the same function belong to
        // the copied body, nesting their instrumentation
        let original_body = &tree.source()[sig.body_span.0..sig.body_span.1];
        let prior = body_jumps.entry(sig.body_span).or_default();
        let closure_body = if prior.is_empty() {
            original_body.to_string()
        } else {
            let mut s = String::from("{");
            for jump in prior.iter() {
                s.push_str(jump);
            }
            s.push_str(&original_body[1..]);
            s
        };
        let result_text = sig
            .result_span
            .map(|(start, end)| tree.source()[start..end].to_string());

        let index = self.trampoline_counter;
        self.trampoline_counter += 1;
        let art = trampoline::generate(
            &norm,
            rule,
            index,
            guard,
            &closure_body,
            result_text.as_deref(),
        );

        self.tjumps.push(TJump {
            cond: art.cond.clone(),
            jump_text: art.jump_text.clone(),
            inline_body: art.inline_body.clone(),
            body_span: sig.body_span,
            foldable: None,
        });
        prior.insert(0, art.jump_text.clone());
        trampolines.push(art.trampoline);
        self.hook_ctx_decls.push(art.hook_ctx);
        for hook in [&rule.before, &rule.after] {
            if !hook.is_empty() {
                self.hook_protos
                    .entry(hook.clone())
                    .or_insert_with(|| rule.path.clone());
            }
        }
        debug_log!("Applied func rule {} to {}", rule.base.name, file);
        Ok(())
    }

    fn apply_raw_rule(
        &mut self,
        rule: &RawRule,
        tree: &GoFile,
        edits: &mut EditBuffer,
        file: &str,
    ) -> Result<(), String> {
        if !statement_parses(&rule.raw) {
            return Err(format!(
                "rule {}: raw snippet does not parse: {:?}",
                rule.base.name, rule.raw
            ));
        }
        let node = tree.find_function(&rule.func, &rule.recv).ok_or_else(|| {
            format!(
                "rule {}: can not find function {} (recv {:?}) in {}",
                rule.base.name, rule.func, rule.recv, file
            )
        })?;
        let sig = tree
            .func_signature(node)
            .map_err(|e| format!("rule {}: {}", rule.base.name, e))?;
        edits.insert(sig.body_span.0 + 1, format!("\n\t{}\n", rule.raw));
        debug_log!("Applied raw rule {} to {}", rule.base.name, file);
        Ok(())
    }

    /// Copy a hook module file into the package. The emitted file is
    /// renamed to `otel.<basename>` and its package clause rewritten to
    /// the target package; contents are otherwise verbatim.
    fn apply_file_rule(
        &mut self,
        rule: &crate::rule::FileRule,
        package_name: &str,
    ) -> Result<(), String> {
        // Hook modules under the driver's root were extracted locally;
        // anything else is taken as a filesystem path
        let src_dir =
            hook_module_local_dir(&rule.path).unwrap_or_else(|| PathBuf::from(&rule.path));
        let src = src_dir.join(&rule.file);
        let content = std::fs::read_to_string(&src).map_err(|e| {
            format!(
                "rule {}: failed to read {}: {}",
                rule.base.name,
                src.display(),
                e
            )
        })?;

        let tree = GoFile::parse(content)
            .map_err(|e| format!("rule {}: {}: {}", rule.base.name, src.display(), e))?;
        let rewritten = rewrite_package_clause(&tree, package_name);

        let dest = self.work_dir.join(format!("otel.{}", rule.file));
        std::fs::write(&dest, rewritten)
            .map_err(|e| format!("rule {}: failed to write {}: {}", rule.base.name, dest.display(), e))?;
        self.compile_args.push(dest.to_string_lossy().into_owned());
        self.keep_for_debug(&dest, &format!("otel.{}", rule.file));
        debug_log!("Applied file rule {} -> {}", rule.base.name, dest.display());
        Ok(())
    }

    /// Write the rewritten file under the object directory, substitute it
    /// into the compile arguments, and snapshot both versions.
    fn write_instrumented(&mut self, original: &str, modified: &str) -> Result<(), String> {
        let base = Path::new(original)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("invalid source path {}", original))?
            .to_string();
        let dest = self.work_dir.join(&base);
        std::fs::create_dir_all(&self.work_dir)
            .map_err(|e| format!("failed to create {}: {}", self.work_dir.display(), e))?;
        std::fs::write(&dest, modified)
            .map_err(|e| format!("failed to write {}: {}", dest.display(), e))?;

        let dest_str = dest.to_string_lossy().into_owned();
        let mut substituted = false;
        for arg in &mut self.compile_args {
            if Path::new(arg.as_str()) == Path::new(original) {
                *arg = dest_str.clone();
                substituted = true;
                break;
            }
        }
        if !substituted {
            debug_log!(
                "original {} not present in compile args, rewrite not linked in",
                original
            );
        }

        self.keep_for_debug(Path::new(original), &format!("{}.orig", base));
        self.keep_for_debug(&dest, &base);
        Ok(())
    }

    /// Emit the per-package globals file: the trampoline guard, the hook
    /// contexts, and the hook prototypes.
    fn write_globals(&mut self, package_name: &str) -> Result<(), String> {
        let mut out = String::new();
        out.push_str(GENERATED_HEADER);
        out.push_str(&format!("\n\npackage {}\n\n", package_name));
        out.push_str("import _ \"unsafe\"\n\n");
        out.push_str(&format!("var {} = true\n\n", TRAMPOLINE_GUARD_VAR));
        for decl in &self.hook_ctx_decls {
            out.push_str(decl);
            out.push('\n');
        }
        for (hook, path) in &self.hook_protos {
            out.push_str(&trampoline::hook_prototype(hook, path));
            out.push('\n');
        }

        let dest = self.work_dir.join(OTEL_GLOBALS_FILE);
        std::fs::create_dir_all(&self.work_dir)
            .map_err(|e| format!("failed to create {}: {}", self.work_dir.display(), e))?;
        std::fs::write(&dest, out)
            .map_err(|e| format!("failed to write {}: {}", dest.display(), e))?;
        self.compile_args.push(dest.to_string_lossy().into_owned());
        self.keep_for_debug(&dest, OTEL_GLOBALS_FILE);
        Ok(())
    }
}

/// Replace the package clause's name, keeping the rest of the file
/// byte-identical.
fn rewrite_package_clause(tree: &GoFile, package_name: &str) -> String {
    match tree.package_clause_name_span() {
        Some((start, end)) => {
            let mut out = String::with_capacity(tree.source().len());
            out.push_str(&tree.source()[..start]);
            out.push_str(package_name);
            out.push_str(&tree.source()[end..]);
            out
        }
        None => tree.source().to_string(),
    }
}

//! Trampoline and hook-context generation.
//!
//! A function rule turns a target like
//!
//! ```text
//! func (c *Client) Do(req *Request) (*Response, error)
//! ```
//!
//! into three artifacts: a trampoline function mirroring the signature
//! whose body runs before-hook, the original body as a closure call, and
//! after-hook; a hook context struct carrying the parameters, the return
//! slots, and the SkipOriginal flag between the hooks; and a conditional
//! trampoline jump at the target's entry. Everything is emitted as Go
//! source text, with the original body block reused verbatim.

use crate::constants::{
    ENV_OTEL_TRAMPOLINE_GUARD, HOOK_CTX_PREFIX, TRAMPOLINE_GUARD_VAR, TRAMPOLINE_PREFIX,
};
use crate::goast::{FuncSig, RawParam};
use crate::rule::FuncRule;

/// A normalized parameter: exactly one usable name per parameter.
#[derive(Debug, Clone)]
pub struct NormParam {
    pub name: String,
    pub type_text: String,
    pub variadic: bool,
}

/// The signature after normalization, plus the edits the normalization
/// requires in the original declaration.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    /// Type parameters split one name per entry: (name, constraint).
    pub type_params: Vec<(String, String)>,
    /// Parameters with the receiver first when the target is a method.
    pub params: Vec<NormParam>,
    /// Result slots named otelRet0..N.
    pub results: Vec<NormParam>,
    /// Span replacements renaming `_` parameters in the original.
    pub renames: Vec<((usize, usize), String)>,
    /// Insertions giving unnamed parameters a name in the original.
    pub name_inserts: Vec<(usize, String)>,
}

fn normalize_group(
    group: &RawParam,
    counter: &mut usize,
    out: &mut Normalized,
    synth_prefix: &str,
) {
    if group.names.is_empty() {
        let name = format!("{}{}", synth_prefix, *counter);
        *counter += 1;
        out.name_inserts.push((group.type_start, format!("{} ", name)));
        out.params.push(NormParam {
            name,
            type_text: group.type_text.clone(),
            variadic: group.variadic,
        });
        return;
    }
    for raw_name in &group.names {
        let name = if raw_name.text == "_" {
            let synth = format!("{}{}", synth_prefix, *counter);
            out.renames.push((raw_name.span, synth.clone()));
            synth
        } else {
            raw_name.text.clone()
        };
        *counter += 1;
        out.params.push(NormParam {
            name,
            type_text: group.type_text.clone(),
            variadic: group.variadic,
        });
    }
}

/// Normalize a signature: expand `_` and unnamed parameters to synthesized
/// unique names, split multi-name groups, and name every result slot.
pub fn normalize(sig: &FuncSig) -> Normalized {
    let mut norm = Normalized::default();
    let mut counter = 0usize;

    if let Some(recv) = &sig.recv {
        if recv.names.is_empty() {
            norm.name_inserts
                .push((recv.type_start, "otelRecv ".to_string()));
            norm.params.push(NormParam {
                name: "otelRecv".to_string(),
                type_text: recv.type_text.clone(),
                variadic: false,
            });
        } else {
            let raw_name = &recv.names[0];
            let name = if raw_name.text == "_" {
                norm.renames.push((raw_name.span, "otelRecv".to_string()));
                "otelRecv".to_string()
            } else {
                raw_name.text.clone()
            };
            norm.params.push(NormParam {
                name,
                type_text: recv.type_text.clone(),
                variadic: false,
            });
        }
    }

    for group in &sig.params {
        normalize_group(group, &mut counter, &mut norm, "otelArg");
    }

    for group in &sig.type_params {
        for name in &group.names {
            norm.type_params
                .push((name.text.clone(), group.type_text.clone()));
        }
    }

    for (i, slot) in sig.results.iter().enumerate() {
        norm.results.push(NormParam {
            name: format!("otelRet{}", i),
            type_text: slot.type_text.clone(),
            variadic: false,
        });
    }
    norm
}

/// The trampoline-jump guard expression, selected by environment.
pub fn guard_expr() -> String {
    match std::env::var(ENV_OTEL_TRAMPOLINE_GUARD).as_deref() {
        Ok("on") => "true".to_string(),
        Ok("off") => "false".to_string(),
        _ => TRAMPOLINE_GUARD_VAR.to_string(),
    }
}

/// Everything one function rule generates for its target.
#[derive(Debug, Clone)]
pub struct FuncArtifacts {
    /// The trampoline declaration, appended to the rewritten file.
    pub trampoline: String,
    /// The hook context declaration and methods, for the globals file.
    pub hook_ctx: String,
    /// The conditional jump, inserted at the target body's entry.
    pub jump_text: String,
    /// Replacement body for a jump folded to always-taken.
    pub inline_body: String,
    /// The jump's guard expression, inspected by the optimizer.
    pub cond: String,
}

fn type_param_list(norm: &Normalized) -> String {
    if norm.type_params.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = norm
        .type_params
        .iter()
        .map(|(name, constraint)| format!("{} {}", name, constraint))
        .collect();
    format!("[{}]", parts.join(", "))
}

fn type_arg_list(norm: &Normalized) -> String {
    if norm.type_params.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = norm.type_params.iter().map(|(n, _)| n.as_str()).collect();
    format!("[{}]", names.join(", "))
}

fn param_list(norm: &Normalized) -> String {
    let parts: Vec<String> = norm
        .params
        .iter()
        .map(|p| {
            if p.variadic {
                format!("{} ...{}", p.name, p.type_text)
            } else {
                format!("{} {}", p.name, p.type_text)
            }
        })
        .collect();
    parts.join(", ")
}

fn result_list(norm: &Normalized) -> String {
    if norm.results.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = norm
        .results
        .iter()
        .map(|r| format!("{} {}", r.name, r.type_text))
        .collect();
    format!(" ({})", parts.join(", "))
}

/// Argument list forwarding the parameters, `...` applied to variadics.
fn call_args(norm: &Normalized) -> String {
    let parts: Vec<String> = norm
        .params
        .iter()
        .map(|p| {
            if p.variadic {
                format!("{}...", p.name)
            } else {
                p.name.clone()
            }
        })
        .collect();
    parts.join(", ")
}

/// Hook invocation arguments: the context, then every parameter as a
/// plain value (a variadic forwards as its slice).
fn hook_args(norm: &Normalized) -> String {
    let mut parts = vec!["otelCtx".to_string()];
    parts.extend(norm.params.iter().map(|p| p.name.clone()));
    parts.join(", ")
}

/// The field type stored in the hook context: variadics are stored as the
/// slice the callee sees.
fn ctx_field_type(p: &NormParam) -> String {
    if p.variadic {
        format!("[]{}", p.type_text)
    } else {
        p.type_text.clone()
    }
}

/// Generate the trampoline, hook context, and jump for one function rule.
///
/// `closure_body` is the target's body block (braces included) as it
/// should run when the trampoline takes over; `result_text` is the
/// original result list spelling, reused so the closure keeps naked
/// returns working.
pub fn generate(
    norm: &Normalized,
    rule: &FuncRule,
    index: usize,
    guard: &str,
    closure_body: &str,
    result_text: Option<&str>,
) -> FuncArtifacts {
    let tname = format!("{}{}", TRAMPOLINE_PREFIX, index);
    let ctx_name = format!("{}{}", HOOK_CTX_PREFIX, index);
    let tparams = type_param_list(norm);
    let targs = type_arg_list(norm);

    let mut body = String::new();
    body.push_str(&format!("\totelCtx := &{}{}{{}}\n", ctx_name, targs));
    for (i, p) in norm.params.iter().enumerate() {
        body.push_str(&format!("\totelCtx.Param{} = {}\n", i, p.name));
    }
    if !rule.before.is_empty() {
        body.push_str(&format!("\t{}({})\n", rule.before, hook_args(norm)));
        // The before hook may rewrite parameters through the context
        for (i, p) in norm.params.iter().enumerate() {
            body.push_str(&format!("\t{} = otelCtx.Param{}\n", p.name, i));
        }
    }

    let closure_results = if norm.results.is_empty() {
        String::new()
    } else {
        match result_text {
            Some(text) => format!(" {}", text),
            None => {
                let types: Vec<&str> = norm.results.iter().map(|r| r.type_text.as_str()).collect();
                format!(" ({})", types.join(", "))
            }
        }
    };
    if norm.results.is_empty() {
        body.push_str("\tif !otelCtx.SkipOriginal {\n");
        body.push_str(&format!("\t\tfunc(){} {}()\n", closure_results, closure_body));
        body.push_str("\t}\n");
    } else {
        let ret_names: Vec<&str> = norm.results.iter().map(|r| r.name.as_str()).collect();
        body.push_str("\tif !otelCtx.SkipOriginal {\n");
        body.push_str(&format!(
            "\t\t{} := func(){} {}()\n",
            ret_names.join(", "),
            closure_results,
            closure_body
        ));
        for (i, name) in ret_names.iter().enumerate() {
            body.push_str(&format!("\t\totelCtx.Ret{} = {}\n", i, name));
        }
        body.push_str("\t}\n");
    }

    if !rule.after.is_empty() {
        let mut args = hook_args(norm);
        for i in 0..norm.results.len() {
            args.push_str(&format!(", otelCtx.Ret{}", i));
        }
        body.push_str(&format!("\t{}({})\n", rule.after, args));
    }
    if !norm.results.is_empty() {
        let rets: Vec<String> = (0..norm.results.len())
            .map(|i| format!("otelCtx.Ret{}", i))
            .collect();
        body.push_str(&format!("\treturn {}\n", rets.join(", ")));
    }

    let trampoline = format!(
        "func {}{}({}){} {{\n{}}}\n",
        tname,
        tparams,
        param_list(norm),
        result_list(norm),
        body
    );

    let hook_ctx = generate_hook_ctx(norm, &ctx_name, &tparams, &targs);

    let call = format!("{}{}({})", tname, targs, call_args(norm));
    let (jump_text, inline_body) = if norm.results.is_empty() {
        (
            format!("\n\tif {} {{\n\t\t{}\n\t\treturn\n\t}}\n", guard, call),
            format!("{{\n\t{}\n}}", call),
        )
    } else {
        (
            format!("\n\tif {} {{\n\t\treturn {}\n\t}}\n", guard, call),
            format!("{{\n\treturn {}\n}}", call),
        )
    };

    FuncArtifacts {
        trampoline,
        hook_ctx,
        jump_text,
        inline_body,
        cond: guard.to_string(),
    }
}

/// The hook context type and its accessor methods.
fn generate_hook_ctx(norm: &Normalized, ctx_name: &str, tparams: &str, targs: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("type {}{} struct {{\n", ctx_name, tparams));
    for (i, p) in norm.params.iter().enumerate() {
        out.push_str(&format!("\tParam{} {}\n", i, ctx_field_type(p)));
    }
    for (i, r) in norm.results.iter().enumerate() {
        out.push_str(&format!("\tRet{} {}\n", i, r.type_text));
    }
    out.push_str("\tSkipOriginal bool\n");
    out.push_str("}\n\n");

    let recv = format!("(c *{}{})", ctx_name, targs);

    out.push_str(&format!("func {} GetParam(idx int) interface{{}} {{\n", recv));
    out.push_str("\tswitch idx {\n");
    for i in 0..norm.params.len() {
        out.push_str(&format!("\tcase {}:\n\t\treturn c.Param{}\n", i, i));
    }
    out.push_str("\t}\n\treturn nil\n}\n\n");

    out.push_str(&format!(
        "func {} SetParam(idx int, val interface{{}}) {{\n",
        recv
    ));
    out.push_str("\tswitch idx {\n");
    for (i, p) in norm.params.iter().enumerate() {
        out.push_str(&format!(
            "\tcase {}:\n\t\tc.Param{} = val.({})\n",
            i,
            i,
            ctx_field_type(p)
        ));
    }
    out.push_str("\t}\n}\n\n");

    out.push_str(&format!("func {} GetReturn(idx int) interface{{}} {{\n", recv));
    out.push_str("\tswitch idx {\n");
    for i in 0..norm.results.len() {
        out.push_str(&format!("\tcase {}:\n\t\treturn c.Ret{}\n", i, i));
    }
    out.push_str("\t}\n\treturn nil\n}\n\n");

    out.push_str(&format!(
        "func {} SetReturn(idx int, val interface{{}}) {{\n",
        recv
    ));
    out.push_str("\tswitch idx {\n");
    for (i, r) in norm.results.iter().enumerate() {
        out.push_str(&format!(
            "\tcase {}:\n\t\tc.Ret{} = val.({})\n",
            i, i, r.type_text
        ));
    }
    out.push_str("\t}\n}\n\n");

    out.push_str(&format!(
        "func {} SetSkipOriginal(skip bool) {{\n\tc.SkipOriginal = skip\n}}\n",
        recv
    ));
    out
}

/// A body-less hook prototype aliased to the hook module's symbol.
pub fn hook_prototype(hook: &str, hook_path: &str) -> String {
    format!(
        "//go:linkname {} {}.{}\nfunc {}(...interface{{}})\n",
        hook, hook_path, hook, hook
    )
}

//! Trampoline-jump optimization.
//!
//! Every inserted trampoline jump is a conditional branch on a guard
//! expression. When the guard is statically known the branch is folded:
//! an always-false guard drops the jump entirely, an always-true guard
//! replaces the whole original body with the trampoline call. No
//! cross-function transformations happen here.

/// One trampoline jump recorded during rewriting, pending optimization.
#[derive(Debug, Clone)]
pub struct TJump {
    /// Guard expression of the inserted branch.
    pub cond: String,
    /// The branch statement, inserted at the target body's entry.
    pub jump_text: String,
    /// Replacement body used when the branch is always taken.
    pub inline_body: String,
    /// Byte range of the target's body block, braces included.
    pub body_span: (usize, usize),
    /// Whether the fold decision is known yet.
    pub foldable: Option<Fold>,
}

/// The fold decision for one jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// Guard unknown at compile time; keep the conditional.
    Keep,
    /// Guard is constant false; drop the branch.
    Remove,
    /// Guard is constant true; the trampoline takes over the body.
    InlineAll,
}

/// Fold a guard expression down to a decision.
pub fn fold_cond(cond: &str) -> Fold {
    match cond.trim() {
        "true" => Fold::InlineAll,
        "false" => Fold::Remove,
        _ => Fold::Keep,
    }
}

/// Decide the fold for every recorded jump.
pub fn optimize_tjumps(tjumps: &mut [TJump]) {
    for tjump in tjumps {
        tjump.foldable = Some(fold_cond(&tjump.cond));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tjump(cond: &str) -> TJump {
        TJump {
            cond: cond.to_string(),
            jump_text: "\n\tif cond {\n\t\treturn otel_trampoline_0()\n\t}\n".into(),
            inline_body: "{\n\treturn otel_trampoline_0()\n}".into(),
            body_span: (10, 20),
            foldable: None,
        }
    }

    #[test]
    fn test_fold_cond() {
        assert_eq!(fold_cond("true"), Fold::InlineAll);
        assert_eq!(fold_cond("false"), Fold::Remove);
        assert_eq!(fold_cond("otelTrampolineEnabled"), Fold::Keep);
        assert_eq!(fold_cond(" true "), Fold::InlineAll);
    }

    #[test]
    fn test_optimize_sets_every_decision() {
        let mut jumps = vec![tjump("true"), tjump("false"), tjump("flag")];
        optimize_tjumps(&mut jumps);
        assert_eq!(jumps[0].foldable, Some(Fold::InlineAll));
        assert_eq!(jumps[1].foldable, Some(Fold::Remove));
        assert_eq!(jumps[2].foldable, Some(Fold::Keep));
    }
}

//! Object-store key layout for one invocation's coordination state.
//!
//! Every coordination object (done-flags, the election ballot, lock
//! flags and the lock itself) nests under a single root,
//! `<FaaSrLog>/<InvocationID>`, matching the persisted object layout in
//! SPEC_FULL.md section 6. Centralizing the key names here keeps
//! `driver`, `fan_in`, `lock` and `executor` from drifting apart on the
//! exact separator conventions.

use crate::graph::split_rank_suffix;
use crate::payload::WorkflowDocument;

/// `<FaaSrLog>/<InvocationID>`, the namespace every coordination object
/// for this invocation is written under. `FaaSrLog` defaults to
/// `"faasr_log"` when the workflow document omits it.
pub fn root(doc: &WorkflowDocument, invocation_id: &str) -> String {
    let log_prefix = doc.faasr_log.as_deref().unwrap_or("faasr_log");
    format!("{log_prefix}/{invocation_id}")
}

/// The marker object that proves the log folder for this invocation has
/// already been initialized, per `init_log_folder`.
pub fn marker_key(root: &str) -> String {
    format!("{root}/")
}

/// `<root>/<action>[.<rank>].done`, written by the executor once the
/// action's user function has returned successfully, and consulted by
/// the fan-in barrier of each of the action's successors.
pub fn done_flag(root: &str, action: &str, rank: Option<u32>) -> String {
    match rank {
        Some(r) => format!("{root}/{action}.{r}.done"),
        None => format!("{root}/{action}.done"),
    }
}

/// Expands a `"f(3)"`-style successor edge into the concrete done-flag
/// keys a fan-in barrier at `f` must see before it may proceed, one per
/// ranked replica (or a single key when the edge is unranked).
pub fn expand_done_flags(root: &str, predecessor_edge_target: &str, rank_count: Option<u32>) -> Vec<String> {
    match rank_count {
        Some(n) if n > 0 => (1..=n).map(|r| done_flag(root, predecessor_edge_target, Some(r))).collect(),
        _ => vec![done_flag(root, predecessor_edge_target, None)],
    }
}

/// The append-only election ballot for a fan-in node, per SPEC_FULL.md
/// section 4.5.
pub fn candidate_key(root: &str, function_name: &str) -> String {
    format!("{root}/{function_name}.candidate")
}

/// The `<root>/<function>` prefix both the lock's flag objects and its
/// lock object nest under.
pub fn lock_root(root: &str, function_name: &str) -> String {
    format!("{root}/{function_name}")
}

/// `<root>/<action>.txt`, the append-only per-action log object.
pub fn action_log_key(root: &str, action: &str) -> String {
    format!("{root}/{action}.txt")
}

/// Strips a `"f(N)"` rank suffix, if present, returning the plain
/// action name. Thin re-export so callers of this module don't also
/// need to import `graph::split_rank_suffix` directly.
pub fn plain_name(name: &str) -> &str {
    split_rank_suffix(name).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_flag_includes_rank_only_when_present() {
        assert_eq!(done_flag("r", "B", None), "r/B.done");
        assert_eq!(done_flag("r", "B", Some(2)), "r/B.2.done");
    }

    #[test]
    fn expands_ranked_predecessor_into_one_flag_per_replica() {
        let flags = expand_done_flags("r", "work", Some(3));
        assert_eq!(flags, vec!["r/work.1.done", "r/work.2.done", "r/work.3.done"]);
    }
}

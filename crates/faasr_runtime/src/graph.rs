use std::collections::BTreeMap;

use crate::errors::FaasrError;
use crate::payload::{
    InvokeNextEntry,
    WorkflowDocument,
};

/// One outgoing edge of the workflow DAG: the plain function name
/// (rank suffix stripped) and, if the action named a rank fan-out like
/// `"f(3)"`, the replica count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub target: String,
    pub rank_count: Option<u32>,
}

/// Splits `"f(3)"` into `("f", Some(3))`; a plain name yields `(name, None)`.
pub fn split_rank_suffix(name: &str) -> (&str, Option<u32>) {
    if let Some(open) = name.find('(') {
        if let Some(close) = name[open..].find(')') {
            let close = open + close;
            if let Ok(n) = name[open + 1..close].parse::<u32>() {
                return (&name[..open], Some(n));
            }
        }
    }
    (name, None)
}

fn flatten_entries(entries: &[InvokeNextEntry], out: &mut Vec<String>) {
    for entry in entries {
        match entry {
            InvokeNextEntry::Plain(name) => out.push(name.clone()),
            InvokeNextEntry::Conditional(branches) => {
                for branch in branches.values() {
                    flatten_entries(branch, out);
                }
            }
        }
    }
}

/// The function-level successor/predecessor graph derived from a
/// workflow document's `ActionList`. Built once at startup and consulted
/// by the fan-in arbiter (to know every predecessor of a barrier) and by
/// the scheduler (to know every immediate successor to trigger).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    successors: BTreeMap<String, Vec<Edge>>,
    predecessors: BTreeMap<String, Vec<String>>,
}

impl Graph {
    /// Builds the graph and checks it for structural soundness: every
    /// edge must target a declared action, and the graph must be acyclic.
    pub fn build(doc: &WorkflowDocument) -> anyhow::Result<Self> {
        let mut successors: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
        let mut predecessors: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for name in doc.action_list.keys() {
            successors.entry(name.clone()).or_default();
            predecessors.entry(name.clone()).or_default();
        }

        for (name, action) in &doc.action_list {
            let mut flat = Vec::new();
            flatten_entries(&action.invoke_next.0, &mut flat);

            for raw in flat {
                let (target, rank_count) = split_rank_suffix(&raw);
                if !doc.action_list.contains_key(target) {
                    return Err(FaasrError::unreachable_state(format!(
                        "{name} invokes unknown function {target}"
                    ))
                    .into());
                }
                successors.entry(name.clone()).or_default().push(Edge {
                    target: target.to_string(),
                    rank_count,
                });
                predecessors
                    .entry(target.to_string())
                    .or_default()
                    .push(name.clone());
            }
        }

        let graph = Self {
            successors,
            predecessors,
        };
        graph.check_acyclic()?;
        graph.check_reachable()?;
        Ok(graph)
    }

    pub fn successors(&self, name: &str) -> &[Edge] {
        self.successors.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, name: &str) -> &[String] {
        self.predecessors
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_fan_in(&self, name: &str) -> bool {
        self.predecessors(name).len() > 1
    }

    fn check_acyclic(&self) -> anyhow::Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = self
            .successors
            .keys()
            .map(|k| (k.as_str(), Mark::Unvisited))
            .collect();

        fn visit<'a>(
            node: &'a str,
            successors: &'a BTreeMap<String, Vec<Edge>>,
            marks: &mut BTreeMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> anyhow::Result<()> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    stack.push(node);
                    let cycle = stack.join(" -> ");
                    return Err(FaasrError::cycle_detected(format!(
                        "cycle detected in ActionList: {cycle}"
                    ))
                    .into());
                }
                _ => {}
            }

            marks.insert(node, Mark::InProgress);
            stack.push(node);
            if let Some(edges) = successors.get(node) {
                for edge in edges {
                    visit(edge.target.as_str(), successors, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let nodes: Vec<&str> = self.successors.keys().map(String::as_str).collect();
        for node in nodes {
            let mut stack = Vec::new();
            visit(node, &self.successors, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    /// Per SPEC_FULL.md section 3 invariant 2: the workflow must have a
    /// single source (the one action with no predecessors), and every
    /// other action must be reachable from it by following `InvokeNext`
    /// edges. Mirrors `graph_functions.check_dag`'s reachability pass,
    /// run once the cycle check has already ruled out the case where
    /// "no predecessors anywhere" would otherwise mean "no source".
    fn check_reachable(&self) -> anyhow::Result<()> {
        if self.successors.is_empty() {
            return Ok(());
        }

        let sources: Vec<&str> = self
            .predecessors
            .iter()
            .filter(|(_, preds)| preds.is_empty())
            .map(|(name, _)| name.as_str())
            .collect();

        let source = match sources.as_slice() {
            [single] => *single,
            [] => {
                return Err(FaasrError::unreachable_state(
                    "ActionList has no source action (every action has a predecessor)",
                )
                .into())
            }
            many => {
                return Err(FaasrError::unreachable_state(format!(
                    "ActionList has more than one source action with no predecessors: {}",
                    many.join(", ")
                ))
                .into())
            }
        };

        let mut visited: BTreeMap<&str, bool> = self.successors.keys().map(|k| (k.as_str(), false)).collect();
        let mut stack = vec![source];
        while let Some(node) = stack.pop() {
            if visited.insert(node, true) == Some(true) {
                continue;
            }
            for edge in self.successors(node) {
                stack.push(edge.target.as_str());
            }
        }

        let unreachable: Vec<&str> = visited
            .iter()
            .filter(|(_, seen)| !**seen)
            .map(|(name, _)| *name)
            .collect();

        if !unreachable.is_empty() {
            return Err(FaasrError::unreachable_state(format!(
                "ActionList has action(s) unreachable from source {source}: {}",
                unreachable.join(", ")
            ))
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{
        Action,
        ComputeServer,
        FaaSType,
        FunctionType,
        InvokeNext,
    };
    use serde_json::json;

    fn action(name: &str, next: Vec<&str>) -> Action {
        Action {
            function_name: name.to_string(),
            function_type: FunctionType::Python,
            faas_server: "gh".to_string(),
            invoke_next: InvokeNext(
                next.into_iter()
                    .map(|s| InvokeNextEntry::Plain(s.to_string()))
                    .collect(),
            ),
            arguments: json!({}),
            resources: None,
            rank: None,
            use_secret_store: None,
        }
    }

    fn doc_with(actions: Vec<(&str, Vec<&str>)>) -> WorkflowDocument {
        let mut doc = WorkflowDocument::default();
        doc.compute_servers.insert(
            "gh".to_string(),
            ComputeServer {
                faas_type: FaaSType::GitHubActions,
                fields: json!({}),
            },
        );
        for (name, next) in actions {
            doc.action_list.insert(name.to_string(), action(name, next));
        }
        doc
    }

    #[test]
    fn splits_rank_suffix() {
        assert_eq!(split_rank_suffix("f(3)"), ("f", Some(3)));
        assert_eq!(split_rank_suffix("f"), ("f", None));
    }

    #[test]
    fn builds_linear_chain() {
        let doc = doc_with(vec![("a", vec!["b"]), ("b", vec!["c"]), ("c", vec![])]);
        let graph = Graph::build(&doc).unwrap();
        assert_eq!(graph.successors("a")[0].target, "b");
        assert_eq!(graph.predecessors("c"), &["b".to_string()]);
    }

    #[test]
    fn detects_fan_in() {
        let doc = doc_with(vec![
            ("start", vec!["a", "b"]),
            ("a", vec!["c"]),
            ("b", vec!["c"]),
            ("c", vec![]),
        ]);
        let graph = Graph::build(&doc).unwrap();
        assert!(graph.is_fan_in("c"));
        assert!(!graph.is_fan_in("a"));
    }

    #[test]
    fn rejects_multiple_sources() {
        let doc = doc_with(vec![("a", vec!["c"]), ("b", vec!["c"]), ("c", vec![])]);
        let err = Graph::build(&doc).unwrap_err();
        assert_eq!(
            crate::errors::downcast_kind(&err),
            Some(crate::errors::FaasrErrorKind::UnreachableState)
        );
    }

    #[test]
    fn rejects_unreachable_action() {
        let doc = doc_with(vec![("start", vec!["a"]), ("a", vec![]), ("orphan", vec![])]);
        let err = Graph::build(&doc).unwrap_err();
        assert_eq!(
            crate::errors::downcast_kind(&err),
            Some(crate::errors::FaasrErrorKind::UnreachableState)
        );
    }

    #[test]
    fn rejects_cycle() {
        let doc = doc_with(vec![("a", vec!["b"]), ("b", vec!["a"])]);
        let err = Graph::build(&doc).unwrap_err();
        assert_eq!(
            crate::errors::downcast_kind(&err),
            Some(crate::errors::FaasrErrorKind::CycleDetected)
        );
    }

    #[test]
    fn rejects_unknown_target() {
        let doc = doc_with(vec![("a", vec!["ghost"])]);
        let err = Graph::build(&doc).unwrap_err();
        assert_eq!(
            crate::errors::downcast_kind(&err),
            Some(crate::errors::FaasrErrorKind::UnreachableState)
        );
    }

    #[test]
    fn flattens_conditional_branches() {
        let mut doc = doc_with(vec![("t", vec![]), ("f", vec![])]);
        let mut a = action("a", vec![]);
        let mut branches = std::collections::BTreeMap::new();
        branches.insert("true".to_string(), vec![InvokeNextEntry::Plain("t".to_string())]);
        branches.insert("false".to_string(), vec![InvokeNextEntry::Plain("f".to_string())]);
        a.invoke_next = InvokeNext(vec![InvokeNextEntry::Conditional(branches)]);
        doc.action_list.insert("a".to_string(), a);

        let graph = Graph::build(&doc).unwrap();
        let mut targets: Vec<&str> = graph.successors("a").iter().map(|e| e.target.as_str()).collect();
        targets.sort();
        assert_eq!(targets, vec!["f", "t"]);
    }
}

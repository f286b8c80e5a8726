//! Offline dependency-graph consistency checking.
//!
//! Builds a *phase event graph*: five nodes per declared resource (one per
//! [`Phase`]), wired together by the intra-resource phase order plus one
//! edge per declared provider/injector/initializer/disposer dependency. A
//! topological sort over that graph either succeeds — meaning some sequence
//! of `get` calls can reach `Created` for every declared resource without
//! error — or fails, in which case the remaining nodes name a cyclical
//! dependency. This runs against the registry actually populated at call
//! time rather than against the type system.

use crate::container::Container;
use crate::phase::Phase;
use crate::resource::ResourceId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{self, Write as _};

type Node = (ResourceId, Phase);

impl Container {
    /// Checks the currently-declared resource graph for cyclical
    /// dependencies and undeclared references, writing a human-readable
    /// report to `sink` and returning whether the graph is consistent.
    ///
    /// Does not run any provider/injector/initializer/disposer; this is a
    /// static check over what has been *declared*, independent of whether
    /// `get` has ever been called.
    pub fn check_consistency(&self, sink: &mut dyn fmt::Write) -> bool {
        check_consistency(self, sink)
    }
}

fn check_consistency(container: &Container, sink: &mut dyn fmt::Write) -> bool {
    let rids = container.declared_resource_ids();

    let mut nodes: HashSet<Node> = HashSet::new();
    for rid in &rids {
        for phase in Phase::ALL {
            nodes.insert((rid.clone(), phase));
        }
    }

    let mut edges: HashMap<Node, Vec<Node>> = HashMap::new();
    let mut indegree: HashMap<Node, usize> = HashMap::new();
    for node in &nodes {
        edges.entry(node.clone()).or_default();
        indegree.entry(node.clone()).or_insert(0);
    }

    let add_edge = |edges: &mut HashMap<Node, Vec<Node>>, indegree: &mut HashMap<Node, usize>, from: Node, to: Node| {
        edges.entry(from).or_default().push(to.clone());
        *indegree.entry(to).or_insert(0) += 1;
    };

    for rid in &rids {
        for w in Phase::ALL.windows(2) {
            add_edge(
                &mut edges,
                &mut indegree,
                (rid.clone(), w[0]),
                (rid.clone(), w[1]),
            );
        }
    }

    let mut undeclared: Vec<String> = Vec::new();
    for rid in &rids {
        let Some(manager) = container.lookup_manager(rid) else {
            continue;
        };

        for dep in manager.provider_injections() {
            if container.lookup_manager(&dep).is_none() {
                undeclared.push(format!("undeclared dependency: {rid} provider references {dep}"));
                continue;
            }
            add_edge(
                &mut edges,
                &mut indegree,
                (dep.clone(), Phase::Provided),
                (rid.clone(), Phase::Provided),
            );
        }

        for index in 0..manager.number_of_injectors() {
            for dep in manager.injector_injections(index) {
                if container.lookup_manager(&dep).is_none() {
                    undeclared.push(format!(
                        "undeclared dependency: {rid} injector #{index} references {dep}"
                    ));
                    continue;
                }
                add_edge(
                    &mut edges,
                    &mut indegree,
                    (dep.clone(), Phase::Provided),
                    (rid.clone(), Phase::Injected),
                );
            }
        }

        for dep in manager.initializer_injections() {
            if container.lookup_manager(&dep).is_none() {
                undeclared.push(format!("undeclared dependency: {rid} initializer references {dep}"));
                continue;
            }
            add_edge(
                &mut edges,
                &mut indegree,
                (dep.clone(), Phase::Injected),
                (rid.clone(), Phase::Created),
            );
        }

        for dep in manager.disposer_injections() {
            if container.lookup_manager(&dep).is_none() {
                undeclared.push(format!("undeclared dependency: {rid} disposer references {dep}"));
                continue;
            }
            add_edge(
                &mut edges,
                &mut indegree,
                (dep.clone(), Phase::Created),
                (rid.clone(), Phase::Disposed),
            );
            add_edge(
                &mut edges,
                &mut indegree,
                (rid.clone(), Phase::Disposed),
                (dep.clone(), Phase::Disposed),
            );
        }
    }

    let mut queue: VecDeque<Node> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(n, _)| n.clone())
        .collect();
    let mut remaining = indegree.clone();
    let mut visited = 0usize;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        if let Some(neighbors) = edges.get(&node) {
            for next in neighbors {
                let d = remaining.get_mut(next).expect("edge target must be a known node");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next.clone());
                }
            }
        }
    }

    let mut ok = true;

    for line in &undeclared {
        let _ = writeln!(sink, "{line}");
        ok = false;
    }

    if visited < nodes.len() {
        ok = false;
        let cyclical: Vec<&Node> = remaining.iter().filter(|(_, &d)| d > 0).map(|(n, _)| n).collect();
        let _ = writeln!(
            sink,
            "cyclical dependency detected among {} phase-event node(s):",
            cyclical.len()
        );
        for (rid, phase) in &cyclical {
            let _ = writeln!(sink, "  {rid} at phase {phase}");
        }
    }

    if ok {
        let _ = writeln!(sink, "consistent: {} declared resource(s), no cycles", rids.len());
    }

    #[cfg(feature = "logging")]
    tracing::debug!(target: "cdi_container", consistent = ok, declared = rids.len(), "consistency check completed");

    ok
}

//! Resource Graph.
//!
//! Vertices are resource names, interned to integer ids per pass; edges run
//! `consumer -> producer` for every declared reference. The public contract is a
//! single function, [`topological_order`], returning a deterministic visiting order
//! or a [`GraphError`].

use std::collections::{BTreeMap, BTreeSet};

use crate::error::GraphError;
use crate::types::BundleSpec;

/// A flat vertex array with integer adjacency lists, built once per pass. Resource
/// names are interned to `usize` ids so the DFS below works with index operations
/// instead of repeated string hashing.
struct Graph {
    /// `names[i]` is the resource name for vertex `i`.
    names: Vec<String>,
    /// `producers[i]` are the vertex ids resource `i` depends on (i.e. its edges).
    producers: Vec<BTreeSet<usize>>,
}

impl Graph {
    fn build(spec: &BundleSpec) -> Result<Self, GraphError> {
        let mut index_of: BTreeMap<&str, usize> = BTreeMap::new();
        let mut names = Vec::with_capacity(spec.resources.len());
        for resource in &spec.resources {
            if index_of.insert(resource.name.as_str(), names.len()).is_some() {
                return Err(GraphError::DuplicateResourceName(resource.name.clone()));
            }
            names.push(resource.name.clone());
        }

        let mut producers = vec![BTreeSet::new(); names.len()];
        for resource in &spec.resources {
            let consumer_idx = index_of[resource.name.as_str()];
            for reference in &resource.references {
                let Some(&producer_idx) = index_of.get(reference.resource.as_str()) else {
                    return Err(GraphError::UnknownReference {
                        consumer: resource.name.clone(),
                        producer: reference.resource.clone(),
                    });
                };
                producers[consumer_idx].insert(producer_idx);
            }
        }

        Ok(Self { names, producers })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Sort a Bundle's resources so that every producer strictly precedes its
/// consumers. Ties (resources with no ordering relationship to one another) are
/// broken lexically by name, so repeated calls on the same spec always produce the
/// same order.
pub fn topological_order(spec: &BundleSpec) -> Result<Vec<String>, GraphError> {
    let graph = Graph::build(spec)?;
    let n = graph.names.len();
    let mut marks = vec![Mark::Unvisited; n];
    let mut order = Vec::with_capacity(n);
    let mut stack = Vec::new();

    // Visit in lexical order so that independent subgraphs, and any vertex with no
    // unresolved producers, come out in name order.
    let mut visit_order: Vec<usize> = (0..n).collect();
    visit_order.sort_by(|&a, &b| graph.names[a].cmp(&graph.names[b]));

    for start in visit_order {
        if marks[start] == Mark::Done {
            continue;
        }
        visit(start, &graph, &mut marks, &mut stack, &mut order)?;
    }

    Ok(order)
}

fn visit(
    v: usize,
    graph: &Graph,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    order: &mut Vec<String>,
) -> Result<(), GraphError> {
    match marks[v] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            let cycle_start = stack.iter().position(|&s| s == v).unwrap_or(0);
            let participants = stack[cycle_start..]
                .iter()
                .map(|&i| graph.names[i].clone())
                .collect();
            return Err(GraphError::Cycle(participants));
        }
        Mark::Unvisited => {}
    }

    marks[v] = Mark::Visiting;
    stack.push(v);

    let mut producers: Vec<usize> = graph.producers[v].iter().copied().collect();
    producers.sort_by(|&a, &b| graph.names[a].cmp(&graph.names[b]));
    for producer in producers {
        visit(producer, graph, marks, stack, order)?;
    }

    stack.pop();
    marks[v] = Mark::Done;
    order.push(graph.names[v].clone());
    Ok(())
}

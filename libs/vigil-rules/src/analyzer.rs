//! Rule dependency analysis
//!
//! Builds the "producer output feeds consumer condition" graph over a rule
//! set, rejects cycles and partitions the rules into layers: a rule's
//! layer is one past the deepest layer among its producers. The graph is
//! dropped once layers are computed.

use crate::error::{Result, RuleError};
use crate::types::{ActionValue, RuleDefinition};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};
use vigil_rtdb::SensorValue;

/// Result of a successful analysis
#[derive(Debug, Clone, Default)]
pub struct DependencyAnalysis {
    /// Rule indices per layer, definition order within a layer
    pub layers: Vec<Vec<usize>>,
    /// Rule name -> names of the rules whose outputs it reads
    pub dependencies: HashMap<String, BTreeSet<String>>,
    /// Output key -> rules writing it, definition order
    pub writers: BTreeMap<String, Vec<String>>,
    /// Layer index per rule
    pub rule_layer: Vec<usize>,
    /// Rules whose producer chain is deeper than the warning threshold
    pub long_chains: Vec<String>,
}

impl DependencyAnalysis {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Longest producer chain in the rule set
    pub fn max_depth(&self) -> usize {
        self.rule_layer.iter().copied().max().unwrap_or(0)
    }
}

pub struct DependencyAnalyzer {
    chain_warning_threshold: usize,
}

impl DependencyAnalyzer {
    pub fn new(chain_warning_threshold: usize) -> Self {
        Self {
            chain_warning_threshold,
        }
    }

    pub fn analyze(&self, rules: &[RuleDefinition]) -> Result<DependencyAnalysis> {
        let mut seen = BTreeSet::new();
        for rule in rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateRule(rule.name.clone()));
            }
        }

        let reads: Vec<BTreeSet<String>> = rules.iter().map(RuleDefinition::reads).collect();
        let writes: Vec<BTreeSet<String>> = rules.iter().map(RuleDefinition::writes).collect();

        let mut writer_index: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, keys) in writes.iter().enumerate() {
            for key in keys {
                writer_index.entry(key.as_str()).or_default().push(idx);
            }
        }

        // producers[i]: rules feeding rule i
        let n = rules.len();
        let mut producers: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (consumer, keys) in reads.iter().enumerate() {
            for key in keys {
                let Some(writers) = writer_index.get(key.as_str()) else {
                    continue;
                };
                for &producer in writers {
                    if producer != consumer {
                        producers[consumer].insert(producer);
                    }
                }
            }
        }

        // Node weight is the rule index; edges run producer -> consumer
        let mut graph = DiGraph::<usize, ()>::with_capacity(n, 0);
        let nodes: Vec<NodeIndex> = (0..n).map(|idx| graph.add_node(idx)).collect();
        for (consumer, deps) in producers.iter().enumerate() {
            for &producer in deps {
                graph.add_edge(nodes[producer], nodes[consumer], ());
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(cycle) => {
                let members = cycle_path(&graph, cycle.node_id());
                let names: Vec<String> = members.iter().map(|&i| rules[i].name.clone()).collect();
                return Err(RuleError::CircularDependency { cycle: names });
            },
        };

        let mut rule_layer = vec![0usize; n];
        for node in order {
            let layer = graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|producer| rule_layer[graph[producer]] + 1)
                .max()
                .unwrap_or(0);
            rule_layer[graph[node]] = layer;
        }
        let layer_count = rule_layer.iter().map(|l| l + 1).max().unwrap_or(0);
        let mut layers: Vec<Vec<usize>> = vec![Vec::new(); layer_count];
        for (idx, &layer) in rule_layer.iter().enumerate() {
            layers[layer].push(idx);
        }

        let long_chains: Vec<String> = rule_layer
            .iter()
            .enumerate()
            .filter(|(_, depth)| **depth > self.chain_warning_threshold)
            .map(|(idx, _)| rules[idx].name.clone())
            .collect();
        for name in &long_chains {
            warn!(
                "Rule {} dependency chain exceeds {} levels",
                name, self.chain_warning_threshold
            );
        }

        let dependencies = producers
            .iter()
            .enumerate()
            .map(|(idx, deps)| {
                (
                    rules[idx].name.clone(),
                    deps.iter().map(|&p| rules[p].name.clone()).collect(),
                )
            })
            .collect();

        let writers = writer_index
            .into_iter()
            .map(|(key, idxs)| {
                (
                    key.to_string(),
                    idxs.iter().map(|&i| rules[i].name.clone()).collect(),
                )
            })
            .collect();

        debug!("Analyzed {} rules into {} layers", n, layers.len());

        Ok(DependencyAnalysis {
            layers,
            dependencies,
            writers,
            rule_layer,
            long_chains,
        })
    }

    /// Reject same-layer writers that disagree on a literal value
    ///
    /// Writers of one key inside a layer with any non-literal value are
    /// only logged, since their values are unknown until runtime.
    pub fn check_conflicts(
        &self,
        rules: &[RuleDefinition],
        analysis: &DependencyAnalysis,
    ) -> Result<()> {
        for (layer_idx, members) in analysis.layers.iter().enumerate() {
            // key -> (rule idx, literal value if literal)
            let mut slots: BTreeMap<&str, Vec<(usize, Option<&SensorValue>)>> = BTreeMap::new();
            for &idx in members {
                for (key, value) in rules[idx].set_actions() {
                    let literal = match value {
                        ActionValue::Literal(v) => Some(v),
                        _ => None,
                    };
                    slots.entry(key).or_default().push((idx, literal));
                }
            }

            for (key, writes) in slots {
                let mut owners: Vec<usize> = writes.iter().map(|(idx, _)| *idx).collect();
                owners.dedup();
                if owners.len() < 2 {
                    continue;
                }
                let names: Vec<String> = owners.iter().map(|&i| rules[i].name.clone()).collect();

                if writes.iter().any(|(_, literal)| literal.is_none()) {
                    warn!(
                        "Layer {} key {} has computed writers: {}",
                        layer_idx,
                        key,
                        names.join(", ")
                    );
                    continue;
                }

                let first = writes[0].1;
                if writes.iter().any(|(_, literal)| *literal != first) {
                    return Err(RuleError::ConflictingWriters {
                        layer: layer_idx,
                        key: key.to_string(),
                        rules: names,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Rules of the strongly connected component holding `node`
///
/// Walks the component from its first-defined rule, always stepping to the
/// first-defined unvisited successor, and closes the path on its start.
/// Members the walk cannot reach in one pass follow in definition order.
fn cycle_path(graph: &DiGraph<usize, ()>, node: NodeIndex) -> Vec<usize> {
    let component: BTreeSet<usize> = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&node))
        .map(|scc| scc.into_iter().map(|n| graph[n]).collect())
        .unwrap_or_else(|| BTreeSet::from([graph[node]]));

    let Some(&first) = component.first() else {
        return Vec::new();
    };
    let mut path = vec![first];
    let mut visited = BTreeSet::from([first]);
    let mut current = first;
    while let Some(next) = graph
        .neighbors_directed(NodeIndex::new(current), Direction::Outgoing)
        .map(|n| graph[n])
        .filter(|idx| component.contains(idx) && !visited.contains(idx))
        .min()
    {
        path.push(next);
        visited.insert(next);
        current = next;
    }
    path.extend(component.iter().filter(|idx| !visited.contains(idx)));
    path.push(first);
    path
}

//! Descriptor mappings for the child process.
//!
//! An [`FdMap`] says which parent descriptor each child descriptor should hold.
//! Installing it naively (one `dup2` per entry) breaks as soon as one entry's
//! destination is another entry's source, so [`FdMap::operations`] orders the
//! copies and breaks cycles through a scratch descriptor.

use std::collections::{BTreeMap, BTreeSet};

/// One `(src, dst)` pair: the child's `dst` becomes a copy of the parent's `src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdMapping {
    pub src: i32,
    pub dst: i32,
}

/// A single step of installing a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdOperation {
    Dup { src: i32, dst: i32 },
    Close(i32),
}

impl From<FdMapping> for FdOperation {
    fn from(FdMapping { src, dst }: FdMapping) -> Self {
        FdOperation::Dup { src, dst }
    }
}

impl FdOperation {
    /// Computes which original descriptor every slot holds after `ops` run in order.
    ///
    /// Slots never written are absent; closed slots are absent as well.
    pub fn simulate(ops: &[FdOperation]) -> BTreeMap<i32, i32> {
        let mut table = BTreeMap::<i32, i32>::new();
        let mut closed = BTreeSet::<i32>::new();
        for op in ops {
            match *op {
                FdOperation::Dup { src, dst } => {
                    let origin = if closed.contains(&src) {
                        continue;
                    } else {
                        table.get(&src).copied().unwrap_or(src)
                    };
                    closed.remove(&dst);
                    table.insert(dst, origin);
                }
                FdOperation::Close(fd) => {
                    table.remove(&fd);
                    closed.insert(fd);
                }
            }
        }
        table
    }
}

/// Child descriptor → parent descriptor.
///
/// Mapping both a child's output and error to the parent's stdout is `{1: 1, 2: 1}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdMap(BTreeMap<i32, i32>);

impl FdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stdin, stdout and stderr passed through unchanged.
    pub fn stdio() -> Self {
        (0..=2).map(|fd| (fd, fd)).collect()
    }

    pub fn insert(&mut self, dst: i32, src: i32) -> Option<i32> {
        self.0.insert(dst, src)
    }

    pub fn remove(&mut self, dst: i32) -> Option<i32> {
        self.0.remove(&dst)
    }

    pub fn get(&self, dst: i32) -> Option<i32> {
        self.0.get(&dst).copied()
    }

    /// `(dst, src)` entries ordered by `dst`.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.0.iter().map(|(dst, src)| (*dst, *src))
    }

    /// Joins two maps. With `self` as intermediate → parent and `other` as
    /// child → intermediate, the result is child → parent.
    pub fn compose(&self, other: &FdMap) -> FdMap {
        let mut result = FdMap::new();
        for (dst, src) in other.iter() {
            result.insert(dst, self.get(src).unwrap_or(src));
        }
        for (dst, src) in self.iter() {
            result.0.entry(dst).or_insert(src);
        }
        result
    }

    /// An ordered list of operations that leaves every `dst` holding its `src`.
    pub fn operations(&self) -> Vec<FdOperation> {
        Remapper::new(self).generate()
    }
}

impl FromIterator<(i32, i32)> for FdMap {
    fn from_iter<I: IntoIterator<Item = (i32, i32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// src → every dst copying from it.
type Graph = BTreeMap<i32, Vec<i32>>;

fn build_graph(map: &FdMap) -> Graph {
    let mut graph = Graph::new();
    for (dst, src) in map.iter() {
        graph.entry(dst).or_default();
        graph.entry(src).or_default().push(dst);
    }
    graph
}

/// Every node has at most one incoming edge, so a plain walk from each root
/// finds all cycles. `stack` holds the path from the root to the current
/// node; branches leading off a cycle are popped before the walk goes on.
fn detect_cycles(graph: &Graph) -> Vec<Vec<i32>> {
    fn walk(
        graph: &Graph,
        root: i32,
        node: i32,
        unvisited: &mut BTreeSet<i32>,
        stack: &mut Vec<i32>,
        cycles: &mut Vec<Vec<i32>>,
    ) {
        if !unvisited.remove(&node) {
            return;
        }
        stack.push(node);
        for &dst in graph.get(&node).into_iter().flatten() {
            if dst == root {
                cycles.push(stack.clone());
                continue;
            }
            walk(graph, root, dst, unvisited, stack, cycles);
        }
        stack.pop();
    }

    let mut unvisited = graph.keys().copied().collect::<BTreeSet<_>>();
    let mut cycles = Vec::new();
    for &root in graph.keys() {
        let mut stack = Vec::new();
        walk(graph, root, root, &mut unvisited, &mut stack, &mut cycles);
    }
    cycles
}

struct Remapper {
    graph: Graph,
    cycles: Vec<Vec<i32>>,
    problems: BTreeSet<i32>,
    unvisited: BTreeSet<i32>,
    used: BTreeSet<i32>,
    output: Vec<FdOperation>,
}

impl Remapper {
    fn new(map: &FdMap) -> Self {
        let graph = build_graph(map);
        let cycles = detect_cycles(&graph)
            .into_iter()
            .filter(|cycle| cycle.len() > 1)
            .collect::<Vec<_>>();
        let problems = cycles.iter().flatten().copied().collect::<BTreeSet<_>>();
        let unvisited = graph.keys().copied().collect();
        Self {
            graph,
            cycles,
            used: problems.clone(),
            problems,
            unvisited,
            output: Vec::new(),
        }
    }

    fn visit(&mut self, node: i32) {
        if !self.unvisited.remove(&node) {
            return;
        }
        let dsts = self.graph.get(&node).cloned().unwrap_or_default();
        for dst in dsts {
            self.visit(dst);
            if self.problems.contains(&dst) {
                continue;
            }
            self.output.push(FdOperation::Dup { src: node, dst });
            self.used.insert(dst);
        }
    }

    fn generate(mut self) -> Vec<FdOperation> {
        let roots = self.graph.keys().copied().collect::<Vec<_>>();
        for root in roots {
            self.visit(root);
        }

        let tmp = (0..).find(|fd| !self.used.contains(fd)).unwrap_or(i32::MAX);
        let mut close_tmp = false;

        let cycles = std::mem::take(&mut self.cycles);
        'cycles: for cycle in cycles {
            let nodes = cycle.iter().copied().collect::<BTreeSet<_>>();
            for (i, node) in cycle.iter().enumerate() {
                let exit = self.graph[node]
                    .iter()
                    .copied()
                    .find(|dst| !nodes.contains(dst));
                if let Some(exit) = exit {
                    // `exit` already holds a copy of `node`, so the cycle can start right after it
                    let rotated = cycle[i + 1..]
                        .iter()
                        .chain(&cycle[..=i])
                        .copied()
                        .collect::<Vec<_>>();
                    self.break_cycle(&rotated, exit);
                    continue 'cycles;
                }
            }
            let last = cycle[cycle.len() - 1];
            self.output.push(FdOperation::Dup { src: last, dst: tmp });
            self.break_cycle(&cycle, tmp);
            close_tmp = true;
        }

        if close_tmp {
            self.output.push(FdOperation::Close(tmp));
        }
        self.output
    }

    /// Copies backwards around the cycle, finishing the first node from `end`.
    fn break_cycle(&mut self, cycle: &[i32], end: i32) {
        for pair in cycle.windows(2).rev() {
            self.output.push(FdOperation::Dup {
                src: pair[0],
                dst: pair[1],
            });
        }
        self.output.push(FdOperation::Dup {
            src: end,
            dst: cycle[0],
        });
    }
}

//! A per-function fixpoint over the block driver.
//!
//! Blocks are visited in reverse post order. A block is revisited whenever
//! the state flowing into it grows, until nothing changes or the fuel runs
//! out.

use std::collections::BTreeSet;

use hhbbc_bc::{Block, BlockId, Bytecode, Context, Func, Unit};
use hhbbc_index::Index;
use hhbbc_types::{Lattice, Oracle, ScalarOracle, Type};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use tracing::{debug, debug_span, trace};

use crate::collect::CollectedInfo;
use crate::env::Interp;
use crate::error::InterpError;
use crate::flags::{Reduction, UsedLocalStatics, merge_used_local_statics};
use crate::options::{CollectionOpts, Options};
use crate::state::State;
use crate::step;

/// What the analysis of one function found.
#[derive(Clone, Debug)]
pub struct FuncAnalysis {
    /// State on entry to each block; `None` for blocks never reached.
    pub block_states: Vec<Option<State>>,
    /// Join of every returned value; `Type::BOTTOM` when the function never
    /// returns normally.
    pub return_type: Type,
    pub collect: CollectedInfo,
    /// Replacements proposed on the last visit of each block.
    pub reductions: IndexMap<BlockId, Vec<Reduction>>,
    /// Number of block visits it took to settle.
    pub iterations: usize,
}

impl FuncAnalysis {
    pub fn block_state(&self, id: BlockId) -> Option<&State> {
        self.block_states.get(id.index())?.as_ref()
    }

    pub fn is_reachable(&self, id: BlockId) -> bool {
        self.block_state(id).is_some_and(|s| !s.unreachable)
    }
}

/// Analyze functions against an index.
///
/// ```ignore
/// let analysis = FuncAnalyzer::new(&index)
///     .with_max_iterations(100)
///     .analyze(&unit, &func)?;
/// ```
pub struct FuncAnalyzer<'a> {
    index: &'a dyn Index,
    oracle: &'a dyn Oracle,
    options: Options,
    collection: CollectionOpts,
    max_iterations: usize,
    args: Vec<Type>,
    local_static_types: Vec<Type>,
}

impl<'a> FuncAnalyzer<'a> {
    pub fn new(index: &'a dyn Index) -> Self {
        Self {
            index,
            oracle: &ScalarOracle,
            options: Options::default(),
            collection: CollectionOpts::default(),
            max_iterations: 1000,
            args: Vec::new(),
            local_static_types: Vec::new(),
        }
    }

    pub fn with_oracle(mut self, oracle: &'a dyn Oracle) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_collection_opts(mut self, opts: CollectionOpts) -> Self {
        self.collection = opts;
        self
    }

    /// Block visits allowed before giving up with
    /// [`InterpError::FuelExhausted`].
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Argument types for the parameters, in order. Missing arguments get
    /// the widest type a caller could pass.
    pub fn with_args(mut self, args: Vec<Type>) -> Self {
        self.args = args;
        self
    }

    /// Types the function's static locals start from, by local id.
    pub fn with_local_static_types(mut self, types: Vec<Type>) -> Self {
        self.local_static_types = types;
        self
    }

    /// Analyze `func`. When a static local turns out to hold more than the
    /// analysis assumed on reading it, the function is analysed again from
    /// the wider static types, sharing one fuel budget.
    pub fn analyze(&self, unit: &Unit, func: &Func) -> Result<FuncAnalysis, InterpError> {
        let _span = debug_span!("analyze", func = %func.name).entered();
        let mut statics = self.local_static_types.clone();
        let mut iterations = 0;
        loop {
            let (mut analysis, used) = self.analyze_round(unit, func, statics, &mut iterations)?;
            let stale = used
                .iter()
                .any(|(l, ty)| !analysis.collect.local_static_type(*l).subtype_of(ty));
            if !stale {
                analysis.iterations = iterations;
                return Ok(analysis);
            }
            debug!("static locals grew, analysing again");
            statics = std::mem::take(&mut analysis.collect.local_static_types);
        }
    }

    fn analyze_round(
        &self,
        unit: &Unit,
        func: &Func,
        statics: Vec<Type>,
        iterations: &mut usize,
    ) -> Result<(FuncAnalysis, UsedLocalStatics), InterpError> {
        let ctx = Context::new(unit, func);
        let mut collect =
            CollectedInfo::new(&ctx, self.collection).with_local_static_types(statics);
        let mut used = UsedLocalStatics::new();

        let order = rpo_priorities(func);
        let mut states: Vec<Option<State>> = vec![None; func.blocks.len()];
        let mut returned: Vec<Option<Type>> = vec![None; func.blocks.len()];
        let mut reductions = IndexMap::new();
        let mut worklist = BTreeSet::new();

        let entry = func.entry();
        if func.block(entry).is_none() {
            return Err(InterpError::UnknownBlock(entry));
        }
        states[entry.index()] = Some(State::entry(func, &self.args));
        worklist.insert((order[entry.index()], entry));

        while let Some((_, id)) = worklist.pop_first() {
            let Some(mut state) = states[id.index()].clone() else {
                continue;
            };
            if state.unreachable {
                continue;
            }
            *iterations += 1;
            if *iterations > self.max_iterations {
                debug!(iterations = *iterations, "giving up");
                return Err(InterpError::FuelExhausted(self.max_iterations));
            }

            let block = &func.blocks[id.index()];
            let mut pending: Vec<(BlockId, Option<State>)> = Vec::new();
            let flags = {
                let mut interp = Interp {
                    index: self.index,
                    oracle: self.oracle,
                    options: &self.options,
                    ctx,
                    block,
                    state: &mut state,
                    collect: &mut collect,
                };
                step::run(&mut interp, &mut |target: BlockId, s: Option<&State>| {
                    pending.push((target, s.cloned()))
                })?
            };
            returned[id.index()] = flags.returned;
            reductions.insert(id, flags.reductions);
            merge_used_local_statics(&mut used, flags.used_local_statics);

            for (target, incoming) in pending {
                let slot = states
                    .get_mut(target.index())
                    .ok_or(InterpError::UnknownBlock(target))?;
                let changed = match incoming {
                    // Asked to look again without new information.
                    None => slot.is_some(),
                    Some(s) => match slot {
                        Some(cur) => cur.merge_from(target, &s)?,
                        None => {
                            *slot = Some(s);
                            true
                        }
                    },
                };
                if changed {
                    trace!(from = %id, to = %target, "schedule");
                    worklist.insert((order[target.index()], target));
                }
            }
        }

        let return_type = returned
            .into_iter()
            .flatten()
            .fold(Type::BOTTOM, |acc, t| acc.join(&t));
        debug!(iterations = *iterations, ret = %return_type, "analysis settled");
        let analysis = FuncAnalysis {
            block_states: states,
            return_type,
            collect,
            reductions,
            iterations: *iterations,
        };
        Ok((analysis, used))
    }
}

/// Every block that can follow `block`, including branch targets in the
/// middle of the block.
fn block_successors(block: &Block) -> impl Iterator<Item = BlockId> + '_ {
    block
        .hhbcs
        .iter()
        .flat_map(Bytecode::targets)
        .chain(block.fallthrough)
        .chain(block.factored_exits.iter().copied())
}

/// Position of each block in reverse post order from the entry. Blocks not
/// reachable in the graph come last.
fn rpo_priorities(func: &Func) -> Vec<usize> {
    let n = func.blocks.len();
    let mut graph = DiGraph::<BlockId, ()>::with_capacity(n, n);
    let nodes: Vec<NodeIndex> = func.blocks.iter().map(|b| graph.add_node(b.id)).collect();
    for (i, block) in func.blocks.iter().enumerate() {
        for succ in block_successors(block) {
            if let Some(&to) = nodes.get(succ.index()) {
                graph.add_edge(nodes[i], to, ());
            }
        }
    }

    let mut postorder = Vec::with_capacity(n);
    if let Some(&entry) = nodes.first() {
        let mut dfs = DfsPostOrder::new(&graph, entry);
        while let Some(node) = dfs.next(&graph) {
            postorder.push(graph[node]);
        }
    }
    let mut priority = vec![usize::MAX; n];
    for (rank, id) in postorder.into_iter().rev().enumerate() {
        priority[id.index()] = rank;
    }
    priority
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{Block, BlockId, Bytecode, Func, LocalId, Unit};
    use hhbbc_index::MemoryIndex;
    use hhbbc_types::Type;

    use super::*;

    fn func(blocks: Vec<Block>) -> Func {
        Func::builder().name("f").blocks(blocks).build()
    }

    // ------------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------------

    #[test]
    fn test_rpo_puts_join_point_after_both_arms() {
        let f = func(vec![
            Block::new(0u32, vec![Bytecode::True, Bytecode::JmpZ { target: BlockId(2) }])
                .with_fallthrough(1u32),
            Block::new(1u32, vec![Bytecode::Jmp { target: BlockId(3) }]),
            Block::new(2u32, vec![]).with_fallthrough(3u32),
            Block::new(3u32, vec![Bytecode::Null, Bytecode::RetC]),
        ]);
        let order = rpo_priorities(&f);
        assert_eq!(order[0], 0);
        assert!(order[3] > order[1] && order[3] > order[2]);
    }

    // ------------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------------

    #[test]
    fn test_loop_reaches_fixpoint() {
        // $i = 0; while ($c) { $i = $i + 1; } return $i;
        let (c, i) = (LocalId(0), LocalId(1));
        let f = Func::builder()
            .name("f")
            .params(vec![hhbbc_bc::Param::builder().name("c").build()])
            .blocks(vec![
                Block::new(
                    0u32,
                    vec![Bytecode::Int { val: 0 }, Bytecode::SetL { loc: i }, Bytecode::PopC],
                )
                .with_fallthrough(1u32),
                Block::new(
                    1u32,
                    vec![Bytecode::CGetL { loc: c }, Bytecode::JmpZ { target: BlockId(3) }],
                )
                .with_fallthrough(2u32),
                Block::new(
                    2u32,
                    vec![
                        Bytecode::CGetL { loc: i },
                        Bytecode::Int { val: 1 },
                        Bytecode::Add,
                        Bytecode::SetL { loc: i },
                        Bytecode::PopC,
                        Bytecode::Jmp { target: BlockId(1) },
                    ],
                ),
                Block::new(3u32, vec![Bytecode::CGetL { loc: i }, Bytecode::RetC]),
            ])
            .build();
        let unit = Unit::builder().name("u").build();
        let index = MemoryIndex::new();
        let analysis = FuncAnalyzer::new(&index).analyze(&unit, &f).unwrap();
        assert_eq!(analysis.block_state(BlockId(1)).unwrap().locals[1], Type::INT);
        assert_eq!(analysis.return_type, Type::INT);
        assert!(analysis.iterations > 4);
    }

    #[test]
    fn test_constant_condition_prunes_dead_arm() {
        let f = func(vec![
            Block::new(0u32, vec![Bytecode::False, Bytecode::JmpNZ { target: BlockId(2) }])
                .with_fallthrough(1u32),
            Block::new(1u32, vec![Bytecode::Int { val: 1 }, Bytecode::RetC]),
            Block::new(2u32, vec![Bytecode::String { val: "x".into() }, Bytecode::RetC]),
        ]);
        let unit = Unit::builder().name("u").build();
        let index = MemoryIndex::new();
        let analysis = FuncAnalyzer::new(&index).analyze(&unit, &f).unwrap();
        assert!(!analysis.is_reachable(BlockId(2)));
        assert_eq!(analysis.return_type, Type::ival(1));
    }

    #[test]
    fn test_fuel_runs_out() {
        let f = func(vec![
            Block::new(0u32, vec![]).with_fallthrough(1u32),
            Block::new(1u32, vec![Bytecode::Int { val: 1 }, Bytecode::JmpZ { target: BlockId(2) }])
                .with_fallthrough(1u32),
            Block::new(2u32, vec![Bytecode::Null, Bytecode::RetC]),
        ]);
        let unit = Unit::builder().name("u").build();
        let index = MemoryIndex::new();
        let err = FuncAnalyzer::new(&index)
            .with_max_iterations(1)
            .analyze(&unit, &f)
            .unwrap_err();
        insta::assert_snapshot!(err, @"fixpoint not reached after 1 block visits");
    }

    // ------------------------------------------------------------------------
    // Static locals
    // ------------------------------------------------------------------------

    fn static_init(val: i64, loc: LocalId) -> Vec<Bytecode> {
        vec![
            Bytecode::Int { val },
            Bytecode::StaticLocInit { loc, name: "s".into() },
        ]
    }

    #[test]
    fn test_static_local_that_is_never_written_folds() {
        // static $s = 5; return $s;
        let s = LocalId(0);
        let mut hhbcs = static_init(5, s);
        hhbcs.extend([Bytecode::CGetL { loc: s }, Bytecode::RetC]);
        let f = Func::builder()
            .name("f")
            .locals(vec![hhbbc_bc::Local { id: s, name: Some("s".into()) }])
            .blocks(vec![Block::new(0u32, hhbcs)])
            .build();
        let unit = Unit::builder().name("u").build();
        let index = MemoryIndex::new();
        let analysis = FuncAnalyzer::new(&index).analyze(&unit, &f).unwrap();
        assert_eq!(analysis.return_type, Type::ival(5));
        assert_eq!(analysis.collect.local_static_types, vec![Type::ival(5)]);
    }

    #[test]
    fn test_written_static_local_is_analysed_again() {
        // static $s = 5; $s = $s + 1; return $s;
        let s = LocalId(0);
        let mut hhbcs = static_init(5, s);
        hhbcs.extend([
            Bytecode::CGetL { loc: s },
            Bytecode::Int { val: 1 },
            Bytecode::Add,
            Bytecode::SetL { loc: s },
            Bytecode::PopC,
            Bytecode::CGetL { loc: s },
            Bytecode::RetC,
        ]);
        let f = Func::builder()
            .name("f")
            .locals(vec![hhbbc_bc::Local { id: s, name: Some("s".into()) }])
            .blocks(vec![Block::new(0u32, hhbcs)])
            .build();
        let unit = Unit::builder().name("u").build();
        let index = MemoryIndex::new();
        let analysis = FuncAnalyzer::new(&index).analyze(&unit, &f).unwrap();

        // A single pass would have returned 6.
        assert_eq!(analysis.return_type.tv(), None);
        assert!(analysis.iterations > 1);
        let statics = &analysis.collect.local_static_types;
        assert!(Type::ival(5).subtype_of(&statics[0]));
        assert!(Type::ival(6).subtype_of(&statics[0]));
    }

    #[test]
    fn test_arguments_seed_parameters() {
        let f = Func::builder()
            .name("f")
            .params(vec![hhbbc_bc::Param::builder().name("x").build()])
            .blocks(vec![Block::new(0u32, vec![Bytecode::CGetL { loc: LocalId(0) }, Bytecode::RetC])])
            .build();
        let unit = Unit::builder().name("u").build();
        let index = MemoryIndex::new();
        let analysis = FuncAnalyzer::new(&index)
            .with_args(vec![Type::ival(7)])
            .analyze(&unit, &f)
            .unwrap();
        assert_eq!(analysis.return_type, Type::ival(7));
    }
}

use hhbbc_bc::{BlockId, Bytecode, Context, Func, Unit};
use hhbbc_index::Index;
use hhbbc_interp::{
    CollectedInfo, CollectionOpts, Interp, InterpError, Options, RunFlags, State, StepFlags,
};
use hhbbc_types::{Oracle, ScalarOracle};

/// Records every state propagated by the interpreter.
#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<(BlockId, Option<State>)>,
}

impl Recorder {
    pub fn record(&mut self, target: BlockId, state: Option<&State>) {
        self.calls.push((target, state.cloned()));
    }

    /// Targets in propagation order.
    pub fn blocks(&self) -> Vec<BlockId> {
        self.calls.iter().map(|(b, _)| *b).collect()
    }

    /// The last state sent to `target`.
    pub fn state_for(&self, target: BlockId) -> Option<&State> {
        self.calls
            .iter()
            .rev()
            .find(|(b, _)| *b == target)
            .and_then(|(_, s)| s.as_ref())
    }
}

/// Runs single blocks of a function with fresh collected info.
pub struct BlockRun<'a> {
    pub unit: &'a Unit,
    pub func: &'a Func,
    pub index: &'a dyn Index,
    pub oracle: &'a dyn Oracle,
    pub options: Options,
}

impl<'a> BlockRun<'a> {
    pub fn new(unit: &'a Unit, func: &'a Func, index: &'a dyn Index) -> Self {
        Self {
            unit,
            func,
            index,
            oracle: &ScalarOracle,
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Interpret block `id` from `state`, which is left as the state at the
    /// end of the block.
    pub fn run(
        &self,
        id: BlockId,
        state: &mut State,
    ) -> (Result<RunFlags, InterpError>, Recorder, CollectedInfo) {
        let ctx = Context::new(self.unit, self.func);
        let mut collect = CollectedInfo::new(&ctx, CollectionOpts::default());
        let mut recorder = Recorder::default();
        let res = match self.func.block(id) {
            None => Err(InterpError::UnknownBlock(id)),
            Some(block) => {
                let mut interp = Interp {
                    index: self.index,
                    oracle: self.oracle,
                    options: &self.options,
                    ctx,
                    block,
                    state,
                    collect: &mut collect,
                };
                hhbbc_interp::run(&mut interp, &mut |b: BlockId, s: Option<&State>| {
                    recorder.record(b, s)
                })
            }
        };
        (res, recorder, collect)
    }

    /// Interpret `bc` alone from `state`, as if it were in the entry block.
    pub fn step(&self, state: &mut State, bc: &Bytecode) -> Result<StepFlags, InterpError> {
        let entry = self.func.entry();
        let block = self.func.block(entry).ok_or(InterpError::UnknownBlock(entry))?;
        let ctx = Context::new(self.unit, self.func);
        let mut collect = CollectedInfo::new(&ctx, CollectionOpts::default());
        let mut interp = Interp {
            index: self.index,
            oracle: self.oracle,
            options: &self.options,
            ctx,
            block,
            state,
            collect: &mut collect,
        };
        hhbbc_interp::step(&mut interp, bc)
    }
}

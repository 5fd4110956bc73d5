use hhbbc_bc::{BlockId, Bytecode, LocalId};
use hhbbc_types::Type;
use indexmap::IndexMap;
use smallvec::SmallVec;

/// Static locals whose type the analysis relied on, with the type each was
/// first read at.
pub type UsedLocalStatics = IndexMap<LocalId, Type>;

/// Record the uses in `from`, keeping the earliest type seen for each local.
pub(crate) fn merge_used_local_statics(into: &mut UsedLocalStatics, from: UsedLocalStatics) {
    for (l, t) in from {
        into.entry(l).or_insert(t);
    }
}

/// Facts about one interpreted instruction.
///
/// The default is the pessimistic answer: the instruction may throw, its
/// outputs may not be folded, and it has side effects. Handlers earn the
/// optimistic answers.
#[derive(Clone, Debug, PartialEq)]
pub struct StepFlags {
    /// May raise an exception.
    pub was_pei: bool,
    /// Outputs that turn out to be constants may be replaced by literals.
    pub can_const_prop: bool,
    /// No observable effect beyond the analysed state.
    pub effect_free: bool,
    /// The only successor of the instruction, when it was decided.
    pub jmp_dest: Option<BlockId>,
    /// The instruction sequence interpreted in place of the original.
    pub strength_reduced: Option<Vec<Bytecode>>,
    /// The type returned, for returning instructions.
    pub returned: Option<Type>,
    pub used_local_statics: UsedLocalStatics,
}

impl Default for StepFlags {
    fn default() -> Self {
        Self {
            was_pei: true,
            can_const_prop: false,
            effect_free: false,
            jmp_dest: None,
            strength_reduced: None,
            returned: None,
            used_local_statics: UsedLocalStatics::new(),
        }
    }
}

/// A replacement recorded for instruction `index` of a block.
#[derive(Clone, Debug, PartialEq)]
pub struct Reduction {
    pub index: usize,
    pub replacement: Vec<Bytecode>,
}

/// Summary of interpreting a whole block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunFlags {
    /// Join of everything the block returns, if it returns.
    pub returned: Option<Type>,
    pub reductions: Vec<Reduction>,
    /// Static locals read at a known type anywhere in the block.
    pub used_local_statics: UsedLocalStatics,
}

/// How a handler discharged an instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// The handler applied the effect to the state itself.
    Direct,
    /// The handler asks for this sequence to be interpreted instead. It
    /// has changed nothing the sequence does not redo, apart from static
    /// local bookkeeping.
    Reduce(SmallVec<[Bytecode; 4]>),
}

impl Effect {
    pub fn reduce(bcs: impl IntoIterator<Item = Bytecode>) -> Self {
        Effect::Reduce(bcs.into_iter().collect())
    }
}

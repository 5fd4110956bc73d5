use hhbbc_bc::{BlockId, Bytecode, ClsRefSlotId, IterId, LocalId, Op};

/// An invariant of the analysis itself was violated.
///
/// These are defects in the analyzed bytecode or in the interpreter, never
/// properties of the program being analyzed: a program that may throw is
/// described by [`StepFlags::was_pei`](crate::StepFlags::was_pei), and an
/// impossible program point by the state being unreachable.
#[derive(Debug, thiserror::Error)]
pub enum InterpError {
    /// An instruction popped more values than the stack holds.
    #[error("evaluation stack underflow")]
    StackUnderflow,
    /// An `FPass*` or `FCall*` ran with no call being set up.
    #[error("no call in progress")]
    FpiUnderflow,
    #[error("local {0} out of range")]
    BadLocal(LocalId),
    #[error("iterator {0} out of range")]
    BadIter(IterId),
    #[error("class-ref slot {0} out of range")]
    BadClsRefSlot(ClsRefSlotId),
    /// A replacement sequence branches before its last instruction.
    #[error("`{0}` follows a branch inside a replacement sequence")]
    BranchInReduction(Op),
    /// An unconditional jump is followed by more instructions.
    #[error("`{0}` is not the last instruction of its block")]
    JmpInBlock(Op),
    #[error("return with {depth} value(s) left on the stack")]
    NonEmptyStackOnReturn { depth: usize },
    /// A memoization instruction in a function that is not a memoize
    /// wrapper.
    #[error("`{0}` outside a memoize wrapper")]
    NotMemoizeWrapper(Op),
    #[error("switch with no targets")]
    EmptySwitch,
    /// Two states reaching the same block disagree on stack depth.
    #[error("block {block} entered with stack depths {left} and {right}")]
    StackMismatch {
        block: BlockId,
        left: usize,
        right: usize,
    },
    #[error("no block {0}")]
    UnknownBlock(BlockId),
    /// The fixpoint did not settle within the configured number of block
    /// visits.
    #[error("fixpoint not reached after {0} block visits")]
    FuelExhausted(usize),
    /// An error raised while interpreting one instruction.
    #[error("{block}: `{instr}`: {source}")]
    AtInstruction {
        block: BlockId,
        instr: Box<Bytecode>,
        #[source]
        source: Box<InterpError>,
    },
}

impl InterpError {
    /// Attach the block and instruction the error was raised at. Errors that
    /// already carry a location keep the innermost one.
    pub fn at(self, block: BlockId, instr: &Bytecode) -> Self {
        match self {
            e @ InterpError::AtInstruction { .. } => e,
            e => InterpError::AtInstruction {
                block,
                instr: Box::new(instr.clone()),
                source: Box::new(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_located_display() {
        let err = InterpError::StackUnderflow
            .at(BlockId(3), &Bytecode::PopC)
            .at(BlockId(4), &Bytecode::Nop);
        insta::assert_snapshot!(err, @"B3: `PopC`: evaluation stack underflow");
    }
}

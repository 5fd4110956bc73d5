//! Driving handlers over instructions and blocks.

use hhbbc_bc::{BlockId, Bytecode, Op};
use tracing::{debug, debug_span, trace};

use crate::env::{Env, Interp, Propagate};
use crate::error::InterpError;
use crate::flags::{Effect, Reduction, RunFlags, StepFlags, merge_used_local_statics};
use crate::group;
use crate::handlers;
use crate::state::State;

type Result<T> = std::result::Result<T, InterpError>;

/// Interpret `bcs` in sequence as if they were one instruction, folding
/// their flags together. With `reduce`, the sequence actually interpreted
/// (after nested reductions) is recorded as the step's reduction.
pub(crate) fn impl_vec(env: &mut Env<'_, '_>, reduce: bool, bcs: &[Bytecode]) -> Result<()> {
    let reduce = reduce && env.options().strength_reduce;
    let mut reduction = Vec::new();
    let mut was_pei = false;
    let mut can_const_prop = true;
    let mut effect_free = true;
    let mut used = std::mem::take(&mut env.flags.used_local_statics);

    for bc in bcs {
        if env.flags.jmp_dest.is_some() {
            return Err(InterpError::BranchInReduction(bc.op()));
        }
        trace!(instr = %bc, "  (impl");
        env.flags = StepFlags::default();
        match handlers::dispatch(env, bc)? {
            Effect::Reduce(nested) => {
                impl_vec(env, true, &nested)?;
                if nested.last().is_some_and(Bytecode::is_terminal) {
                    env.unreachable();
                }
                if reduce {
                    match env.flags.strength_reduced.take() {
                        Some(seq) => reduction.extend(seq),
                        None => reduction.extend(nested),
                    }
                }
            }
            Effect::Direct => {
                if bc.is_terminal() {
                    env.unreachable();
                }
                if env.flags.can_const_prop {
                    apply_const_prop(env, bc.num_push() as usize);
                }
                if reduce {
                    reduction.push(bc.clone());
                }
            }
        }

        was_pei |= env.flags.was_pei;
        can_const_prop &= env.flags.can_const_prop;
        effect_free &= env.flags.effect_free;
        merge_used_local_statics(&mut used, std::mem::take(&mut env.flags.used_local_statics));
        if env.state().unreachable {
            break;
        }
    }

    env.flags.was_pei = was_pei;
    env.flags.can_const_prop = can_const_prop;
    env.flags.effect_free = effect_free;
    env.flags.strength_reduced = reduce.then_some(reduction);
    env.flags.used_local_statics = used;
    Ok(())
}

/// Inside a sequence: a step whose outputs are all constants neither throws
/// nor has effects.
fn apply_const_prop(env: &mut Env<'_, '_>, num_push: usize) {
    if env.flags.effect_free && !env.flags.was_pei {
        return;
    }
    let stack = &env.state().stack;
    if stack.len() < num_push || !stack[stack.len() - num_push..].iter().all(|e| e.ty.is_scalar()) {
        return;
    }
    env.flags.effect_free = true;
    env.flags.was_pei = false;
}

/// Interpret one instruction, following any reduction its handler asks for.
pub(crate) fn interp_one(env: &mut Env<'_, '_>, bc: &Bytecode) -> Result<()> {
    match handlers::dispatch(env, bc)? {
        Effect::Reduce(seq) => impl_vec(env, true, &seq)?,
        // Throws, exits and switches with no known target end the path here.
        Effect::Direct => {
            if bc.is_terminal() && env.flags.jmp_dest.is_none() && env.flags.returned.is_none() {
                env.unreachable();
            }
        }
    }
    Ok(())
}

/// Replace the top `n` stack types by the literals they hold. Fails, leaving
/// the stack alone, unless every one of them is a known value.
fn fix_const_outputs(state: &mut State, n: usize) -> bool {
    let len = state.stack.len();
    if len < n {
        return false;
    }
    let outputs = &mut state.stack[len - n..];
    let Some(cells) = outputs.iter().map(|e| e.ty.tv()).collect::<Option<Vec<_>>>() else {
        return false;
    };
    for (elem, cell) in outputs.iter_mut().zip(&cells) {
        elem.ty = hhbbc_types::Type::from_cell(cell);
    }
    true
}

/// Interpret the instruction at the head of `ops`, or the group it starts.
/// Returns how many instructions were consumed and the step's flags.
fn interp_ops(
    interp: &mut Interp<'_>,
    propagate: &mut Propagate<'_>,
    ops: &[Bytecode],
) -> Result<(usize, StepFlags)> {
    let block = interp.block;
    let options = interp.options;
    let before = (!block.factored_exits.is_empty()).then(|| interp.state.without_stacks());
    let head = &ops[0];
    let num_pushed = head.num_push() as usize;

    let mut env = Env::new(interp, propagate);
    let consumed = match group::interp_group(&mut env, ops)? {
        Some(n) => n,
        None => {
            trace!(instr = %head, "interp");
            interp_one(&mut env, head)?;
            1
        }
    };

    if consumed == 1
        && options.constant_prop
        && env.flags.can_const_prop
        && fix_const_outputs(env.state_mut(), num_pushed)
    {
        debug!(instr = %head, "outputs are constant");
        env.flags.was_pei = false;
        env.flags.effect_free = true;
    }

    if env.flags.was_pei {
        if let Some(before) = &before {
            for &exit in &block.factored_exits {
                env.propagate_state(exit, before);
            }
        }
    }

    Ok((consumed, std::mem::take(&mut env.flags)))
}

/// Interpret a whole block, propagating its output states to successors.
pub fn run(interp: &mut Interp<'_>, propagate: &mut Propagate<'_>) -> Result<RunFlags> {
    let block = interp.block;
    let _span = debug_span!("block", id = %block.id).entered();
    let mut ret = RunFlags::default();

    let mut i = 0;
    while i < block.hhbcs.len() {
        let ops = &block.hhbcs[i..];
        let head = &ops[0];
        if matches!(head.op(), Op::Jmp | Op::JmpNS) && ops.len() > 1 {
            return Err(InterpError::JmpInBlock(head.op()).at(block.id, head));
        }

        let (consumed, mut flags) =
            interp_ops(interp, propagate, ops).map_err(|e| e.at(block.id, head))?;
        merge_used_local_statics(
            &mut ret.used_local_statics,
            std::mem::take(&mut flags.used_local_statics),
        );

        if let Some(replacement) = flags.strength_reduced {
            debug!(
                instr = %head,
                replacement = %replacement.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
                "strength reduced"
            );
            ret.reductions.push(Reduction { index: i, replacement });
        }

        let collect = &mut *interp.collect;
        if collect.effect_free && !flags.effect_free {
            collect.effect_free = false;
            if collect.opts.effect_free_only {
                debug!(instr = %head, "not effect free, stopping");
                return Ok(ret);
            }
        }

        if interp.state.unreachable {
            return Ok(ret);
        }
        if let Some(dest) = flags.jmp_dest {
            if Some(dest) != block.fallthrough {
                return Ok(ret);
            }
        }
        if let Some(returned) = flags.returned {
            ret.returned = Some(returned);
            return Ok(ret);
        }

        i += consumed;
    }

    if let Some(next) = block.fallthrough {
        trace!(target = %next, state = %interp.state, "propagate");
        propagate(next, Some(&*interp.state));
    }
    Ok(ret)
}

/// Interpret a single instruction without grouping, propagation or output
/// folding.
pub fn step(interp: &mut Interp<'_>, bc: &Bytecode) -> Result<StepFlags> {
    let mut sink = |_: BlockId, _: Option<&State>| {};
    let mut env = Env::new(interp, &mut sink);
    interp_one(&mut env, bc)?;
    Ok(std::mem::take(&mut env.flags))
}

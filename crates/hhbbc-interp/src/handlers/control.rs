//! Jumps, switches, returns and exceptions.

use std::sync::Arc;

use hhbbc_bc::{BlockId, SwitchKind};
use hhbbc_types::{Cell, CellOp, Emptiness, Type};

use super::Result;
use crate::env::Env;
use crate::error::InterpError;
use crate::flags::Effect;
use crate::group::refine_branch;
use crate::state::StackEquiv;

pub(super) fn jmp(env: &mut Env<'_, '_>, target: BlockId) -> Result {
    env.nothrow();
    env.propagate(target);
    env.jmp_setdest(target);
    Ok(Effect::Direct)
}

/// `JmpZ` (`nz == false`) and `JmpNZ`.
pub(super) fn jmp_cond(env: &mut Env<'_, '_>, target: BlockId, nz: bool) -> Result {
    env.nothrow();
    let location = env.top_equiv(0)?;
    let e = env.pop()?.emptiness();
    let (taken_when, skipped_when) = if nz {
        (Emptiness::NonEmpty, Emptiness::Empty)
    } else {
        (Emptiness::Empty, Emptiness::NonEmpty)
    };
    if e == taken_when {
        env.jmp_setdest(target);
        env.propagate(target);
        return Ok(Effect::Direct);
    }
    if e == skipped_when {
        env.jmp_nevertaken();
        return Ok(Effect::Direct);
    }

    let func = env.ctx().func;
    if let Some(next) = env.block().fallthrough {
        if func.next_real_block(next) == func.next_real_block(target) {
            env.jmp_nevertaken();
            return Ok(Effect::Direct);
        }
    }

    if location == StackEquiv::None {
        env.propagate(target);
        return Ok(Effect::Direct);
    }
    if nz {
        refine_branch(env, location, &Type::assert_nonemptiness, target, &Type::assert_emptiness);
    } else {
        refine_branch(env, location, &Type::assert_emptiness, target, &Type::assert_nonemptiness);
    }
    Ok(Effect::Direct)
}

/// The only successor is `target`.
fn go(env: &mut Env<'_, '_>, target: BlockId) -> Result {
    env.effect_free();
    env.propagate(target);
    env.jmp_setdest(target);
    Ok(Effect::Direct)
}

/// Does the switch scrutinee `v` loosely equal `case`? `None` when the
/// comparison cannot be evaluated.
fn loosely_equal(env: &Env<'_, '_>, v: &Cell, case: Cell) -> Option<bool> {
    match env.oracle().eval(CellOp::Eq, &[v.clone(), case])? {
        Cell::Bool(b) => Some(b),
        _ => None,
    }
}

fn switch_target(
    env: &Env<'_, '_>,
    v: &Cell,
    kind: SwitchKind,
    base: i64,
    targets: &[BlockId],
) -> Option<BlockId> {
    match kind {
        SwitchKind::Bounded => {
            let i = usize::try_from(v.as_int()?).ok()?;
            targets.get(i).copied()
        }
        SwitchKind::Unbounded => {
            // The last two targets are the fallbacks.
            let cases = targets.len().checked_sub(2)?;
            for (i, target) in targets[..cases].iter().enumerate() {
                let case = base.checked_add(i64::try_from(i).ok()?)?;
                if loosely_equal(env, v, Cell::Int(case))? {
                    return Some(*target);
                }
            }
            targets.last().copied()
        }
    }
}

pub(super) fn switch(
    env: &mut Env<'_, '_>,
    kind: SwitchKind,
    base: i64,
    targets: &[BlockId],
) -> Result {
    if targets.is_empty() {
        return Err(InterpError::EmptySwitch);
    }
    let v = env.pop()?.tv();
    if let Some(target) = v.and_then(|v| switch_target(env, &v, kind, base, targets)) {
        return go(env, target);
    }
    for target in targets {
        env.propagate(*target);
    }
    Ok(Effect::Direct)
}

pub(super) fn sswitch(
    env: &mut Env<'_, '_>,
    cases: &[(Arc<str>, BlockId)],
    default: BlockId,
) -> Result {
    if let Some(v) = env.pop()?.tv() {
        let mut decided = Some(default);
        for (case, target) in cases {
            match loosely_equal(env, &v, Cell::Str(case.clone())) {
                Some(true) => {
                    decided = Some(*target);
                    break;
                }
                Some(false) => {}
                None => {
                    decided = None;
                    break;
                }
            }
        }
        if let Some(target) = decided {
            return go(env, target);
        }
    }
    for (_, target) in cases {
        env.propagate(*target);
    }
    env.propagate(default);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Returns and exceptions
// ----------------------------------------------------------------------------

fn do_ret(env: &mut Env<'_, '_>, t: Type, has_effects: bool) -> Result {
    let depth = env.stack_depth();
    if depth != 0 {
        return Err(InterpError::NonEmptyStackOnReturn { depth });
    }
    env.flags.returned = Some(t);
    if !has_effects {
        env.effect_free();
    }
    Ok(Effect::Direct)
}

/// `RetC` and `RetV`.
pub(super) fn ret(env: &mut Env<'_, '_>) -> Result {
    let t = env.pop()?;
    do_ret(env, t, false)
}

pub(super) fn unwind(_env: &mut Env<'_, '_>) -> Result {
    Ok(Effect::Direct)
}

pub(super) fn throw(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    Ok(Effect::Direct)
}

pub(super) fn catch(env: &mut Env<'_, '_>) -> Result {
    env.nothrow();
    let exn = env
        .index()
        .builtin_class("Throwable")
        .map_or(Type::OBJ, Type::sub_obj);
    env.push(exn);
    Ok(Effect::Direct)
}

pub(super) fn native_impl(env: &mut Env<'_, '_>) -> Result {
    env.kill_locals();
    env.may_use_vv();
    let ctx = env.ctx();
    let ret = match &ctx.func.native_ret {
        Some(tc) => env.index().lookup_constraint(&ctx, tc),
        None => Type::INIT_GEN,
    };
    do_ret(env, ret, true)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{BlockId, Bytecode, LocalId, SwitchKind};
    use hhbbc_types::Type;

    use crate::handlers::testing::Harness;

    fn switch(kind: SwitchKind, targets: &[u32]) -> Bytecode {
        Bytecode::Switch {
            kind,
            base: 0,
            targets: targets.iter().map(|t| BlockId(*t)).collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Switches
    // ------------------------------------------------------------------------

    #[test]
    fn test_bounded_switch_on_literal() {
        let mut h = Harness::new();
        h.push(Type::ival(1));
        let flags = h.step(switch(SwitchKind::Bounded, &[0, 1, 2]));
        assert_eq!(h.propagated_blocks(), vec![BlockId(1)]);
        assert_eq!(flags.jmp_dest, Some(BlockId(1)));
        assert!(flags.effect_free);
    }

    #[test]
    fn test_bounded_switch_out_of_range() {
        let mut h = Harness::new();
        h.push(Type::ival(7));
        h.step(switch(SwitchKind::Bounded, &[0, 1, 2]));
        assert_eq!(h.propagated_blocks(), vec![BlockId(0), BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_unbounded_switch_falls_back_to_default() {
        let mut h = Harness::new();
        h.push(Type::ival(9));
        h.step(switch(SwitchKind::Unbounded, &[3, 4, 5, 6]));
        assert_eq!(h.propagated_blocks(), vec![BlockId(6)]);
    }

    #[test]
    fn test_switch_on_unknown() {
        let mut h = Harness::new();
        h.push(Type::INT);
        let flags = h.step(switch(SwitchKind::Bounded, &[0, 1]));
        assert_eq!(h.propagated_blocks(), vec![BlockId(0), BlockId(1)]);
        assert_eq!(flags.jmp_dest, None);
    }

    #[test]
    fn test_empty_switch_is_an_error() {
        let mut h = Harness::new();
        h.push(Type::INT);
        insta::assert_snapshot!(
            h.try_step(switch(SwitchKind::Bounded, &[])).unwrap_err(),
            @"switch with no targets"
        );
    }

    #[test]
    fn test_string_switch() {
        let mut h = Harness::new();
        h.push(Type::sval("b"));
        h.step(Bytecode::SSwitch {
            cases: vec![("a".into(), BlockId(1)), ("b".into(), BlockId(2))],
            default: BlockId(3),
        });
        assert_eq!(h.propagated_blocks(), vec![BlockId(2)]);
    }

    // ------------------------------------------------------------------------
    // Conditional jumps
    // ------------------------------------------------------------------------

    #[test]
    fn test_jmpz_on_known_falsy_value_always_jumps() {
        let mut h = Harness::new();
        h.push(Type::FALSE);
        let flags = h.step(Bytecode::JmpZ { target: BlockId(4) });
        assert_eq!(flags.jmp_dest, Some(BlockId(4)));
        assert_eq!(h.propagated_blocks(), vec![BlockId(4)]);
    }

    #[test]
    fn test_jmpnz_refines_local_on_both_edges() {
        let mut h = Harness::new();
        h.set_local(0, Type::OBJ.opt());
        h.step(Bytecode::CGetL { loc: LocalId(0) });
        h.step(Bytecode::JmpNZ { target: BlockId(4) });
        let (target, taken) = &h.propagated[0];
        assert_eq!(*target, BlockId(4));
        let taken = taken.as_ref().expect("state");
        assert_eq!(taken.locals[0], Type::OBJ);
        assert_eq!(h.state.locals[0], Type::INIT_NULL);
    }

    // ------------------------------------------------------------------------
    // Returns
    // ------------------------------------------------------------------------

    #[test]
    fn test_return_with_values_left_is_an_error() {
        let mut h = Harness::new();
        h.push(Type::INT);
        h.push(Type::INT);
        insta::assert_snapshot!(
            h.try_step(Bytecode::RetC).unwrap_err(),
            @"return with 1 value(s) left on the stack"
        );
    }

    #[test]
    fn test_throw_ends_the_path() {
        let mut h = Harness::new();
        h.push(Type::OBJ);
        h.step(Bytecode::Throw);
        assert!(h.state.unreachable);
    }
}

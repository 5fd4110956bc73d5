//! `foreach` iterators.
//!
//! `IterInit*` and `IterNext*` branch to the loop body or fall out of the
//! loop. When the number of elements is known, only the edges that can
//! happen are followed.

use hhbbc_bc::{BlockId, IterId, IterKind, LocalId};
use hhbbc_types::{IterCount, IterTypes, Type, iter_types};

use super::Result;
use crate::env::Env;
use crate::flags::Effect;
use crate::state::IterState;

fn iter_taken(env: &mut Env<'_, '_>, iter: IterId, target: BlockId) -> Result<()> {
    env.free_iter(iter)?;
    env.propagate(target);
    Ok(())
}

fn iter_enter(
    env: &mut Env<'_, '_>,
    iter: IterId,
    val: LocalId,
    key: Option<LocalId>,
    ity: IterTypes,
) -> Result<()> {
    env.set_loc(val, ity.value.clone())?;
    if let Some(key) = key {
        env.set_loc(key, ity.key.clone())?;
    }
    env.set_iter(iter, ity)
}

/// `IterInit` and `IterInitK`. The target is the loop exit.
pub(super) fn iter_init(
    env: &mut Env<'_, '_>,
    iter: IterId,
    target: BlockId,
    val: LocalId,
    key: Option<LocalId>,
) -> Result {
    let t = env.pop()?;
    let ity = iter_types(&t);
    if !ity.may_throw_on_init {
        env.nothrow();
    }
    match ity.count {
        IterCount::Empty => {
            iter_taken(env, iter, target)?;
            env.jmp_setdest(target);
        }
        IterCount::Single | IterCount::NonEmpty => {
            iter_enter(env, iter, val, key, ity)?;
            env.jmp_nevertaken();
        }
        IterCount::ZeroOrOne | IterCount::Any => {
            iter_taken(env, iter, target)?;
            iter_enter(env, iter, val, key, ity)?;
        }
    }
    Ok(Effect::Direct)
}

/// `IterNext` and `IterNextK`. The target is the loop body.
pub(super) fn iter_next(
    env: &mut Env<'_, '_>,
    iter: IterId,
    target: BlockId,
    val: LocalId,
    key: Option<LocalId>,
) -> Result {
    let cur_val = env.loc_raw(val)?;
    let cur_key = key.map(|k| env.loc_raw(k)).transpose()?;

    let done = match env.iter(iter)?.clone() {
        IterState::Unknown => {
            env.set_loc(val, Type::INIT_CELL)?;
            if let Some(key) = key {
                env.set_loc(key, Type::INIT_CELL)?;
            }
            false
        }
        IterState::Tracked(ity) => {
            if !ity.may_throw_on_next {
                env.nothrow();
            }
            match ity.count {
                // The first element was visited by the init.
                IterCount::Empty | IterCount::Single | IterCount::ZeroOrOne => true,
                IterCount::NonEmpty | IterCount::Any => {
                    env.set_loc(val, ity.value)?;
                    if let Some(key) = key {
                        env.set_loc(key, ity.key)?;
                    }
                    false
                }
            }
        }
    };
    if done {
        env.jmp_nevertaken();
        env.free_iter(iter)?;
        return Ok(Effect::Direct);
    }

    env.propagate(target);

    env.free_iter(iter)?;
    env.set_loc_raw(val, cur_val)?;
    if let (Some(key), Some(cur_key)) = (key, cur_key) {
        env.set_loc_raw(key, cur_key)?;
    }
    Ok(Effect::Direct)
}

/// Mutable (`MIter*`) and weak (`WIter*`) iteration. `val_ty` is what the
/// value local holds inside the body.
fn iter_loop_opaque(
    env: &mut Env<'_, '_>,
    target: BlockId,
    val: LocalId,
    key: Option<LocalId>,
    val_ty: Type,
) -> Result {
    env.propagate(target);
    env.set_loc_raw(val, val_ty)?;
    if let Some(key) = key {
        env.set_loc(key, Type::INIT_CELL)?;
    }
    Ok(Effect::Direct)
}

pub(super) fn miter_init(
    env: &mut Env<'_, '_>,
    target: BlockId,
    val: LocalId,
    key: Option<LocalId>,
) -> Result {
    env.pop()?;
    // The value local is rebound to each element in turn.
    env.unbind_local_static(val);
    iter_loop_opaque(env, target, val, key, Type::REF)
}

pub(super) fn miter_next(
    env: &mut Env<'_, '_>,
    target: BlockId,
    val: LocalId,
    key: Option<LocalId>,
) -> Result {
    env.unbind_local_static(val);
    iter_loop_opaque(env, target, val, key, Type::REF)
}

/// The value may be bound by reference or copied, depending on the source.
pub(super) fn witer_init(
    env: &mut Env<'_, '_>,
    target: BlockId,
    val: LocalId,
    key: Option<LocalId>,
) -> Result {
    env.pop()?;
    iter_loop_opaque(env, target, val, key, Type::INIT_GEN)
}

pub(super) fn witer_next(
    env: &mut Env<'_, '_>,
    target: BlockId,
    val: LocalId,
    key: Option<LocalId>,
) -> Result {
    iter_loop_opaque(env, target, val, key, Type::INIT_GEN)
}

/// `IterFree`, `MIterFree` and `CIterFree`.
pub(super) fn iter_free(env: &mut Env<'_, '_>, iter: IterId) -> Result {
    env.nothrow();
    env.free_iter(iter)?;
    Ok(Effect::Direct)
}

pub(super) fn iter_break(
    env: &mut Env<'_, '_>,
    target: BlockId,
    iters: &[(IterKind, IterId)],
) -> Result {
    for (_, iter) in iters {
        env.free_iter(*iter)?;
    }
    env.propagate(target);
    Ok(Effect::Direct)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{BlockId, Bytecode, IterId, IterKind, LocalId};
    use hhbbc_types::{ArrKind, ArrayData, Cell, Lattice, Type};

    use crate::handlers::testing::Harness;
    use crate::state::IterState;

    fn packed(values: &[i64]) -> Type {
        let arr = ArrayData::packed(ArrKind::Vec, values.iter().map(|v| Cell::Int(*v)))
            .expect("packed literal");
        Type::aval(arr)
    }

    fn init() -> Bytecode {
        Bytecode::IterInitK {
            iter: IterId(0),
            target: BlockId(9),
            val: LocalId(0),
            key: LocalId(1),
        }
    }

    fn next() -> Bytecode {
        Bytecode::IterNext {
            iter: IterId(0),
            target: BlockId(2),
            val: LocalId(0),
        }
    }

    // ------------------------------------------------------------------------
    // Init
    // ------------------------------------------------------------------------

    #[test]
    fn test_init_over_empty_array_skips_the_loop() {
        let mut h = Harness::new().with_fallthrough(BlockId(1));
        h.push(packed(&[]));
        let flags = h.step(init());
        assert_eq!(flags.jmp_dest, Some(BlockId(9)));
        assert_eq!(h.propagated_blocks(), vec![BlockId(9)]);
        assert!(!flags.was_pei);
    }

    #[test]
    fn test_init_over_known_array_enters_the_loop() {
        let mut h = Harness::new().with_fallthrough(BlockId(1));
        h.push(packed(&[3, 4]));
        let flags = h.step(init());
        assert_eq!(flags.jmp_dest, Some(BlockId(1)));
        assert!(h.propagated.is_empty());
        assert_eq!(h.state.locals[0], Type::ival(3).join(&Type::ival(4)));
        assert_eq!(h.state.locals[1], Type::ival(0).join(&Type::ival(1)));
        assert!(matches!(h.state.iters[0], IterState::Tracked(_)));
    }

    #[test]
    fn test_init_over_unknown_vec_takes_both_edges() {
        let mut h = Harness::new().with_fallthrough(BlockId(1));
        h.push(Type::arr_of(ArrKind::Vec));
        let flags = h.step(init());
        assert_eq!(flags.jmp_dest, None);
        let (target, exit) = &h.propagated[0];
        assert_eq!(*target, BlockId(9));
        let exit = exit.as_ref().expect("state");
        assert_eq!(exit.iters[0], IterState::Unknown);
        assert_eq!(h.state.locals[1], Type::INT);
    }

    // ------------------------------------------------------------------------
    // Next
    // ------------------------------------------------------------------------

    #[test]
    fn test_next_after_single_element_leaves_the_loop() {
        let mut h = Harness::new().with_fallthrough(BlockId(1));
        h.push(packed(&[7]));
        h.step(init());
        let flags = h.step(next());
        assert_eq!(flags.jmp_dest, Some(BlockId(1)));
        assert!(h.propagated.is_empty());
        assert_eq!(h.state.iters[0], IterState::Unknown);
    }

    #[test]
    fn test_next_on_unknown_iterator_restores_locals_on_exit() {
        let mut h = Harness::new().with_fallthrough(BlockId(1));
        h.set_local(0, Type::INT);
        h.step(next());
        let (_, body) = &h.propagated[0];
        assert_eq!(body.as_ref().expect("state").locals[0], Type::INIT_CELL);
        assert_eq!(h.state.locals[0], Type::INT);
    }

    #[test]
    fn test_iter_break_frees_iterators() {
        let mut h = Harness::new().with_fallthrough(BlockId(1));
        h.push(packed(&[1, 2]));
        h.step(init());
        h.step(Bytecode::IterBreak {
            target: BlockId(5),
            iters: vec![(IterKind::Iter, IterId(0))],
        });
        let (target, state) = &h.propagated[0];
        assert_eq!(*target, BlockId(5));
        assert_eq!(state.as_ref().expect("state").iters[0], IterState::Unknown);
    }

    #[test]
    fn test_bad_iterator_is_an_error() {
        let mut h = Harness::new();
        insta::assert_snapshot!(
            h.try_step(Bytecode::IterFree { iter: IterId(9) }).unwrap_err(),
            @"iterator I:9 out of range"
        );
    }
}

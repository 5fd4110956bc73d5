//! Equality and ordering comparisons.

use hhbbc_types::{Bits, Cell, CellOp, Type, cell_same, type_nsame, type_same};

use super::{Result, eval};
use crate::env::Env;
use crate::error::InterpError;
use crate::flags::Effect;
use crate::state::StackEquiv;

/// Could the value not be a known non-NaN constant?
fn could_be_nan(v: Option<&Cell>) -> bool {
    match v {
        Some(Cell::Dbl(d)) => d.is_nan(),
        Some(_) => false,
        None => true,
    }
}

/// Result of `===` (or `!==` with `nsame`) between the top two stack values,
/// without popping them.
///
/// Two reads of one location are identical unless both could be a NaN
/// double, which is not identical to itself.
pub(crate) fn resolve_same(env: &Env<'_, '_>, nsame: bool) -> Result<Type, InterpError> {
    let l1 = env.top_equiv(0)?;
    let t1 = env.top(0)?;
    let l2 = env.top_equiv(1)?;
    let t2 = env.top(1)?;
    let (v1, v2) = (t1.tv(), t2.tv());

    let same_location = match (l1, l2) {
        (StackEquiv::DupTop, _) => true,
        (StackEquiv::Local(a), StackEquiv::Local(b)) => env.state().locals_equivalent(a, b),
        _ => false,
    };
    if same_location {
        let nan_possible = t1.could_be_bits(Bits::DBL)
            && t2.could_be_bits(Bits::DBL)
            && could_be_nan(v1.as_ref())
            && could_be_nan(v2.as_ref());
        if !nan_possible {
            return Ok(if nsame { Type::FALSE } else { Type::TRUE });
        }
    }

    if let (Some(v1), Some(v2)) = (&v1, &v2) {
        return Ok(if cell_same(v2, v1) != nsame {
            Type::TRUE
        } else {
            Type::FALSE
        });
    }

    Ok(if nsame {
        type_nsame(t1, t2)
    } else {
        type_same(t1, t2)
    })
}

fn could_be_hack_arr(t: &Type) -> bool {
    t.could_be_bits(Bits::VEC | Bits::DICT | Bits::KEYSET)
}

/// Comparing a PHP array with a hack array raises a notice when the
/// compatibility notices are on.
fn might_warn(env: &Env<'_, '_>) -> Result<bool, InterpError> {
    if !env.options().hack_arr_compat_notices {
        return Ok(false);
    }
    let (t1, t2) = (env.top(0)?, env.top(1)?);
    Ok((t1.could_be_bits(Bits::ARR) && could_be_hack_arr(t2))
        || (could_be_hack_arr(t1) && t2.could_be_bits(Bits::ARR)))
}

/// `Same` and `NSame`.
pub(super) fn same(env: &mut Env<'_, '_>, nsame: bool) -> Result {
    let result = resolve_same(env, nsame)?;
    let warn = might_warn(env)?;
    env.discard(2)?;
    if !warn {
        env.nothrow();
        env.constprop();
    }
    env.push(result);
    Ok(Effect::Direct)
}

/// `Eq` and `Neq`: identical operands are also equal.
pub(super) fn eq(env: &mut Env<'_, '_>, neq: bool) -> Result {
    if resolve_same(env, false)? == Type::TRUE {
        if !might_warn(env)? {
            env.constprop();
        }
        env.discard(2)?;
        env.push(if neq { Type::FALSE } else { Type::TRUE });
        return Ok(Effect::Direct);
    }
    bin_op_bool(env, if neq { CellOp::Neq } else { CellOp::Eq })
}

/// A comparison producing a boolean: `Lt`, `Lte`, `Gt`, `Gte`, `Xor` and
/// the fallback of `Eq`/`Neq`.
pub(super) fn bin_op_bool(env: &mut Env<'_, '_>, op: CellOp) -> Result {
    let t1 = env.pop()?;
    let t2 = env.pop()?;
    match eval(env, op, &[&t2, &t1]) {
        Some(out) => {
            env.constprop();
            env.push(out);
        }
        None => env.push(Type::BOOL),
    }
    Ok(Effect::Direct)
}

pub(super) fn cmp(env: &mut Env<'_, '_>) -> Result {
    let t1 = env.pop()?;
    let t2 = env.pop()?;
    match eval(env, CellOp::Cmp, &[&t2, &t1]) {
        Some(out) => {
            env.constprop();
            env.push(out);
        }
        None => env.push(Type::INT),
    }
    Ok(Effect::Direct)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{Bytecode, LocalId};
    use hhbbc_types::{Lattice, Type};

    use crate::handlers::testing::Harness;

    fn cget(loc: u32) -> Bytecode {
        Bytecode::CGetL { loc: LocalId(loc) }
    }

    #[test]
    fn test_same_local_twice_is_same() {
        let mut h = Harness::new();
        h.set_local(0, Type::INT);
        h.step(cget(0));
        h.step(cget(0));
        h.step(Bytecode::Same);
        assert_eq!(h.top(), Type::TRUE);
    }

    #[test]
    fn test_same_local_double_may_be_nan() {
        let mut h = Harness::new();
        h.set_local(0, Type::DBL);
        h.step(cget(0));
        h.step(cget(0));
        h.step(Bytecode::Same);
        assert_eq!(h.top(), Type::BOOL);
    }

    #[test]
    fn test_same_known_double_is_not_nan() {
        let mut h = Harness::new();
        h.set_local(0, Type::dval(1.5));
        h.step(cget(0));
        h.step(cget(0));
        h.step(Bytecode::NSame);
        assert_eq!(h.top(), Type::FALSE);
    }

    #[test]
    fn test_same_of_disjoint_types() {
        let mut h = Harness::new();
        h.push(Type::INT);
        h.push(Type::STR);
        let flags = h.step(Bytecode::Same);
        assert!(!flags.was_pei);
        assert_eq!(h.top(), Type::FALSE);
    }

    #[test]
    fn test_eq_of_constants() {
        let mut h = Harness::new();
        h.push(Type::ival(1));
        h.push(Type::sval("1"));
        let flags = h.step(Bytecode::Eq);
        assert!(flags.can_const_prop);
        assert_eq!(h.top(), Type::TRUE);
    }

    #[test]
    fn test_lt_of_unknowns() {
        let mut h = Harness::new();
        h.push(Type::INT);
        h.push(Type::INT.join(&Type::DBL));
        h.step(Bytecode::Lt);
        assert_eq!(h.top(), Type::BOOL);
    }

    #[test]
    fn test_hack_array_notice_blocks_folding() {
        let mut h = Harness::new();
        h.options.hack_arr_compat_notices = true;
        h.push(Type::ARR);
        h.push(Type::VEC);
        let flags = h.step(Bytecode::Same);
        assert!(flags.was_pei);
        assert_eq!(h.top(), Type::FALSE);
    }
}

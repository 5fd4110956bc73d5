//! Reads and writes of locals, globals and static locals.

use hhbbc_bc::{Bytecode, ClsRefSlotId, IncDecOp, LocalId, SetOpOp};
use hhbbc_types::{ArithOp, BitOp, Bits, Cell, CellOp, Type, type_arith, type_bit};

use super::{Result, constant_bytecode, named_local, reduce};
use crate::env::Env;
use crate::error::InterpError;
use crate::flags::Effect;
use crate::state::StackEquiv;
use crate::step::impl_vec;

// ----------------------------------------------------------------------------
// Reads
// ----------------------------------------------------------------------------

pub(super) fn cget_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    if !env.loc_could_be_uninit(loc)? {
        env.nothrow();
        env.constprop();
    }
    let ty = env.loc_as_cell(loc)?;
    env.push_equiv(ty, StackEquiv::Local(loc));
    Ok(Effect::Direct)
}

pub(super) fn cget_quiet_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    env.nothrow();
    env.constprop();
    let ty = env.loc_as_cell(loc)?;
    env.push_equiv(ty, StackEquiv::Local(loc));
    Ok(Effect::Direct)
}

pub(super) fn cuget_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    let mut ty = env.loc_raw(loc)?;
    if ty.subtype_of_bits(Bits::UNINIT) {
        return reduce([Bytecode::NullUninit]);
    }
    env.nothrow();
    if !ty.could_be_bits(Bits::UNINIT) {
        env.constprop();
    }
    if !ty.subtype_of_bits(Bits::CELL) {
        ty = Type::CELL;
    }
    env.push_equiv(ty, StackEquiv::Local(loc));
    Ok(Effect::Direct)
}

/// Move a local onto the stack, leaving it unset.
pub(super) fn push_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    if let Some(v) = env.loc_raw(loc)?.tv() {
        return reduce([constant_bytecode(&v), Bytecode::UnsetL { loc }]);
    }
    impl_vec(
        env,
        false,
        &[Bytecode::CGetL { loc }, Bytecode::UnsetL { loc }],
    )?;
    Ok(Effect::Direct)
}

/// Push the local below the current top.
pub(super) fn cget_l2(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    if !env.loc_could_be_uninit(loc)? {
        env.effect_free();
    }
    let ty = env.loc_as_cell(loc)?;
    let top = env.pop_elem()?;
    let top_equiv = match top.equiv {
        StackEquiv::DupTop => StackEquiv::None,
        e => e,
    };
    env.push_equiv(ty, StackEquiv::Local(loc));
    env.push_equiv(top.ty, top_equiv);
    Ok(Effect::Direct)
}

/// `CGetN` and `CGetQuietN`.
pub(super) fn cget_n(env: &mut Env<'_, '_>, quiet: bool) -> Result {
    if let Some(loc) = named_local(env, env.top(0)?) {
        let get = if quiet {
            Bytecode::CGetQuietL { loc }
        } else {
            Bytecode::CGetL { loc }
        };
        return reduce([Bytecode::PopC, get]);
    }
    env.may_use_vv();
    env.pop()?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

/// `CGetG`, `CGetQuietG` and `IncDecG`: anything may be stored in a global.
pub(super) fn global_read(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn vget_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    env.nothrow();
    env.set_loc_raw(loc, Type::REF)?;
    env.push(Type::REF);
    Ok(Effect::Direct)
}

pub(super) fn vget_n(env: &mut Env<'_, '_>) -> Result {
    if let Some(loc) = named_local(env, env.top(0)?) {
        return reduce([Bytecode::PopC, Bytecode::VGetL { loc }]);
    }
    env.pop()?;
    env.box_unknown_local();
    env.may_use_vv();
    env.push(Type::REF);
    Ok(Effect::Direct)
}

pub(super) fn vget_g(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.push(Type::REF);
    Ok(Effect::Direct)
}

fn cls_ref_get(env: &mut Env<'_, '_>, t: Type, slot: ClsRefSlotId) -> Result {
    let cls = if t.subtype_of_bits(Bits::OBJ) {
        env.nothrow();
        t.obj_to_cls()
    } else {
        match t.tv() {
            Some(Cell::Str(name)) => {
                let ctx = env.ctx();
                env.index()
                    .resolve_class(&ctx, &name)
                    .map_or(Type::CLS, Type::cls_exact)
            }
            _ => Type::CLS,
        }
    };
    env.put_cls_ref_slot(slot, cls)?;
    Ok(Effect::Direct)
}

pub(super) fn cls_ref_get_l(env: &mut Env<'_, '_>, loc: LocalId, slot: ClsRefSlotId) -> Result {
    let t = env.loc_as_cell(loc)?;
    cls_ref_get(env, t, slot)
}

pub(super) fn cls_ref_get_c(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let t = env.pop()?;
    cls_ref_get(env, t, slot)
}

// ----------------------------------------------------------------------------
// Writes
// ----------------------------------------------------------------------------

/// Pop the top of the stack into `loc`, returning the stored type and the
/// local it is known to equal. `None` when the local already holds that
/// very value; nothing is changed then.
fn move_to_loc(env: &mut Env<'_, '_>, loc: LocalId) -> Result<Option<(Type, Option<LocalId>)>, InterpError> {
    env.nothrow();
    let mut equiv = env.top_local(0);
    if !env.loc_raw(loc)?.could_be_bits(Bits::REF) {
        match equiv {
            Some(e) if e == loc || env.state().locals_equivalent(e, loc) => {
                // Equivalence ignores Uninit, so compare the types too.
                if env.loc_raw(loc)? == *env.top(0)? {
                    return Ok(None);
                }
            }
            Some(_) => {}
            None => equiv = Some(loc),
        }
    }
    let val = env.pop()?;
    env.set_loc(loc, val.clone())?;
    if let Some(e) = equiv.filter(|e| *e != loc) {
        env.add_loc_equiv(loc, e);
    }
    Ok(Some((val, equiv)))
}

pub(super) fn pop_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    match move_to_loc(env, loc)? {
        Some(_) => Ok(Effect::Direct),
        None => reduce([Bytecode::PopC]),
    }
}

pub(super) fn set_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    match move_to_loc(env, loc)? {
        Some((val, equiv)) => {
            env.push_equiv(val, equiv.map_or(StackEquiv::None, StackEquiv::Local));
            Ok(Effect::Direct)
        }
        None => reduce([Bytecode::Nop]),
    }
}

pub(super) fn set_n(env: &mut Env<'_, '_>) -> Result {
    let t1 = env.pop()?;
    let t2 = env.pop()?;
    match named_local(env, &t2) {
        Some(loc) => env.set_loc(loc, t1.clone())?,
        None => env.lose_non_ref_local_types(),
    }
    env.may_use_vv();
    env.push(t1);
    Ok(Effect::Direct)
}

/// `SetG` and `BindG`: the value stays on the stack.
pub(super) fn global_write(env: &mut Env<'_, '_>) -> Result {
    let t1 = env.pop()?;
    env.pop()?;
    env.push(t1);
    Ok(Effect::Direct)
}

fn set_op_arith(op: SetOpOp) -> Option<ArithOp> {
    Some(match op {
        SetOpOp::PlusEqual => ArithOp::Add,
        SetOpOp::MinusEqual => ArithOp::Sub,
        SetOpOp::MulEqual => ArithOp::Mul,
        SetOpOp::DivEqual => ArithOp::Div,
        SetOpOp::PowEqual => ArithOp::Pow,
        SetOpOp::ModEqual => ArithOp::Mod,
        SetOpOp::PlusEqualO => ArithOp::AddO,
        SetOpOp::MinusEqualO => ArithOp::SubO,
        SetOpOp::MulEqualO => ArithOp::MulO,
        _ => return None,
    })
}

fn set_op_bit(op: SetOpOp) -> Option<BitOp> {
    Some(match op {
        SetOpOp::AndEqual => BitOp::And,
        SetOpOp::OrEqual => BitOp::Or,
        SetOpOp::XorEqual => BitOp::Xor,
        SetOpOp::SlEqual => BitOp::Shl,
        SetOpOp::SrEqual => BitOp::Shr,
        _ => return None,
    })
}

fn set_op_cell_op(op: SetOpOp) -> CellOp {
    match op {
        SetOpOp::PlusEqual => CellOp::Add,
        SetOpOp::MinusEqual => CellOp::Sub,
        SetOpOp::MulEqual => CellOp::Mul,
        SetOpOp::ConcatEqual => CellOp::Concat,
        SetOpOp::DivEqual => CellOp::Div,
        SetOpOp::PowEqual => CellOp::Pow,
        SetOpOp::ModEqual => CellOp::Mod,
        SetOpOp::AndEqual => CellOp::BitAnd,
        SetOpOp::OrEqual => CellOp::BitOr,
        SetOpOp::XorEqual => CellOp::BitXor,
        SetOpOp::SlEqual => CellOp::Shl,
        SetOpOp::SrEqual => CellOp::Shr,
        SetOpOp::PlusEqualO => CellOp::AddO,
        SetOpOp::MinusEqualO => CellOp::SubO,
        SetOpOp::MulEqualO => CellOp::MulO,
    }
}

/// Type of `lhs op= rhs`.
fn type_set_op(op: SetOpOp, lhs: &Type, rhs: &Type) -> Type {
    if let Some(a) = set_op_arith(op) {
        return type_arith(a, lhs, rhs);
    }
    if let Some(b) = set_op_bit(op) {
        return type_bit(b, lhs, rhs);
    }
    Type::STR
}

pub(super) fn set_op_l(env: &mut Env<'_, '_>, loc: LocalId, op: SetOpOp) -> Result {
    let t1 = env.pop()?;
    let lhs = env.loc_as_cell(loc)?;
    let result = match (lhs.tv(), t1.tv()) {
        (Some(l), Some(r)) => env
            .oracle()
            .eval(set_op_cell_op(op), &[l, r])
            .map_or(Type::INIT_CELL, |c| Type::from_cell(&c).loosen_staticness()),
        _ => type_set_op(op, &lhs, &t1),
    };
    env.set_loc(loc, result.clone())?;
    env.push(result);
    Ok(Effect::Direct)
}

/// `SetOpN` and `IncDecN` on an unknown name may write any local.
fn write_unknown_local(env: &mut Env<'_, '_>) {
    env.lose_non_ref_local_types();
    env.may_use_vv();
    env.push(Type::INIT_CELL);
}

pub(super) fn set_op_n(env: &mut Env<'_, '_>) -> Result {
    env.discard(2)?;
    write_unknown_local(env);
    Ok(Effect::Direct)
}

pub(super) fn set_op_g(env: &mut Env<'_, '_>) -> Result {
    env.discard(2)?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

fn is_pre(op: IncDecOp) -> bool {
    matches!(
        op,
        IncDecOp::PreInc | IncDecOp::PreDec | IncDecOp::PreIncO | IncDecOp::PreDecO
    )
}

fn is_inc(op: IncDecOp) -> bool {
    matches!(
        op,
        IncDecOp::PreInc | IncDecOp::PostInc | IncDecOp::PreIncO | IncDecOp::PostIncO
    )
}

fn is_overflow_checked(op: IncDecOp) -> bool {
    matches!(
        op,
        IncDecOp::PreIncO | IncDecOp::PostIncO | IncDecOp::PreDecO | IncDecOp::PostDecO
    )
}

/// Type of a local after `++` or `--`.
fn type_inc_dec(env: &Env<'_, '_>, op: IncDecOp, t: &Type) -> Type {
    let arith = match (is_inc(op), is_overflow_checked(op)) {
        (true, false) => ArithOp::Add,
        (true, true) => ArithOp::AddO,
        (false, false) => ArithOp::Sub,
        (false, true) => ArithOp::SubO,
    };
    if let Some(v @ (Cell::Int(_) | Cell::Dbl(_))) = t.tv() {
        let cell_op = match arith {
            ArithOp::Add => CellOp::Add,
            ArithOp::AddO => CellOp::AddO,
            ArithOp::Sub => CellOp::Sub,
            _ => CellOp::SubO,
        };
        if let Some(c) = env.oracle().eval(cell_op, &[v, Cell::Int(1)]) {
            return Type::from_cell(&c);
        }
    }
    if t.subtype_of_bits(Bits::NUM) {
        return type_arith(arith, t, &Type::ival(1));
    }
    if t.subtype_of_bits(Bits::NULL) {
        // Incrementing null gives 1, decrementing it leaves null.
        return if is_inc(op) {
            Type::ival(1)
        } else {
            Type::INIT_NULL
        };
    }
    Type::INIT_CELL
}

pub(super) fn inc_dec_l(env: &mut Env<'_, '_>, loc: LocalId, op: IncDecOp) -> Result {
    let old = env.loc_as_cell(loc)?;
    let new = type_inc_dec(env, op, &old);
    // Incrementing a non-numeric string may exceed the maximum length.
    if !env.loc_could_be_uninit(loc)? && !old.could_be_bits(Bits::STR) {
        env.nothrow();
    }
    if is_pre(op) {
        env.set_loc(loc, new.clone())?;
        env.push(new);
    } else {
        env.push(old);
        env.set_loc(loc, new)?;
    }
    Ok(Effect::Direct)
}

pub(super) fn inc_dec_n(env: &mut Env<'_, '_>, op: IncDecOp) -> Result {
    if let Some(loc) = named_local(env, env.top(0)?) {
        return reduce([Bytecode::PopC, Bytecode::IncDecL { loc, op }]);
    }
    env.pop()?;
    write_unknown_local(env);
    Ok(Effect::Direct)
}

pub(super) fn bind_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    // Rebinding a local detaches it from its static first.
    env.unbind_local_static(loc);
    env.nothrow();
    let t1 = env.pop()?;
    env.set_loc_raw(loc, t1.clone())?;
    env.push(t1);
    Ok(Effect::Direct)
}

pub(super) fn bind_n(env: &mut Env<'_, '_>) -> Result {
    let t1 = env.pop()?;
    let t2 = env.pop()?;
    match named_local(env, &t2) {
        Some(loc) => {
            env.unbind_local_static(loc);
            env.set_loc_raw(loc, t1.clone())?;
        }
        None => env.box_unknown_local(),
    }
    env.may_use_vv();
    env.push(t1);
    Ok(Effect::Direct)
}

pub(super) fn unset_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    env.nothrow();
    env.set_loc_raw(loc, Type::UNINIT)?;
    Ok(Effect::Direct)
}

/// Unsetting by a name that converts to a string without user code is
/// nothrow.
fn name_conversion_nothrow(env: &mut Env<'_, '_>, name: &Type) {
    if !name.could_be_bits(Bits::OBJ | Bits::RES) {
        env.nothrow();
    }
}

pub(super) fn unset_n(env: &mut Env<'_, '_>) -> Result {
    if let Some(loc) = named_local(env, env.top(0)?) {
        return reduce([Bytecode::PopC, Bytecode::UnsetL { loc }]);
    }
    let t1 = env.pop()?;
    name_conversion_nothrow(env, &t1);
    env.unset_unknown_local();
    env.may_use_vv();
    Ok(Effect::Direct)
}

pub(super) fn unset_g(env: &mut Env<'_, '_>) -> Result {
    let t1 = env.pop()?;
    name_conversion_nothrow(env, &t1);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Static locals
// ----------------------------------------------------------------------------

/// The value static local `loc` is known to be bound to on entry. Never
/// known in memoize wrappers and closure bodies, whose statics are shared.
pub(crate) fn known_static_local(env: &Env<'_, '_>, loc: LocalId) -> Option<Cell> {
    let attrs = env.ctx().func.attrs;
    if attrs.is_memoize_wrapper || attrs.is_closure_body {
        return None;
    }
    env.interp.collect.local_static_type(loc).tv()
}

pub(super) fn static_loc_check(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    if let Some(v) = known_static_local(env, loc) {
        env.use_local_static(loc);
        return reduce([
            constant_bytecode(&v),
            Bytecode::SetL { loc },
            Bytecode::PopC,
            Bytecode::True,
        ]);
    }
    env.unbind_local_static(loc);
    env.set_loc_raw(loc, Type::GEN)?;
    env.maybe_bind_local_static(loc);
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

/// Rebind `loc` to its static, which may now also hold `init`. When the
/// static is a known constant, `loc` is set to it and the constant is
/// returned.
pub(crate) fn bind_static_local(
    env: &mut Env<'_, '_>,
    loc: LocalId,
    init: &Type,
) -> Result<Option<Cell>> {
    if env.is_volatile_local() {
        return Ok(None);
    }
    env.unbind_local_static(loc);
    env.set_loc_raw(loc, Type::REF)?;
    env.bind_local_static(loc, init);
    let known = known_static_local(env, loc);
    env.use_local_static(loc);
    if known.is_some() {
        let ty = env.collect().local_static_type(loc);
        env.set_loc_raw(loc, ty)?;
    }
    Ok(known)
}

/// `StaticLocDef` and `StaticLocInit`: bind the local to its static, which
/// is initialized from the top of the stack.
pub(super) fn static_loc_bind(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    let init = env.top(0)?.clone();
    if bind_static_local(env, loc, &init)?.is_some() {
        return reduce([Bytecode::SetL { loc }, Bytecode::PopC]);
    }
    env.pop()?;
    Ok(Effect::Direct)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{Bytecode, IncDecOp, LocalId, SetOpOp};
    use hhbbc_types::{Lattice, Type};

    use crate::handlers::testing::Harness;
    use crate::state::{LocalStaticBinding, StackEquiv};

    fn l(i: u32) -> LocalId {
        LocalId(i)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    #[test]
    fn test_cget_of_initialized_local() {
        let mut h = Harness::new();
        h.set_local(1, Type::ival(3));
        let flags = h.step(Bytecode::CGetL { loc: l(1) });
        assert!(!flags.was_pei);
        assert!(flags.can_const_prop);
        assert_eq!(h.top(), Type::ival(3));
        assert_eq!(h.state.stack[0].equiv, StackEquiv::Local(l(1)));
    }

    #[test]
    fn test_cget_of_uninit_local_warns() {
        let mut h = Harness::new();
        let flags = h.step(Bytecode::CGetL { loc: l(0) });
        assert!(flags.was_pei);
        assert_eq!(h.top(), Type::INIT_NULL);
    }

    #[test]
    fn test_cuget_of_uninit_local_reduces() {
        let mut h = Harness::new();
        let flags = h.step(Bytecode::CUGetL { loc: l(0) });
        assert_eq!(flags.strength_reduced, Some(vec![Bytecode::NullUninit]));
        assert_eq!(h.top(), Type::UNINIT);
    }

    #[test]
    fn test_push_l_of_constant() {
        let mut h = Harness::new();
        h.set_local(2, Type::sval("x"));
        let flags = h.step(Bytecode::PushL { loc: l(2) });
        assert_eq!(
            flags.strength_reduced,
            Some(vec![
                Bytecode::String { val: "x".into() },
                Bytecode::UnsetL { loc: l(2) },
            ])
        );
        assert_eq!(h.state.locals[2], Type::UNINIT);
    }

    #[test]
    fn test_cget_n_of_known_name() {
        let mut h = Harness::with_named_locals(&["a", "b"]);
        h.set_local(1, Type::INT);
        h.push(Type::sval("b"));
        let flags = h.step(Bytecode::CGetN);
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::PopC, Bytecode::CGetL { loc: l(1) }])
        );
        assert_eq!(h.top(), Type::INT);
    }

    #[test]
    fn test_cget_l2_swaps_under_top() {
        let mut h = Harness::new();
        h.set_local(0, Type::DBL);
        h.push(Type::INT);
        h.step(Bytecode::CGetL2 { loc: l(0) });
        assert_eq!(h.state.stack[0].ty, Type::DBL);
        assert_eq!(h.state.stack[1].ty, Type::INT);
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    #[test]
    fn test_set_l_links_locals() {
        let mut h = Harness::new();
        h.set_local(0, Type::INT);
        h.step(Bytecode::CGetL { loc: l(0) });
        h.step(Bytecode::SetL { loc: l(1) });
        assert_eq!(h.state.locals[1], Type::INT);
        assert!(h.state.locals_equivalent(l(0), l(1)));
        assert_eq!(h.state.stack[0].equiv, StackEquiv::Local(l(0)));
    }

    #[test]
    fn test_set_l_of_same_value_is_nop() {
        let mut h = Harness::new();
        h.set_local(0, Type::INT);
        h.step(Bytecode::CGetL { loc: l(0) });
        let flags = h.step(Bytecode::SetL { loc: l(0) });
        assert_eq!(flags.strength_reduced, Some(vec![Bytecode::Nop]));
        assert_eq!(h.state.stack.len(), 1);
    }

    #[test]
    fn test_pop_l_of_same_value_is_pop() {
        let mut h = Harness::new();
        h.set_local(0, Type::STR);
        h.step(Bytecode::CGetL { loc: l(0) });
        let flags = h.step(Bytecode::PopL { loc: l(0) });
        assert_eq!(flags.strength_reduced, Some(vec![Bytecode::PopC]));
        assert!(h.state.stack.is_empty());
    }

    #[test]
    fn test_write_breaks_equivalence() {
        let mut h = Harness::new();
        h.set_local(0, Type::INT);
        h.step(Bytecode::CGetL { loc: l(0) });
        h.step(Bytecode::PopL { loc: l(1) });
        h.push(Type::STR);
        h.step(Bytecode::PopL { loc: l(0) });
        assert!(!h.state.locals_equivalent(l(0), l(1)));
        assert_eq!(h.state.locals[1], Type::INT);
    }

    #[test]
    fn test_set_op_of_constants() {
        let mut h = Harness::new();
        h.set_local(0, Type::ival(5));
        h.push(Type::ival(2));
        h.step(Bytecode::SetOpL { loc: l(0), op: SetOpOp::MulEqual });
        assert_eq!(h.top(), Type::ival(10));
        assert_eq!(h.state.locals[0], Type::ival(10));
    }

    #[test]
    fn test_concat_assign_is_not_static() {
        let mut h = Harness::new();
        h.set_local(0, Type::sval("a"));
        h.push(Type::sval("b"));
        h.step(Bytecode::SetOpL { loc: l(0), op: SetOpOp::ConcatEqual });
        assert_eq!(h.state.locals[0], Type::STR);
    }

    #[test]
    fn test_post_increment_pushes_old_value() {
        let mut h = Harness::new();
        h.set_local(0, Type::ival(1));
        let flags = h.step(Bytecode::IncDecL { loc: l(0), op: IncDecOp::PostInc });
        assert!(!flags.was_pei);
        assert_eq!(h.top(), Type::ival(1));
        assert_eq!(h.state.locals[0], Type::ival(2));
    }

    #[test]
    fn test_unset_n_of_unknown_name() {
        let mut h = Harness::new();
        h.set_local(0, Type::INT);
        h.push(Type::STR);
        h.step(Bytecode::UnsetN);
        assert_eq!(h.state.locals[0], Type::INT.join(&Type::UNINIT));
        assert!(h.collect.may_use_vv);
    }

    #[test]
    fn test_bind_l_stores_reference() {
        let mut h = Harness::new();
        h.push(Type::REF);
        h.step(Bytecode::BindL { loc: l(3) });
        assert_eq!(h.state.locals[3], Type::REF);
    }

    // ------------------------------------------------------------------------
    // Static locals
    // ------------------------------------------------------------------------

    #[test]
    fn test_known_static_local_check_reduces() {
        let mut h = Harness::new();
        h.collect.local_static_types = vec![Type::ival(7)];
        let flags = h.step(Bytecode::StaticLocCheck { loc: l(0), name: "s".into() });
        assert_eq!(
            flags.strength_reduced,
            Some(vec![
                Bytecode::Int { val: 7 },
                Bytecode::SetL { loc: l(0) },
                Bytecode::PopC,
                Bytecode::True,
            ])
        );
        assert_eq!(h.state.locals[0], Type::ival(7));
        assert_eq!(h.top(), Type::TRUE);
        assert_eq!(flags.used_local_statics.get(&l(0)), Some(&Type::ival(7)));
    }

    #[test]
    fn test_unknown_static_local_check() {
        let mut h = Harness::new();
        let flags = h.step(Bytecode::StaticLocCheck { loc: l(0), name: "s".into() });
        assert_eq!(h.state.locals[0], Type::GEN);
        assert_eq!(h.top(), Type::BOOL);
        assert_eq!(h.state.local_static_bindings[0], LocalStaticBinding::Maybe);
        assert!(flags.used_local_statics.is_empty());
    }

    #[test]
    fn test_static_loc_init_records_its_value() {
        let mut h = Harness::new();
        h.push(Type::ival(3));
        let flags = h.step(Bytecode::StaticLocInit { loc: l(1), name: "s".into() });
        assert_eq!(h.collect.local_static_types, vec![Type::BOTTOM, Type::ival(3)]);
        assert_eq!(flags.used_local_statics.get(&l(1)), Some(&Type::ival(3)));
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::SetL { loc: l(1) }, Bytecode::PopC])
        );
        assert_eq!(h.state.locals[1], Type::ival(3));
        assert_eq!(h.state.local_static_bindings[1], LocalStaticBinding::Bound);
        assert!(h.state.stack.is_empty());
    }

    #[test]
    fn test_writes_to_a_bound_local_reach_its_static() {
        let mut h = Harness::new();
        h.collect.local_static_types = vec![Type::INT];
        h.push(Type::ival(3));
        let flags = h.step(Bytecode::StaticLocDef { loc: l(0), name: "s".into() });
        assert_eq!(h.state.locals[0], Type::REF);
        assert_eq!(flags.used_local_statics.get(&l(0)), Some(&Type::INT));
        assert_eq!(flags.strength_reduced, None);

        h.push(Type::sval("x"));
        h.step(Bytecode::SetL { loc: l(0) });
        assert_eq!(h.state.locals[0], Type::REF);
        assert_eq!(h.collect.local_static_types[0], Type::INT.join(&Type::sval("x")));

        h.step(Bytecode::VGetL { loc: l(0) });
        assert_eq!(h.collect.local_static_types[0], Type::GEN);
    }

    #[test]
    fn test_unset_and_rebind_detach_the_static() {
        let mut h = Harness::new();
        h.collect.local_static_types = vec![Type::INT, Type::INT];
        for loc in [l(0), l(1)] {
            h.push(Type::ival(3));
            h.step(Bytecode::StaticLocInit { loc, name: "s".into() });
        }

        h.step(Bytecode::UnsetL { loc: l(0) });
        h.push(Type::REF);
        h.step(Bytecode::BindL { loc: l(1) });
        assert_eq!(
            h.state.local_static_bindings[..2],
            [LocalStaticBinding::None, LocalStaticBinding::None]
        );

        h.push(Type::STR);
        h.step(Bytecode::SetL { loc: l(0) });
        assert_eq!(h.collect.local_static_types, vec![Type::INT, Type::INT]);
    }

    #[test]
    fn test_statics_are_not_bound_in_functions_using_the_var_env() {
        let mut h = Harness::new().with_attrs(hhbbc_bc::FuncAttrs {
            may_use_vv: true,
            ..Default::default()
        });
        h.push(Type::ival(3));
        let flags = h.step(Bytecode::StaticLocInit { loc: l(0), name: "s".into() });
        assert!(h.collect.local_static_types.is_empty());
        assert!(flags.used_local_statics.is_empty());
        assert_eq!(h.state.local_static_bindings[0], LocalStaticBinding::None);
    }
}

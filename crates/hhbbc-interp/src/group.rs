//! Instruction windows interpreted together.
//!
//! A test followed by a conditional jump can send a narrowed state down each
//! edge, which interpreting the two instructions separately cannot: the test
//! alone only pushes a boolean. Every window falls back to interpreting its
//! instructions one by one when there is nothing to narrow.

use hhbbc_bc::{BlockId, Bytecode, IsTypeOp, LocalId};
use hhbbc_types::{Bits, Lattice, Type};
use tracing::{debug, trace};

use crate::env::Env;
use crate::error::InterpError;
use crate::handlers::{cmp, locals, memo, query};
use crate::state::{StackEquiv, State};
use crate::step::impl_vec;

type Result<T> = std::result::Result<T, InterpError>;

#[derive(Clone, Copy, Debug)]
struct Jmp {
    target: BlockId,
    /// `JmpNZ`: the jump is taken when the tested value is truthy.
    nz: bool,
}

impl Jmp {
    fn of(bc: Option<&Bytecode>) -> Option<Jmp> {
        match bc? {
            Bytecode::JmpZ { target } => Some(Jmp {
                target: *target,
                nz: false,
            }),
            Bytecode::JmpNZ { target } => Some(Jmp {
                target: *target,
                nz: true,
            }),
            _ => None,
        }
    }
}

/// Interpret the window starting at `ops[0]` if it is one of the known
/// shapes, returning the number of instructions consumed.
pub(crate) fn interp_group(env: &mut Env<'_, '_>, ops: &[Bytecode]) -> Result<Option<usize>> {
    let Some(first) = ops.first() else {
        return Ok(None);
    };

    if let (Bytecode::MemoGet { .. }, Some(Bytecode::IsUninit), Some(jmp)) =
        (first, ops.get(1), Jmp::of(ops.get(2)))
    {
        trace!(window = %window(&ops[..3]), "group");
        memo_get(env, &ops[..3], jmp)?;
        return Ok(Some(3));
    }

    let Some(jmp) = Jmp::of(ops.get(1)) else {
        return Ok(None);
    };
    let pair = &ops[..2];
    let handled = match first {
        Bytecode::InstanceOfD { cls } => Some(instance_of_d(env, pair, cls, jmp)),
        Bytecode::IsTypeL { loc, op } => Some(is_type_l(env, pair, *loc, *op, jmp)),
        Bytecode::IsTypeC { op } => Some(is_type_c(env, pair, *op, jmp)),
        Bytecode::IsUninit => Some(is_uninit(env, jmp)),
        Bytecode::StaticLocCheck { loc, .. } => Some(static_loc_check(env, pair, *loc, jmp)),
        Bytecode::Same => Some(same(env, pair, false, jmp)),
        Bytecode::NSame => Some(same(env, pair, true, jmp)),
        _ => None,
    };
    match handled {
        Some(res) => {
            trace!(window = %window(pair), "group");
            res.map(|()| Some(2))
        }
        None => Ok(None),
    }
}

fn window(ops: &[Bytecode]) -> String {
    ops.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Interpret the window one instruction at a time.
fn bail(env: &mut Env<'_, '_>, ops: &[Bytecode], reason: &str) -> Result<()> {
    debug!(window = %window(ops), reason, "group bail-out");
    impl_vec(env, false, ops)
}

/// Send `loc` refined by `taken` down the jump and continue with it refined
/// by `fallthrough`. An edge whose refinement is empty is not followed.
pub(crate) fn refine_branch(
    env: &mut Env<'_, '_>,
    loc: StackEquiv,
    taken: &dyn Fn(&Type) -> Type,
    target: BlockId,
    fallthrough: &dyn Fn(&Type) -> Type,
) {
    let mut saved = env.state().clone();
    let target_reachable = env.refine_location(loc, taken);
    if !target_reachable {
        env.jmp_nevertaken();
    }
    // `saved` now holds the taken edge, the live state the untouched input.
    std::mem::swap(env.state_mut(), &mut saved);
    if env.refine_location(loc, fallthrough) {
        if target_reachable {
            env.propagate_state(target, &saved);
        }
    } else if target_reachable {
        env.propagate_state(target, &saved);
        env.jmp_setdest(target);
        *env.state_mut() = saved;
    } else {
        env.unreachable();
    }
}

// ----------------------------------------------------------------------------
// Type tests
// ----------------------------------------------------------------------------

/// Type of a location that passed `is_*` against `test`.
fn was_true(t: &Type, test: &Type) -> Type {
    if test.subtype_of_bits(Bits::UNINIT) {
        return Type::UNINIT;
    }
    if test.subtype_of_bits(Bits::NULL) {
        return match (t.could_be_bits(Bits::UNINIT), t.could_be_bits(Bits::INIT_NULL)) {
            (true, true) => Type::NULL,
            (true, false) => Type::UNINIT,
            (false, _) => Type::INIT_NULL,
        };
    }
    if t.is_opt() && t.unopt().subtype_of(test) {
        return t.unopt();
    }
    test.clone()
}

/// Type of a location that failed `is_*` against `test`.
fn was_false(t: &Type, test: &Type) -> Type {
    if test.subtype_of_bits(Bits::UNINIT) {
        return t.remove_uninit();
    }
    if test.subtype_of_bits(Bits::NULL) {
        let t = t.remove_uninit();
        return if t.is_opt() { t.unopt() } else { t };
    }
    if t.is_opt() && t.unopt().subtype_of(test) {
        return Type::INIT_NULL;
    }
    t.clone()
}

fn is_type_helper(
    env: &mut Env<'_, '_>,
    loc: StackEquiv,
    test: &Type,
    jmp: Jmp,
) {
    let pre = |t: &Type| if jmp.nz { was_true(t, test) } else { was_false(t, test) };
    let post = |t: &Type| if jmp.nz { was_false(t, test) } else { was_true(t, test) };
    refine_branch(env, loc, &pre, jmp.target, &post);
}

/// The tested value must be a plain value that may or may not pass.
fn worth_refining(val: &Type, test: &Type) -> bool {
    val.subtype_of_bits(Bits::CELL) && !val.subtype_of(test) && val.could_be(test)
}

fn is_type_l(
    env: &mut Env<'_, '_>,
    ops: &[Bytecode],
    loc: LocalId,
    op: IsTypeOp,
    jmp: Jmp,
) -> Result<()> {
    let Some(test) = query::type_of_istype(op) else {
        return bail(env, ops, "untyped test");
    };
    let val = env.loc_raw(loc)?;
    if !worth_refining(&val, &test) {
        return bail(env, ops, "test already decided");
    }
    if !env.loc_could_be_uninit(loc)? {
        env.nothrow();
    }
    is_type_helper(env, StackEquiv::Local(loc), &test, jmp);
    Ok(())
}

fn is_type_c(env: &mut Env<'_, '_>, ops: &[Bytecode], op: IsTypeOp, jmp: Jmp) -> Result<()> {
    let Some(test) = query::type_of_istype(op) else {
        return bail(env, ops, "untyped test");
    };
    let loc = env.top_equiv(0)?;
    if loc == StackEquiv::None {
        return bail(env, ops, "value has no location");
    }
    if !worth_refining(env.top(0)?, &test) {
        return bail(env, ops, "test already decided");
    }
    env.nothrow();
    env.pop()?;
    is_type_helper(env, loc, &test, jmp);
    Ok(())
}

/// Push the tested value, as `test` on the success edge and as `fail` on the
/// failure edge.
fn type_test_propagate(env: &mut Env<'_, '_>, val: Type, test: Type, fail: Type, jmp: Jmp) -> Result<()> {
    env.nothrow();
    let taken_on_success = jmp.nz;

    if val.subtype_of(&test) || fail.is_bottom() {
        env.push(val);
        if taken_on_success {
            env.jmp_setdest(jmp.target);
            env.propagate(jmp.target);
        } else {
            env.jmp_nevertaken();
        }
        return Ok(());
    }
    if !val.could_be(&test) {
        env.push(fail);
        if taken_on_success {
            env.jmp_nevertaken();
        } else {
            env.jmp_setdest(jmp.target);
            env.propagate(jmp.target);
        }
        return Ok(());
    }

    let (taken, not_taken) = if taken_on_success { (test, fail) } else { (fail, test) };
    env.push(taken);
    env.propagate(jmp.target);
    env.discard(1)?;
    env.push(not_taken);
    Ok(())
}

fn is_uninit(env: &mut Env<'_, '_>, jmp: Jmp) -> Result<()> {
    let val = env.pop()?;
    let fail = val.remove_uninit();
    type_test_propagate(env, val, Type::UNINIT, fail, jmp)
}

/// The memo cache holds either nothing or a result of the wrapped function.
fn memo_get(env: &mut Env<'_, '_>, ops: &[Bytecode], jmp: Jmp) -> Result<()> {
    impl_vec(env, false, &ops[..1])?;
    let val = env.pop()?;
    let fail = memo::memoize_impl_ret_type(env)?;
    type_test_propagate(env, val, Type::UNINIT, fail, jmp)
}

fn instance_of_d(env: &mut Env<'_, '_>, ops: &[Bytecode], cls: &str, jmp: Jmp) -> Result<()> {
    let loc = env.top_equiv(0)?;
    if loc == StackEquiv::None || query::interface_supports_non_objects(cls) {
        return bail(env, ops, "value has no location");
    }
    let ctx = env.ctx();
    let Some(rcls) = env.index().resolve_class(&ctx, cls) else {
        return bail(env, ops, "unresolved class");
    };
    let inst = Type::sub_obj(rcls);
    let val = env.top(0)?;
    if val.subtype_of(&inst) || !val.could_be(&inst) {
        return bail(env, ops, "test already decided");
    }

    env.pop()?;
    // Failing the test says nothing a type can express.
    let pre = |t: &Type| if jmp.nz { inst.clone() } else { t.clone() };
    let post = |t: &Type| if jmp.nz { t.clone() } else { inst.clone() };
    refine_branch(env, loc, &pre, jmp.target, &post);
    Ok(())
}

// ----------------------------------------------------------------------------
// Static locals
// ----------------------------------------------------------------------------

fn static_loc_check(env: &mut Env<'_, '_>, ops: &[Bytecode], loc: LocalId, jmp: Jmp) -> Result<()> {
    let taken_on_init = jmp.nz;
    let save: State = env.state().clone();
    if locals::bind_static_local(env, loc, &Type::BOTTOM)?.is_some() {
        return bail(env, ops, "static local is a known constant");
    }

    let never_bound = env
        .collect()
        .local_static_types
        .get(loc.index())
        .is_some_and(Type::is_bottom);
    if never_bound {
        if taken_on_init {
            *env.state_mut() = save;
            env.jmp_nevertaken();
        } else {
            env.propagate_state(jmp.target, &save);
            env.jmp_setdest(jmp.target);
        }
        return Ok(());
    }

    if taken_on_init {
        env.propagate(jmp.target);
        *env.state_mut() = save;
    } else {
        env.propagate_state(jmp.target, &save);
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Strict equality
// ----------------------------------------------------------------------------

/// Location of the top operand. A `DupTop` there names the other operand,
/// which is gone once both are popped.
fn top_operand_location(equiv: StackEquiv) -> Option<StackEquiv> {
    match equiv {
        StackEquiv::Local(_) => Some(equiv),
        _ => None,
    }
}

/// Location of the second operand. A `DupTop` there names the slot below
/// it, which is the top once both operands are popped.
fn second_operand_location(equiv: StackEquiv) -> Option<StackEquiv> {
    match equiv {
        StackEquiv::None => None,
        _ => Some(equiv),
    }
}

fn same(env: &mut Env<'_, '_>, ops: &[Bytecode], nsame: bool, jmp: Jmp) -> Result<()> {
    if cmp::resolve_same(env, false)? != Type::BOOL {
        return bail(env, ops, "comparison already decided");
    }
    let loc0 = top_operand_location(env.top_equiv(0)?);
    let loc1 = second_operand_location(env.top_equiv(1)?);
    if loc0.is_none() && loc1.is_none() {
        return bail(env, ops, "no operand has a location");
    }
    let ty0 = env.top(0)?.clone();
    let ty1 = env.top(1)?.clone();
    let (val0, val1) = (ty0.tv(), ty1.tv());
    if (val0.is_some() && val1.is_some())
        || (loc0.is_none() && val0.is_none() && ty1.subtype_of(&ty0))
        || (loc1.is_none() && val1.is_none() && ty0.subtype_of(&ty1))
    {
        return bail(env, ops, "nothing to learn");
    }

    let isect = ty0.meet(&ty1);
    env.discard(2)?;
    let operands = SameOperands { loc0, loc1, ty0, ty1, isect };

    let same_is_target = !nsame == jmp.nz;
    let save = env.state().clone();
    if same_is_target {
        operands.handle_same(env);
    } else {
        operands.handle_differ(env);
    }
    env.propagate(jmp.target);
    *env.state_mut() = save;
    if same_is_target {
        operands.handle_differ(env);
    } else {
        operands.handle_same(env);
    }
    Ok(())
}

struct SameOperands {
    loc0: Option<StackEquiv>,
    loc1: Option<StackEquiv>,
    ty0: Type,
    ty1: Type,
    isect: Type,
}

impl SameOperands {
    /// The operands were identical.
    fn handle_same(&self, env: &mut Env<'_, '_>) {
        if let (Some(StackEquiv::Local(l0)), Some(StackEquiv::Local(l1))) =
            (self.loc0, self.loc1)
        {
            let identity = |t: &Type| {
                t.subtype_of_bits(Bits::OBJ | Bits::INIT_NULL)
                    || t.subtype_of_bits(Bits::RES | Bits::INIT_NULL)
            };
            let uncounted =
                self.ty0.subtype_of_bits(Bits::UNC) && self.ty1.subtype_of_bits(Bits::UNC);
            if !env.state().locals_equivalent(l0, l1)
                && (identity(&self.ty0) || identity(&self.ty1) || uncounted)
            {
                for l in env.state().equivalent_locals(l0) {
                    env.add_loc_equiv(l, l1);
                }
            }
        }
        let Some(target) = self.loc1.or(self.loc0) else {
            return;
        };
        let isect = &self.isect;
        env.refine_location(target, &|ty: &Type| {
            if !ty.could_be_bits(Bits::UNINIT) || !isect.could_be_bits(Bits::NULL) {
                let narrowed = ty.meet(isect);
                if ty.subtype_of_bits(Bits::UNC) {
                    narrowed
                } else {
                    narrowed.loosen_staticness()
                }
            } else if isect.subtype_of_bits(Bits::NULL) {
                if ty.could_be_bits(Bits::INIT_NULL) {
                    Type::NULL
                } else {
                    Type::UNINIT
                }
            } else {
                ty.clone()
            }
        });
    }

    /// The operands differed.
    fn handle_differ(&self, env: &mut Env<'_, '_>) {
        differ_side(env, self.loc0, &self.ty1);
        differ_side(env, self.loc1, &self.ty0);
    }
}

/// A location known to differ from a value of type `other`. Only null and
/// the two booleans teach anything.
fn differ_side(env: &mut Env<'_, '_>, loc: Option<StackEquiv>, other: &Type) {
    let Some(loc) = loc else {
        return;
    };
    let other_is_null = other.subtype_of_bits(Bits::INIT_NULL) && !other.is_bottom();
    let other_is_bool = *other == Type::TRUE || *other == Type::FALSE;
    if !other_is_null && !other_is_bool {
        return;
    }
    env.refine_location(loc, &|ty: &Type| {
        if other_is_null {
            let t = ty.remove_uninit();
            if t.is_opt() { t.unopt() } else { t }
        } else if ty.subtype_of_bits(Bits::BOOL) {
            if *other == Type::TRUE { Type::FALSE } else { Type::TRUE }
        } else {
            ty.clone()
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_test_refinement() {
        let t = Type::INT.join(&Type::UNINIT);
        assert_eq!(was_true(&t, &Type::NULL), Type::UNINIT);
        assert_eq!(was_false(&t, &Type::NULL), Type::INT);

        let opt = Type::INT.opt();
        assert_eq!(was_true(&opt, &Type::NULL), Type::INIT_NULL);
        assert_eq!(was_false(&opt, &Type::NULL), Type::INT);
    }

    #[test]
    fn test_optional_refinement() {
        let opt = Type::INT.opt();
        assert_eq!(was_true(&opt, &Type::INT), Type::INT);
        assert_eq!(was_false(&opt, &Type::INT), Type::INIT_NULL);

        let wide = Type::INT.join(&Type::STR);
        assert_eq!(was_true(&wide, &Type::INT), Type::INT);
        assert_eq!(was_false(&wide, &Type::INT), wide);
    }

    #[test]
    fn test_uninit_refinement() {
        let t = Type::DBL.join(&Type::UNINIT);
        assert_eq!(was_true(&t, &Type::UNINIT), Type::UNINIT);
        assert_eq!(was_false(&t, &Type::UNINIT), Type::DBL);
    }
}

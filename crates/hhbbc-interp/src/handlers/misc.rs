//! Includes, definitions, `$this`, type verification, closures,
//! generators and the remaining odds and ends.

use std::sync::Arc;

use hhbbc_bc::{AnnotType, BareThisOp, BlockId, Bytecode, ClsRefSlotId, LocalId, SilenceOp};
use hhbbc_types::{Bits, Cell, Type, cell_same, intersection_of};
use tracing::trace;

use super::{Result, query, reduce};
use crate::collect::CnsEntry;
use crate::env::Env;
use crate::flags::Effect;

// ----------------------------------------------------------------------------
// Includes and definitions
// ----------------------------------------------------------------------------

/// `Incl*`, `Req*` and `Eval` run arbitrary code in the current frame.
pub(super) fn include(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.kill_locals();
    env.kill_this_props();
    env.kill_self_props();
    env.may_use_vv();
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn alias_cls(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

pub(super) fn def_cns(env: &mut Env<'_, '_>, name: &Arc<str>) -> Result {
    let t = env.pop()?;
    if env.options().hard_const_prop {
        let val = t.tv().unwrap_or(Cell::Uninit);
        let entry = env
            .collect()
            .cns_map
            .entry(name.clone())
            .or_insert(CnsEntry::ReadOnly);
        *entry = match entry {
            // Only reads were seen so far.
            CnsEntry::ReadOnly => CnsEntry::Value(val),
            CnsEntry::Value(old) if cell_same(old, &val) => CnsEntry::Value(val),
            _ => CnsEntry::Dynamic,
        };
    }
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// $this and class references
// ----------------------------------------------------------------------------

pub(super) fn this(env: &mut Env<'_, '_>) -> Result {
    if env.this_available() {
        return reduce([Bytecode::BareThis { op: BareThisOp::NeverNull }]);
    }
    let ty = env.this_type().unwrap_or(Type::OBJ);
    env.push(ty);
    env.set_this_available();
    Ok(Effect::Direct)
}

pub(super) fn check_this(env: &mut Env<'_, '_>) -> Result {
    if env.this_available() {
        return reduce([Bytecode::Nop]);
    }
    env.set_this_available();
    Ok(Effect::Direct)
}

pub(super) fn bare_this(env: &mut Env<'_, '_>, op: BareThisOp) -> Result {
    if env.this_available() && op != BareThisOp::NeverNull {
        return reduce([Bytecode::BareThis { op: BareThisOp::NeverNull }]);
    }
    let ty = env.this_type();
    match op {
        BareThisOp::Notice => {}
        BareThisOp::NoNotice => env.nothrow(),
        BareThisOp::NeverNull => {
            env.nothrow();
            env.set_this_available();
            env.push(ty.unwrap_or(Type::OBJ));
            return Ok(Effect::Direct);
        }
    }
    env.push(ty.map_or_else(|| Type::OBJ.opt(), |t| t.opt()));
    Ok(Effect::Direct)
}

pub(super) fn init_this_loc(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    env.set_loc_raw(loc, Type::CELL)?;
    Ok(Effect::Direct)
}

pub(super) fn late_bound_cls(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let ty = env.self_cls().map_or(Type::CLS, Type::sub_cls);
    env.put_cls_ref_slot(slot, ty)?;
    Ok(Effect::Direct)
}

pub(super) fn self_(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let ty = env.self_cls_exact().unwrap_or(Type::CLS);
    env.put_cls_ref_slot(slot, ty)?;
    Ok(Effect::Direct)
}

pub(super) fn parent(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let ty = env.parent_cls_exact().unwrap_or(Type::CLS);
    env.put_cls_ref_slot(slot, ty)?;
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Type verification
// ----------------------------------------------------------------------------

pub(super) fn verify_param_type(env: &mut Env<'_, '_>, param: LocalId) -> Result {
    let ctx = env.ctx();
    let options = env.options();
    // The memoize wrapper checked the parameters already.
    if ctx.func.name.ends_with("$memoize_impl")
        && options.hard_type_hints
        && !env.loc_raw(param)?.could_be_bits(Bits::REF)
    {
        return reduce([Bytecode::Nop]);
    }

    let Some(tc) = ctx
        .func
        .params
        .get(param.index())
        .and_then(|p| p.constraint.as_ref())
    else {
        return reduce([Bytecode::Nop]);
    };
    let index = env.index();
    if index.satisfies_constraint(&ctx, &env.loc_as_cell(param)?, tc) {
        return reduce([Bytecode::Nop]);
    }

    if !options.hard_type_hints
        || (!options.check_this_type_hints && tc.annot == AnnotType::This)
        || tc.soft
    {
        return Ok(Effect::Direct);
    }
    // With hard type hints the parameter has the declared type once the
    // check passes.
    let t = index.lookup_constraint(&ctx, tc);
    trace!(param = %param, ty = %t, "verified parameter");
    if t.is_bottom() {
        env.unreachable();
    }
    env.set_loc(param, t)?;
    Ok(Effect::Direct)
}

pub(super) fn verify_ret_type_c(env: &mut Env<'_, '_>) -> Result {
    let ctx = env.ctx();
    let options = env.options();
    let Some(tc) = &ctx.func.ret_constraint else {
        return reduce([Bytecode::Nop]);
    };
    let stack_t = env.top(0)?.clone();
    let index = env.index();
    if index.satisfies_constraint(&ctx, &stack_t, tc) {
        return reduce([Bytecode::Nop]);
    }
    if options.check_return_type_hints < 3
        || tc.soft
        || (!options.check_this_type_hints && tc.annot == AnnotType::This)
    {
        return Ok(Effect::Direct);
    }

    // Past here the check either throws or lets through a value of the
    // declared type.
    let mut tc_t = index.lookup_constraint(&ctx, tc).remove_uninit();
    // Narrowing to an interface could widen an already known class.
    let interface_like = tc_t.subtype_of(&Type::OBJ.opt())
        && tc_t
            .cls_spec()
            .is_some_and(|s| s.cls.is_interface() || s.cls.is_trait());
    if interface_like {
        tc_t = if tc_t.is_opt() { Type::OBJ.opt() } else { Type::OBJ };
    }
    let ret = intersection_of(&tc_t, &stack_t);
    if ret.is_bottom() {
        env.unreachable();
        return Ok(Effect::Direct);
    }
    env.pop()?;
    env.push(ret);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Closures
// ----------------------------------------------------------------------------

pub(super) fn create_cl(env: &mut Env<'_, '_>, args: u32, cls_index: u32) -> Result {
    let n = args as usize;
    if n > 0 {
        let mut uses = Vec::with_capacity(n);
        for i in (0..n).rev() {
            uses.push(env.top(i)?.clone());
        }
        env.discard(n)?;
        env.collect().merge_closure_use_types(cls_index, uses);
    }
    // Closures can be rebound to other scopes, so only the base class is
    // certain.
    let closure = env
        .index()
        .builtin_class("Closure")
        .map_or(Type::OBJ, Type::sub_obj);
    env.push(closure);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Generators and async
// ----------------------------------------------------------------------------

pub(super) fn create_cont(env: &mut Env<'_, '_>) -> Result {
    // The first resume is `next()`, which sends null.
    env.push(Type::INIT_NULL);
    Ok(Effect::Direct)
}

/// Pop `n` values and push a value sent into the generator.
pub(super) fn resume(env: &mut Env<'_, '_>, n: usize) -> Result {
    env.discard(n)?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

/// `ContAssignDelegate` and `ContEnterDelegate`.
pub(super) fn cont_delegate(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    Ok(Effect::Direct)
}

pub(super) fn yield_from_delegate(env: &mut Env<'_, '_>, target: BlockId) -> Result {
    env.push(Type::INIT_CELL);
    env.propagate(target);
    Ok(Effect::Direct)
}

pub(super) fn push_const(env: &mut Env<'_, '_>, ty: Type) -> Result {
    env.push(ty);
    Ok(Effect::Direct)
}

/// The result of a wait handle, for `Await` and `WHResult`.
pub(super) fn wait_handle_result(env: &mut Env<'_, '_>) -> Result {
    let t = env.pop()?;
    // Anything but an object throws.
    if !t.could_be_bits(Bits::OBJ) {
        env.push(Type::BOTTOM);
        env.unreachable();
        return Ok(Effect::Direct);
    }
    let inner = match t.wait_handle_inner() {
        Some(inner) if t.subtype_of_bits(Bits::OBJ) => inner.clone(),
        _ => {
            env.push(Type::INIT_CELL);
            return Ok(Effect::Direct);
        }
    };
    // A wait handle of nothing always fails.
    if inner.is_bottom() {
        env.unreachable();
    }
    env.push(inner);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Misc
// ----------------------------------------------------------------------------

/// `Idx` and `ArrayIdx`: `$base[$key]`, or the default when the key is
/// absent.
pub(super) fn idx(env: &mut Env<'_, '_>) -> Result {
    let default = env.pop()?;
    let key = env.pop()?;
    let base = env.pop()?;
    if !query::ak_exists_may_throw(env, &key, &base) {
        env.nothrow();
    }
    if let (Some(Cell::Arr(arr)), Some(k)) = (base.tv(), key.tv()) {
        env.constprop();
        match arr.get(&k) {
            Some(v) => env.push(Type::from_cell(v)),
            None => env.push(default),
        }
        return Ok(Effect::Direct);
    }
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn silence(env: &mut Env<'_, '_>, loc: LocalId, op: SilenceOp) -> Result {
    env.nothrow();
    if op == SilenceOp::Start {
        env.set_loc(loc, Type::INT)?;
    }
    Ok(Effect::Direct)
}

/// Instructions that leave the analysed state alone, such as class
/// definitions and stat counters.
pub(super) fn no_effect(_env: &mut Env<'_, '_>) -> Result {
    Ok(Effect::Direct)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{
        AnnotType, BareThisOp, Bytecode, Class, LocalId, Param, SilenceOp, TypeConstraint,
    };
    use hhbbc_index::{Index, MemoryIndex};
    use hhbbc_types::{ArrKind, ArrayData, Cell, ClassInfo, Lattice, Type};

    use crate::collect::CnsEntry;
    use crate::handlers::testing::Harness;

    fn int_param() -> Param {
        Param::builder()
            .name("x")
            .constraint(TypeConstraint::new(AnnotType::Int))
            .build()
    }

    // ------------------------------------------------------------------------
    // Includes and constants
    // ------------------------------------------------------------------------

    #[test]
    fn test_include_kills_locals() {
        let mut h = Harness::new();
        h.set_local(2, Type::INT);
        h.push(Type::sval("a.php"));
        h.step(Bytecode::Incl);
        assert_eq!(h.state.locals[2], Type::GEN);
        assert!(h.collect.may_use_vv);
        assert_eq!(h.top(), Type::INIT_CELL);
    }

    #[test]
    fn test_def_cns_records_value_then_goes_dynamic() {
        let mut h = Harness::new();
        h.push(Type::ival(4));
        h.step(Bytecode::DefCns { name: "K".into() });
        assert_eq!(h.collect.cns_map.get("K"), Some(&CnsEntry::Value(Cell::Int(4))));
        h.push(Type::ival(5));
        h.step(Bytecode::DefCns { name: "K".into() });
        assert_eq!(h.collect.cns_map.get("K"), Some(&CnsEntry::Dynamic));
    }

    // ------------------------------------------------------------------------
    // $this
    // ------------------------------------------------------------------------

    #[test]
    fn test_second_this_is_never_null() {
        let index = MemoryIndex::new().with_class(ClassInfo::builder().name("C").build());
        let mut h = Harness::new()
            .with_index(index)
            .in_class(Class::builder().name("C").build());
        h.step(Bytecode::This);
        let c = h.class("C");
        assert_eq!(h.top(), Type::sub_obj(c));
        let flags = h.step(Bytecode::This);
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::BareThis { op: BareThisOp::NeverNull }])
        );
        assert!(!flags.was_pei);
    }

    #[test]
    fn test_bare_this_without_class_may_be_null() {
        let mut h = Harness::new();
        let flags = h.step(Bytecode::BareThis { op: BareThisOp::NoNotice });
        assert_eq!(h.top(), Type::OBJ.opt());
        assert!(!flags.was_pei);
    }

    // ------------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------------

    #[test]
    fn test_verify_param_type_satisfied_is_nop() {
        let mut h = Harness::new().with_params(vec![int_param()]);
        h.set_local(0, Type::ival(3));
        let flags = h.step(Bytecode::VerifyParamType { param: LocalId(0) });
        assert_eq!(flags.strength_reduced, Some(vec![Bytecode::Nop]));
    }

    #[test]
    fn test_verify_param_type_narrows_with_hard_hints() {
        let mut h = Harness::new().with_params(vec![int_param()]);
        h.set_local(0, Type::INIT_CELL);
        let flags = h.step(Bytecode::VerifyParamType { param: LocalId(0) });
        assert_eq!(flags.strength_reduced, None);
        assert_eq!(h.state.locals[0], Type::INT);
    }

    #[test]
    fn test_verify_param_type_soft_hints_leave_local() {
        let mut h = Harness::new().with_params(vec![int_param()]);
        h.options.hard_type_hints = false;
        h.set_local(0, Type::INIT_CELL);
        h.step(Bytecode::VerifyParamType { param: LocalId(0) });
        assert_eq!(h.state.locals[0], Type::INIT_CELL);
    }

    #[test]
    fn test_verify_ret_type_intersects() {
        let mut h = Harness::new();
        h.func.ret_constraint = Some(TypeConstraint::new(AnnotType::Int).nullable());
        h.push(Type::INIT_CELL);
        h.step(Bytecode::VerifyRetTypeC);
        assert_eq!(h.top(), Type::INT.opt());
    }

    #[test]
    fn test_verify_ret_type_below_level_three_is_untouched() {
        let mut h = Harness::new();
        h.options.check_return_type_hints = 2;
        h.func.ret_constraint = Some(TypeConstraint::new(AnnotType::Int));
        h.push(Type::INIT_CELL);
        h.step(Bytecode::VerifyRetTypeC);
        assert_eq!(h.top(), Type::INIT_CELL);
    }

    // ------------------------------------------------------------------------
    // Closures, async and misc
    // ------------------------------------------------------------------------

    #[test]
    fn test_create_cl_merges_use_types() {
        let index = MemoryIndex::new()
            .with_builtin_class(ClassInfo::builder().name("Closure").build());
        let mut h = Harness::new().with_index(index);
        h.push(Type::INT);
        h.step(Bytecode::CreateCl { args: 1, cls_index: 0 });
        h.push(Type::STR);
        h.step(Bytecode::CreateCl { args: 1, cls_index: 0 });
        assert_eq!(h.collect.closure_use_types[&0], vec![Type::INT.join(&Type::STR)]);
        let closure = h.index.builtin_class("Closure").expect("Closure");
        assert_eq!(h.top(), Type::sub_obj(closure));
    }

    #[test]
    fn test_await_unwraps_wait_handle() {
        let mut h = Harness::new();
        h.push(Type::wait_handle(Type::INT));
        h.step(Bytecode::Await);
        assert_eq!(h.top(), Type::INT);
    }

    #[test]
    fn test_await_on_non_object_is_unreachable() {
        let mut h = Harness::new();
        h.push(Type::INT);
        h.step(Bytecode::Await);
        assert!(h.state.unreachable);
    }

    #[test]
    fn test_idx_on_constant_array() {
        let arr = ArrayData::packed(ArrKind::Vec, [Cell::Int(10), Cell::Int(20)])
            .expect("packed literal");
        let mut h = Harness::new();
        h.push(Type::aval(arr));
        h.push(Type::ival(1));
        h.push(Type::INIT_NULL);
        let flags = h.step(Bytecode::Idx);
        assert!(!flags.was_pei);
        assert_eq!(h.top(), Type::ival(20));
    }

    #[test]
    fn test_silence_start_sets_int() {
        let mut h = Harness::new();
        h.step(Bytecode::Silence { loc: LocalId(3), op: SilenceOp::Start });
        assert_eq!(h.state.locals[3], Type::INT);
    }

    #[test]
    fn test_memoize_impl_params_are_trusted() {
        let mut h = Harness::new().with_params(vec![int_param()]);
        h.func.name = "f$memoize_impl".into();
        h.set_local(0, Type::INIT_CELL);
        let flags = h.step(Bytecode::VerifyParamType { param: LocalId(0) });
        assert_eq!(flags.strength_reduced, Some(vec![Bytecode::Nop]));
    }
}

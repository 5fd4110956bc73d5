//! The call protocol: `FPush*` opens a call, `FPass*` prepares each
//! argument and `FCall*` runs it.

use std::sync::Arc;

use hhbbc_bc::{BlockId, Bytecode, ClsRefSlotId, FPassHint, IterId, LocalId, ObjMethodOp};
use hhbbc_index::{CallContext, FuncInfo, ResFunc};
use hhbbc_types::{Bits, Cell, Lattice, Type};
use tracing::debug;

use super::{Result, props, reduce, str_value};
use crate::collect::CnsEntry;
use crate::env::Env;
use crate::flags::Effect;
use crate::state::{ActRec, FpiKind, StackEquiv};
use crate::step::impl_vec;

/// How the callee takes the argument being prepared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PrepKind {
    Unknown,
    Val,
    Ref,
}

fn prep_kind(env: &Env<'_, '_>, param: u32) -> Result<PrepKind> {
    let ar = env.fpi_top()?;
    Ok(match ar.func.as_ref().and_then(|f| f.by_ref(param)) {
        Some(true) => PrepKind::Ref,
        Some(false) => PrepKind::Val,
        None => PrepKind::Unknown,
    })
}

/// A pass whose hint disagrees with the callee warns or fatals.
fn fpass_can_throw(kind: PrepKind, hint: FPassHint) -> bool {
    match kind {
        PrepKind::Unknown => hint != FPassHint::Any,
        PrepKind::Val => hint == FPassHint::Ref,
        PrepKind::Ref => hint == FPassHint::Cell,
    }
}

/// Replace an `FPass*` by `get` followed by the pass the callee wants.
fn reduce_fpass_arg(
    env: &Env<'_, '_>,
    get: Bytecode,
    param: u32,
    by_ref: bool,
    hint: FPassHint,
) -> Result {
    let mismatch = match hint {
        FPassHint::Any => false,
        FPassHint::Cell => by_ref,
        FPassHint::Ref => !by_ref,
    };
    let pass = |hint| {
        if by_ref {
            Bytecode::FPassVNop { param, hint }
        } else {
            Bytecode::FPassC { param, hint }
        }
    };
    if !mismatch {
        return reduce([get, pass(hint)]);
    }
    let func: Arc<str> = env
        .fpi_top()?
        .func
        .as_ref()
        .map_or_else(|| "".into(), |f| f.name().into());
    reduce([
        get,
        Bytecode::RaiseFPassWarning { hint, func, param },
        pass(FPassHint::Any),
    ])
}

// ----------------------------------------------------------------------------
// FPush*
// ----------------------------------------------------------------------------

fn push_ar(env: &Env<'_, '_>, kind: FpiKind, func: Option<ResFunc>) -> ActRec {
    ActRec::new(kind, env.block().id, func)
}

pub(super) fn fpush_func_d(env: &mut Env<'_, '_>, func: &str) -> Result {
    let ctx = env.ctx();
    let rfunc = env.index().resolve_func(&ctx, func);
    let ar = push_ar(env, FpiKind::Func, Some(rfunc));
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

pub(super) fn fpush_func(env: &mut Env<'_, '_>, args: u32) -> Result {
    let t = env.top(0)?.clone();
    if let Some(name) = str_value(&t) {
        let name = name.trim_start_matches('\\');
        if !name.contains("::") {
            let ctx = env.ctx();
            let rfunc = env.index().resolve_func(&ctx, name);
            // Dynamic calls to frame-accessing functions fatal; keep them dynamic.
            if !rfunc.might_access_caller_frame() {
                return reduce([
                    Bytecode::PopC,
                    Bytecode::FPushFuncD { args, func: name.into() },
                ]);
            }
        }
    }
    env.pop()?;
    let kind = if t.subtype_of_bits(Bits::OBJ) {
        FpiKind::ObjInvoke
    } else if t.subtype_of_bits(Bits::ARR_LIKE) {
        FpiKind::CallableArr
    } else if t.subtype_of_bits(Bits::STR) {
        FpiKind::Func
    } else {
        FpiKind::Unknown
    };
    let ar = push_ar(env, kind, None);
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

/// A namespaced call that falls back to a global function.
pub(super) fn fpush_func_u(env: &mut Env<'_, '_>, args: u32, func: &str, fallback: &str) -> Result {
    let ctx = env.ctx();
    let index = env.index();
    let resolved = index.resolve_func_fallback(&ctx, func, fallback);
    if resolved.is_exact() {
        if env.options().elide_autoload_invokes {
            return reduce([Bytecode::FPushFuncD {
                args,
                func: resolved.name().into(),
            }]);
        }
        let ar = push_ar(env, FpiKind::Func, Some(resolved));
        env.fpi_push(ar);
        return Ok(Effect::Direct);
    }
    let ar = push_ar(env, FpiKind::Func, Some(ResFunc::unresolved(func)))
        .with_fallback(Some(index.resolve_func(&ctx, fallback)));
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

pub(super) fn fpush_obj_method_d(
    env: &mut Env<'_, '_>,
    method: &str,
    op: ObjMethodOp,
) -> Result {
    let location = env.top_equiv(0)?;
    let mut t = env.pop()?;
    let null_throws = op == ObjMethodOp::NullThrows;
    let callable = if null_throws {
        t.could_be_bits(Bits::OBJ)
    } else {
        t.could_be(&Type::OBJ.opt())
    };
    if !callable {
        let ar = push_ar(env, FpiKind::ObjMeth, None);
        env.fpi_push(ar);
        env.unreachable();
        return Ok(Effect::Direct);
    }
    if null_throws && t.is_opt() {
        t = t.unopt();
    }

    let cls_ty = t.obj_to_cls();
    let rcls = cls_ty.cls_spec().map(|s| s.cls.clone());
    let ctx = env.ctx();
    let rfunc = env.index().resolve_method(&ctx, &cls_ty, method);
    let ar = push_ar(env, FpiKind::ObjMeth, Some(rfunc)).with_cls(rcls);
    env.fpi_push(ar);

    // After the push the receiver is known to be an object (or null, for
    // the null-safe form).
    if let StackEquiv::Local(_) = location {
        env.refine_location(location, &|t: &Type| {
            if t.cls_spec().is_none() {
                if null_throws { Type::OBJ } else { Type::OBJ.opt() }
            } else if null_throws && t.is_opt() {
                t.unopt()
            } else {
                t.clone()
            }
        });
    }
    Ok(Effect::Direct)
}

pub(super) fn fpush_obj_method(env: &mut Env<'_, '_>, args: u32, op: ObjMethodOp) -> Result {
    if let Some(method) = str_value(env.top(0)?) {
        return reduce([
            Bytecode::PopC,
            Bytecode::FPushObjMethodD { args, method, op },
        ]);
    }
    env.discard(2)?;
    let ar = push_ar(env, FpiKind::ObjMeth, None);
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

pub(super) fn fpush_cls_method_d(env: &mut Env<'_, '_>, method: &str, cls: &str) -> Result {
    let ctx = env.ctx();
    let rcls = env.index().resolve_class(&ctx, cls);
    let cls_ty = rcls.clone().map_or(Type::CLS, Type::cls_exact);
    let rfunc = env.index().resolve_method(&ctx, &cls_ty, method);
    let ar = push_ar(env, FpiKind::ClsMeth, Some(rfunc)).with_cls(rcls);
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

/// `FPushClsMethod` and its forwarding form `FPushClsMethodF`.
pub(super) fn fpush_cls_method(
    env: &mut Env<'_, '_>,
    args: u32,
    slot: ClsRefSlotId,
    forwarding: bool,
) -> Result {
    let cls_ty = env.peek_cls_ref_slot(slot)?.clone();
    let (rcls, exact) = match cls_ty.cls_spec() {
        Some(spec) => (Some(spec.cls.clone()), spec.exact),
        None => (None, false),
    };
    let mut rfunc = None;
    if let Some(method) = str_value(env.top(0)?) {
        if let (false, true, Some(cls)) = (forwarding, exact, &rcls) {
            return reduce([
                Bytecode::DiscardClsRef { slot },
                Bytecode::PopC,
                Bytecode::FPushClsMethodD {
                    args,
                    method,
                    cls: cls.name().into(),
                },
            ]);
        }
        let ctx = env.ctx();
        rfunc = Some(env.index().resolve_method(&ctx, &cls_ty, &method));
    }
    let ar = push_ar(env, FpiKind::ClsMeth, rfunc).with_cls(rcls);
    env.fpi_push(ar);
    env.take_cls_ref_slot(slot)?;
    env.pop()?;
    Ok(Effect::Direct)
}

pub(super) fn fpush_ctor_d(env: &mut Env<'_, '_>, cls: &str) -> Result {
    let ctx = env.ctx();
    let rcls = env.index().resolve_class(&ctx, cls);
    env.push(rcls.clone().map_or(Type::OBJ, Type::obj_exact));
    let rfunc = rcls
        .as_ref()
        .and_then(|c| env.index().resolve_ctor(&ctx, c, true));
    let ar = push_ar(env, FpiKind::Ctor, rfunc).with_cls(rcls);
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

/// `new` on a class defined by this unit, by position.
pub(super) fn fpush_ctor_i(env: &mut Env<'_, '_>, cls_index: u32) -> Result {
    match env.ctx().unit.classes.get(cls_index as usize) {
        Some(cls) => fpush_ctor_d(env, &cls.name),
        None => {
            env.push(Type::OBJ);
            let ar = push_ar(env, FpiKind::Ctor, None);
            env.fpi_push(ar);
            Ok(Effect::Direct)
        }
    }
}

pub(super) fn fpush_ctor(env: &mut Env<'_, '_>, args: u32, slot: ClsRefSlotId) -> Result {
    if let Some(spec) = env.peek_cls_ref_slot(slot)?.cls_spec() {
        if spec.exact {
            return reduce([
                Bytecode::DiscardClsRef { slot },
                Bytecode::FPushCtorD {
                    args,
                    cls: spec.cls.name().into(),
                },
            ]);
        }
    }
    env.take_cls_ref_slot(slot)?;
    env.push(Type::OBJ);
    let ar = push_ar(env, FpiKind::Ctor, None);
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

pub(super) fn fpush_cuf_iter(env: &mut Env<'_, '_>, iter: IterId) -> Result {
    env.iter(iter)?;
    env.nothrow();
    let ar = push_ar(env, FpiKind::Unknown, None);
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

/// `FPushCuf` and `FPushCufF`.
pub(super) fn fpush_cuf(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    let ar = push_ar(env, FpiKind::Unknown, None);
    env.fpi_push(ar);
    Ok(Effect::Direct)
}

pub(super) fn fpush_cuf_safe(env: &mut Env<'_, '_>) -> Result {
    let t = env.pop()?;
    env.pop()?;
    env.push(t);
    let ar = push_ar(env, FpiKind::Unknown, None);
    env.fpi_push(ar);
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// FPass*
// ----------------------------------------------------------------------------

pub(super) fn fpass_l(env: &mut Env<'_, '_>, param: u32, loc: LocalId, hint: FPassHint) -> Result {
    match prep_kind(env, param)? {
        PrepKind::Unknown => {
            if !env.loc_could_be_uninit(loc)? && hint == FPassHint::Any {
                env.nothrow();
            }
            // The callee may bind the local.
            env.set_loc_raw(loc, Type::GEN)?;
            env.push(Type::INIT_GEN);
            Ok(Effect::Direct)
        }
        PrepKind::Val => reduce_fpass_arg(env, Bytecode::CGetL { loc }, param, false, hint),
        PrepKind::Ref => reduce_fpass_arg(env, Bytecode::VGetL { loc }, param, true, hint),
    }
}

pub(super) fn fpass_n(env: &mut Env<'_, '_>, param: u32, hint: FPassHint) -> Result {
    match prep_kind(env, param)? {
        PrepKind::Unknown => {
            env.pop()?;
            env.kill_locals();
            env.may_use_vv();
            env.push(Type::INIT_GEN);
            Ok(Effect::Direct)
        }
        PrepKind::Val => reduce_fpass_arg(env, Bytecode::CGetN, param, false, hint),
        PrepKind::Ref => reduce_fpass_arg(env, Bytecode::VGetN, param, true, hint),
    }
}

pub(super) fn fpass_g(env: &mut Env<'_, '_>, param: u32, hint: FPassHint) -> Result {
    match prep_kind(env, param)? {
        PrepKind::Unknown => {
            env.pop()?;
            env.push(Type::INIT_GEN);
            Ok(Effect::Direct)
        }
        PrepKind::Val => reduce_fpass_arg(env, Bytecode::CGetG, param, false, hint),
        PrepKind::Ref => reduce_fpass_arg(env, Bytecode::VGetG, param, true, hint),
    }
}

pub(super) fn fpass_s(
    env: &mut Env<'_, '_>,
    param: u32,
    slot: ClsRefSlotId,
    hint: FPassHint,
) -> Result {
    match prep_kind(env, param)? {
        PrepKind::Unknown => props::fpass_s_unknown(env, slot),
        PrepKind::Val => reduce_fpass_arg(env, Bytecode::CGetS { slot }, param, false, hint),
        PrepKind::Ref => reduce_fpass_arg(env, Bytecode::VGetS { slot }, param, true, hint),
    }
}

pub(super) fn fpass_v(env: &mut Env<'_, '_>, param: u32, hint: FPassHint) -> Result {
    let kind = prep_kind(env, param)?;
    if !fpass_can_throw(kind, hint) {
        env.nothrow();
    }
    match kind {
        PrepKind::Unknown => {
            env.pop()?;
            env.push(Type::INIT_GEN);
            Ok(Effect::Direct)
        }
        PrepKind::Val => reduce_fpass_arg(env, Bytecode::Unbox, param, false, hint),
        PrepKind::Ref => reduce_fpass_arg(env, Bytecode::Nop, param, true, hint),
    }
}

/// Pass a call result, which may be a cell or a ref.
pub(super) fn fpass_r(env: &mut Env<'_, '_>, param: u32, hint: FPassHint) -> Result {
    let kind = prep_kind(env, param)?;
    if !fpass_can_throw(kind, hint) {
        env.nothrow();
    }
    let t = env.top(0)?.clone();
    if t.subtype_of_bits(Bits::CELL) {
        return reduce_fpass_arg(env, Bytecode::UnboxRNop, param, false, hint);
    }
    if t.subtype_of_bits(Bits::REF) {
        match kind {
            PrepKind::Unknown => {}
            PrepKind::Val => return reduce_fpass_arg(env, Bytecode::UnboxR, param, false, hint),
            PrepKind::Ref => return reduce_fpass_arg(env, Bytecode::BoxRNop, param, true, hint),
        }
    }
    env.pop()?;
    env.push(match kind {
        PrepKind::Unknown => Type::INIT_GEN,
        PrepKind::Val => Type::INIT_CELL,
        PrepKind::Ref => Type::REF,
    });
    Ok(Effect::Direct)
}

pub(super) fn fpass_v_nop(env: &mut Env<'_, '_>, hint: FPassHint) -> Result {
    let t = env.pop()?;
    env.push(t);
    if hint != FPassHint::Cell {
        env.nothrow();
    }
    Ok(Effect::Direct)
}

/// Whether the callee's parameter `param` accepts `ty` without a check
/// failing at runtime.
fn param_accepts(env: &Env<'_, '_>, info: &FuncInfo, param: u32, ty: &Type) -> bool {
    let params = &info.params;
    let i = param as usize;
    if i >= params.len() || (i + 1 == params.len() && params[i].variadic) {
        return true;
    }
    match &params[i].constraint {
        None => true,
        Some(tc) if tc.is_mixed() => true,
        Some(tc) => env.index().satisfies_constraint(&env.ctx(), ty, tc),
    }
}

pub(super) fn fpass_c(env: &mut Env<'_, '_>, param: u32, hint: FPassHint) -> Result {
    let ar = env.fpi_top()?;
    if ar.foldable {
        let top = env.top(0)?;
        let ok = top.is_scalar()
            && ar
                .func
                .as_ref()
                .and_then(ResFunc::info)
                .is_some_and(|info| param_accepts(env, info, param, top));
        if !ok {
            let name: Option<Arc<str>> = ar.func.as_ref().map(|f| f.name().into());
            let push_block = ar.push_block;
            if let Some(name) = name {
                debug!(func = %name, param, "call is not foldable");
                env.collect().unfoldable_funcs.insert(name);
            }
            env.reanalyze(push_block);
            env.fpi_top_mut()?.foldable = false;
        }
    }
    if hint != FPassHint::Ref {
        env.effect_free();
    }
    Ok(Effect::Direct)
}

/// `FPassCW` (warns) and `FPassCE` (fatals) on a by-ref parameter.
pub(super) fn fpass_c_checked(env: &mut Env<'_, '_>, param: u32, hint: FPassHint) -> Result {
    match prep_kind(env, param)? {
        PrepKind::Val => reduce([Bytecode::FPassC { param, hint }]),
        PrepKind::Unknown | PrepKind::Ref => Ok(Effect::Direct),
    }
}

pub(super) fn raise_fpass_warning(_env: &mut Env<'_, '_>) -> Result {
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// FCall*
// ----------------------------------------------------------------------------

/// Callees that can read or write their caller's locals clobber them.
fn special_function_effects(env: &mut Env<'_, '_>, ar: &ActRec) {
    let touches_frame = match &ar.func {
        Some(f) if f.is_exact() => f.might_access_caller_frame(),
        _ => matches!(
            ar.kind,
            FpiKind::Unknown | FpiKind::Func | FpiKind::CallableArr
        ),
    };
    if touches_frame {
        env.kill_locals();
        env.may_use_vv();
    }
}

fn push_call_return_type(env: &mut Env<'_, '_>, ty: Type) {
    // The callee never returns.
    if ty.is_bottom() {
        env.unreachable();
    }
    env.push(ty);
}

/// The values of the top `n` stack slots, deepest first, if all are known.
fn constant_args(env: &Env<'_, '_>, n: usize) -> Result<Option<Vec<Cell>>> {
    let mut cells = Vec::with_capacity(n);
    for i in (0..n).rev() {
        match env.top(i)?.tv() {
            Some(c) => cells.push(c),
            None => return Ok(None),
        }
    }
    Ok(Some(cells))
}

/// Evaluate a call of a foldable function on constant arguments. Leaves
/// the arguments on the stack.
fn fold_call(env: &Env<'_, '_>, func: &str, n: usize) -> Result<Option<Cell>> {
    Ok(constant_args(env, n)?.and_then(|args| env.oracle().fold_builtin(func, &args)))
}

fn call_context(ar: &ActRec, args: Vec<Type>) -> CallContext {
    let context = match ar.kind {
        FpiKind::Unknown | FpiKind::Func | FpiKind::CallableArr => Type::BOTTOM,
        FpiKind::ObjMeth | FpiKind::ObjInvoke | FpiKind::Ctor => {
            ar.cls.clone().map_or(Type::OBJ, Type::sub_obj)
        }
        FpiKind::ClsMeth => ar.cls.clone().map_or(Type::CLS, Type::sub_cls),
    };
    CallContext { args, context }
}

/// Finish a call whose callee is known, at least by name.
fn fcall_known(env: &mut Env<'_, '_>, args: u32) -> Result {
    let ar = env.fpi_pop()?;
    let Some(func) = ar.func.clone() else {
        return fcall_unknown(env, &ar, args);
    };
    let n = args as usize;

    if ar.foldable {
        if let Some(v) = fold_call(env, func.name(), n)? {
            env.discard(n)?;
            env.push(Type::from_cell(&v));
            env.constprop();
            return Ok(Effect::Direct);
        }
        debug!(func = %func.name(), "call could not be folded");
        env.collect().unfoldable_funcs.insert(func.name().into());
        env.reanalyze(ar.push_block);
    }

    special_function_effects(env, &ar);

    let mut arg_types = Vec::with_capacity(n);
    for i in (0..n).rev() {
        arg_types.push(env.top(i)?.clone());
    }
    env.discard(n)?;

    // `defined('FOO')` marks `FOO` as defined at runtime.
    if env.options().hard_const_prop && n == 1 && func.name().eq_ignore_ascii_case("defined") {
        if let Some(name) = str_value(&arg_types[0]) {
            let ctx = env.ctx();
            if env.index().lookup_constant(&ctx, &name).is_none() {
                env.collect().cns_map.insert(name, CnsEntry::Dynamic);
            }
        }
    }

    let ctx = env.ctx();
    let index = env.index();
    let call = call_context(&ar, arg_types);
    let mut ty = index.lookup_foldable_return_type(&ctx, &func, &call);
    if let Some(fallback) = &ar.fallback {
        ty = ty.join(&index.lookup_foldable_return_type(&ctx, fallback, &call));
    }
    push_call_return_type(env, ty);
    Ok(Effect::Direct)
}

fn fcall_unknown(env: &mut Env<'_, '_>, ar: &ActRec, args: u32) -> Result {
    env.discard(args as usize)?;
    special_function_effects(env, ar);
    env.push(Type::INIT_GEN);
    Ok(Effect::Direct)
}

fn is_ctor_name(name: &str) -> bool {
    name.eq_ignore_ascii_case("__construct") || name == "86ctor"
}

pub(super) fn fcall(env: &mut Env<'_, '_>, args: u32) -> Result {
    let ar = env.fpi_top()?.clone();
    if let (Some(func), None) = (&ar.func, &ar.fallback) {
        match ar.kind {
            FpiKind::Func => {
                if func.is_exact() && !func.might_access_caller_frame() {
                    return reduce([Bytecode::FCallD {
                        args,
                        cls: "".into(),
                        func: func.name().into(),
                    }]);
                }
            }
            FpiKind::Ctor | FpiKind::ObjMeth | FpiKind::ClsMeth
                if ar.kind != FpiKind::Ctor || is_ctor_name(func.name()) =>
            {
                if let (Some(cls), true) = (&ar.cls, func.cant_be_magic_call()) {
                    return reduce([Bytecode::FCallD {
                        args,
                        cls: cls.name().into(),
                        func: func.name().into(),
                    }]);
                }
                return fcall_known(env, args);
            }
            _ => {}
        }
    }
    env.fpi_pop()?;
    fcall_unknown(env, &ar, args)
}

/// `Some` replacement names when the call in flight is known more
/// precisely than the instruction says.
fn better_names(ar: &ActRec, cls: &str, func: &str) -> Option<(Arc<str>, Arc<str>)> {
    let f = ar.func.as_ref()?;
    let cls_differs = ar.cls.as_ref().is_some_and(|c| c.name() != cls);
    if f.name() == func && !cls_differs {
        return None;
    }
    let cls = ar.cls.as_ref().map_or_else(|| "".into(), |c| c.name().into());
    Some((cls, f.name().into()))
}

pub(super) fn fcall_d(env: &mut Env<'_, '_>, args: u32, cls: &str, func: &str) -> Result {
    let ar = env.fpi_top()?.clone();
    if let Some((cls, func)) = better_names(&ar, cls, func) {
        return reduce([Bytecode::FCallD { args, cls, func }]);
    }
    if ar.func.is_some() {
        return fcall_known(env, args);
    }
    env.fpi_pop()?;
    fcall_unknown(env, &ar, args)
}

/// A call immediately awaited. Callees that are not async produce their
/// result directly, so the call splits into a plain call and an `Await`.
pub(super) fn fcall_await(env: &mut Env<'_, '_>, args: u32, cls: &Arc<str>, func: &Arc<str>) -> Result {
    let ar = env.fpi_top()?.clone();
    if let Some((cls, func)) = better_names(&ar, cls, func) {
        return reduce([Bytecode::FCallAwait { args, cls, func }]);
    }
    let seq = [
        Bytecode::FCallD {
            args,
            cls: cls.clone(),
            func: func.clone(),
        },
        Bytecode::UnboxRNop,
        Bytecode::Await,
    ];
    if ar.func.as_ref().is_some_and(|f| f.is_exact() && !f.is_async()) {
        return reduce(seq);
    }
    impl_vec(env, false, &seq)?;
    Ok(Effect::Direct)
}

/// `FCallArray` and `FCallUnpack`.
pub(super) fn fcall_array(env: &mut Env<'_, '_>, args: u32) -> Result {
    env.discard(args as usize)?;
    let ar = env.fpi_pop()?;
    special_function_effects(env, &ar);
    let Some(func) = &ar.func else {
        env.push(Type::INIT_GEN);
        return Ok(Effect::Direct);
    };
    let ctx = env.ctx();
    let index = env.index();
    let mut ty = index.lookup_return_type(&ctx, func);
    if let Some(fallback) = &ar.fallback {
        ty = ty.join(&index.lookup_return_type(&ctx, fallback));
    }
    push_call_return_type(env, ty);
    Ok(Effect::Direct)
}

/// A direct call to a runtime builtin, with its arguments on the stack.
pub(super) fn fcall_builtin(env: &mut Env<'_, '_>, args: u32, func: &str) -> Result {
    let ctx = env.ctx();
    let rfunc = env.index().resolve_func(&ctx, func);
    let n = args as usize;
    if env.options().constant_fold_builtins
        && rfunc.is_foldable()
        && !env.interp.collect.unfoldable_funcs.contains(func)
    {
        if let Some(v) = fold_call(env, func, n)? {
            env.discard(n)?;
            env.push(Type::from_cell(&v));
            env.constprop();
            return Ok(Effect::Direct);
        }
    }
    env.discard(n)?;
    if rfunc.might_access_caller_frame() {
        env.kill_locals();
        env.may_use_vv();
    }
    let ty = env.index().lookup_return_type(&ctx, &rfunc);
    push_call_return_type(env, ty);
    Ok(Effect::Direct)
}

pub(super) fn cuf_safe_array(env: &mut Env<'_, '_>) -> Result {
    env.discard(3)?;
    env.push(Type::ARR);
    Ok(Effect::Direct)
}

pub(super) fn cuf_safe_return(env: &mut Env<'_, '_>) -> Result {
    env.discard(3)?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn decode_cuf_iter(env: &mut Env<'_, '_>, target: BlockId) -> Result {
    env.pop()?;
    env.propagate(target);
    Ok(Effect::Direct)
}

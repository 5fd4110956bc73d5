//! Static properties, and the private properties of the function's class.

use std::sync::Arc;

use hhbbc_bc::{Bytecode, ClsRefSlotId, InitPropOp};
use hhbbc_types::{Cell, Lattice, Type};
use tracing::trace;

use super::{Result, reduce};
use crate::env::{Env, to_cell};
use crate::error::InterpError;
use crate::flags::Effect;

/// The class-ref slot and name operands of a static property access.
struct StaticProp {
    cls: Type,
    name: Type,
}

impl StaticProp {
    fn take(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result<StaticProp, InterpError> {
        let cls = env.take_cls_ref_slot(slot)?;
        let name = env.pop()?;
        Ok(StaticProp { cls, name })
    }

    fn name(&self) -> Option<Arc<str>> {
        match self.name.tv()? {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    fn cls_name(&self) -> Option<Arc<str>> {
        self.cls
            .cls_spec()
            .filter(|s| s.exact)
            .map(|s| s.cls.info().name.clone())
    }

    /// The class is certainly the function's own class or a subclass.
    fn is_self(&self, env: &Env<'_, '_>) -> bool {
        env.self_cls()
            .is_some_and(|own| self.cls.subtype_of(&Type::sub_cls(own)))
    }

    /// The class could be the function's own, so its private statics may be
    /// touched.
    fn could_be_self(&self, env: &Env<'_, '_>) -> bool {
        env.self_cls()
            .is_none_or(|own| self.cls.could_be(&Type::sub_cls(own)))
    }
}

/// A private static of the function's class as read here: what this
/// function wrote to it, or its declared initial value.
fn self_prop_as_cell(env: &Env<'_, '_>, name: &str) -> Option<Type> {
    let written = env.interp.collect.self_props.get(name)?;
    let initial = env
        .ctx()
        .cls
        .and_then(|c| c.prop(name))
        .and_then(|p| p.initial.as_ref())
        .map_or(Type::INIT_NULL, Type::from_cell);
    Some(to_cell(&written.join(&initial)))
}

/// A write of `ty` to the static `prop`, or to an unknown one.
fn write_static(env: &mut Env<'_, '_>, prop: &StaticProp, ty: &Type) {
    if prop.could_be_self(env) {
        match prop.name() {
            Some(name) => env.collect().self_props.merge(&name, ty),
            None => env.collect().self_props.merge_each(ty),
        }
    }
    let cls = prop.cls_name();
    let name = prop.name();
    env.collect()
        .merge_public_static(cls.as_deref(), name.as_deref(), ty);
}

/// Binding a reference to an unknown property may replace any of them.
fn bind_static(env: &mut Env<'_, '_>, prop: &StaticProp) {
    if prop.could_be_self(env) {
        match prop.name() {
            Some(name) => env.collect().self_props.merge(&name, &Type::REF),
            None => env.kill_self_props(),
        }
    }
    let cls = prop.cls_name();
    let name = prop.name();
    env.collect()
        .merge_public_static(cls.as_deref(), name.as_deref(), &Type::REF);
}

pub(super) fn cget_s(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let prop = StaticProp::take(env, slot)?;
    if prop.is_self(env) {
        if let Some(ty) = prop.name().and_then(|n| self_prop_as_cell(env, &n)) {
            // Only a declared private static is certainly accessible.
            env.nothrow();
            if env.self_cls_exact().is_some_and(|exact| prop.cls.subtype_of(&exact)) {
                env.constprop();
            }
            env.push(ty);
            return Ok(Effect::Direct);
        }
    }
    let indexed = env.index().lookup_public_static(&prop.cls, &prop.name);
    if indexed.subtype_of(&Type::INIT_CELL) {
        if env.options().hard_const_prop {
            env.constprop();
        }
        env.push(indexed);
    } else {
        env.push(Type::INIT_CELL);
    }
    Ok(Effect::Direct)
}

pub(super) fn vget_s(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let prop = StaticProp::take(env, slot)?;
    bind_static(env, &prop);
    env.push(Type::REF);
    Ok(Effect::Direct)
}

pub(super) fn set_s(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let val = env.pop()?;
    let prop = StaticProp::take(env, slot)?;
    if prop.could_be_self(env) && prop.name().is_some() {
        env.nothrow();
    }
    write_static(env, &prop, &val);
    env.push(val);
    Ok(Effect::Direct)
}

/// `SetOpS` and `IncDecS`: the new value is unknown.
pub(super) fn modify_s(env: &mut Env<'_, '_>, slot: ClsRefSlotId, has_rhs: bool) -> Result {
    if has_rhs {
        env.pop()?;
    }
    let prop = StaticProp::take(env, slot)?;
    write_static(env, &prop, &Type::INIT_CELL);
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn bind_s(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let val = env.pop()?;
    let prop = StaticProp::take(env, slot)?;
    bind_static(env, &prop);
    env.push(val);
    Ok(Effect::Direct)
}

pub(super) fn isset_s(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let prop = StaticProp::take(env, slot)?;
    let known = |t: &Type| {
        if t.subtype_of(&Type::NULL) {
            Some(Type::FALSE)
        } else if !t.could_be(&Type::NULL) {
            Some(Type::TRUE)
        } else {
            None
        }
    };
    if prop.is_self(env) {
        if let Some(out) = prop
            .name()
            .and_then(|n| self_prop_as_cell(env, &n))
            .and_then(|t| known(&t))
        {
            env.constprop();
            env.push(out);
            return Ok(Effect::Direct);
        }
    }
    let indexed = env.index().lookup_public_static(&prop.cls, &prop.name);
    if indexed.subtype_of(&Type::INIT_CELL) {
        if env.options().hard_const_prop {
            env.constprop();
        }
        if let Some(out) = known(&indexed) {
            env.push(out);
            return Ok(Effect::Direct);
        }
    }
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

pub(super) fn empty_s(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    StaticProp::take(env, slot)?;
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

/// `FPassS` when the callee's by-ref-ness is unknown: the property may be
/// boxed or read.
pub(super) fn fpass_s_unknown(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    let prop = StaticProp::take(env, slot)?;
    if prop.could_be_self(env) {
        match prop.name() {
            Some(name) => env.collect().self_props.merge(&name, &Type::INIT_GEN),
            None => env.kill_self_props(),
        }
    }
    let cls = prop.cls_name();
    let name = prop.name();
    env.collect()
        .merge_public_static(cls.as_deref(), name.as_deref(), &Type::INIT_GEN);
    env.push(Type::INIT_GEN);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Property initialization
// ----------------------------------------------------------------------------

pub(super) fn check_prop(env: &mut Env<'_, '_>) -> Result {
    if env.ctx().cls.is_some_and(|c| c.attrs.no_override) {
        return reduce([Bytecode::False]);
    }
    env.nothrow();
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

pub(super) fn init_prop(env: &mut Env<'_, '_>, name: &Arc<str>, op: InitPropOp) -> Result {
    let t = env.top(0)?.clone();
    match op {
        InitPropOp::Static => {
            env.collect().self_props.merge(name, &t);
            let cls = env.ctx().cls.map(|c| c.name.clone());
            env.collect()
                .merge_public_static(cls.as_deref(), Some(name), &t);
        }
        InitPropOp::NonStatic => env.collect().this_props.merge(name, &t),
    }

    let v = t.tv();
    let cls = env.ctx().cls;
    let declared = cls.is_some_and(|c| c.prop(name).is_some());
    if declared && (v.is_some() || !t.could_run_destructor()) {
        trace!(prop = %name, ty = %t, "initialized property");
        env.collect().init_props.insert(name.clone(), v.clone());
        if v.is_some() {
            if let (InitPropOp::Static, Some(cls)) = (op, cls) {
                if !env.interp.collect.opts.inlining {
                    env.index().fixup_public_static(&cls.name, name, &t);
                }
            }
            return reduce([Bytecode::PopC]);
        }
    }
    env.pop()?;
    Ok(Effect::Direct)
}

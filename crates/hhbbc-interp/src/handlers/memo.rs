//! Instructions of memoize wrappers: key computation and cache lookup.

use hhbbc_bc::{AnnotType, Bytecode, LocalId, ObjMethodOp, Op, TypeConstraint};
use hhbbc_types::{Bits, Cell, Lattice, Type};

use super::{Result, reduce};
use crate::env::Env;
use crate::error::InterpError;
use crate::flags::Effect;

/// What a parameter's declared type guarantees about its memo key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MemoKeyConstraint {
    None,
    Null,
    Int,
    IntOrNull,
    Bool,
    BoolOrNull,
    Str,
    StrOrNull,
    IntOrStr,
}

pub(crate) fn memo_key_constraint(tc: &TypeConstraint) -> MemoKeyConstraint {
    use MemoKeyConstraint as MK;
    // Soft constraints are not enforced.
    if tc.soft {
        return MK::None;
    }
    match (tc.annot, tc.nullable) {
        (AnnotType::Null, _) => MK::Null,
        (AnnotType::Bool, false) => MK::Bool,
        (AnnotType::Bool, true) => MK::BoolOrNull,
        (AnnotType::Int, false) => MK::Int,
        (AnnotType::Int, true) => MK::IntOrNull,
        (AnnotType::String, false) => MK::Str,
        (AnnotType::String, true) => MK::StrOrNull,
        (AnnotType::ArrayKey, false) => MK::IntOrStr,
        _ => MK::None,
    }
}

fn require_wrapper(env: &Env<'_, '_>, op: Op) -> Result<(), InterpError> {
    if env.ctx().func.attrs.is_memoize_wrapper {
        Ok(())
    } else {
        Err(InterpError::NotMemoizeWrapper(op))
    }
}

/// Return type of the implementation a memoize wrapper caches.
pub(crate) fn memoize_impl_ret_type(env: &Env<'_, '_>) -> Result<Type, InterpError> {
    require_wrapper(env, Op::MemoGet)?;
    let ctx = env.ctx();
    let name = ctx.func.memoize_impl_name();
    let callee = if ctx.func.cls.is_some() {
        let cls = env.self_cls_exact().unwrap_or(Type::CLS);
        env.index().resolve_method(&ctx, &cls, &name)
    } else {
        env.index().resolve_func(&ctx, &name)
    };
    let ret = env.index().lookup_return_type(&ctx, &callee);
    // Memoized results are always initialized cells.
    Ok(if ret.subtype_of(&Type::INIT_CELL) {
        ret
    } else {
        Type::INIT_CELL
    })
}

/// The constraint on parameter `loc`, with type aliases resolved. `None`
/// unless hard type hints make the constraint a guarantee.
fn param_key_constraint(env: &Env<'_, '_>, loc: LocalId) -> MemoKeyConstraint {
    if !env.options().hard_type_hints {
        return MemoKeyConstraint::None;
    }
    let Some(tc) = env
        .ctx()
        .func
        .params
        .get(loc.index())
        .and_then(|p| p.constraint.as_ref())
    else {
        return MemoKeyConstraint::None;
    };
    let mut tc = tc.clone();
    if tc.annot == AnnotType::Object {
        if let Some(name) = &tc.name {
            let resolved = env.index().resolve_type_name(name);
            if resolved != AnnotType::Object {
                tc.annot = resolved;
            }
        }
    }
    memo_key_constraint(&tc)
}

/// The memo key of a constant that maps to itself. Empty strings and
/// strings starting at `~` or above are escaped, so they are left alone.
fn identity_memo_key(v: &Cell) -> Option<Type> {
    match v {
        Cell::Int(_) => Some(Type::from_cell(v)),
        Cell::Str(s) if s.as_bytes().first().is_some_and(|b| *b < b'~') => {
            Some(Type::from_cell(v))
        }
        _ => None,
    }
}

pub(super) fn get_memo_key_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    use MemoKeyConstraint as MK;
    require_wrapper(env, Op::GetMemoKeyL)?;

    let in_ty = env.loc_as_cell(loc)?;
    // Objects produce their key by calling into user code.
    if !env.loc_could_be_uninit(loc)? && !in_ty.could_be_bits(Bits::OBJ) {
        env.nothrow();
        env.constprop();
    }

    let cget = Bytecode::CGetL { loc };
    match param_key_constraint(env, loc) {
        MK::Null => {
            env.push(Type::ival(0));
            return Ok(Effect::Direct);
        }
        MK::Int | MK::Str | MK::IntOrStr => return reduce([cget]),
        MK::Bool => return reduce([cget, Bytecode::CastInt]),
        // Keys of nullable strings and ints need a branch to compute.
        MK::StrOrNull | MK::IntOrNull => {
            env.push(Type::INT.join(&Type::STR));
            return Ok(Effect::Direct);
        }
        MK::BoolOrNull => {
            env.push(Type::INT);
            return Ok(Effect::Direct);
        }
        MK::None => {}
    }

    if in_ty.subtype_of_bits(Bits::INT) {
        return reduce([cget]);
    }
    let memoize_param = env
        .index()
        .builtin_class("IMemoizeParam")
        .map(Type::sub_obj);
    if memoize_param.is_some_and(|p| in_ty.subtype_of(&p)) {
        return reduce([
            cget,
            Bytecode::FPushObjMethodD {
                args: 0,
                method: "getInstanceKey".into(),
                op: ObjMethodOp::NullThrows,
            },
            Bytecode::FCall { args: 0 },
            Bytecode::UnboxR,
        ]);
    }
    // Booleans and nulls map to static strings.
    let key = if let Some(key) = in_ty.tv().as_ref().and_then(identity_memo_key) {
        key
    } else if in_ty.subtype_of_bits(Bits::BOOL | Bits::INIT_NULL) {
        Type::SSTR
    } else if in_ty.could_be_bits(Bits::INT) {
        Type::INT.join(&Type::STR)
    } else {
        Type::STR
    };
    env.push(key);
    Ok(Effect::Direct)
}

/// `MaybeMemoType` (`exact == false`): could the value be a cached result?
/// `IsMemoType`: is every cached result of the value's type?
pub(super) fn memo_type_test(env: &mut Env<'_, '_>, exact: bool) -> Result {
    let op = if exact {
        Op::IsMemoType
    } else {
        Op::MaybeMemoType
    };
    require_wrapper(env, op)?;
    env.nothrow();
    env.constprop();
    let memo_ty = memoize_impl_ret_type(env)?;
    let ty = env.pop()?;
    let hit = if exact {
        memo_ty.subtype_of(&ty)
    } else {
        ty.could_be(&memo_ty)
    };
    env.push(if hit { Type::TRUE } else { Type::FALSE });
    Ok(Effect::Direct)
}

/// Look up the cache: either nothing yet, or a result of the implementation.
pub(super) fn memo_get(env: &mut Env<'_, '_>) -> Result {
    require_wrapper(env, Op::MemoGet)?;
    env.nothrow();
    let ret = memoize_impl_ret_type(env)?;
    env.push(ret.join(&Type::UNINIT));
    Ok(Effect::Direct)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{AnnotType, Bytecode, FuncAttrs, LocalId, LocalRange, Param, TypeConstraint};
    use hhbbc_index::{FuncInfo, MemoryIndex};
    use hhbbc_types::{ClassInfo, ClassKind, Lattice, Type};

    use super::{MemoKeyConstraint as MK, memo_key_constraint};
    use crate::handlers::testing::Harness;

    fn wrapper(params: Vec<Param>) -> Harness {
        Harness::new()
            .with_params(params)
            .with_attrs(FuncAttrs {
                is_memoize_wrapper: true,
                ..FuncAttrs::default()
            })
    }

    fn impl_returning(ret: Type) -> FuncInfo {
        FuncInfo::builder().name("f$memoize_impl").ret(ret).build()
    }

    fn param(annot: AnnotType, nullable: bool) -> Param {
        Param::builder()
            .name("p")
            .constraint(TypeConstraint::builder().annot(annot).nullable(nullable).build())
            .build()
    }

    #[test]
    fn test_constraint_table() {
        let tc = |annot, nullable| {
            memo_key_constraint(&TypeConstraint::builder().annot(annot).nullable(nullable).build())
        };
        assert_eq!(tc(AnnotType::Null, true), MK::Null);
        assert_eq!(tc(AnnotType::Int, false), MK::Int);
        assert_eq!(tc(AnnotType::Int, true), MK::IntOrNull);
        assert_eq!(tc(AnnotType::Bool, true), MK::BoolOrNull);
        assert_eq!(tc(AnnotType::String, true), MK::StrOrNull);
        assert_eq!(tc(AnnotType::ArrayKey, false), MK::IntOrStr);
        assert_eq!(tc(AnnotType::ArrayKey, true), MK::None);
        assert_eq!(tc(AnnotType::Float, false), MK::None);

        let soft = TypeConstraint::builder().annot(AnnotType::Int).soft(true).build();
        assert_eq!(memo_key_constraint(&soft), MK::None);
    }

    #[test]
    fn test_int_param_key_is_identity() {
        let mut h = wrapper(vec![param(AnnotType::Int, false)]);
        h.set_local(0, Type::INT);
        let flags = h.step(Bytecode::GetMemoKeyL { loc: LocalId(0) });
        assert_eq!(flags.strength_reduced, Some(vec![Bytecode::CGetL { loc: LocalId(0) }]));
        assert_eq!(h.top(), Type::INT);
    }

    #[test]
    fn test_bool_param_key_is_cast() {
        let mut h = wrapper(vec![param(AnnotType::Bool, false)]);
        h.set_local(0, Type::BOOL);
        let flags = h.step(Bytecode::GetMemoKeyL { loc: LocalId(0) });
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::CGetL { loc: LocalId(0) }, Bytecode::CastInt])
        );
        assert_eq!(h.top(), Type::INT);
    }

    #[test]
    fn test_nullable_params() {
        let mut h = wrapper(vec![param(AnnotType::Bool, true), param(AnnotType::String, true)]);
        h.set_local(0, Type::BOOL.opt());
        h.set_local(1, Type::STR.opt());
        h.step(Bytecode::GetMemoKeyL { loc: LocalId(0) });
        assert_eq!(h.top(), Type::INT);
        h.step(Bytecode::GetMemoKeyL { loc: LocalId(1) });
        assert_eq!(h.top(), Type::INT.join(&Type::STR));
    }

    #[test]
    fn test_hard_type_hints_off_uses_generic_keys() {
        let mut h = wrapper(vec![param(AnnotType::Bool, false)]);
        h.options.hard_type_hints = false;
        h.set_local(0, Type::BOOL);
        let flags = h.step(Bytecode::GetMemoKeyL { loc: LocalId(0) });
        assert!(flags.strength_reduced.is_none());
        assert_eq!(h.top(), Type::SSTR);
    }

    #[test]
    fn test_constant_string_key_is_the_string() {
        let mut h = wrapper(vec![]);
        h.set_local(0, Type::sval("abc"));
        let flags = h.step(Bytecode::GetMemoKeyL { loc: LocalId(0) });
        assert!(flags.strength_reduced.is_none());
        assert!(flags.can_const_prop);
        assert_eq!(h.top(), Type::sval("abc"));
    }

    #[test]
    fn test_escaped_constant_strings_are_not_folded() {
        let mut h = wrapper(vec![]);
        h.set_local(0, Type::sval(""));
        h.set_local(1, Type::sval("~tilde"));
        h.step(Bytecode::GetMemoKeyL { loc: LocalId(0) });
        assert_eq!(h.top(), Type::STR);
        h.step(Bytecode::GetMemoKeyL { loc: LocalId(1) });
        assert_eq!(h.top(), Type::STR);
    }

    #[test]
    fn test_memoize_param_objects_call_get_instance_key() {
        let mut h = wrapper(vec![]).with_index(MemoryIndex::new().with_builtin_class(
            ClassInfo::builder()
                .name("IMemoizeParam")
                .kind(ClassKind::Interface)
                .build(),
        ));
        let iface = h.class("IMemoizeParam");
        h.set_local(0, Type::sub_obj(iface));
        let flags = h.step(Bytecode::GetMemoKeyL { loc: LocalId(0) });
        let reduced = flags.strength_reduced.expect("reduction");
        insta::assert_snapshot!(
            reduced.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
            @r#"CGetL L:0; FPushObjMethodD 0 "getInstanceKey" NullThrows; FCall 0; UnboxR"#
        );
    }

    #[test]
    fn test_memo_key_outside_wrapper_is_an_error() {
        let mut h = Harness::new();
        insta::assert_snapshot!(
            h.try_step(Bytecode::GetMemoKeyL { loc: LocalId(0) }).unwrap_err(),
            @"`GetMemoKeyL` outside a memoize wrapper"
        );
    }

    #[test]
    fn test_memo_get_may_miss() {
        let mut h = wrapper(vec![])
            .with_index(MemoryIndex::new().with_func(impl_returning(Type::INT)));
        h.step(Bytecode::MemoGet {
            keys: LocalRange { first: LocalId(0), count: 0 },
        });
        assert_eq!(h.top(), Type::INT.join(&Type::UNINIT));
    }

    #[test]
    fn test_memo_type_tests() {
        let mut h = wrapper(vec![])
            .with_index(MemoryIndex::new().with_func(impl_returning(Type::INT)));
        h.push(Type::ival(1));
        h.step(Bytecode::MaybeMemoType);
        assert_eq!(h.top(), Type::TRUE);

        h.push(Type::ival(1));
        h.step(Bytecode::IsMemoType);
        assert_eq!(h.top(), Type::FALSE);
    }
}

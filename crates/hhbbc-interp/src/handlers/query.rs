//! Tests that push a boolean: `isset`, `empty`, type tests and `instanceof`.

use hhbbc_bc::{Bytecode, IsTypeOp, LocalId, OODeclExistsOp};
use hhbbc_types::{Bits, Cell, ClassKind, Type};

use super::arith::cast_bool_impl;
use super::{Result, named_local, reduce};
use crate::env::Env;
use crate::flags::Effect;

/// The type an `IsType*` test checks for. `Scalar` is not a single type.
pub(crate) fn type_of_istype(op: IsTypeOp) -> Option<Type> {
    Some(match op {
        IsTypeOp::Null => Type::NULL,
        IsTypeOp::Bool => Type::BOOL,
        IsTypeOp::Int => Type::INT,
        IsTypeOp::Dbl => Type::DBL,
        IsTypeOp::Str => Type::STR,
        IsTypeOp::Arr => Type::ARR,
        IsTypeOp::Vec => Type::VEC,
        IsTypeOp::Dict => Type::DICT,
        IsTypeOp::Keyset => Type::KEYSET,
        IsTypeOp::Obj => Type::OBJ,
        IsTypeOp::Scalar => return None,
    })
}

/// Interfaces that strings or arrays also satisfy, so `instanceof` on them
/// says nothing about objects.
pub(crate) fn interface_supports_non_objects(cls: &str) -> bool {
    let name = cls.strip_prefix('\\').unwrap_or(cls);
    let name = name.strip_prefix("HH\\").unwrap_or(name);
    [
        "Traversable",
        "KeyedTraversable",
        "Container",
        "KeyedContainer",
        "XHPChild",
        "Stringish",
    ]
    .iter()
    .any(|i| i.eq_ignore_ascii_case(name))
}

fn push_bool_of(env: &mut Env<'_, '_>, known: Option<bool>) {
    env.push(match known {
        Some(true) => Type::TRUE,
        Some(false) => Type::FALSE,
        None => Type::BOOL,
    });
}

// ----------------------------------------------------------------------------
// Array key tests
// ----------------------------------------------------------------------------

/// `array_key_exists($key, $container)`: throws when the container is not
/// an array, or when a PHP array is queried with a key raising a hack array
/// compatibility notice.
pub(super) fn ak_exists_may_throw(env: &Env<'_, '_>, key: &Type, container: &Type) -> bool {
    let arrays = [Bits::ARR, Bits::VEC, Bits::DICT, Bits::KEYSET];
    if !arrays.iter().any(|b| container.subtype_of_bits(*b)) {
        return true;
    }
    if key.subtype_of_bits(Bits::STR) || key.subtype_of_bits(Bits::NULL) {
        return container.subtype_of_bits(Bits::ARR) && env.options().hack_arr_compat_notices;
    }
    !key.subtype_of_bits(Bits::INT)
}

pub(super) fn ak_exists(env: &mut Env<'_, '_>) -> Result {
    let container = env.pop()?;
    let key = env.pop()?;
    if !ak_exists_may_throw(env, &key, &container) {
        env.nothrow();
    }
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// isset and empty
// ----------------------------------------------------------------------------

fn isset_impl(env: &mut Env<'_, '_>, t: &Type) {
    env.nothrow();
    env.constprop();
    let known = if t.subtype_of_bits(Bits::NULL) {
        Some(false)
    } else if !t.could_be_bits(Bits::NULL) {
        Some(true)
    } else {
        None
    };
    push_bool_of(env, known);
}

pub(super) fn isset_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    let t = env.loc_as_cell(loc)?;
    isset_impl(env, &t);
    Ok(Effect::Direct)
}

pub(super) fn empty_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    let t = env.loc_as_cell(loc)?;
    cast_bool_impl(env, &t, true);
    Ok(Effect::Direct)
}

/// `IssetN` (`empty == false`) and `EmptyN`.
pub(super) fn isset_or_empty_n(env: &mut Env<'_, '_>, empty: bool) -> Result {
    if let Some(loc) = named_local(env, env.top(0)?) {
        let test = if empty {
            Bytecode::EmptyL { loc }
        } else {
            Bytecode::IssetL { loc }
        };
        return reduce([Bytecode::PopC, test]);
    }
    env.pop()?;
    env.may_use_vv();
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

/// `IssetG` and `EmptyG`.
pub(super) fn isset_or_empty_g(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Type tests
// ----------------------------------------------------------------------------

fn is_type_impl(env: &mut Env<'_, '_>, t: &Type, test: &Type) {
    env.constprop();
    let known = if t.subtype_of(test) {
        Some(true)
    } else if !t.could_be(test) {
        Some(false)
    } else {
        None
    };
    push_bool_of(env, known);
}

/// `is_object` is false for instances of the incomplete class placeholder.
fn is_type_obj(env: &mut Env<'_, '_>, t: &Type) {
    if !t.could_be_bits(Bits::OBJ) {
        env.constprop();
        return push_bool_of(env, Some(false));
    }
    if t.subtype_of_bits(Bits::OBJ) {
        match env.index().builtin_class("__PHP_Incomplete_Class") {
            Some(incomplete) => {
                let incomplete = Type::obj_exact(incomplete);
                if !t.could_be(&incomplete) {
                    env.constprop();
                    return push_bool_of(env, Some(true));
                }
                if t.subtype_of(&incomplete) {
                    env.constprop();
                    return push_bool_of(env, Some(false));
                }
            }
            None => {
                env.constprop();
                return push_bool_of(env, Some(true));
            }
        }
    }
    push_bool_of(env, None);
}

fn is_type_dispatch(env: &mut Env<'_, '_>, t: &Type, op: IsTypeOp) {
    match type_of_istype(op) {
        None => env.push(Type::BOOL),
        Some(_) if op == IsTypeOp::Obj => is_type_obj(env, t),
        Some(test) => is_type_impl(env, t, &test),
    }
}

pub(super) fn is_type_c(env: &mut Env<'_, '_>, op: IsTypeOp) -> Result {
    env.nothrow();
    let t = env.pop()?;
    is_type_dispatch(env, &t, op);
    Ok(Effect::Direct)
}

pub(super) fn is_type_l(env: &mut Env<'_, '_>, loc: LocalId, op: IsTypeOp) -> Result {
    if !env.loc_could_be_uninit(loc)? {
        env.nothrow();
    }
    let t = env.loc_as_cell(loc)?;
    is_type_dispatch(env, &t, op);
    Ok(Effect::Direct)
}

/// Keeps the value and pushes whether it is uninitialized.
pub(super) fn is_uninit(env: &mut Env<'_, '_>) -> Result {
    env.nothrow();
    let elem = env.pop_elem()?;
    let t = elem.ty.clone();
    env.push_equiv(elem.ty, elem.equiv);
    is_type_impl(env, &t, &Type::UNINIT);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Classes
// ----------------------------------------------------------------------------

pub(super) fn instance_of_d(env: &mut Env<'_, '_>, cls: &str) -> Result {
    if interface_supports_non_objects(cls) {
        env.pop()?;
        env.push(Type::BOOL);
        return Ok(Effect::Direct);
    }
    let ctx = env.ctx();
    let Some(rcls) = env.index().resolve_class(&ctx, cls) else {
        env.pop()?;
        env.push(Type::BOOL);
        return Ok(Effect::Direct);
    };
    let inst = Type::sub_obj(rcls);
    let t = env.top(0)?;
    if t.is_opt() && t.unopt().subtype_of(&inst) {
        return reduce([
            Bytecode::IsTypeC {
                op: IsTypeOp::Null,
            },
            Bytecode::Not,
        ]);
    }
    let t = env.pop()?;
    env.nothrow();
    is_type_impl(env, &t, &inst);
    Ok(Effect::Direct)
}

pub(super) fn instance_of(env: &mut Env<'_, '_>) -> Result {
    let t = env.top(0)?;
    if let Some(Cell::Str(name)) = t.tv() {
        return reduce([Bytecode::PopC, Bytecode::InstanceOfD { cls: name }]);
    }
    if t.subtype_of_bits(Bits::OBJ) {
        if let Some(spec) = t.cls_spec().filter(|s| s.exact) {
            let cls = spec.cls.info().name.clone();
            return reduce([Bytecode::PopC, Bytecode::InstanceOfD { cls }]);
        }
    }
    env.discard(2)?;
    env.push(Type::BOOL);
    Ok(Effect::Direct)
}

/// `class_exists` and friends. A class is only certain to exist when it is
/// part of the system library or an ancestor of the function's own class;
/// anything else may fail to autoload.
pub(super) fn oo_decl_exists(env: &mut Env<'_, '_>, op: OODeclExistsOp) -> Result {
    env.pop()?;
    let name = env.pop()?;
    let Some(Cell::Str(name)) = name.tv() else {
        env.push(Type::BOOL);
        return Ok(Effect::Direct);
    };
    let ctx = env.ctx();
    let Some(rcls) = env.index().resolve_class(&ctx, &name) else {
        env.push(Type::BOOL);
        return Ok(Effect::Direct);
    };
    let kind = rcls.info().kind;
    let may_exist = match op {
        OODeclExistsOp::Class => kind == ClassKind::Class,
        OODeclExistsOp::Interface => kind == ClassKind::Interface,
        OODeclExistsOp::Trait => kind == ClassKind::Trait,
    };
    let certain =
        rcls.info().systemlib || env.self_cls().is_some_and(|own| own.subtype_of(&rcls));
    if certain {
        env.constprop();
        push_bool_of(env, Some(may_exist));
    } else {
        push_bool_of(env, if may_exist { None } else { Some(false) });
    }
    Ok(Effect::Direct)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::{Bytecode, IsTypeOp, LocalId, OODeclExistsOp};
    use hhbbc_index::MemoryIndex;
    use hhbbc_types::{ClassInfo, ClassKind, Lattice, Type};

    use super::interface_supports_non_objects;
    use crate::handlers::testing::Harness;

    fn with_classes() -> Harness {
        Harness::new().with_index(
            MemoryIndex::new()
                .with_class(ClassInfo::builder().name("Foo").build())
                .with_class(
                    ClassInfo::builder()
                        .name("Sys")
                        .kind(ClassKind::Interface)
                        .systemlib(true)
                        .build(),
                ),
        )
    }

    // ------------------------------------------------------------------------
    // AKExists
    // ------------------------------------------------------------------------

    fn ak_exists_throws(key: Type, container: Type, notices: bool) -> bool {
        let mut h = Harness::new();
        h.options.hack_arr_compat_notices = notices;
        h.push(key);
        h.push(container);
        let flags = h.step(Bytecode::AKExists);
        assert_eq!(h.top(), Type::BOOL);
        flags.was_pei
    }

    #[test]
    fn test_ak_exists_throw_table() {
        assert!(!ak_exists_throws(Type::INT, Type::ARR, false));
        assert!(ak_exists_throws(Type::INT, Type::OBJ, false));
        assert!(!ak_exists_throws(Type::STR, Type::DICT, true));
        assert!(!ak_exists_throws(Type::STR, Type::ARR, false));
        assert!(ak_exists_throws(Type::STR, Type::ARR, true));
        assert!(ak_exists_throws(Type::DBL, Type::KEYSET, false));
        assert!(ak_exists_throws(Type::INT, Type::ARR_LIKE, false));
    }

    // ------------------------------------------------------------------------
    // isset and empty
    // ------------------------------------------------------------------------

    #[test]
    fn test_isset_l() {
        for (local, expected) in [
            (Type::INT, Type::TRUE),
            (Type::UNINIT, Type::FALSE),
            (Type::STR.opt(), Type::BOOL),
        ] {
            let mut h = Harness::new();
            h.set_local(0, local);
            let flags = h.step(Bytecode::IssetL { loc: LocalId(0) });
            assert!(!flags.was_pei);
            assert_eq!(h.top(), expected);
        }
    }

    #[test]
    fn test_empty_l_of_object_is_false() {
        let mut h = Harness::new();
        h.set_local(0, Type::OBJ);
        h.step(Bytecode::EmptyL { loc: LocalId(0) });
        assert_eq!(h.top(), Type::FALSE);
    }

    #[test]
    fn test_isset_n_of_known_name() {
        let mut h = Harness::with_named_locals(&["x"]);
        h.push(Type::sval("x"));
        let flags = h.step(Bytecode::IssetN);
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::PopC, Bytecode::IssetL { loc: LocalId(0) }])
        );
        assert_eq!(h.top(), Type::FALSE);
    }

    // ------------------------------------------------------------------------
    // Type tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_is_type_l_decided() {
        let mut h = Harness::new();
        h.set_local(0, Type::ival(4));
        let flags = h.step(Bytecode::IsTypeL { loc: LocalId(0), op: IsTypeOp::Int });
        assert!(!flags.was_pei);
        assert!(flags.can_const_prop);
        assert_eq!(h.top(), Type::TRUE);

        h.step(Bytecode::IsTypeL { loc: LocalId(0), op: IsTypeOp::Str });
        assert_eq!(h.top(), Type::FALSE);
    }

    #[test]
    fn test_is_type_l_of_uninit_local_may_warn() {
        let mut h = Harness::new();
        let flags = h.step(Bytecode::IsTypeL { loc: LocalId(0), op: IsTypeOp::Null });
        assert!(flags.was_pei);
        assert_eq!(h.top(), Type::TRUE);
    }

    #[test]
    fn test_is_type_scalar_is_unknown() {
        let mut h = Harness::new();
        h.push(Type::INT);
        h.step(Bytecode::IsTypeC { op: IsTypeOp::Scalar });
        assert_eq!(h.top(), Type::BOOL);
    }

    #[test]
    fn test_is_uninit_keeps_value() {
        let mut h = Harness::new();
        h.push(Type::INT.join(&Type::UNINIT));
        h.step(Bytecode::IsUninit);
        assert_eq!(h.state.stack.len(), 2);
        assert_eq!(h.top(), Type::BOOL);
    }

    // ------------------------------------------------------------------------
    // Classes
    // ------------------------------------------------------------------------

    #[test]
    fn test_instance_of_d_of_exact_object() {
        let mut h = with_classes();
        let foo = h.class("Foo");
        h.push(Type::obj_exact(foo));
        let flags = h.step(Bytecode::InstanceOfD { cls: "Foo".into() });
        assert!(!flags.was_pei);
        assert_eq!(h.top(), Type::TRUE);
    }

    #[test]
    fn test_instance_of_d_of_nullable_object_tests_null() {
        let mut h = with_classes();
        let foo = h.class("Foo");
        h.push(Type::sub_obj(foo).opt());
        let flags = h.step(Bytecode::InstanceOfD { cls: "Foo".into() });
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::IsTypeC { op: IsTypeOp::Null }, Bytecode::Not])
        );
        assert_eq!(h.top(), Type::BOOL);
    }

    #[test]
    fn test_instance_of_with_constant_name() {
        let mut h = with_classes();
        h.push(Type::INT);
        h.push(Type::sval("Foo"));
        let flags = h.step(Bytecode::InstanceOf);
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::PopC, Bytecode::InstanceOfD { cls: "Foo".into() }])
        );
        assert_eq!(h.top(), Type::FALSE);
    }

    #[test]
    fn test_traversable_says_nothing() {
        assert!(interface_supports_non_objects("HH\\Traversable"));
        assert!(interface_supports_non_objects("stringish"));
        assert!(!interface_supports_non_objects("Iterator"));
    }

    #[test]
    fn test_oo_decl_exists() {
        let mut h = with_classes();
        h.push(Type::sval("Sys"));
        h.push(Type::TRUE);
        let flags = h.step(Bytecode::OODeclExists { op: OODeclExistsOp::Interface });
        assert!(flags.can_const_prop);
        assert_eq!(h.top(), Type::TRUE);

        h.push(Type::sval("Foo"));
        h.push(Type::TRUE);
        h.step(Bytecode::OODeclExists { op: OODeclExistsOp::Class });
        assert_eq!(h.top(), Type::BOOL);

        h.push(Type::sval("Foo"));
        h.push(Type::TRUE);
        h.step(Bytecode::OODeclExists { op: OODeclExistsOp::Trait });
        assert_eq!(h.top(), Type::FALSE);
    }
}

//! Stack shuffling, literals, array construction and constants.

use std::sync::Arc;

use hhbbc_bc::{Bytecode, ClsRefSlotId, CollectionType, LocalId};
use hhbbc_types::{ArrKind, ArrayData, Bits, Cell, Lattice, Type};

use super::{Result, reduce};
use crate::collect::CnsEntry;
use crate::env::Env;
use crate::flags::Effect;
use crate::state::StackEquiv;

// ----------------------------------------------------------------------------
// Stack
// ----------------------------------------------------------------------------

pub(super) fn nop(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    Ok(Effect::Direct)
}

pub(super) fn discard_cls_ref(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    env.nothrow();
    env.take_cls_ref_slot(slot)?;
    Ok(Effect::Direct)
}

pub(super) fn assert_rat_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    env.loc_raw(loc)?;
    env.effect_free();
    Ok(Effect::Direct)
}

pub(super) fn pop_c(env: &mut Env<'_, '_>) -> Result {
    env.nothrow();
    if !env.pop()?.could_run_destructor() {
        env.effect_free();
    }
    Ok(Effect::Direct)
}

pub(super) fn pop_u(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    env.pop()?;
    Ok(Effect::Direct)
}

pub(super) fn pop_v(env: &mut Env<'_, '_>) -> Result {
    env.nothrow();
    env.pop()?;
    Ok(Effect::Direct)
}

pub(super) fn pop_r(env: &mut Env<'_, '_>) -> Result {
    if env.top(0)?.subtype_of_bits(Bits::CELL) {
        return reduce([Bytecode::UnboxRNop, Bytecode::PopC]);
    }
    env.nothrow();
    env.pop()?;
    Ok(Effect::Direct)
}

pub(super) fn dup(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    let elem = env.pop_elem()?;
    env.push_equiv(elem.ty.clone(), elem.equiv);
    env.push_equiv(elem.ty, StackEquiv::DupTop);
    Ok(Effect::Direct)
}

pub(super) fn box_(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    env.pop()?;
    env.push(Type::REF);
    Ok(Effect::Direct)
}

pub(super) fn box_r(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    if env.top(0)?.subtype_of_bits(Bits::REF) {
        return reduce([Bytecode::BoxRNop]);
    }
    env.pop()?;
    env.push(Type::REF);
    Ok(Effect::Direct)
}

pub(super) fn unbox(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    env.pop()?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn unbox_r(env: &mut Env<'_, '_>) -> Result {
    if env.top(0)?.subtype_of_bits(Bits::INIT_CELL) {
        return reduce([Bytecode::UnboxRNop]);
    }
    env.nothrow();
    env.pop()?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn cget_cu_nop(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    let t = env.pop()?;
    env.push(t.remove_uninit());
    Ok(Effect::Direct)
}

pub(super) fn uget_cu_nop(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    env.pop()?;
    env.push(Type::UNINIT);
    Ok(Effect::Direct)
}

pub(super) fn unbox_r_nop(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    env.constprop();
    let t = env.pop()?;
    env.push(if t.subtype_of_bits(Bits::INIT_CELL) { t } else { Type::INIT_CELL });
    Ok(Effect::Direct)
}

pub(super) fn box_r_nop(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    let t = env.pop()?;
    env.push(if t.subtype_of_bits(Bits::REF) { t } else { Type::REF });
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Literals
// ----------------------------------------------------------------------------

pub(super) fn literal(env: &mut Env<'_, '_>, ty: Type) -> Result {
    env.effect_free();
    env.push(ty);
    Ok(Effect::Direct)
}

/// `NewArray`, `NewMixedArray` and `NewDictArray`.
pub(super) fn new_array(env: &mut Env<'_, '_>, kind: ArrKind, capacity: u32) -> Result {
    if capacity == 0 {
        env.effect_free();
        env.push(Type::aempty(kind));
    } else {
        env.push(Type::counted_arr(kind));
    }
    Ok(Effect::Direct)
}

/// `NewPackedArray` and `NewVecArray`.
pub(super) fn new_packed(env: &mut Env<'_, '_>, kind: ArrKind, count: u32) -> Result {
    let count = count as usize;
    let values = (0..count)
        .rev()
        .map(|i| env.top(i).map(Type::tv))
        .collect::<std::result::Result<Option<Vec<Cell>>, _>>()?;
    env.discard(count)?;
    let arr = values.and_then(|v| ArrayData::packed(kind, v));
    env.push(arr.map_or_else(|| Type::counted_arr(kind), Type::aval));
    env.constprop();
    Ok(Effect::Direct)
}

pub(super) fn new_struct_array(env: &mut Env<'_, '_>, keys: &[Arc<str>]) -> Result {
    let mut values = Vec::with_capacity(keys.len());
    for _ in keys {
        values.push(env.pop()?.tv());
    }
    values.reverse();
    let arr = keys
        .iter()
        .zip(values)
        .try_fold(ArrayData::empty(ArrKind::Arr), |arr, (k, v)| {
            arr.set(&Cell::str(k.clone()), v?)
        });
    env.push(arr.map_or_else(|| Type::counted_arr(ArrKind::Arr), Type::aval));
    env.constprop();
    Ok(Effect::Direct)
}

pub(super) fn new_keyset_array(env: &mut Env<'_, '_>, count: u32) -> Result {
    let mut keys = Vec::with_capacity(count as usize);
    let mut bad = false;
    for _ in 0..count {
        let k = env.pop()?.meet(&Type::ARR_KEY);
        bad |= k.is_bottom();
        keys.push(k);
    }
    keys.reverse();

    let constant = if bad {
        None
    } else {
        keys.iter().try_fold(ArrayData::empty(ArrKind::Keyset), |arr, k| {
            arr.append(k.tv()?)
        })
    };
    match constant {
        Some(arr) => {
            env.push(Type::aval(arr));
            env.constprop();
        }
        None if !bad => env.push(Type::counted_arr(ArrKind::Keyset)),
        None => {
            env.unreachable();
            env.push(Type::BOTTOM);
        }
    }
    Ok(Effect::Direct)
}

pub(super) fn new_like_array_l(env: &mut Env<'_, '_>, loc: LocalId) -> Result {
    env.loc_as_cell(loc)?;
    env.push(Type::counted_arr(ArrKind::Arr));
    Ok(Effect::Direct)
}

/// The kind of array a value is known to be, among `kinds`.
fn arr_kind_of(t: &Type, kinds: &[ArrKind]) -> Option<ArrKind> {
    kinds
        .iter()
        .copied()
        .find(|k| t.subtype_of_bits(Bits::arr(*k)))
}

pub(super) fn add_elem_c(env: &mut Env<'_, '_>) -> Result {
    let v = env.pop()?;
    let k = env.pop()?;
    let arr = env.pop()?;
    let Some(kind) = arr_kind_of(&arr, &[ArrKind::Arr, ArrKind::Dict]) else {
        env.push(Type::ARR.join(&Type::DICT));
        return Ok(Effect::Direct);
    };
    let folded = match (arr.tv(), k.tv(), v.tv()) {
        (Some(Cell::Arr(a)), Some(k), Some(v)) => a.set(&k, v),
        _ => None,
    };
    match folded {
        Some(out) => {
            env.nothrow();
            env.constprop();
            env.push(Type::aval(out));
        }
        None => env.push(Type::counted_arr(kind)),
    }
    Ok(Effect::Direct)
}

pub(super) fn add_elem_v(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.pop()?;
    let arr = env.pop()?;
    env.push(match arr_kind_of(&arr, &[ArrKind::Arr, ArrKind::Dict]) {
        Some(kind) => Type::arr_of(kind),
        None => Type::ARR.join(&Type::DICT),
    });
    Ok(Effect::Direct)
}

pub(super) fn add_new_elem_c(env: &mut Env<'_, '_>) -> Result {
    let v = env.pop()?;
    let arr = env.pop()?;
    let Some(kind) = arr_kind_of(&arr, &[ArrKind::Arr, ArrKind::Vec, ArrKind::Keyset]) else {
        env.push(Type::INIT_CELL);
        return Ok(Effect::Direct);
    };
    let folded = match (arr.tv(), v.tv()) {
        (Some(Cell::Arr(a)), Some(v)) => a.append(v),
        _ => None,
    };
    match folded {
        Some(out) => {
            env.constprop();
            env.push(Type::aval(out));
        }
        None => env.push(Type::counted_arr(kind)),
    }
    Ok(Effect::Direct)
}

pub(super) fn add_new_elem_v(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.pop()?;
    env.push(Type::ARR);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Collections
// ----------------------------------------------------------------------------

fn collection_class(ty: CollectionType) -> &'static str {
    match ty {
        CollectionType::Vector => "HH\\Vector",
        CollectionType::Map => "HH\\Map",
        CollectionType::Set => "HH\\Set",
        CollectionType::Pair => "HH\\Pair",
        CollectionType::ImmVector => "HH\\ImmVector",
        CollectionType::ImmMap => "HH\\ImmMap",
        CollectionType::ImmSet => "HH\\ImmSet",
    }
}

/// `NewCol`, `NewPair` and `ColFromArray`, popping `inputs` values.
pub(super) fn new_collection(env: &mut Env<'_, '_>, ty: CollectionType, inputs: usize) -> Result {
    env.discard(inputs)?;
    let obj = env
        .index()
        .builtin_class(collection_class(ty))
        .map_or(Type::OBJ, Type::obj_exact);
    env.push(obj);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

pub(super) fn cns(env: &mut Env<'_, '_>, name: &Arc<str>) -> Result {
    if !env.options().hard_const_prop {
        env.push(Type::INIT_CELL);
        return Ok(Effect::Direct);
    }
    let ctx = env.ctx();
    match env.index().lookup_constant(&ctx, name) {
        None => {
            // Not in the index yet: record the read so the next round knows.
            let collect = env.collect();
            collect
                .cns_map
                .entry(name.clone())
                .or_insert(CnsEntry::ReadOnly);
            collect.reads_untracked_constants = true;
            env.push(Type::INIT_CELL);
        }
        Some(t) => {
            if t.subtype_of(&Type::INIT_CELL) && t != Type::INIT_CELL {
                env.constprop();
            }
            env.push(t);
        }
    }
    Ok(Effect::Direct)
}

pub(super) fn cls_cns(env: &mut Env<'_, '_>, name: &Arc<str>, slot: ClsRefSlotId) -> Result {
    if let Some(spec) = env.peek_cls_ref_slot(slot)?.cls_spec() {
        if spec.exact {
            return reduce([
                Bytecode::DiscardClsRef { slot },
                Bytecode::ClsCnsD {
                    name: name.clone(),
                    cls: spec.cls.name().into(),
                },
            ]);
        }
    }
    env.take_cls_ref_slot(slot)?;
    env.push(Type::INIT_CELL);
    Ok(Effect::Direct)
}

pub(super) fn cls_cns_d(env: &mut Env<'_, '_>, name: &str, cls: &str) -> Result {
    let ctx = env.ctx();
    match env.index().resolve_class(&ctx, cls) {
        Some(rcls) => {
            let t = env
                .index()
                .lookup_class_constant(&ctx, &Type::cls_exact(rcls), name);
            if env.options().hard_const_prop {
                env.constprop();
            }
            env.push(t);
        }
        None => env.push(Type::INIT_CELL),
    }
    Ok(Effect::Direct)
}

/// `File`, `Dir` and `Method`.
pub(super) fn static_string(env: &mut Env<'_, '_>) -> Result {
    env.effect_free();
    env.push(Type::SSTR);
    Ok(Effect::Direct)
}

pub(super) fn cls_ref_name(env: &mut Env<'_, '_>, slot: ClsRefSlotId) -> Result {
    env.nothrow();
    env.take_cls_ref_slot(slot)?;
    env.push(Type::SSTR);
    Ok(Effect::Direct)
}

#[cfg(test)]
mod tests {
    use hhbbc_bc::Bytecode;
    use hhbbc_types::{ArrKind, ArrayData, Cell, Type};

    use crate::handlers::testing::Harness;

    #[test]
    fn test_pop_of_counted_value_is_not_effect_free() {
        let mut h = Harness::new();
        h.push(Type::INT);
        let flags = h.step(Bytecode::PopC);
        assert!(flags.effect_free);

        h.push(Type::OBJ);
        let flags = h.step(Bytecode::PopC);
        assert!(!flags.was_pei);
        assert!(!flags.effect_free);
    }

    #[test]
    fn test_pop_r_of_cell_reduces() {
        let mut h = Harness::new();
        h.push(Type::INT);
        let flags = h.step(Bytecode::PopR);
        assert_eq!(
            flags.strength_reduced,
            Some(vec![Bytecode::UnboxRNop, Bytecode::PopC])
        );
        assert_eq!(h.state.stack.len(), 0);
    }

    #[test]
    fn test_packed_array_of_constants_folds() {
        let mut h = Harness::new();
        h.push(Type::ival(1));
        h.push(Type::sval("a"));
        let flags = h.step(Bytecode::NewVecArray { count: 2 });
        assert!(flags.can_const_prop);
        let arr = ArrayData::packed(ArrKind::Vec, [Cell::Int(1), Cell::str("a")]).unwrap();
        assert_eq!(h.top(), Type::aval(arr));
    }

    #[test]
    fn test_packed_array_of_unknowns_is_counted() {
        let mut h = Harness::new();
        h.push(Type::INT);
        h.step(Bytecode::NewPackedArray { count: 1 });
        assert_eq!(h.top(), Type::counted_arr(ArrKind::Arr));
    }

    #[test]
    fn test_struct_array_keys_in_order() {
        let mut h = Harness::new();
        h.push(Type::ival(1));
        h.push(Type::ival(2));
        h.step(Bytecode::NewStructArray {
            keys: vec!["a".into(), "b".into()],
        });
        let Some(Cell::Arr(arr)) = h.top().tv() else {
            panic!("expected a constant array");
        };
        assert_eq!(arr.get(&Cell::str("a")), Some(&Cell::Int(1)));
        assert_eq!(arr.get(&Cell::str("b")), Some(&Cell::Int(2)));
    }

    #[test]
    fn test_keyset_of_non_key_is_unreachable() {
        let mut h = Harness::new();
        h.push(Type::OBJ);
        h.step(Bytecode::NewKeysetArray { count: 1 });
        assert!(h.state.unreachable);
    }

    #[test]
    fn test_add_elem_on_constant_array() {
        let mut h = Harness::new();
        h.push(Type::aempty(ArrKind::Dict));
        h.push(Type::sval("k"));
        h.push(Type::ival(3));
        let flags = h.step(Bytecode::AddElemC);
        assert!(!flags.was_pei);
        let Some(Cell::Arr(arr)) = h.top().tv() else {
            panic!("expected a constant dict");
        };
        assert_eq!(arr.get(&Cell::str("k")), Some(&Cell::Int(3)));
    }

    #[test]
    fn test_add_elem_on_unknown_container() {
        let mut h = Harness::new();
        h.push(Type::INIT_CELL);
        h.push(Type::INT);
        h.push(Type::INT);
        h.step(Bytecode::AddElemC);
        assert_eq!(h.top(), hhbbc_types::union_of(&Type::ARR, &Type::DICT));
    }

    #[test]
    fn test_unknown_constant_is_recorded() {
        let mut h = Harness::new();
        h.step(Bytecode::Cns { name: "FOO".into() });
        assert_eq!(h.top(), Type::INIT_CELL);
        assert!(h.collect.reads_untracked_constants);
        assert!(h.collect.cns_map.contains_key("FOO"));
    }
}

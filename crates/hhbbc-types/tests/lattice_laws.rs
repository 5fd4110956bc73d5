use hhbbc_test_utils::lattice::{assert_finite_lattice_laws, assert_monotone};
use hhbbc_types::{Lattice, Type};
use proptest::prelude::*;

fn samples() -> Vec<Type> {
    vec![
        Type::UNINIT,
        Type::INIT_NULL,
        Type::NULL,
        Type::FALSE,
        Type::TRUE,
        Type::BOOL,
        Type::INT,
        Type::DBL,
        Type::NUM,
        Type::SSTR,
        Type::STR,
        Type::ARR_KEY,
        Type::INIT_CELL,
        Type::ival(1),
        Type::ival(2),
        Type::ival(1).opt(),
        Type::dval(0.5),
        Type::sval("a"),
        Type::sval("b").opt(),
    ]
}

// ----------------------------------------------------------------------------
// Laws
// ----------------------------------------------------------------------------

#[test]
fn test_type_is_a_lattice() {
    assert_finite_lattice_laws(&samples());
}

#[test]
fn test_union_and_intersection_match_join_and_meet() {
    for a in samples() {
        for b in samples() {
            assert_eq!(hhbbc_types::union_of(&a, &b), a.join(&b));
            assert_eq!(hhbbc_types::intersection_of(&a, &b), a.meet(&b));
        }
    }
}

// ----------------------------------------------------------------------------
// Monotone operations
// ----------------------------------------------------------------------------

#[test]
fn test_widening_operations_are_monotone() {
    let samples = samples();
    assert_monotone(&samples, "opt", Type::opt);
    assert_monotone(&samples, "remove_uninit", Type::remove_uninit);
    assert_monotone(&samples, "loosen_staticness", Type::loosen_staticness);
}

// ----------------------------------------------------------------------------
// Bounds
// ----------------------------------------------------------------------------

fn any_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        prop::sample::select(samples()),
        any::<i64>().prop_map(Type::ival),
        (-1000i32..1000).prop_map(|i| Type::dval(f64::from(i) / 4.0)),
        "[a-c]{0,2}".prop_map(Type::sval),
    ]
}

proptest! {
    #[test]
    fn join_and_meet_bound_their_operands(a in any_type(), b in any_type()) {
        let (j, m) = (a.join(&b), a.meet(&b));
        prop_assert!(a.subtype_of(&j) && b.subtype_of(&j));
        prop_assert!(m.subtype_of(&a) && m.subtype_of(&b));
        prop_assert_eq!(a.could_be(&b), !m.is_bottom());
    }

    #[test]
    fn constants_are_singletons(i in any::<i64>()) {
        let t = Type::ival(i);
        prop_assert_eq!(t.tv(), Some(hhbbc_types::Cell::Int(i)));
        prop_assert!(t.subtype_of(&Type::INT));
        prop_assert!(!Type::INT.subtype_of(&t));
    }
}

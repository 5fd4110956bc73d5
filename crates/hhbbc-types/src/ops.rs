//! Result typing for operators whose operands are not all constants.
//!
//! Constant operands are folded through an [`Oracle`](crate::Oracle) before
//! these are consulted; everything here must over-approximate whatever the
//! oracle (or the runtime) could produce.

use crate::cell::Cell;
use crate::lattice::Lattice;
use crate::ty::{Bits, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    /// Overflow-checked flavours promote to double instead of wrapping.
    AddO,
    SubO,
    MulO,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

pub fn type_arith(op: ArithOp, a: &Type, b: &Type) -> Type {
    let both = |bits| a.subtype_of_bits(bits) && b.subtype_of_bits(bits);
    let any_dbl = a.subtype_of_bits(Bits::DBL) || b.subtype_of_bits(Bits::DBL);
    match op {
        ArithOp::Add | ArithOp::Sub | ArithOp::Mul => {
            if both(Bits::INT) {
                Type::INT
            } else if both(Bits::NUM) {
                if any_dbl { Type::DBL } else { Type::NUM }
            } else if op == ArithOp::Add && both(Bits::ARR) {
                Type::ARR
            } else if op == ArithOp::Add {
                Type::NUM.join(&Type::ARR)
            } else {
                Type::NUM
            }
        }
        ArithOp::AddO | ArithOp::SubO | ArithOp::MulO => {
            if both(Bits::NUM) && any_dbl {
                Type::DBL
            } else if op == ArithOp::AddO && both(Bits::ARR) {
                Type::ARR
            } else if op == ArithOp::AddO && !both(Bits::NUM) {
                Type::NUM.join(&Type::ARR)
            } else {
                Type::NUM
            }
        }
        ArithOp::Div => {
            if both(Bits::NUM) && any_dbl {
                Type::DBL.join(&Type::FALSE)
            } else {
                Type::NUM.join(&Type::FALSE)
            }
        }
        ArithOp::Mod => Type::INT.join(&Type::FALSE),
        ArithOp::Pow => {
            if both(Bits::NUM) && any_dbl {
                Type::DBL
            } else {
                Type::NUM
            }
        }
    }
}

pub fn type_bit(op: BitOp, a: &Type, b: &Type) -> Type {
    match op {
        BitOp::Shl | BitOp::Shr => Type::INT,
        BitOp::And | BitOp::Or | BitOp::Xor => {
            let both = |bits| a.subtype_of_bits(bits) && b.subtype_of_bits(bits);
            if both(Bits::STR) {
                Type::STR
            } else if !a.could_be_bits(Bits::STR) || !b.could_be_bits(Bits::STR) {
                Type::INT
            } else {
                Type::INT.join(&Type::STR)
            }
        }
    }
}

pub fn type_bit_not(t: &Type) -> Type {
    if t.subtype_of_bits(Bits::NUM) {
        Type::INT
    } else if t.subtype_of_bits(Bits::STR) {
        Type::STR
    } else {
        Type::INT.join(&Type::STR)
    }
}

/// Result of `===` between values of the two types.
pub fn type_same(a: &Type, b: &Type) -> Type {
    let norm = |t: &Type| {
        let t = t.loosen_staticness();
        if t.could_be_bits(Bits::NULL) {
            t.join(&Type::NULL)
        } else {
            t
        }
    };
    if !norm(a).could_be(&norm(b)) {
        return Type::FALSE;
    }
    Type::BOOL
}

/// Result of `!==` between values of the two types.
pub fn type_nsame(a: &Type, b: &Type) -> Type {
    match type_same(a, b) {
        t if t == Type::FALSE => Type::TRUE,
        t if t == Type::TRUE => Type::FALSE,
        _ => Type::BOOL,
    }
}

// ============================================================================
// Iteration
// ============================================================================

/// How many elements an iteration will visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IterCount {
    Empty,
    Single,
    ZeroOrOne,
    NonEmpty,
    Any,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterTypes {
    pub key: Type,
    pub value: Type,
    pub count: IterCount,
    pub may_throw_on_init: bool,
    pub may_throw_on_next: bool,
}

/// Summarize iterating over a value of type `t` with `foreach`.
pub fn iter_types(t: &Type) -> IterTypes {
    let unknown = |throws| IterTypes {
        key: Type::INIT_CELL,
        value: Type::INIT_CELL,
        count: IterCount::Any,
        may_throw_on_init: throws,
        may_throw_on_next: throws,
    };

    if !t.could_be_bits(Bits::ARR_LIKE | Bits::OBJ) {
        // foreach over a non-iterable warns and skips the body.
        return IterTypes {
            key: Type::BOTTOM,
            value: Type::BOTTOM,
            count: IterCount::Empty,
            may_throw_on_init: true,
            may_throw_on_next: false,
        };
    }

    let arr = t.unopt().tv();
    if let Some(Cell::Arr(a)) = arr {
        let optional = t.is_opt();
        let (key, value) = a.entries.iter().fold(
            (Type::BOTTOM, Type::BOTTOM),
            |(k, v), (ek, ev)| (k.join(&Type::from_cell(ek)), v.join(&Type::from_cell(ev))),
        );
        let count = match (a.len(), optional) {
            (0, _) => IterCount::Empty,
            (1, false) => IterCount::Single,
            (1, true) => IterCount::ZeroOrOne,
            (_, false) => IterCount::NonEmpty,
            (_, true) => IterCount::Any,
        };
        return IterTypes {
            key,
            value,
            count,
            may_throw_on_init: optional,
            may_throw_on_next: false,
        };
    }

    if t.subtype_of_bits(Bits::ARR_LIKE) {
        let (key, value) = if t.subtype_of_bits(Bits::VEC) {
            (Type::INT, Type::INIT_CELL)
        } else if t.subtype_of_bits(Bits::KEYSET) {
            (Type::ARR_KEY, Type::ARR_KEY)
        } else {
            (Type::ARR_KEY, Type::INIT_CELL)
        };
        return IterTypes {
            key,
            value,
            count: IterCount::Any,
            may_throw_on_init: false,
            may_throw_on_next: false,
        };
    }

    unknown(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{ArrKind, ArrayData};

    #[test]
    fn test_same_distinguishes_disjoint_types() {
        assert_eq!(type_same(&Type::INT, &Type::STR), Type::FALSE);
        assert_eq!(type_same(&Type::DBL, &Type::DBL), Type::BOOL);
        assert_eq!(type_same(&Type::SSTR, &Type::CSTR), Type::BOOL);
        assert_eq!(type_same(&Type::UNINIT, &Type::INIT_NULL), Type::BOOL);
        assert_eq!(type_nsame(&Type::ival(1), &Type::ival(2)), Type::TRUE);
    }

    #[test]
    fn test_wrapping_and_checked_arith() {
        assert_eq!(type_arith(ArithOp::Add, &Type::INT, &Type::INT), Type::INT);
        assert_eq!(type_arith(ArithOp::AddO, &Type::INT, &Type::INT), Type::NUM);
        assert_eq!(type_arith(ArithOp::Mul, &Type::INT, &Type::DBL), Type::DBL);
        assert!(Type::FALSE.subtype_of(&type_arith(ArithOp::Div, &Type::INT, &Type::INT)));
    }

    #[test]
    fn test_iterating_constant_arrays() {
        let arr = ArrayData::packed(ArrKind::Vec, [Cell::Int(1), Cell::str("a")]).unwrap();
        let it = iter_types(&Type::aval(arr.clone()));
        assert_eq!(it.count, IterCount::NonEmpty);
        assert_eq!(it.key, Type::INT);
        assert!(!it.may_throw_on_init);

        let single = ArrayData::packed(ArrKind::Vec, [Cell::Int(1)]).unwrap();
        let it = iter_types(&Type::aval(single).opt());
        assert_eq!(it.count, IterCount::ZeroOrOne);
        assert!(it.may_throw_on_init);
    }

    #[test]
    fn test_iterating_non_iterables_is_empty() {
        let it = iter_types(&Type::INT);
        assert_eq!(it.count, IterCount::Empty);
        assert!(it.may_throw_on_init);
        assert_eq!(iter_types(&Type::OBJ).count, IterCount::Any);
    }
}

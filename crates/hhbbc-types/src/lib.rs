mod cell;
mod class;
mod eval;
mod lattice;
mod ops;
mod ty;

pub use cell::{ArrKind, ArrayData, Cell};
pub use class::{ClassInfo, ClassKind, ResClass};
pub use eval::{CellOp, Oracle, ScalarOracle, cell_same, cell_to_string};
pub use lattice::{HasBottom, HasTop, Lattice};
pub use ops::{
    ArithOp, BitOp, IterCount, IterTypes, iter_types, type_arith, type_bit, type_bit_not,
    type_nsame, type_same,
};
pub use ty::{Bits, ClsSpec, Data, Emptiness, Type, intersection_of, union_of};

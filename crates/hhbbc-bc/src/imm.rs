//! Immediate operand types carried by [`Bytecode`](crate::Bytecode) variants.

use std::fmt;
use std::sync::Arc;

use hhbbc_types::ArrayData;

use crate::ids::{BlockId, ClsRefSlotId, IterId, LocalId};

macro_rules! subop {
    ($(#[$attr:meta])* enum $name:ident { $($variant:ident),* $(,)? }) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum $name {
            $($variant,)*
        }

        impl Imm for $name {
            fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self:?}")
            }
        }
    };
}

subop! {
    enum IsTypeOp { Null, Bool, Int, Dbl, Str, Arr, Vec, Dict, Keyset, Obj, Scalar }
}

subop! {
    /// `Bounded` switches index `targets` directly by `scrutinee - base`;
    /// `Unbounded` ones compare against `base + i` and end in two fallback
    /// targets.
    enum SwitchKind { Unbounded, Bounded }
}

subop! {
    enum IncDecOp { PreInc, PostInc, PreDec, PostDec, PreIncO, PostIncO, PreDecO, PostDecO }
}

subop! {
    enum SetOpOp {
        PlusEqual, MinusEqual, MulEqual, ConcatEqual, DivEqual, PowEqual, ModEqual,
        AndEqual, OrEqual, XorEqual, SlEqual, SrEqual, PlusEqualO, MinusEqualO, MulEqualO,
    }
}

subop! {
    enum BareThisOp { Notice, NoNotice, NeverNull }
}

subop! {
    enum ObjMethodOp { NullThrows, NullSafe }
}

subop! {
    /// By-ref-ness the emitter expected for an argument.
    enum FPassHint { Any, Cell, Ref }
}

subop! {
    enum InitPropOp { Static, NonStatic }
}

subop! {
    enum SilenceOp { Start, End }
}

subop! {
    enum OODeclExistsOp { Class, Interface, Trait }
}

subop! {
    enum CollectionType { Vector, Map, Set, Pair, ImmVector, ImmMap, ImmSet }
}

subop! {
    enum FatalOp { Runtime, Parse, RuntimeOmitFrame }
}

subop! {
    enum IterKind { Iter, MIter, CIter }
}

subop! {
    enum CudOp { IgnoreIter, FreeIter }
}

/// A run of consecutive locals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalRange {
    pub first: LocalId,
    pub count: u32,
}

/// A repo-authoritative type annotation, kept as its textual form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RepoAuthType(pub Arc<str>);

/// Highest local, iterator and class-ref slot an instruction stream touches,
/// as counts (`max index + 1`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotUse {
    pub locals: u32,
    pub iters: u32,
    pub cls_ref_slots: u32,
}

impl SlotUse {
    fn local(&mut self, id: LocalId) {
        self.locals = self.locals.max(id.0 + 1);
    }
}

/// An immediate operand: its textual form, and the slots it names.
pub trait Imm {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn visit_slots(&self, _slots: &mut SlotUse) {}
}

macro_rules! display_imm {
    ($($ty:ty),*) => {
        $(impl Imm for $ty {
            fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self}")
            }
        })*
    };
}

display_imm!(i64, u32, bool, BlockId);

impl Imm for LocalId {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }

    fn visit_slots(&self, slots: &mut SlotUse) {
        slots.local(*self);
    }
}

impl Imm for IterId {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }

    fn visit_slots(&self, slots: &mut SlotUse) {
        slots.iters = slots.iters.max(self.0 + 1);
    }
}

impl Imm for ClsRefSlotId {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }

    fn visit_slots(&self, slots: &mut SlotUse) {
        slots.cls_ref_slots = slots.cls_ref_slots.max(self.0 + 1);
    }
}

impl Imm for f64 {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Imm for Arc<str> {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &**self)
    }
}

impl Imm for Arc<ArrayData> {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{self}")
    }
}

impl Imm for LocalRange {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.first, self.count)
    }

    fn visit_slots(&self, slots: &mut SlotUse) {
        if self.count > 0 {
            slots.local(LocalId(self.first.0 + self.count - 1));
        }
    }
}

impl Imm for RepoAuthType {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<A: Imm, B: Imm> Imm for (A, B) {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_imm(f)?;
        f.write_str(":")?;
        self.1.fmt_imm(f)
    }

    fn visit_slots(&self, slots: &mut SlotUse) {
        self.0.visit_slots(slots);
        self.1.visit_slots(slots);
    }
}

impl<T: Imm> Imm for Vec<T> {
    fn fmt_imm(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (i, item) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            item.fmt_imm(f)?;
        }
        f.write_str(">")
    }

    fn visit_slots(&self, slots: &mut SlotUse) {
        for item in self {
            item.visit_slots(slots);
        }
    }
}

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use crate::cell::{ArrKind, ArrayData, Cell};
use crate::class::ResClass;
use crate::lattice::{HasBottom, HasTop, Lattice};

// ============================================================================
// Base kinds
// ============================================================================

/// Set of base value kinds a [`Type`] may contain.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bits(u32);

impl Bits {
    pub const NONE: Bits = Bits(0);
    pub const UNINIT: Bits = Bits(1 << 0);
    pub const INIT_NULL: Bits = Bits(1 << 1);
    pub const FALSE: Bits = Bits(1 << 2);
    pub const TRUE: Bits = Bits(1 << 3);
    pub const INT: Bits = Bits(1 << 4);
    pub const DBL: Bits = Bits(1 << 5);
    pub const SSTR: Bits = Bits(1 << 6);
    pub const CSTR: Bits = Bits(1 << 7);
    pub const SARR: Bits = Bits(1 << 8);
    pub const CARR: Bits = Bits(1 << 9);
    pub const SVEC: Bits = Bits(1 << 10);
    pub const CVEC: Bits = Bits(1 << 11);
    pub const SDICT: Bits = Bits(1 << 12);
    pub const CDICT: Bits = Bits(1 << 13);
    pub const SKEYSET: Bits = Bits(1 << 14);
    pub const CKEYSET: Bits = Bits(1 << 15);
    pub const OBJ: Bits = Bits(1 << 16);
    pub const RES: Bits = Bits(1 << 17);
    pub const CLS: Bits = Bits(1 << 18);
    pub const REF: Bits = Bits(1 << 19);

    pub const NULL: Bits = Bits(Self::UNINIT.0 | Self::INIT_NULL.0);
    pub const BOOL: Bits = Bits(Self::FALSE.0 | Self::TRUE.0);
    pub const NUM: Bits = Bits(Self::INT.0 | Self::DBL.0);
    pub const STR: Bits = Bits(Self::SSTR.0 | Self::CSTR.0);
    pub const ARR: Bits = Bits(Self::SARR.0 | Self::CARR.0);
    pub const VEC: Bits = Bits(Self::SVEC.0 | Self::CVEC.0);
    pub const DICT: Bits = Bits(Self::SDICT.0 | Self::CDICT.0);
    pub const KEYSET: Bits = Bits(Self::SKEYSET.0 | Self::CKEYSET.0);
    pub const ARR_KEY: Bits = Bits(Self::INT.0 | Self::STR.0);
    pub const ARR_LIKE: Bits = Bits(Self::ARR.0 | Self::VEC.0 | Self::DICT.0 | Self::KEYSET.0);
    pub const INIT_PRIM: Bits = Bits(Self::INIT_NULL.0 | Self::BOOL.0 | Self::NUM.0);
    pub const PRIM: Bits = Bits(Self::INIT_PRIM.0 | Self::UNINIT.0);
    pub const INIT_UNC: Bits = Bits(
        Self::INIT_PRIM.0
            | Self::SSTR.0
            | Self::SARR.0
            | Self::SVEC.0
            | Self::SDICT.0
            | Self::SKEYSET.0,
    );
    pub const UNC: Bits = Bits(Self::INIT_UNC.0 | Self::UNINIT.0);
    pub const INIT_CELL: Bits = Bits(
        Self::INIT_PRIM.0 | Self::STR.0 | Self::ARR_LIKE.0 | Self::OBJ.0 | Self::RES.0,
    );
    pub const CELL: Bits = Bits(Self::INIT_CELL.0 | Self::UNINIT.0);
    pub const INIT_GEN: Bits = Bits(Self::INIT_CELL.0 | Self::REF.0);
    pub const GEN: Bits = Bits(Self::CELL.0 | Self::REF.0);
    pub const TOP: Bits = Bits(Self::GEN.0 | Self::CLS.0);

    pub const fn contains(self, other: Bits) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Bits) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn subset_of(self, other: Bits) -> bool {
        other.contains(self)
    }

    pub const fn without(self, other: Bits) -> Bits {
        Bits(self.0 & !other.0)
    }

    /// Add the counted flavour of every static string/array kind present.
    pub const fn loosen_staticness(self) -> Bits {
        let mut out = self.0;
        let pairs = [
            (Self::SSTR, Self::CSTR),
            (Self::SARR, Self::CARR),
            (Self::SVEC, Self::CVEC),
            (Self::SDICT, Self::CDICT),
            (Self::SKEYSET, Self::CKEYSET),
        ];
        let mut i = 0;
        while i < pairs.len() {
            if self.0 & pairs[i].0.0 != 0 {
                out |= pairs[i].1.0;
            }
            i += 1;
        }
        Bits(out)
    }

    pub const fn static_arr(kind: ArrKind) -> Bits {
        match kind {
            ArrKind::Arr => Self::SARR,
            ArrKind::Vec => Self::SVEC,
            ArrKind::Dict => Self::SDICT,
            ArrKind::Keyset => Self::SKEYSET,
        }
    }

    pub const fn counted_arr(kind: ArrKind) -> Bits {
        match kind {
            ArrKind::Arr => Self::CARR,
            ArrKind::Vec => Self::CVEC,
            ArrKind::Dict => Self::CDICT,
            ArrKind::Keyset => Self::CKEYSET,
        }
    }

    pub const fn arr(kind: ArrKind) -> Bits {
        Bits(Self::static_arr(kind).0 | Self::counted_arr(kind).0)
    }
}

impl BitOr for Bits {
    type Output = Bits;
    fn bitor(self, rhs: Bits) -> Bits {
        Bits(self.0 | rhs.0)
    }
}

impl BitAnd for Bits {
    type Output = Bits;
    fn bitand(self, rhs: Bits) -> Bits {
        Bits(self.0 & rhs.0)
    }
}

impl Not for Bits {
    type Output = Bits;
    fn not(self) -> Bits {
        Bits(!self.0 & Self::TOP.0)
    }
}

// ============================================================================
// Specialization
// ============================================================================

/// Class specialization for object and class-reference types.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClsSpec {
    /// The value is an instance of exactly `cls`, not a subclass.
    pub exact: bool,
    pub cls: ResClass,
}

impl ClsSpec {
    fn subtype_of(&self, other: &ClsSpec) -> bool {
        if other.exact {
            self.exact && self.cls == other.cls
        } else {
            self.cls.subtype_of(&other.cls)
        }
    }

    fn join(&self, other: &ClsSpec) -> Option<ClsSpec> {
        if self.subtype_of(other) {
            return Some(other.clone());
        }
        if other.subtype_of(self) {
            return Some(self.clone());
        }
        self.cls
            .common_ancestor(&other.cls)
            .map(|cls| ClsSpec { exact: false, cls })
    }

    /// `None` means the two specializations describe disjoint sets.
    fn meet(&self, other: &ClsSpec) -> Option<ClsSpec> {
        if self.subtype_of(other) {
            return Some(self.clone());
        }
        if other.subtype_of(self) {
            return Some(other.clone());
        }
        if self.exact || other.exact || !self.cls.could_be(&other.cls) {
            return None;
        }
        // Unrelated but overlapping (interfaces): keep the concrete side, or
        // the alphabetically first interface.
        let pick = match (self.cls.is_interface(), other.cls.is_interface()) {
            (true, false) => other,
            (false, true) => self,
            _ if self.cls.name() <= other.cls.name() => self,
            _ => other,
        };
        Some(pick.clone())
    }
}

/// Extra precision attached to a [`Type`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Data {
    /// A known int, double, static string or static array.
    Const(Cell),
    Obj(ClsSpec),
    Cls(ClsSpec),
    /// An awaitable whose result has the inner type.
    WaitHandle(Box<Type>),
}

impl Data {
    /// The single base kind this data describes.
    fn bits(&self) -> Bits {
        match self {
            Data::Const(Cell::Int(_)) => Bits::INT,
            Data::Const(Cell::Dbl(_)) => Bits::DBL,
            Data::Const(Cell::Str(_)) => Bits::SSTR,
            Data::Const(Cell::Arr(a)) => Bits::static_arr(a.kind),
            Data::Const(_) => Bits::NONE,
            Data::Obj(_) | Data::WaitHandle(_) => Bits::OBJ,
            Data::Cls(_) => Bits::CLS,
        }
    }

    fn subtype_of(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::Const(a), Data::Const(b)) => a == b,
            (Data::Obj(a), Data::Obj(b)) | (Data::Cls(a), Data::Cls(b)) => a.subtype_of(b),
            (Data::WaitHandle(a), Data::WaitHandle(b)) => a.subtype_of(b),
            _ => false,
        }
    }

    fn join(&self, other: &Data) -> Option<Data> {
        match (self, other) {
            _ if self == other => Some(self.clone()),
            (Data::Obj(a), Data::Obj(b)) => a.join(b).map(Data::Obj),
            (Data::Cls(a), Data::Cls(b)) => a.join(b).map(Data::Cls),
            (Data::WaitHandle(a), Data::WaitHandle(b)) => {
                Some(Data::WaitHandle(Box::new(a.join(b))))
            }
            _ => None,
        }
    }

    /// `None` when the two describe disjoint values of the same kind.
    fn meet(&self, other: &Data) -> Option<Data> {
        match (self, other) {
            _ if self == other => Some(self.clone()),
            (Data::Obj(a), Data::Obj(b)) => a.meet(b).map(Data::Obj),
            (Data::Cls(a), Data::Cls(b)) => a.meet(b).map(Data::Cls),
            (Data::WaitHandle(a), Data::WaitHandle(b)) => {
                Some(Data::WaitHandle(Box::new(a.meet(b))))
            }
            (Data::WaitHandle(_), Data::Obj(_)) => Some(self.clone()),
            (Data::Obj(_), Data::WaitHandle(_)) => Some(other.clone()),
            _ => None,
        }
    }
}

// ============================================================================
// Type
// ============================================================================

/// An abstract value: a set of base kinds plus optional specialization.
///
/// Specialization is only kept when the bits are exactly the specialized kind,
/// optionally together with `InitNull`; every constructor normalizes, so
/// structural equality is lattice equality.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type {
    bits: Bits,
    data: Option<Data>,
}

/// Whether a value is falsy, truthy, or unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Emptiness {
    Empty,
    NonEmpty,
    Maybe,
}

impl Type {
    pub const BOTTOM: Type = Type::from_bits(Bits::NONE);
    pub const UNINIT: Type = Type::from_bits(Bits::UNINIT);
    pub const INIT_NULL: Type = Type::from_bits(Bits::INIT_NULL);
    pub const NULL: Type = Type::from_bits(Bits::NULL);
    pub const FALSE: Type = Type::from_bits(Bits::FALSE);
    pub const TRUE: Type = Type::from_bits(Bits::TRUE);
    pub const BOOL: Type = Type::from_bits(Bits::BOOL);
    pub const INT: Type = Type::from_bits(Bits::INT);
    pub const DBL: Type = Type::from_bits(Bits::DBL);
    pub const NUM: Type = Type::from_bits(Bits::NUM);
    pub const SSTR: Type = Type::from_bits(Bits::SSTR);
    pub const CSTR: Type = Type::from_bits(Bits::CSTR);
    pub const STR: Type = Type::from_bits(Bits::STR);
    pub const SARR: Type = Type::from_bits(Bits::SARR);
    pub const CARR: Type = Type::from_bits(Bits::CARR);
    pub const ARR: Type = Type::from_bits(Bits::ARR);
    pub const VEC: Type = Type::from_bits(Bits::VEC);
    pub const DICT: Type = Type::from_bits(Bits::DICT);
    pub const KEYSET: Type = Type::from_bits(Bits::KEYSET);
    pub const ARR_KEY: Type = Type::from_bits(Bits::ARR_KEY);
    pub const ARR_LIKE: Type = Type::from_bits(Bits::ARR_LIKE);
    pub const OBJ: Type = Type::from_bits(Bits::OBJ);
    pub const RES: Type = Type::from_bits(Bits::RES);
    pub const CLS: Type = Type::from_bits(Bits::CLS);
    pub const REF: Type = Type::from_bits(Bits::REF);
    pub const INIT_PRIM: Type = Type::from_bits(Bits::INIT_PRIM);
    pub const PRIM: Type = Type::from_bits(Bits::PRIM);
    pub const INIT_UNC: Type = Type::from_bits(Bits::INIT_UNC);
    pub const UNC: Type = Type::from_bits(Bits::UNC);
    pub const INIT_CELL: Type = Type::from_bits(Bits::INIT_CELL);
    pub const CELL: Type = Type::from_bits(Bits::CELL);
    pub const INIT_GEN: Type = Type::from_bits(Bits::INIT_GEN);
    pub const GEN: Type = Type::from_bits(Bits::GEN);
    pub const TOP: Type = Type::from_bits(Bits::TOP);

    pub const fn from_bits(bits: Bits) -> Self {
        Self { bits, data: None }
    }

    fn with_data(bits: Bits, data: Option<Data>) -> Self {
        let data = data.filter(|d| {
            let kind = d.bits();
            !kind.is_empty()
                && bits.contains(kind)
                && bits.without(kind | Bits::INIT_NULL).is_empty()
        });
        Self { bits, data }
    }

    // -- Constructors -------------------------------------------------------

    pub fn ival(i: i64) -> Self {
        Self::with_data(Bits::INT, Some(Data::Const(Cell::Int(i))))
    }

    pub fn dval(d: f64) -> Self {
        Self::with_data(Bits::DBL, Some(Data::Const(Cell::Dbl(d))))
    }

    pub fn sval(s: impl Into<Arc<str>>) -> Self {
        Self::with_data(Bits::SSTR, Some(Data::Const(Cell::Str(s.into()))))
    }

    pub fn aval(arr: impl Into<Arc<ArrayData>>) -> Self {
        let arr = arr.into();
        Self::with_data(
            Bits::static_arr(arr.kind),
            Some(Data::Const(Cell::Arr(arr))),
        )
    }

    pub fn aempty(kind: ArrKind) -> Self {
        Self::aval(ArrayData::empty(kind))
    }

    /// Any array of `kind`, static or counted.
    pub fn arr_of(kind: ArrKind) -> Self {
        Self::from_bits(Bits::arr(kind))
    }

    /// A freshly built (refcounted) array of `kind`.
    pub fn counted_arr(kind: ArrKind) -> Self {
        Self::from_bits(Bits::counted_arr(kind))
    }

    pub fn sub_obj(cls: ResClass) -> Self {
        let exact = cls.no_override();
        Self::with_data(Bits::OBJ, Some(Data::Obj(ClsSpec { exact, cls })))
    }

    pub fn obj_exact(cls: ResClass) -> Self {
        Self::with_data(Bits::OBJ, Some(Data::Obj(ClsSpec { exact: true, cls })))
    }

    pub fn sub_cls(cls: ResClass) -> Self {
        let exact = cls.no_override();
        Self::with_data(Bits::CLS, Some(Data::Cls(ClsSpec { exact, cls })))
    }

    pub fn cls_exact(cls: ResClass) -> Self {
        Self::with_data(Bits::CLS, Some(Data::Cls(ClsSpec { exact: true, cls })))
    }

    pub fn wait_handle(inner: Type) -> Self {
        Self::with_data(Bits::OBJ, Some(Data::WaitHandle(Box::new(inner))))
    }

    /// The singleton type holding exactly `cell`.
    pub fn from_cell(cell: &Cell) -> Self {
        match cell {
            Cell::Uninit => Type::UNINIT,
            Cell::Null => Type::INIT_NULL,
            Cell::Bool(true) => Type::TRUE,
            Cell::Bool(false) => Type::FALSE,
            Cell::Int(i) => Type::ival(*i),
            Cell::Dbl(d) => Type::dval(*d),
            Cell::Str(s) => Type::sval(s.clone()),
            Cell::Arr(a) => Type::aval(a.clone()),
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn bits(&self) -> Bits {
        self.bits
    }

    pub fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    pub fn is_bottom(&self) -> bool {
        self.bits.is_empty()
    }

    /// The concrete value, if this type admits exactly one.
    pub fn tv(&self) -> Option<Cell> {
        match self.bits {
            Bits::UNINIT => Some(Cell::Uninit),
            Bits::INIT_NULL => Some(Cell::Null),
            Bits::TRUE => Some(Cell::Bool(true)),
            Bits::FALSE => Some(Cell::Bool(false)),
            bits => match &self.data {
                Some(d @ Data::Const(c)) if d.bits() == bits => Some(c.clone()),
                _ => None,
            },
        }
    }

    /// A known, initialized constant.
    pub fn is_scalar(&self) -> bool {
        self.bits != Bits::UNINIT && self.tv().is_some()
    }

    pub fn subtype_of(&self, other: &Type) -> bool {
        if !self.bits.subset_of(other.bits) {
            return false;
        }
        match &other.data {
            None => true,
            Some(od) => {
                if !self.bits.intersects(od.bits()) {
                    return true;
                }
                self.data.as_ref().is_some_and(|sd| sd.subtype_of(od))
            }
        }
    }

    pub fn subtype_of_bits(&self, bits: Bits) -> bool {
        self.bits.subset_of(bits)
    }

    pub fn could_be(&self, other: &Type) -> bool {
        !self.meet(other).is_bottom()
    }

    pub fn could_be_bits(&self, bits: Bits) -> bool {
        self.bits.intersects(bits)
    }

    // -- Derived types ------------------------------------------------------

    pub fn is_opt(&self) -> bool {
        self.bits.intersects(Bits::INIT_NULL)
            && !self.bits.intersects(Bits::UNINIT)
            && self.bits != Bits::INIT_NULL
    }

    pub fn opt(&self) -> Type {
        Self::with_data(self.bits | Bits::INIT_NULL, self.data.clone())
    }

    pub fn unopt(&self) -> Type {
        Self::with_data(self.bits.without(Bits::INIT_NULL), self.data.clone())
    }

    pub fn remove_uninit(&self) -> Type {
        Self::with_data(self.bits.without(Bits::UNINIT), self.data.clone())
    }

    pub fn remove_bits(&self, bits: Bits) -> Type {
        Self::with_data(self.bits.without(bits), self.data.clone())
    }

    /// Admit refcounted strings and arrays wherever static ones are allowed.
    pub fn loosen_staticness(&self) -> Type {
        let data = match &self.data {
            Some(Data::Const(Cell::Str(_) | Cell::Arr(_))) => None,
            d => d.clone(),
        };
        Self::with_data(self.bits.loosen_staticness(), data)
    }

    /// Class specialization carried by an object or class type.
    pub fn cls_spec(&self) -> Option<&ClsSpec> {
        match &self.data {
            Some(Data::Obj(s) | Data::Cls(s)) => Some(s),
            _ => None,
        }
    }

    /// The class of an object type.
    pub fn obj_to_cls(&self) -> Type {
        match &self.data {
            Some(Data::Obj(s)) if self.subtype_of_bits(Bits::OBJ) => {
                Self::with_data(Bits::CLS, Some(Data::Cls(s.clone())))
            }
            _ => Type::CLS,
        }
    }

    /// Instances of a class type.
    pub fn cls_to_obj(&self) -> Type {
        match &self.data {
            Some(Data::Cls(s)) if self.subtype_of_bits(Bits::CLS) => {
                Self::with_data(Bits::OBJ, Some(Data::Obj(s.clone())))
            }
            _ => Type::OBJ,
        }
    }

    pub fn wait_handle_inner(&self) -> Option<&Type> {
        match &self.data {
            Some(Data::WaitHandle(inner)) if self.subtype_of_bits(Bits::OBJ) => Some(inner),
            _ => None,
        }
    }

    /// Popping a value of this type could run user code.
    pub fn could_run_destructor(&self) -> bool {
        self.bits
            .intersects(Bits::OBJ | Bits::RES | Bits::REF | Bits::CARR | Bits::CVEC | Bits::CDICT)
    }

    pub fn emptiness(&self) -> Emptiness {
        if let Some(c) = self.tv() {
            return if c.to_bool() {
                Emptiness::NonEmpty
            } else {
                Emptiness::Empty
            };
        }
        if self.bits.subset_of(Bits::NULL | Bits::FALSE) {
            return Emptiness::Empty;
        }
        let may_be_falsy =
            Bits::NULL | Bits::FALSE | Bits::NUM | Bits::STR | Bits::ARR_LIKE | Bits::REF;
        if !self.bits.intersects(may_be_falsy) {
            return Emptiness::NonEmpty;
        }
        Emptiness::Maybe
    }

    /// Restrict to the values that are falsy.
    pub fn assert_emptiness(&self) -> Type {
        match self.emptiness() {
            Emptiness::Empty => self.clone(),
            Emptiness::NonEmpty => Type::BOTTOM,
            Emptiness::Maybe => {
                let mut t = self.remove_bits(Bits::TRUE | Bits::OBJ | Bits::RES | Bits::CLS);
                if let Some(Data::Const(c)) = &t.data {
                    if c.to_bool() {
                        let kind = Data::Const(c.clone()).bits();
                        t = Type::from_bits(t.bits.without(kind));
                    }
                }
                if t.bits == Bits::INT && t.data.is_none() {
                    return Type::ival(0);
                }
                t
            }
        }
    }

    /// Restrict to the values that are truthy.
    pub fn assert_nonemptiness(&self) -> Type {
        match self.emptiness() {
            Emptiness::NonEmpty => self.clone(),
            Emptiness::Empty => Type::BOTTOM,
            Emptiness::Maybe => {
                let mut t = self.remove_bits(Bits::NULL | Bits::FALSE);
                if let Some(Data::Const(c)) = &t.data {
                    if !c.to_bool() {
                        let kind = Data::Const(c.clone()).bits();
                        t = Type::from_bits(t.bits.without(kind));
                    }
                }
                t
            }
        }
    }
}

impl Lattice for Type {
    fn join(&self, other: &Self) -> Self {
        let bits = self.bits | other.bits;
        let data = match (&self.data, &other.data) {
            (Some(a), Some(b)) => a.join(b),
            (Some(a), None) if !other.bits.intersects(a.bits()) => Some(a.clone()),
            (None, Some(b)) if !self.bits.intersects(b.bits()) => Some(b.clone()),
            _ => None,
        };
        Self::with_data(bits, data)
    }

    fn meet(&self, other: &Self) -> Self {
        let mut bits = self.bits & other.bits;
        let data = match (&self.data, &other.data) {
            (Some(a), Some(b)) => {
                let d = a.meet(b);
                if d.is_none() {
                    bits = bits.without(a.bits() | b.bits());
                }
                d
            }
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        Self::with_data(bits, data)
    }

    fn is_subseteq(&self, other: &Self) -> bool {
        self.subtype_of(other)
    }
}

impl HasBottom for Type {
    fn bottom() -> Self {
        Type::BOTTOM
    }
}

impl HasTop for Type {
    fn top() -> Self {
        Type::TOP
    }
}

pub fn union_of(a: &Type, b: &Type) -> Type {
    a.join(b)
}

pub fn intersection_of(a: &Type, b: &Type) -> Type {
    a.meet(b)
}

// ============================================================================
// Display
// ============================================================================

const NAMED: &[(Bits, &str)] = &[
    (Bits::TOP, "Top"),
    (Bits::GEN, "Gen"),
    (Bits::INIT_GEN, "InitGen"),
    (Bits::CELL, "Cell"),
    (Bits::INIT_CELL, "InitCell"),
    (Bits::UNC, "Unc"),
    (Bits::INIT_UNC, "InitUnc"),
    (Bits::PRIM, "Prim"),
    (Bits::INIT_PRIM, "InitPrim"),
    (Bits::ARR_LIKE, "ArrLike"),
    (Bits::ARR_KEY, "ArrKey"),
    (Bits::NUM, "Num"),
    (Bits::BOOL, "Bool"),
    (Bits::NULL, "Null"),
    (Bits::STR, "Str"),
    (Bits::ARR, "Arr"),
    (Bits::VEC, "Vec"),
    (Bits::DICT, "Dict"),
    (Bits::KEYSET, "Keyset"),
    (Bits::UNINIT, "Uninit"),
    (Bits::INIT_NULL, "InitNull"),
    (Bits::FALSE, "False"),
    (Bits::TRUE, "True"),
    (Bits::INT, "Int"),
    (Bits::DBL, "Dbl"),
    (Bits::SSTR, "SStr"),
    (Bits::CSTR, "CStr"),
    (Bits::SARR, "SArr"),
    (Bits::CARR, "CArr"),
    (Bits::SVEC, "SVec"),
    (Bits::CVEC, "CVec"),
    (Bits::SDICT, "SDict"),
    (Bits::CDICT, "CDict"),
    (Bits::SKEYSET, "SKeyset"),
    (Bits::CKEYSET, "CKeyset"),
    (Bits::OBJ, "Obj"),
    (Bits::RES, "Res"),
    (Bits::CLS, "Cls"),
    (Bits::REF, "Ref"),
];

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Bottom");
        }
        let mut rest = *self;
        let mut first = true;
        for &(bits, name) in NAMED {
            if rest.contains(bits) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
                rest = rest.without(bits);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(data) = &self.data else {
            return write!(f, "{}", self.bits);
        };
        if self.bits.intersects(Bits::INIT_NULL) {
            f.write_str("?")?;
        }
        match data {
            Data::Const(c) => write!(f, "{}={c}", data.bits()),
            Data::Obj(s) => write!(f, "Obj{}{}", if s.exact { "=" } else { "<=" }, s.cls),
            Data::Cls(s) => write!(f, "Cls{}{}", if s.exact { "=" } else { "<=" }, s.cls),
            Data::WaitHandle(inner) => write!(f, "Obj=WaitH<{inner}>"),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassInfo;

    fn class(name: &str, parent: Option<&ResClass>) -> ResClass {
        ResClass::new(
            ClassInfo::builder()
                .name(name)
                .maybe_parent(parent.cloned())
                .build(),
        )
    }

    #[test]
    fn test_constants_round_trip_through_tv() {
        for cell in [
            Cell::Null,
            Cell::Bool(true),
            Cell::Int(-4),
            Cell::Dbl(0.5),
            Cell::str("x"),
        ] {
            assert_eq!(Type::from_cell(&cell).tv(), Some(cell));
        }
        assert_eq!(Type::INT.tv(), None);
        assert_eq!(Type::ival(1).opt().tv(), None);
    }

    #[test]
    fn test_join_drops_conflicting_constants() {
        assert_eq!(Type::ival(1).join(&Type::ival(2)), Type::INT);
        assert_eq!(Type::ival(1).join(&Type::INIT_NULL), Type::ival(1).opt());
        assert_eq!(Type::ival(1).join(&Type::STR).data(), None);
    }

    #[test]
    fn test_meet_of_distinct_constants_is_bottom() {
        assert!(Type::ival(1).meet(&Type::ival(2)).is_bottom());
        assert_eq!(Type::ival(1).opt().meet(&Type::ival(2).opt()), Type::INIT_NULL);
        assert_eq!(Type::ival(3).meet(&Type::NUM), Type::ival(3));
    }

    #[test]
    fn test_object_specialization() {
        let base = class("Base", None);
        let a = class("A", Some(&base));
        let b = class("B", Some(&base));
        let ea = Type::obj_exact(a.clone());
        let eb = Type::obj_exact(b.clone());
        assert!(ea.subtype_of(&Type::sub_obj(base.clone())));
        assert!(!Type::sub_obj(base.clone()).subtype_of(&ea));
        assert_eq!(ea.join(&eb), Type::sub_obj(base.clone()));
        assert!(!ea.could_be(&eb));
        assert!(Type::sub_obj(base).could_be(&ea));
        assert_eq!(ea.obj_to_cls(), Type::cls_exact(a));
    }

    #[test]
    fn test_null_is_vacuously_below_specialized_opt() {
        let a = class("A", None);
        assert!(Type::INIT_NULL.subtype_of(&Type::sub_obj(a.clone()).opt()));
        assert!(Type::sub_obj(a.clone()).subtype_of(&Type::sub_obj(a).opt()));
    }

    #[test]
    fn test_emptiness() {
        assert_eq!(Type::NULL.emptiness(), Emptiness::Empty);
        assert_eq!(Type::sval("0").emptiness(), Emptiness::Empty);
        assert_eq!(Type::OBJ.emptiness(), Emptiness::NonEmpty);
        assert_eq!(Type::INT.emptiness(), Emptiness::Maybe);
        assert_eq!(Type::INT.assert_emptiness(), Type::ival(0));
        assert_eq!(Type::OBJ.opt().assert_nonemptiness(), Type::OBJ);
        assert_eq!(Type::ival(5).opt().assert_emptiness(), Type::INIT_NULL);
        assert!(Type::TRUE.assert_emptiness().is_bottom());
    }

    #[test]
    fn test_loosen_staticness_admits_counted_values() {
        let t = Type::sval("a").loosen_staticness();
        assert_eq!(t, Type::STR);
        assert!(Type::CSTR.subtype_of(&t));
    }

    #[test]
    fn test_wait_handle_inner() {
        let wh = Type::wait_handle(Type::INT);
        assert_eq!(wh.wait_handle_inner(), Some(&Type::INT));
        assert!(wh.subtype_of(&Type::OBJ));
        assert_eq!(
            wh.join(&Type::wait_handle(Type::STR)),
            Type::wait_handle(Type::INT.join(&Type::STR))
        );
    }

    #[test]
    fn test_display() {
        insta::assert_snapshot!(Type::INIT_CELL, @"InitCell");
        insta::assert_snapshot!(Type::ival(3).opt(), @"?Int=3");
        insta::assert_snapshot!(Type::INT.join(&Type::STR), @"ArrKey");
        insta::assert_snapshot!(Type::INT.join(&Type::SSTR), @"Int|SStr");
        insta::assert_snapshot!(Type::sub_obj(class("C", None)), @"Obj<=C");
    }
}

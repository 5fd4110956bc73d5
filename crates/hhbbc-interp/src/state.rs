use std::fmt;

use hhbbc_bc::{BlockId, Func, LocalId, SlotUse};
use hhbbc_index::ResFunc;
use hhbbc_types::{ArrKind, IterTypes, Lattice, ResClass, Type};
use rustc_hash::FxHashMap;

use crate::error::InterpError;

/// What a stack slot is known to be equal to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StackEquiv {
    #[default]
    None,
    /// Holds the same value as the local.
    Local(LocalId),
    /// Holds the same value as the slot directly below it.
    DupTop,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StackElem {
    pub ty: Type,
    pub equiv: StackEquiv,
}

impl StackElem {
    pub fn new(ty: Type) -> Self {
        Self {
            ty,
            equiv: StackEquiv::None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IterState {
    Unknown,
    Tracked(IterTypes),
}

/// Whether a local is bound to the function's static of the same name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LocalStaticBinding {
    #[default]
    None,
    /// Bound on some paths only.
    Maybe,
    Bound,
}

/// The kind of call being set up between an `FPush*` and its `FCall*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FpiKind {
    Unknown,
    Func,
    ObjMeth,
    ClsMeth,
    /// An object called through `__invoke`.
    ObjInvoke,
    Ctor,
    /// A `[$obj_or_class, 'method']` array.
    CallableArr,
}

/// A call in flight.
#[derive(Clone, Debug, PartialEq)]
pub struct ActRec {
    pub kind: FpiKind,
    /// The block holding the `FPush*`, re-analyzed if folding the call
    /// turns out to be impossible.
    pub push_block: BlockId,
    pub cls: Option<ResClass>,
    pub func: Option<ResFunc>,
    /// Global function a namespaced call falls back to.
    pub fallback: Option<ResFunc>,
    /// The call may still be evaluated at analysis time.
    pub foldable: bool,
}

impl ActRec {
    pub fn new(kind: FpiKind, push_block: BlockId, func: Option<ResFunc>) -> Self {
        Self {
            kind,
            push_block,
            cls: None,
            func,
            fallback: None,
            foldable: false,
        }
    }

    pub fn with_cls(mut self, cls: Option<ResClass>) -> Self {
        self.cls = cls;
        self
    }

    pub fn with_fallback(mut self, fallback: Option<ResFunc>) -> Self {
        self.fallback = fallback;
        self
    }
}

/// The abstract machine state at one program point.
#[derive(Clone, Debug, PartialEq)]
pub struct State {
    pub unreachable: bool,
    /// `$this` is known to be non-null.
    pub this_available: bool,
    pub locals: Vec<Type>,
    /// Locals holding equal values form rings: `equiv_locals[l]` is the next
    /// local of the ring containing `l`.
    pub equiv_locals: Vec<Option<LocalId>>,
    /// Which locals currently refer to their static, by local.
    pub local_static_bindings: Vec<LocalStaticBinding>,
    pub iters: Vec<IterState>,
    pub cls_ref_slots: Vec<Type>,
    pub stack: Vec<StackElem>,
    pub fpi_stack: Vec<ActRec>,
}

impl State {
    /// Every local uninitialized, every slot empty.
    pub fn new(slots: SlotUse) -> Self {
        let locals = slots.locals as usize;
        Self {
            unreachable: false,
            this_available: false,
            locals: vec![Type::UNINIT; locals],
            equiv_locals: vec![None; locals],
            local_static_bindings: vec![LocalStaticBinding::None; locals],
            iters: vec![IterState::Unknown; slots.iters as usize],
            cls_ref_slots: vec![Type::CLS; slots.cls_ref_slots as usize],
            stack: Vec::new(),
            fpi_stack: Vec::new(),
        }
    }

    /// State on entry to `func`. Parameters take the types in `args` when
    /// given, otherwise the widest type a caller could pass.
    pub fn entry(func: &Func, args: &[Type]) -> Self {
        let mut state = Self::new(func.slot_use());
        if func.attrs.is_pseudomain || func.attrs.may_use_vv {
            state.locals.fill(Type::GEN);
        }
        for (i, param) in func.params.iter().enumerate() {
            state.locals[i] = match args.get(i) {
                Some(t) => t.clone(),
                None if param.by_ref => Type::GEN,
                None if param.variadic => Type::arr_of(ArrKind::Arr),
                None => Type::CELL,
            };
        }
        state
    }

    /// The state an exception handler sees: no evaluation stack and no
    /// calls in flight.
    pub fn without_stacks(&self) -> Self {
        Self {
            stack: Vec::new(),
            fpi_stack: Vec::new(),
            ..self.clone()
        }
    }

    /// Locals in the equivalence ring of `l`, starting with `l`.
    pub fn equivalent_locals(&self, l: LocalId) -> Vec<LocalId> {
        let mut out = vec![l];
        let mut cur = l;
        while let Some(Some(next)) = self.equiv_locals.get(cur.index()) {
            if *next == l || out.len() > self.equiv_locals.len() {
                break;
            }
            out.push(*next);
            cur = *next;
        }
        out
    }

    pub fn locals_equivalent(&self, a: LocalId, b: LocalId) -> bool {
        a == b || self.equivalent_locals(a).contains(&b)
    }

    /// Remove `l` from its equivalence ring.
    pub(crate) fn kill_loc_equiv(&mut self, l: LocalId) {
        let Some(next) = self.equiv_locals.get(l.index()).copied().flatten() else {
            return;
        };
        let ring = self.equivalent_locals(l);
        let prev = ring.last().copied().unwrap_or(next);
        if prev == next {
            self.equiv_locals[next.index()] = None;
        } else {
            self.equiv_locals[prev.index()] = Some(next);
        }
        self.equiv_locals[l.index()] = None;
    }

    /// Add `l`, which must not be in a ring, to the ring of `with`.
    pub(crate) fn add_loc_equiv(&mut self, l: LocalId, with: LocalId) {
        if l == with || self.equiv_locals.len() <= l.index().max(with.index()) {
            return;
        }
        let next = self.equiv_locals[with.index()].unwrap_or(with);
        self.equiv_locals[l.index()] = Some(next);
        self.equiv_locals[with.index()] = Some(l);
    }

    /// Forget that any stack slot equals `l`.
    pub(crate) fn kill_stk_equiv(&mut self, l: LocalId) {
        for elem in &mut self.stack {
            if elem.equiv == StackEquiv::Local(l) {
                elem.equiv = StackEquiv::None;
            }
        }
    }

    pub(crate) fn kill_all_equivs(&mut self) {
        self.equiv_locals.fill(None);
        for elem in &mut self.stack {
            if matches!(elem.equiv, StackEquiv::Local(_)) {
                elem.equiv = StackEquiv::None;
            }
        }
    }

    /// Join `other` into `self`, returning whether `self` changed.
    pub fn merge_from(&mut self, block: BlockId, other: &State) -> Result<bool, InterpError> {
        if other.unreachable {
            return Ok(false);
        }
        if self.unreachable {
            *self = other.clone();
            return Ok(true);
        }
        if self.stack.len() != other.stack.len() || self.fpi_stack.len() != other.fpi_stack.len()
        {
            return Err(InterpError::StackMismatch {
                block,
                left: self.stack.len(),
                right: other.stack.len(),
            });
        }

        let mut changed = false;
        let mut join = |a: &mut Type, b: &Type| {
            let j = a.join(b);
            if j != *a {
                *a = j;
                changed = true;
            }
        };
        for (a, b) in self.locals.iter_mut().zip(&other.locals) {
            join(a, b);
        }
        for (a, b) in self.cls_ref_slots.iter_mut().zip(&other.cls_ref_slots) {
            join(a, b);
        }
        for (a, b) in self.stack.iter_mut().zip(&other.stack) {
            join(&mut a.ty, &b.ty);
        }

        for (a, b) in self.stack.iter_mut().zip(&other.stack) {
            if a.equiv != b.equiv && a.equiv != StackEquiv::None {
                a.equiv = StackEquiv::None;
                changed = true;
            }
        }
        for (a, b) in self
            .local_static_bindings
            .iter_mut()
            .zip(&other.local_static_bindings)
        {
            if a != b && *a != LocalStaticBinding::Maybe {
                *a = LocalStaticBinding::Maybe;
                changed = true;
            }
        }
        for (a, b) in self.iters.iter_mut().zip(&other.iters) {
            if a != b && *a != IterState::Unknown {
                *a = IterState::Unknown;
                changed = true;
            }
        }
        for (a, b) in self.fpi_stack.iter_mut().zip(&other.fpi_stack) {
            if a != b && a.kind != FpiKind::Unknown {
                *a = ActRec::new(FpiKind::Unknown, a.push_block, None);
                changed = true;
            }
        }
        if self.this_available && !other.this_available {
            self.this_available = false;
            changed = true;
        }
        changed |= self.meet_equivs(other);
        Ok(changed)
    }

    /// Keep only the local equivalences both states agree on.
    fn meet_equivs(&mut self, other: &State) -> bool {
        let root = |s: &State, l: LocalId| s.equivalent_locals(l).into_iter().min();
        let mut classes: FxHashMap<(LocalId, LocalId), Vec<LocalId>> = FxHashMap::default();
        for i in 0..self.equiv_locals.len().min(other.equiv_locals.len()) {
            if self.equiv_locals[i].is_none() || other.equiv_locals[i].is_none() {
                continue;
            }
            let l = LocalId::from(i);
            if let (Some(a), Some(b)) = (root(self, l), root(other, l)) {
                classes.entry((a, b)).or_default().push(l);
            }
        }
        let mut rings = vec![None; self.equiv_locals.len()];
        for members in classes.values().filter(|m| m.len() > 1) {
            for (i, l) in members.iter().enumerate() {
                rings[l.index()] = Some(members[(i + 1) % members.len()]);
            }
        }
        let changed = rings != self.equiv_locals;
        self.equiv_locals = rings;
        changed
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unreachable {
            return f.write_str("<unreachable>");
        }
        for (i, t) in self.locals.iter().enumerate() {
            write!(f, "L:{i}={t}")?;
            if let Some(Some(next)) = self.equiv_locals.get(i) {
                write!(f, "(={next})")?;
            }
            f.write_str(" ")?;
        }
        f.write_str("[")?;
        for (i, elem) in self.stack.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", elem.ty)?;
            match elem.equiv {
                StackEquiv::None => {}
                StackEquiv::Local(l) => write!(f, "={l}")?,
                StackEquiv::DupTop => f.write_str("=dup")?,
            }
        }
        f.write_str("]")
    }
}

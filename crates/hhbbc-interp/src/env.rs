use hhbbc_bc::{Block, BlockId, ClsRefSlotId, Context, IterId, LocalId};
use hhbbc_index::Index;
use hhbbc_types::{Bits, IterTypes, Lattice, Oracle, ResClass, Type};
use tracing::trace;

use crate::collect::CollectedInfo;
use crate::error::InterpError;
use crate::flags::StepFlags;
use crate::options::Options;
use crate::state::{ActRec, IterState, LocalStaticBinding, StackElem, StackEquiv, State};

/// Everything needed to interpret one block.
///
/// `state` is the block's input state on entry and is mutated in place;
/// `collect` accumulates facts across the blocks of the function.
pub struct Interp<'a> {
    pub index: &'a dyn Index,
    pub oracle: &'a dyn Oracle,
    pub options: &'a Options,
    pub ctx: Context<'a>,
    pub block: &'a Block,
    pub state: &'a mut State,
    pub collect: &'a mut CollectedInfo,
}

/// Receives the state flowing into a successor block. `None` asks for the
/// block to be analysed again without new input.
pub type Propagate<'p> = dyn FnMut(BlockId, Option<&State>) + 'p;

/// The environment handlers run in: the block being interpreted, the flags
/// of the current step, and the propagation sink.
pub(crate) struct Env<'e, 'a> {
    pub interp: &'e mut Interp<'a>,
    pub flags: StepFlags,
    propagate: &'e mut Propagate<'e>,
}

type Result<T> = std::result::Result<T, InterpError>;

impl<'e, 'a> Env<'e, 'a> {
    pub fn new(interp: &'e mut Interp<'a>, propagate: &'e mut Propagate<'e>) -> Self {
        Self {
            interp,
            flags: StepFlags::default(),
            propagate,
        }
    }

    // -- Collaborators ------------------------------------------------------

    pub fn index(&self) -> &'a dyn Index {
        self.interp.index
    }

    pub fn oracle(&self) -> &'a dyn Oracle {
        self.interp.oracle
    }

    pub fn options(&self) -> &'a Options {
        self.interp.options
    }

    pub fn ctx(&self) -> Context<'a> {
        self.interp.ctx
    }

    pub fn block(&self) -> &'a Block {
        self.interp.block
    }

    pub fn state(&self) -> &State {
        &*self.interp.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut *self.interp.state
    }

    pub fn collect(&mut self) -> &mut CollectedInfo {
        &mut *self.interp.collect
    }

    // -- Flags --------------------------------------------------------------

    pub fn nothrow(&mut self) {
        self.flags.was_pei = false;
    }

    pub fn constprop(&mut self) {
        self.flags.can_const_prop = true;
    }

    pub fn effect_free(&mut self) {
        self.flags.was_pei = false;
        self.flags.effect_free = true;
    }

    pub fn unreachable(&mut self) {
        trace!("unreachable");
        self.interp.state.unreachable = true;
    }

    pub fn jmp_setdest(&mut self, target: BlockId) {
        self.flags.jmp_dest = Some(target);
    }

    /// The branch is known not to be taken.
    pub fn jmp_nevertaken(&mut self) {
        match self.block().fallthrough {
            Some(next) => self.jmp_setdest(next),
            None => self.unreachable(),
        }
    }

    // -- Propagation --------------------------------------------------------

    /// Hand the current state to `target`.
    pub fn propagate(&mut self, target: BlockId) {
        trace!(%target, state = %self.interp.state, "propagate");
        (self.propagate)(target, Some(&*self.interp.state));
    }

    pub fn propagate_state(&mut self, target: BlockId, state: &State) {
        trace!(%target, %state, "propagate");
        (self.propagate)(target, Some(state));
    }

    /// Ask for `target` to be analysed again.
    pub fn reanalyze(&mut self, target: BlockId) {
        trace!(%target, "reanalyze");
        (self.propagate)(target, None);
    }

    // -- Evaluation stack ---------------------------------------------------

    pub fn push(&mut self, ty: Type) {
        self.push_equiv(ty, StackEquiv::None);
    }

    pub fn push_equiv(&mut self, ty: Type, equiv: StackEquiv) {
        self.interp.state.stack.push(StackElem { ty, equiv });
    }

    pub fn pop_elem(&mut self) -> Result<StackElem> {
        self.interp
            .state
            .stack
            .pop()
            .ok_or(InterpError::StackUnderflow)
    }

    pub fn pop(&mut self) -> Result<Type> {
        Ok(self.pop_elem()?.ty)
    }

    pub fn discard(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            self.pop_elem()?;
        }
        Ok(())
    }

    fn elem(&self, i: usize) -> Result<&StackElem> {
        let stack = &self.interp.state.stack;
        stack
            .len()
            .checked_sub(i + 1)
            .map(|at| &stack[at])
            .ok_or(InterpError::StackUnderflow)
    }

    /// Type `i` slots below the top.
    pub fn top(&self, i: usize) -> Result<&Type> {
        Ok(&self.elem(i)?.ty)
    }

    pub fn top_equiv(&self, i: usize) -> Result<StackEquiv> {
        Ok(self.elem(i)?.equiv)
    }

    /// The local slot `i` is known to hold, following duplicated slots.
    pub fn top_local(&self, mut i: usize) -> Option<LocalId> {
        loop {
            match self.elem(i).ok()?.equiv {
                StackEquiv::Local(l) => return Some(l),
                StackEquiv::DupTop => i += 1,
                StackEquiv::None => return None,
            }
        }
    }

    pub fn stack_depth(&self) -> usize {
        self.interp.state.stack.len()
    }

    // -- Locals -------------------------------------------------------------

    fn check_loc(&self, l: LocalId) -> Result<()> {
        if l.index() < self.interp.state.locals.len() {
            Ok(())
        } else {
            Err(InterpError::BadLocal(l))
        }
    }

    pub fn loc_raw(&self, l: LocalId) -> Result<Type> {
        self.interp
            .state
            .locals
            .get(l.index())
            .cloned()
            .ok_or(InterpError::BadLocal(l))
    }

    fn write_loc(&mut self, l: LocalId, ty: Type) -> Result<()> {
        self.check_loc(l)?;
        let state = &mut *self.interp.state;
        state.kill_loc_equiv(l);
        state.kill_stk_equiv(l);
        state.locals[l.index()] = ty;
        Ok(())
    }

    /// Overwrite a local, forgetting what it was equal to.
    pub fn set_loc_raw(&mut self, l: LocalId, ty: Type) -> Result<()> {
        self.check_loc(l)?;
        self.modify_local_static(Some(l), &ty);
        self.write_loc(l, ty)
    }

    /// The value read from a local: references are dereferenced and
    /// uninitialized reads produce null.
    pub fn loc_as_cell(&self, l: LocalId) -> Result<Type> {
        Ok(to_cell(&self.loc_raw(l)?))
    }

    pub fn loc_could_be_uninit(&self, l: LocalId) -> Result<bool> {
        Ok(self.loc_raw(l)?.could_be_bits(Bits::UNINIT))
    }

    /// Store a value into a local. A local that may hold a reference keeps
    /// it: the store goes through the reference.
    pub fn set_loc(&mut self, l: LocalId, ty: Type) -> Result<()> {
        let old = self.loc_raw(l)?;
        self.modify_local_static(Some(l), &ty);
        let new = if !old.could_be_bits(Bits::REF) {
            ty
        } else if old.subtype_of_bits(Bits::REF) {
            Type::REF
        } else {
            ty.join(&Type::REF)
        };
        self.write_loc(l, new)
    }

    /// Make `l` known equal to `with`.
    pub fn add_loc_equiv(&mut self, l: LocalId, with: LocalId) {
        let state = &mut *self.interp.state;
        state.kill_loc_equiv(l);
        state.add_loc_equiv(l, with);
    }

    /// Narrow a location with `f`. A local is refined together with its
    /// equivalent locals and the stack slots holding it; a duplicated stack
    /// top together with the slots it was duplicated from. Returns false if
    /// some location became empty.
    pub fn refine_location(&mut self, loc: StackEquiv, f: &dyn Fn(&Type) -> Type) -> bool {
        let mut ok = true;
        let mut refine = |t: &Type| {
            let r1 = f(t);
            let r2 = r1.meet(t);
            let r = if r2.subtype_of(&r1) { r2 } else { r1 };
            if r.is_bottom() {
                ok = false;
            }
            r
        };
        let state = &mut *self.interp.state;
        let mut target = loc;
        if loc == StackEquiv::DupTop {
            target = StackEquiv::None;
            for elem in state.stack.iter_mut().rev() {
                elem.ty = refine(&elem.ty);
                if elem.equiv != StackEquiv::DupTop {
                    target = elem.equiv;
                    break;
                }
            }
        }
        let StackEquiv::Local(l) = target else {
            return ok;
        };
        for eq in state.equivalent_locals(l) {
            if let Some(slot) = state.locals.get_mut(eq.index()) {
                if slot.subtype_of_bits(Bits::CELL) {
                    *slot = refine(slot);
                }
            }
        }
        for elem in &mut state.stack {
            if elem.equiv == StackEquiv::Local(l) {
                elem.ty = refine(&elem.ty);
            }
        }
        ok
    }

    /// Every local may have been written through the variable environment.
    pub fn kill_locals(&mut self) {
        self.modify_local_static(None, &Type::GEN);
        let state = &mut *self.interp.state;
        state.locals.fill(Type::GEN);
        state.kill_all_equivs();
    }

    /// Non-reference locals keep their kind of value but lose precision.
    pub fn lose_non_ref_local_types(&mut self) {
        self.modify_local_static(None, &Type::INIT_CELL);
        let state = &mut *self.interp.state;
        for t in &mut state.locals {
            if t.subtype_of_bits(Bits::CELL) {
                *t = Type::CELL;
            }
        }
        state.kill_all_equivs();
    }

    /// Some unknown local was bound to a reference.
    pub fn box_unknown_local(&mut self) {
        self.modify_local_static(None, &Type::REF);
        let state = &mut *self.interp.state;
        for t in &mut state.locals {
            *t = t.join(&Type::REF);
        }
        state.kill_all_equivs();
    }

    /// Some unknown local was unset.
    pub fn unset_unknown_local(&mut self) {
        self.modify_local_static(None, &Type::UNINIT);
        let state = &mut *self.interp.state;
        for t in &mut state.locals {
            *t = t.join(&Type::UNINIT);
        }
        state.kill_all_equivs();
    }

    pub fn may_use_vv(&mut self) {
        self.interp.collect.may_use_vv = true;
    }

    // -- Static locals ------------------------------------------------------

    /// Locals of functions that may reach them by name are never bound.
    pub fn is_volatile_local(&self) -> bool {
        let attrs = self.ctx().func.attrs;
        attrs.is_pseudomain || attrs.may_use_vv
    }

    pub fn local_static_binding(&self, l: LocalId) -> LocalStaticBinding {
        self.interp
            .state
            .local_static_bindings
            .get(l.index())
            .copied()
            .unwrap_or_default()
    }

    fn set_local_static_binding(&mut self, l: LocalId, binding: LocalStaticBinding) {
        if let Some(slot) = self.interp.state.local_static_bindings.get_mut(l.index()) {
            *slot = binding;
        }
    }

    /// Bind `l` to its static, whose value may now also be `init`.
    pub fn bind_local_static(&mut self, l: LocalId, init: &Type) {
        if self.is_volatile_local() {
            return;
        }
        trace!(loc = %l, %init, "bind static");
        self.set_local_static_binding(l, LocalStaticBinding::Bound);
        self.interp.collect.widen_local_static(l, init);
    }

    /// `l` is bound to its static on some paths from here.
    pub fn maybe_bind_local_static(&mut self, l: LocalId) {
        if self.is_volatile_local() || self.local_static_binding(l) != LocalStaticBinding::None {
            return;
        }
        self.set_local_static_binding(l, LocalStaticBinding::Maybe);
    }

    pub fn unbind_local_static(&mut self, l: LocalId) {
        self.set_local_static_binding(l, LocalStaticBinding::None);
    }

    /// The analysis relied on the current type of the static of `l`.
    pub fn use_local_static(&mut self, l: LocalId) {
        let ty = self.interp.collect.local_static_type(l);
        self.flags.used_local_statics.entry(l).or_insert(ty);
    }

    /// `ty` is written to `l`, or to some unknown local. The static a local
    /// is bound to receives the write. Writing `Uninit` unbinds a known
    /// local and leaves an unknown one only maybe bound.
    pub fn modify_local_static(&mut self, l: Option<LocalId>, ty: &Type) {
        let unbinds = !ty.is_bottom() && ty.subtype_of(&Type::UNINIT);
        let targets: Vec<LocalId> = match l {
            Some(l) => vec![l],
            None => (0..self.interp.state.local_static_bindings.len())
                .map(LocalId::from)
                .collect(),
        };
        for lid in targets {
            if self.local_static_binding(lid) == LocalStaticBinding::None {
                continue;
            }
            if unbinds {
                let binding = if l.is_some() {
                    LocalStaticBinding::None
                } else {
                    LocalStaticBinding::Maybe
                };
                self.set_local_static_binding(lid, binding);
                continue;
            }
            let written = if ty.subtype_of_bits(Bits::CELL) {
                ty.clone()
            } else {
                Type::GEN
            };
            trace!(loc = %lid, ty = %written, "static written");
            self.interp.collect.widen_local_static(lid, &written);
        }
    }

    // -- Class-ref slots ----------------------------------------------------

    /// Read a class-ref slot, leaving it holding an unknown class.
    pub fn take_cls_ref_slot(&mut self, slot: ClsRefSlotId) -> Result<Type> {
        let t = self
            .interp
            .state
            .cls_ref_slots
            .get_mut(slot.index())
            .ok_or(InterpError::BadClsRefSlot(slot))?;
        Ok(std::mem::replace(t, Type::CLS))
    }

    pub fn peek_cls_ref_slot(&self, slot: ClsRefSlotId) -> Result<&Type> {
        self.interp
            .state
            .cls_ref_slots
            .get(slot.index())
            .ok_or(InterpError::BadClsRefSlot(slot))
    }

    pub fn put_cls_ref_slot(&mut self, slot: ClsRefSlotId, ty: Type) -> Result<()> {
        let t = self
            .interp
            .state
            .cls_ref_slots
            .get_mut(slot.index())
            .ok_or(InterpError::BadClsRefSlot(slot))?;
        *t = ty;
        Ok(())
    }

    // -- Iterators ----------------------------------------------------------

    pub fn iter(&self, id: IterId) -> Result<&IterState> {
        self.interp
            .state
            .iters
            .get(id.index())
            .ok_or(InterpError::BadIter(id))
    }

    pub fn set_iter(&mut self, id: IterId, types: IterTypes) -> Result<()> {
        let slot = self
            .interp
            .state
            .iters
            .get_mut(id.index())
            .ok_or(InterpError::BadIter(id))?;
        *slot = IterState::Tracked(types);
        Ok(())
    }

    pub fn free_iter(&mut self, id: IterId) -> Result<()> {
        let slot = self
            .interp
            .state
            .iters
            .get_mut(id.index())
            .ok_or(InterpError::BadIter(id))?;
        *slot = IterState::Unknown;
        Ok(())
    }

    // -- Calls in flight ----------------------------------------------------

    /// Start a call. The call stays foldable only when its callee is a
    /// known foldable function that has not been found unfoldable before.
    pub fn fpi_push(&mut self, mut ar: ActRec) {
        ar.foldable = self.options().constant_fold_builtins
            && ar.fallback.is_none()
            && ar.func.as_ref().is_some_and(|f| {
                f.is_foldable() && !self.interp.collect.unfoldable_funcs.contains(f.name())
            });
        self.interp.state.fpi_stack.push(ar);
    }

    pub fn fpi_pop(&mut self) -> Result<ActRec> {
        self.interp
            .state
            .fpi_stack
            .pop()
            .ok_or(InterpError::FpiUnderflow)
    }

    pub fn fpi_top(&self) -> Result<&ActRec> {
        self.interp
            .state
            .fpi_stack
            .last()
            .ok_or(InterpError::FpiUnderflow)
    }

    pub fn fpi_top_mut(&mut self) -> Result<&mut ActRec> {
        self.interp
            .state
            .fpi_stack
            .last_mut()
            .ok_or(InterpError::FpiUnderflow)
    }

    // -- Classes and $this --------------------------------------------------

    pub fn self_cls(&self) -> Option<ResClass> {
        let ctx = self.ctx();
        let cls = ctx.cls?;
        self.index().resolve_class(&ctx, &cls.name)
    }

    /// The class of the function, as an exact class type.
    pub fn self_cls_exact(&self) -> Option<Type> {
        self.self_cls().map(Type::cls_exact)
    }

    pub fn parent_cls_exact(&self) -> Option<Type> {
        let ctx = self.ctx();
        let parent = ctx.cls?.parent.as_deref()?;
        self.index().resolve_class(&ctx, parent).map(Type::cls_exact)
    }

    /// The type `$this` has when it is set.
    pub fn this_type(&self) -> Option<Type> {
        if self.ctx().func.attrs.is_static {
            return None;
        }
        self.self_cls().map(Type::sub_obj)
    }

    pub fn this_available(&self) -> bool {
        self.interp.state.this_available
    }

    pub fn set_this_available(&mut self) {
        self.interp.state.this_available = true;
    }

    pub fn kill_this_props(&mut self) {
        self.interp.collect.this_props.kill();
    }

    pub fn kill_self_props(&mut self) {
        self.interp.collect.self_props.kill();
    }
}

/// Type of the value read from a location of type `t`.
pub(crate) fn to_cell(t: &Type) -> Type {
    if !t.subtype_of_bits(Bits::CELL) {
        Type::INIT_CELL
    } else if t.could_be_bits(Bits::UNINIT) {
        t.remove_uninit().join(&Type::INIT_NULL)
    } else {
        t.clone()
    }
}

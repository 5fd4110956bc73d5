//! Per-opcode transfer functions.
//!
//! Each handler reads its inputs from the [`Env`], applies the effect of
//! one instruction to the abstract state and reports what it learned
//! through the step flags. A handler that finds a cheaper equivalent
//! sequence returns it as [`Effect::Reduce`] and leaves the state alone.

use std::sync::Arc;

use hhbbc_bc::{Bytecode, CollectionType, LocalId};
use hhbbc_types::{ArithOp, ArrKind, BitOp, Cell, CellOp, Type};

use crate::env::Env;
use crate::error::InterpError;
use crate::flags::Effect;

mod arith;
mod basic;
mod calls;
pub(crate) mod cmp;
mod control;
mod iter;
pub(crate) mod locals;
pub(crate) mod memo;
mod misc;
mod props;
pub(crate) mod query;

pub(crate) type Result<T = Effect, E = InterpError> = std::result::Result<T, E>;

fn reduce(bcs: impl IntoIterator<Item = Bytecode>) -> Result {
    Ok(Effect::reduce(bcs))
}

/// Evaluate `op` when every operand is a known value.
fn eval(env: &Env<'_, '_>, op: CellOp, args: &[&Type]) -> Option<Type> {
    let cells = args.iter().map(|t| t.tv()).collect::<Option<Vec<_>>>()?;
    env.oracle()
        .eval(op, &cells)
        .map(|c| Type::from_cell(&c))
}

/// The string a type is known to hold.
fn str_value(t: &Type) -> Option<Arc<str>> {
    match t.tv()? {
        Cell::Str(s) => Some(s),
        _ => None,
    }
}

/// The local a dynamic name (`$$x`) refers to, when the name is known and
/// the function has a local by that name.
fn named_local(env: &Env<'_, '_>, name: &Type) -> Option<LocalId> {
    let name = str_value(name)?;
    env.ctx().func.find_local(&name)
}

/// The literal instruction pushing `cell`.
fn constant_bytecode(cell: &Cell) -> Bytecode {
    match cell {
        Cell::Uninit => Bytecode::NullUninit,
        Cell::Null => Bytecode::Null,
        Cell::Bool(true) => Bytecode::True,
        Cell::Bool(false) => Bytecode::False,
        Cell::Int(val) => Bytecode::Int { val: *val },
        Cell::Dbl(val) => Bytecode::Double { val: *val },
        Cell::Str(val) => Bytecode::String { val: val.clone() },
        Cell::Arr(arr) => {
            let arr = arr.clone();
            match arr.kind {
                ArrKind::Arr => Bytecode::Array { arr },
                ArrKind::Vec => Bytecode::Vec { arr },
                ArrKind::Dict => Bytecode::Dict { arr },
                ArrKind::Keyset => Bytecode::Keyset { arr },
            }
        }
    }
}

/// Apply the transfer function of `bc`.
pub(crate) fn dispatch(env: &mut Env<'_, '_>, bc: &Bytecode) -> Result {
    use Bytecode as B;
    match bc {
        // -- Basic stack ops ------------------------------------------------
        B::Nop | B::EntryNop | B::BreakTraceHint | B::RGetCNop | B::AssertRATStk { .. } => {
            basic::nop(env)
        }
        B::DiscardClsRef { slot } => basic::discard_cls_ref(env, *slot),
        B::PopC => basic::pop_c(env),
        B::PopV => basic::pop_v(env),
        B::PopR => basic::pop_r(env),
        B::PopU => basic::pop_u(env),
        B::Dup => basic::dup(env),
        B::Box => basic::box_(env),
        B::Unbox => basic::unbox(env),
        B::BoxR => basic::box_r(env),
        B::BoxRNop => basic::box_r_nop(env),
        B::UnboxR => basic::unbox_r(env),
        B::UnboxRNop => basic::unbox_r_nop(env),
        B::CGetCUNop => basic::cget_cu_nop(env),
        B::UGetCUNop => basic::uget_cu_nop(env),

        // -- Literals -------------------------------------------------------
        B::Null => basic::literal(env, Type::INIT_NULL),
        B::NullUninit => basic::literal(env, Type::UNINIT),
        B::True => basic::literal(env, Type::TRUE),
        B::False => basic::literal(env, Type::FALSE),
        B::Int { val } => basic::literal(env, Type::ival(*val)),
        B::Double { val } => basic::literal(env, Type::dval(*val)),
        B::String { val } => basic::literal(env, Type::sval(val.clone())),
        B::Array { arr } | B::Dict { arr } | B::Vec { arr } | B::Keyset { arr } => {
            basic::literal(env, Type::aval(arr.clone()))
        }
        B::NewArray { capacity } | B::NewMixedArray { capacity } => {
            basic::new_array(env, ArrKind::Arr, *capacity)
        }
        B::NewDictArray { capacity } => basic::new_array(env, ArrKind::Dict, *capacity),
        B::NewLikeArrayL { loc, .. } => basic::new_like_array_l(env, *loc),
        B::NewPackedArray { count } => basic::new_packed(env, ArrKind::Arr, *count),
        B::NewVecArray { count } => basic::new_packed(env, ArrKind::Vec, *count),
        B::NewStructArray { keys } => basic::new_struct_array(env, keys),
        B::NewKeysetArray { count } => basic::new_keyset_array(env, *count),
        B::AddElemC => basic::add_elem_c(env),
        B::AddElemV => basic::add_elem_v(env),
        B::AddNewElemC => basic::add_new_elem_c(env),
        B::AddNewElemV => basic::add_new_elem_v(env),
        B::NewCol { ty } => basic::new_collection(env, *ty, 0),
        B::NewPair => basic::new_collection(env, CollectionType::Pair, 2),
        B::ColFromArray { ty } => basic::new_collection(env, *ty, 1),
        B::Cns { name } | B::CnsE { name } | B::CnsU { name, .. } => basic::cns(env, name),
        B::ClsCns { name, slot } => basic::cls_cns(env, name, *slot),
        B::ClsCnsD { name, cls } => basic::cls_cns_d(env, name, cls),
        B::File | B::Dir | B::Method => basic::static_string(env),
        B::ClsRefName { slot } => basic::cls_ref_name(env, *slot),

        // -- Operators ------------------------------------------------------
        B::Concat => arith::concat(env),
        B::ConcatN { count } => arith::concat_n_op(env, *count),
        B::Add => arith::arith(env, ArithOp::Add),
        B::Sub => arith::arith(env, ArithOp::Sub),
        B::Mul => arith::arith(env, ArithOp::Mul),
        B::AddO => arith::arith(env, ArithOp::AddO),
        B::SubO => arith::arith(env, ArithOp::SubO),
        B::MulO => arith::arith(env, ArithOp::MulO),
        B::Div => arith::arith(env, ArithOp::Div),
        B::Mod => arith::arith(env, ArithOp::Mod),
        B::Pow => arith::arith(env, ArithOp::Pow),
        B::BitAnd => arith::bit(env, BitOp::And),
        B::BitOr => arith::bit(env, BitOp::Or),
        B::BitXor => arith::bit(env, BitOp::Xor),
        B::Shl => arith::bit(env, BitOp::Shl),
        B::Shr => arith::bit(env, BitOp::Shr),
        B::BitNot => arith::bit_not(env),
        B::Not => arith::not(env),
        B::Xor => cmp::bin_op_bool(env, CellOp::Xor),
        B::Same => cmp::same(env, false),
        B::NSame => cmp::same(env, true),
        B::Eq => cmp::eq(env, false),
        B::Neq => cmp::eq(env, true),
        B::Lt => cmp::bin_op_bool(env, CellOp::Lt),
        B::Lte => cmp::bin_op_bool(env, CellOp::Lte),
        B::Gt => cmp::bin_op_bool(env, CellOp::Gt),
        B::Gte => cmp::bin_op_bool(env, CellOp::Gte),
        B::Cmp => cmp::cmp(env),
        B::CastBool => arith::cast_bool(env),
        B::CastInt => arith::cast_int(env),
        B::CastDouble => arith::cast(env, Type::DBL, Some(CellOp::CastDouble)),
        B::CastString => arith::cast(env, Type::STR, Some(CellOp::CastString)),
        B::CastArray => arith::cast(env, Type::ARR, Some(CellOp::CastArray)),
        B::CastObject => arith::cast(env, Type::OBJ, None),
        B::CastDict => arith::cast(env, Type::DICT, Some(CellOp::CastDict)),
        B::CastKeyset => arith::cast(env, Type::KEYSET, Some(CellOp::CastKeyset)),
        B::CastVec => arith::cast(env, Type::VEC, Some(CellOp::CastVec)),
        B::CastVArray | B::CastDArray => arith::cast_varray(env),
        B::InstanceOf => query::instance_of(env),
        B::InstanceOfD { cls } => query::instance_of_d(env, cls),
        B::Print => arith::print(env),
        B::Clone => arith::clone(env),
        B::Exit => arith::exit(env),
        B::Fatal { .. } => arith::fatal(env),

        // -- Control flow ---------------------------------------------------
        B::Jmp { target } | B::JmpNS { target } => control::jmp(env, *target),
        B::JmpZ { target } => control::jmp_cond(env, *target, false),
        B::JmpNZ { target } => control::jmp_cond(env, *target, true),
        B::Switch { kind, base, targets } => control::switch(env, *kind, *base, targets),
        B::SSwitch { cases, default } => control::sswitch(env, cases, *default),
        B::RetC | B::RetV => control::ret(env),
        B::Unwind => control::unwind(env),
        B::Throw => control::throw(env),
        B::Catch => control::catch(env),
        B::NativeImpl => control::native_impl(env),

        // -- Gets -----------------------------------------------------------
        B::CGetL { loc } => locals::cget_l(env, *loc),
        B::CGetQuietL { loc } => locals::cget_quiet_l(env, *loc),
        B::CUGetL { loc } => locals::cuget_l(env, *loc),
        B::CGetL2 { loc } => locals::cget_l2(env, *loc),
        B::PushL { loc } => locals::push_l(env, *loc),
        B::CGetN => locals::cget_n(env, false),
        B::CGetQuietN => locals::cget_n(env, true),
        B::CGetG | B::CGetQuietG | B::IncDecG { .. } => locals::global_read(env),
        B::CGetS { slot } => props::cget_s(env, *slot),
        B::VGetN => locals::vget_n(env),
        B::VGetG => locals::vget_g(env),
        B::VGetL { loc } => locals::vget_l(env, *loc),
        B::VGetS { slot } => props::vget_s(env, *slot),
        B::ClsRefGetL { loc, slot } => locals::cls_ref_get_l(env, *loc, *slot),
        B::ClsRefGetC { slot } => locals::cls_ref_get_c(env, *slot),

        // -- Tests ----------------------------------------------------------
        B::AKExists => query::ak_exists(env),
        B::GetMemoKeyL { loc } => memo::get_memo_key_l(env, *loc),
        B::IssetL { loc } => query::isset_l(env, *loc),
        B::EmptyL { loc } => query::empty_l(env, *loc),
        B::IssetN => query::isset_or_empty_n(env, false),
        B::EmptyN => query::isset_or_empty_n(env, true),
        B::IssetG | B::EmptyG => query::isset_or_empty_g(env),
        B::IssetS { slot } => props::isset_s(env, *slot),
        B::EmptyS { slot } => props::empty_s(env, *slot),
        B::IsTypeC { op } => query::is_type_c(env, *op),
        B::IsTypeL { loc, op } => query::is_type_l(env, *loc, *op),
        B::IsUninit => query::is_uninit(env),
        B::MaybeMemoType => memo::memo_type_test(env, false),
        B::IsMemoType => memo::memo_type_test(env, true),
        B::AssertRATL { loc, .. } => basic::assert_rat_l(env, *loc),

        // -- Mutators -------------------------------------------------------
        B::SetL { loc } => locals::set_l(env, *loc),
        B::SetN => locals::set_n(env),
        B::SetG | B::BindG => locals::global_write(env),
        B::SetS { slot } => props::set_s(env, *slot),
        B::SetOpL { loc, op } => locals::set_op_l(env, *loc, *op),
        B::SetOpN { .. } => locals::set_op_n(env),
        B::SetOpG { .. } => locals::set_op_g(env),
        B::SetOpS { slot, .. } => props::modify_s(env, *slot, true),
        B::IncDecL { loc, op } => locals::inc_dec_l(env, *loc, *op),
        B::IncDecN { op } => locals::inc_dec_n(env, *op),
        B::IncDecS { slot, .. } => props::modify_s(env, *slot, false),
        B::BindL { loc } => locals::bind_l(env, *loc),
        B::BindN => locals::bind_n(env),
        B::BindS { slot } => props::bind_s(env, *slot),
        B::UnsetL { loc } => locals::unset_l(env, *loc),
        B::UnsetN => locals::unset_n(env),
        B::UnsetG => locals::unset_g(env),
        B::PopL { loc } => locals::pop_l(env, *loc),

        // -- Calls ----------------------------------------------------------
        B::FPushFunc { args } => calls::fpush_func(env, *args),
        B::FPushFuncD { func, .. } => calls::fpush_func_d(env, func),
        B::FPushFuncU { args, func, fallback } => calls::fpush_func_u(env, *args, func, fallback),
        B::FPushObjMethod { args, op } => calls::fpush_obj_method(env, *args, *op),
        B::FPushObjMethodD { method, op, .. } => calls::fpush_obj_method_d(env, method, *op),
        B::FPushClsMethod { args, slot } => calls::fpush_cls_method(env, *args, *slot, false),
        B::FPushClsMethodF { args, slot } => calls::fpush_cls_method(env, *args, *slot, true),
        B::FPushClsMethodD { method, cls, .. } => calls::fpush_cls_method_d(env, method, cls),
        B::FPushCtor { args, slot } => calls::fpush_ctor(env, *args, *slot),
        B::FPushCtorD { cls, .. } => calls::fpush_ctor_d(env, cls),
        B::FPushCtorI { cls_index, .. } => calls::fpush_ctor_i(env, *cls_index),
        B::FPushCufIter { iter, .. } => calls::fpush_cuf_iter(env, *iter),
        B::FPushCuf { .. } | B::FPushCufF { .. } => calls::fpush_cuf(env),
        B::FPushCufSafe { .. } => calls::fpush_cuf_safe(env),
        B::FPassC { param, hint } => calls::fpass_c(env, *param, *hint),
        B::FPassCW { param, hint } | B::FPassCE { param, hint } => {
            calls::fpass_c_checked(env, *param, *hint)
        }
        B::FPassV { param, hint } => calls::fpass_v(env, *param, *hint),
        B::FPassVNop { hint, .. } => calls::fpass_v_nop(env, *hint),
        B::FPassR { param, hint } => calls::fpass_r(env, *param, *hint),
        B::FPassL { param, loc, hint } => calls::fpass_l(env, *param, *loc, *hint),
        B::FPassN { param, hint } => calls::fpass_n(env, *param, *hint),
        B::FPassG { param, hint } => calls::fpass_g(env, *param, *hint),
        B::FPassS { param, slot, hint } => calls::fpass_s(env, *param, *slot, *hint),
        B::RaiseFPassWarning { .. } => calls::raise_fpass_warning(env),
        B::FCall { args } => calls::fcall(env, *args),
        B::FCallD { args, cls, func } => calls::fcall_d(env, *args, cls, func),
        B::FCallAwait { args, cls, func } => calls::fcall_await(env, *args, cls, func),
        B::FCallArray => calls::fcall_array(env, 1),
        B::FCallUnpack { args } => calls::fcall_array(env, *args),
        B::FCallBuiltin { args, func, .. } => calls::fcall_builtin(env, *args, func),
        B::CufSafeArray => calls::cuf_safe_array(env),
        B::CufSafeReturn => calls::cuf_safe_return(env),
        B::DecodeCufIter { target, .. } => calls::decode_cuf_iter(env, *target),

        // -- Iterators ------------------------------------------------------
        B::IterInit { iter, target, val } => iter::iter_init(env, *iter, *target, *val, None),
        B::IterInitK { iter, target, val, key } => {
            iter::iter_init(env, *iter, *target, *val, Some(*key))
        }
        B::IterNext { iter, target, val } => iter::iter_next(env, *iter, *target, *val, None),
        B::IterNextK { iter, target, val, key } => {
            iter::iter_next(env, *iter, *target, *val, Some(*key))
        }
        B::MIterInit { target, val, .. } => iter::miter_init(env, *target, *val, None),
        B::MIterInitK { target, val, key, .. } => iter::miter_init(env, *target, *val, Some(*key)),
        B::MIterNext { target, val, .. } => iter::miter_next(env, *target, *val, None),
        B::MIterNextK { target, val, key, .. } => iter::miter_next(env, *target, *val, Some(*key)),
        B::WIterInit { target, val, .. } => iter::witer_init(env, *target, *val, None),
        B::WIterInitK { target, val, key, .. } => iter::witer_init(env, *target, *val, Some(*key)),
        B::WIterNext { target, val, .. } => iter::witer_next(env, *target, *val, None),
        B::WIterNextK { target, val, key, .. } => iter::witer_next(env, *target, *val, Some(*key)),
        B::IterFree { iter } | B::MIterFree { iter } | B::CIterFree { iter } => {
            iter::iter_free(env, *iter)
        }
        B::IterBreak { target, iters } => iter::iter_break(env, *target, iters),

        // -- Includes and definitions ---------------------------------------
        B::Incl | B::InclOnce | B::Req | B::ReqOnce | B::ReqDoc | B::Eval => misc::include(env),
        B::DefFunc { .. } | B::DefCls { .. } | B::DefClsNop { .. } | B::DefTypeAlias { .. } => {
            misc::no_effect(env)
        }
        B::AliasCls { .. } => misc::alias_cls(env),
        B::DefCns { name } => misc::def_cns(env, name),

        // -- Classes, $this and statics -------------------------------------
        B::This => misc::this(env),
        B::LateBoundCls { slot } => misc::late_bound_cls(env, *slot),
        B::CheckThis => misc::check_this(env),
        B::BareThis { op } => misc::bare_this(env, *op),
        B::InitThisLoc { loc } => misc::init_this_loc(env, *loc),
        B::StaticLocCheck { loc, .. } => locals::static_loc_check(env, *loc),
        B::StaticLocDef { loc, .. } | B::StaticLocInit { loc, .. } => {
            locals::static_loc_bind(env, *loc)
        }
        B::OODeclExists { op } => query::oo_decl_exists(env, *op),
        B::VerifyParamType { param } => misc::verify_param_type(env, *param),
        B::VerifyRetTypeC => misc::verify_ret_type_c(env),
        B::VerifyRetTypeV => misc::no_effect(env),
        B::Self_ { slot } => misc::self_(env, *slot),
        B::Parent { slot } => misc::parent(env, *slot),
        B::CreateCl { args, cls_index } => misc::create_cl(env, *args, *cls_index),
        B::CheckProp { .. } => props::check_prop(env),
        B::InitProp { name, op } => props::init_prop(env, name, *op),

        // -- Generators and async -------------------------------------------
        B::CreateCont => misc::create_cont(env),
        B::ContEnter | B::ContRaise | B::Yield => misc::resume(env, 1),
        B::YieldK => misc::resume(env, 2),
        B::ContAssignDelegate { .. } | B::ContEnterDelegate => misc::cont_delegate(env),
        B::YieldFromDelegate { target, .. } => misc::yield_from_delegate(env, *target),
        B::ContUnsetDelegate { .. } | B::ContCheck { .. } => misc::no_effect(env),
        B::ContValid | B::ContStarted => misc::push_const(env, Type::BOOL),
        B::ContKey | B::ContCurrent | B::ContGetReturn => misc::push_const(env, Type::INIT_CELL),
        B::WHResult | B::Await => misc::wait_handle_result(env),

        // -- Misc -----------------------------------------------------------
        B::IncStat { .. } | B::VarEnvDynCall => misc::no_effect(env),
        B::Idx | B::ArrayIdx => misc::idx(env),
        B::Silence { loc, op } => misc::silence(env, *loc, *op),
        B::MemoGet { .. } => memo::memo_get(env),
    }
}

/// A single-block function to run handlers against.
#[cfg(test)]
pub(crate) mod testing {
    use hhbbc_bc::{
        Block, BlockId, Bytecode, Class, Context, Func, FuncAttrs, Local, LocalId, Param,
        SlotUse, Unit,
    };
    use hhbbc_index::{Index, MemoryIndex};
    use hhbbc_types::{Oracle, ResClass, ScalarOracle, Type};

    use crate::collect::CollectedInfo;
    use crate::env::{Env, Interp};
    use crate::error::InterpError;
    use crate::flags::StepFlags;
    use crate::options::{CollectionOpts, Options};
    use crate::state::{StackElem, State};
    use crate::step::interp_one;

    pub(crate) struct Harness {
        pub unit: Unit,
        pub func: Func,
        pub index: MemoryIndex,
        pub options: Options,
        pub oracle: &'static dyn Oracle,
        pub state: State,
        pub collect: CollectedInfo,
        /// Every propagation, in order.
        pub propagated: Vec<(BlockId, Option<State>)>,
    }

    impl Harness {
        pub fn new() -> Self {
            let unit = Unit::builder().name("u").build();
            let func = Func::builder()
                .name("f")
                .blocks(vec![Block::new(0u32, vec![])])
                .build();
            let collect = CollectedInfo::new(&Context::new(&unit, &func), CollectionOpts::default());
            Self {
                unit,
                func,
                index: MemoryIndex::new(),
                options: Options::default(),
                oracle: &ScalarOracle,
                state: State::new(SlotUse {
                    locals: 6,
                    iters: 2,
                    cls_ref_slots: 2,
                }),
                collect,
                propagated: Vec::new(),
            }
        }

        /// Locals `0..names.len()` carry the given names.
        pub fn with_named_locals(names: &[&str]) -> Self {
            let mut h = Self::new();
            h.func.locals = names
                .iter()
                .enumerate()
                .map(|(i, name)| Local {
                    id: LocalId::from(i),
                    name: Some((*name).into()),
                })
                .collect();
            h.refresh()
        }

        pub fn with_index(mut self, index: MemoryIndex) -> Self {
            self.index = index;
            self
        }

        pub fn with_params(mut self, params: Vec<Param>) -> Self {
            self.func.params = params;
            self.refresh()
        }

        pub fn with_attrs(mut self, attrs: FuncAttrs) -> Self {
            self.func.attrs = attrs;
            self.refresh()
        }

        pub fn with_fallthrough(mut self, target: BlockId) -> Self {
            self.func.blocks[0].fallthrough = Some(target);
            self
        }

        /// Make the function a method of `cls`.
        pub fn in_class(mut self, cls: Class) -> Self {
            self.func.cls = Some(cls.name.clone());
            self.unit.classes.push(cls);
            self.refresh()
        }

        fn refresh(mut self) -> Self {
            self.collect = CollectedInfo::new(
                &Context::new(&self.unit, &self.func),
                CollectionOpts::default(),
            );
            self
        }

        pub fn class(&self, name: &str) -> ResClass {
            let ctx = Context::new(&self.unit, &self.func);
            self.index
                .resolve_class(&ctx, name)
                .unwrap_or_else(|| panic!("class {name} is not in the index"))
        }

        pub fn push(&mut self, ty: Type) {
            self.state.stack.push(StackElem::new(ty));
        }

        pub fn set_local(&mut self, i: u32, ty: Type) {
            self.state.locals[i as usize] = ty;
        }

        pub fn top(&self) -> Type {
            self.state.stack.last().expect("empty stack").ty.clone()
        }

        pub fn step(&mut self, bc: Bytecode) -> StepFlags {
            let shown = bc.to_string();
            self.try_step(bc)
                .unwrap_or_else(|e| panic!("`{shown}` failed: {e}"))
        }

        pub fn try_step(&mut self, bc: Bytecode) -> Result<StepFlags, InterpError> {
            let mut interp = Interp {
                index: &self.index,
                oracle: self.oracle,
                options: &self.options,
                ctx: Context::new(&self.unit, &self.func),
                block: &self.func.blocks[0],
                state: &mut self.state,
                collect: &mut self.collect,
            };
            let propagated = &mut self.propagated;
            let mut sink = |b: BlockId, s: Option<&State>| propagated.push((b, s.cloned()));
            let mut env = Env::new(&mut interp, &mut sink);
            interp_one(&mut env, &bc)?;
            Ok(std::mem::take(&mut env.flags))
        }

        pub fn propagated_blocks(&self) -> Vec<BlockId> {
            self.propagated.iter().map(|(b, _)| *b).collect()
        }
    }
}

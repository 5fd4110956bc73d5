use std::fmt;
use std::sync::Arc;

use hhbbc_types::ArrayData;
use smallvec::SmallVec;

use crate::ids::{BlockId, ClsRefSlotId, IterId, LocalId};
use crate::imm::*;

macro_rules! bytecodes {
    ($( $name:ident $({ $($field:ident : $ty:ty),* $(,)? })? ; )*) => {
        /// One decoded instruction with its immediates.
        #[derive(Clone, Debug, PartialEq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum Bytecode {
            $( $name $({ $($field: $ty),* })?, )*
        }

        /// Field-less opcode tag of a [`Bytecode`].
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum Op {
            $( $name, )*
        }

        impl Bytecode {
            pub fn op(&self) -> Op {
                match self {
                    $( Bytecode::$name { .. } => Op::$name, )*
                }
            }
        }

        impl Bytecode {
            /// Record every local, iterator and class-ref slot named by the
            /// immediates.
            #[allow(unused_variables)]
            pub fn visit_slots(&self, slots: &mut SlotUse) {
                match self {
                    $(
                        Bytecode::$name $({ $($field),* })? => {
                            $($( $field.visit_slots(slots); )*)?
                        }
                    )*
                }
            }
        }

        impl Op {
            /// Opcode mnemonic.
            pub fn name(self) -> &'static str {
                match self {
                    $( Op::$name => stringify!($name).trim_end_matches('_'), )*
                }
            }
        }

        impl fmt::Display for Bytecode {
            #[allow(unused_variables)]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(
                        Bytecode::$name $({ $($field),* })? => {
                            f.write_str(Op::$name.name())?;
                            $($(
                                f.write_str(" ")?;
                                $field.fmt_imm(f)?;
                            )*)?
                            Ok(())
                        }
                    )*
                }
            }
        }
    };
}

bytecodes! {
    // -- Basic stack ops ----------------------------------------------------
    Nop;
    EntryNop;
    BreakTraceHint;
    DiscardClsRef { slot: ClsRefSlotId };
    PopC;
    PopV;
    PopR;
    PopU;
    Dup;
    Box;
    Unbox;
    BoxR;
    BoxRNop;
    UnboxR;
    UnboxRNop;
    RGetCNop;
    CGetCUNop;
    UGetCUNop;

    // -- Literals -----------------------------------------------------------
    Null;
    NullUninit;
    True;
    False;
    Int { val: i64 };
    Double { val: f64 };
    String { val: Arc<str> };
    Array { arr: Arc<ArrayData> };
    Dict { arr: Arc<ArrayData> };
    Vec { arr: Arc<ArrayData> };
    Keyset { arr: Arc<ArrayData> };
    NewArray { capacity: u32 };
    NewMixedArray { capacity: u32 };
    NewDictArray { capacity: u32 };
    NewLikeArrayL { loc: LocalId, capacity: u32 };
    NewPackedArray { count: u32 };
    NewStructArray { keys: std::vec::Vec<Arc<str>> };
    NewVecArray { count: u32 };
    NewKeysetArray { count: u32 };
    AddElemC;
    AddElemV;
    AddNewElemC;
    AddNewElemV;
    NewCol { ty: CollectionType };
    NewPair;
    ColFromArray { ty: CollectionType };
    Cns { name: Arc<str> };
    CnsE { name: Arc<str> };
    CnsU { name: Arc<str>, fallback: Arc<str> };
    ClsCns { name: Arc<str>, slot: ClsRefSlotId };
    ClsCnsD { name: Arc<str>, cls: Arc<str> };
    File;
    Dir;
    Method;
    ClsRefName { slot: ClsRefSlotId };

    // -- Operators ----------------------------------------------------------
    Concat;
    ConcatN { count: u32 };
    Add;
    Sub;
    Mul;
    AddO;
    SubO;
    MulO;
    Div;
    Mod;
    Pow;
    Xor;
    Not;
    Same;
    NSame;
    Eq;
    Neq;
    Lt;
    Lte;
    Gt;
    Gte;
    Cmp;
    BitAnd;
    BitOr;
    BitXor;
    BitNot;
    Shl;
    Shr;
    CastBool;
    CastInt;
    CastDouble;
    CastString;
    CastArray;
    CastObject;
    CastDict;
    CastKeyset;
    CastVec;
    CastVArray;
    CastDArray;
    InstanceOf;
    InstanceOfD { cls: Arc<str> };
    Print;
    Clone;
    Exit;
    Fatal { op: FatalOp };

    // -- Control flow -------------------------------------------------------
    Jmp { target: BlockId };
    JmpNS { target: BlockId };
    JmpZ { target: BlockId };
    JmpNZ { target: BlockId };
    Switch { kind: SwitchKind, base: i64, targets: std::vec::Vec<BlockId> };
    SSwitch { cases: std::vec::Vec<(Arc<str>, BlockId)>, default: BlockId };
    RetC;
    RetV;
    Unwind;
    Throw;
    Catch;
    NativeImpl;

    // -- Gets ---------------------------------------------------------------
    CGetL { loc: LocalId };
    CGetQuietL { loc: LocalId };
    CUGetL { loc: LocalId };
    CGetL2 { loc: LocalId };
    PushL { loc: LocalId };
    CGetN;
    CGetQuietN;
    CGetG;
    CGetQuietG;
    CGetS { slot: ClsRefSlotId };
    VGetN;
    VGetG;
    VGetL { loc: LocalId };
    VGetS { slot: ClsRefSlotId };
    ClsRefGetL { loc: LocalId, slot: ClsRefSlotId };
    ClsRefGetC { slot: ClsRefSlotId };

    // -- Tests --------------------------------------------------------------
    AKExists;
    GetMemoKeyL { loc: LocalId };
    IssetL { loc: LocalId };
    IssetN;
    IssetG;
    IssetS { slot: ClsRefSlotId };
    EmptyL { loc: LocalId };
    EmptyN;
    EmptyG;
    EmptyS { slot: ClsRefSlotId };
    IsTypeC { op: IsTypeOp };
    IsTypeL { loc: LocalId, op: IsTypeOp };
    IsUninit;
    MaybeMemoType;
    IsMemoType;
    AssertRATL { loc: LocalId, rat: RepoAuthType };
    AssertRATStk { depth: u32, rat: RepoAuthType };

    // -- Mutators -----------------------------------------------------------
    SetL { loc: LocalId };
    SetN;
    SetG;
    SetS { slot: ClsRefSlotId };
    SetOpL { loc: LocalId, op: SetOpOp };
    SetOpN { op: SetOpOp };
    SetOpG { op: SetOpOp };
    SetOpS { op: SetOpOp, slot: ClsRefSlotId };
    IncDecL { loc: LocalId, op: IncDecOp };
    IncDecN { op: IncDecOp };
    IncDecG { op: IncDecOp };
    IncDecS { op: IncDecOp, slot: ClsRefSlotId };
    BindL { loc: LocalId };
    BindN;
    BindG;
    BindS { slot: ClsRefSlotId };
    UnsetL { loc: LocalId };
    UnsetN;
    UnsetG;
    PopL { loc: LocalId };

    // -- Calls --------------------------------------------------------------
    FPushFunc { args: u32 };
    FPushFuncD { args: u32, func: Arc<str> };
    FPushFuncU { args: u32, func: Arc<str>, fallback: Arc<str> };
    FPushObjMethod { args: u32, op: ObjMethodOp };
    FPushObjMethodD { args: u32, method: Arc<str>, op: ObjMethodOp };
    FPushClsMethod { args: u32, slot: ClsRefSlotId };
    FPushClsMethodF { args: u32, slot: ClsRefSlotId };
    FPushClsMethodD { args: u32, method: Arc<str>, cls: Arc<str> };
    FPushCtor { args: u32, slot: ClsRefSlotId };
    FPushCtorD { args: u32, cls: Arc<str> };
    FPushCtorI { args: u32, cls_index: u32 };
    FPushCufIter { args: u32, iter: IterId };
    FPushCuf { args: u32 };
    FPushCufF { args: u32 };
    FPushCufSafe { args: u32 };
    FPassC { param: u32, hint: FPassHint };
    FPassCW { param: u32, hint: FPassHint };
    FPassCE { param: u32, hint: FPassHint };
    FPassV { param: u32, hint: FPassHint };
    FPassVNop { param: u32, hint: FPassHint };
    FPassR { param: u32, hint: FPassHint };
    FPassL { param: u32, loc: LocalId, hint: FPassHint };
    FPassN { param: u32, hint: FPassHint };
    FPassG { param: u32, hint: FPassHint };
    FPassS { param: u32, slot: ClsRefSlotId, hint: FPassHint };
    RaiseFPassWarning { hint: FPassHint, func: Arc<str>, param: u32 };
    FCall { args: u32 };
    FCallD { args: u32, cls: Arc<str>, func: Arc<str> };
    FCallAwait { args: u32, cls: Arc<str>, func: Arc<str> };
    FCallArray;
    FCallUnpack { args: u32 };
    FCallBuiltin { args: u32, non_default: u32, func: Arc<str> };
    CufSafeArray;
    CufSafeReturn;
    DecodeCufIter { iter: IterId, target: BlockId };

    // -- Iterators ----------------------------------------------------------
    IterInit { iter: IterId, target: BlockId, val: LocalId };
    IterInitK { iter: IterId, target: BlockId, val: LocalId, key: LocalId };
    WIterInit { iter: IterId, target: BlockId, val: LocalId };
    WIterInitK { iter: IterId, target: BlockId, val: LocalId, key: LocalId };
    MIterInit { iter: IterId, target: BlockId, val: LocalId };
    MIterInitK { iter: IterId, target: BlockId, val: LocalId, key: LocalId };
    IterNext { iter: IterId, target: BlockId, val: LocalId };
    IterNextK { iter: IterId, target: BlockId, val: LocalId, key: LocalId };
    WIterNext { iter: IterId, target: BlockId, val: LocalId };
    WIterNextK { iter: IterId, target: BlockId, val: LocalId, key: LocalId };
    MIterNext { iter: IterId, target: BlockId, val: LocalId };
    MIterNextK { iter: IterId, target: BlockId, val: LocalId, key: LocalId };
    IterFree { iter: IterId };
    MIterFree { iter: IterId };
    CIterFree { iter: IterId };
    IterBreak { target: BlockId, iters: std::vec::Vec<(IterKind, IterId)> };

    // -- Includes and definitions -------------------------------------------
    Incl;
    InclOnce;
    Req;
    ReqOnce;
    ReqDoc;
    Eval;
    DefFunc { id: u32 };
    DefCls { id: u32 };
    DefClsNop { id: u32 };
    DefTypeAlias { id: u32 };
    AliasCls { original: Arc<str>, alias: Arc<str> };
    DefCns { name: Arc<str> };

    // -- Classes, $this and statics -----------------------------------------
    This;
    LateBoundCls { slot: ClsRefSlotId };
    CheckThis;
    BareThis { op: BareThisOp };
    InitThisLoc { loc: LocalId };
    StaticLocCheck { loc: LocalId, name: Arc<str> };
    StaticLocDef { loc: LocalId, name: Arc<str> };
    StaticLocInit { loc: LocalId, name: Arc<str> };
    OODeclExists { op: OODeclExistsOp };
    VerifyParamType { param: LocalId };
    VerifyRetTypeC;
    VerifyRetTypeV;
    Self_ { slot: ClsRefSlotId };
    Parent { slot: ClsRefSlotId };
    CreateCl { args: u32, cls_index: u32 };
    CheckProp { name: Arc<str> };
    InitProp { name: Arc<str>, op: InitPropOp };

    // -- Generators and async -----------------------------------------------
    CreateCont;
    ContEnter;
    ContRaise;
    Yield;
    YieldK;
    ContAssignDelegate { iter: IterId };
    ContEnterDelegate;
    YieldFromDelegate { iter: IterId, target: BlockId };
    ContUnsetDelegate { op: CudOp, iter: IterId };
    ContCheck { check_started: bool };
    ContValid;
    ContStarted;
    ContKey;
    ContCurrent;
    ContGetReturn;
    WHResult;
    Await;

    // -- Misc ---------------------------------------------------------------
    IncStat { counter: i64, value: i64 };
    Idx;
    ArrayIdx;
    Silence { loc: LocalId, op: SilenceOp };
    VarEnvDynCall;
    MemoGet { keys: LocalRange };
}

impl Bytecode {
    /// Number of values the instruction leaves on the evaluation stack in
    /// place of its inputs.
    pub fn num_push(&self) -> u32 {
        use Op::*;
        match self.op() {
            Dup | CGetL2 => 2,
            IsUninit => 2,
            FPushCufSafe => 2,

            Nop | EntryNop | BreakTraceHint | DiscardClsRef | PopC | PopV | PopR | PopU
            | RGetCNop | AssertRATL | AssertRATStk => 0,
            Jmp | JmpNS | JmpZ | JmpNZ | Switch | SSwitch => 0,
            RetC | RetV | Unwind | Throw | NativeImpl | Fatal => 0,
            ClsRefGetL | ClsRefGetC => 0,
            PopL | UnsetL | UnsetN | UnsetG => 0,
            FPushFunc | FPushFuncD | FPushFuncU | FPushObjMethod | FPushObjMethodD
            | FPushClsMethod | FPushClsMethodF | FPushClsMethodD | FPushCufIter | FPushCuf
            | FPushCufF => 0,
            RaiseFPassWarning | DecodeCufIter => 0,
            IterInit | IterInitK | WIterInit | WIterInitK | MIterInit | MIterInitK | IterNext
            | IterNextK | WIterNext | WIterNextK | MIterNext | MIterNextK | IterFree
            | MIterFree | CIterFree | IterBreak => 0,
            DefFunc | DefCls | DefClsNop | DefTypeAlias => 0,
            LateBoundCls | CheckThis | InitThisLoc | StaticLocDef | StaticLocInit
            | VerifyParamType | Self_ | Parent | InitProp => 0,
            ContAssignDelegate | ContEnterDelegate | ContUnsetDelegate | ContCheck => 0,
            IncStat | Silence | VarEnvDynCall => 0,

            _ => 1,
        }
    }

    /// Control never falls through to the next instruction.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.op(),
            Op::Jmp
                | Op::JmpNS
                | Op::Switch
                | Op::SSwitch
                | Op::RetC
                | Op::RetV
                | Op::Unwind
                | Op::Throw
                | Op::Fatal
                | Op::Exit
                | Op::NativeImpl
                | Op::IterBreak
        )
    }

    /// The instruction has explicit branch targets.
    pub fn is_branch(&self) -> bool {
        !self.targets().is_empty()
    }

    /// Every explicit branch target, in immediate order.
    pub fn targets(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Bytecode::Jmp { target }
            | Bytecode::JmpNS { target }
            | Bytecode::JmpZ { target }
            | Bytecode::JmpNZ { target }
            | Bytecode::DecodeCufIter { target, .. }
            | Bytecode::IterInit { target, .. }
            | Bytecode::IterInitK { target, .. }
            | Bytecode::WIterInit { target, .. }
            | Bytecode::WIterInitK { target, .. }
            | Bytecode::MIterInit { target, .. }
            | Bytecode::MIterInitK { target, .. }
            | Bytecode::IterNext { target, .. }
            | Bytecode::IterNextK { target, .. }
            | Bytecode::WIterNext { target, .. }
            | Bytecode::WIterNextK { target, .. }
            | Bytecode::MIterNext { target, .. }
            | Bytecode::MIterNextK { target, .. }
            | Bytecode::IterBreak { target, .. }
            | Bytecode::YieldFromDelegate { target, .. } => smallvec::smallvec![*target],
            Bytecode::Switch { targets, .. } => targets.iter().copied().collect(),
            Bytecode::SSwitch { cases, default } => cases
                .iter()
                .map(|(_, b)| *b)
                .chain(std::iter::once(*default))
                .collect(),
            _ => SmallVec::new(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hhbbc_types::{ArrKind, Cell};

    #[test]
    fn test_display() {
        insta::assert_snapshot!(Bytecode::CGetL { loc: LocalId(2) }, @"CGetL L:2");
        insta::assert_snapshot!(
            Bytecode::IsTypeL { loc: LocalId(0), op: IsTypeOp::Int },
            @"IsTypeL L:0 Int"
        );
        insta::assert_snapshot!(
            Bytecode::Switch {
                kind: SwitchKind::Bounded,
                base: 0,
                targets: vec![BlockId(1), BlockId(2)],
            },
            @"Switch Bounded 0 <B1 B2>"
        );
        insta::assert_snapshot!(Bytecode::String { val: "hi".into() }, @r#"String "hi""#);
        insta::assert_snapshot!(Bytecode::Self_ { slot: ClsRefSlotId(0) }, @"Self S:0");
    }

    #[test]
    fn test_array_literal_display() {
        let arr = ArrayData::packed(ArrKind::Vec, [Cell::Int(1)]).unwrap();
        let bc = Bytecode::Vec { arr: Arc::new(arr) };
        assert_eq!(bc.to_string(), "Vec @vec[1]");
    }

    #[test]
    fn test_push_arity() {
        assert_eq!(Bytecode::Dup.num_push(), 2);
        assert_eq!(Bytecode::IsUninit.num_push(), 2);
        assert_eq!(Bytecode::PopC.num_push(), 0);
        assert_eq!(Bytecode::ConcatN { count: 3 }.num_push(), 1);
        assert_eq!(Bytecode::FPushCtorD { args: 0, cls: "C".into() }.num_push(), 1);
    }

    #[test]
    fn test_targets() {
        let sw = Bytecode::SSwitch {
            cases: vec![("a".into(), BlockId(3))],
            default: BlockId(4),
        };
        assert_eq!(sw.targets().as_slice(), &[BlockId(3), BlockId(4)]);
        assert!(Bytecode::JmpZ { target: BlockId(1) }.is_branch());
        assert!(!Bytecode::JmpZ { target: BlockId(1) }.is_terminal());
        assert!(Bytecode::RetC.is_terminal());
    }
}

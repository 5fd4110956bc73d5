mod bytecode;
mod ids;
mod imm;
mod repr;

pub use bytecode::{Bytecode, Op};
pub use ids::{BlockId, ClosureId, ClsRefSlotId, IterId, LocalId};
pub use imm::{
    BareThisOp, CollectionType, CudOp, FPassHint, FatalOp, Imm, IncDecOp, InitPropOp, IsTypeOp,
    IterKind, LocalRange, ObjMethodOp, OODeclExistsOp, RepoAuthType, SetOpOp, SilenceOp,
    SlotUse, SwitchKind,
};
pub use repr::{
    AnnotType, Block, Class, ClassAttrs, Context, Func, FuncAttrs, Local, Param, Prop,
    TypeConstraint, Unit, Visibility,
};

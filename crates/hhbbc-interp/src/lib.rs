//! Abstract interpretation of HHBC bytecode over the type lattice.
//!
//! [`run`] interprets one block from an input [`State`], reporting the
//! states that flow to successor blocks through a propagation callback.
//! [`FuncAnalyzer`] drives it to a fixpoint over a whole function.

mod collect;
mod env;
mod error;
mod fixpoint;
mod flags;
mod group;
mod handlers;
mod options;
mod state;
mod step;

pub use collect::{CnsEntry, CollectedInfo, PropState};
pub use env::{Interp, Propagate};
pub use error::InterpError;
pub use fixpoint::{FuncAnalysis, FuncAnalyzer};
pub use flags::{Reduction, RunFlags, StepFlags, UsedLocalStatics};
pub use options::{CollectionOpts, Options};
pub use state::{ActRec, FpiKind, IterState, LocalStaticBinding, StackElem, StackEquiv, State};
pub use step::{run, step};

pub use smallvec::{self, SmallVec};

pub mod lattice;

#[cfg(feature = "program")]
pub mod program;

#[cfg(feature = "interpreter")]
mod sink;

#[cfg(feature = "interpreter")]
pub use sink::{BlockRun, Recorder};

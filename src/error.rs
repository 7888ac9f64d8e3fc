use thiserror::Error;

/// Errors the core can report to its caller.
///
/// Per §7, malformed bytecode and stack underflow are never raised as
/// errors at all: the driver logs them via `tracing` and resynchronises
/// in place (an unsupported opcode clears the state to `top`; an
/// underflowing pop yields a synthetic placeholder `Item`), so analysis of
/// the rest of the method can continue. Only these two variants ever reach
/// [`crate::driver::analyze`]'s caller as an `Err`.
#[derive(Debug, Error)]
pub enum AnalysisError {
  #[error("method has no instructions")]
  EmptyMethod,

  #[error("fixed-point analysis did not converge within {iterations} iterations")]
  NonConvergent { iterations: u32 },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

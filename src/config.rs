//! Analysis configuration (§6 Configuration, §9 "Global module state").
//!
//! The original resolves `INTERATIVE_OPCODE_STACK_ANALYSIS` from a static
//! system property read once at class-load time. That's awkward to carry
//! into a library that may run several independent analyses concurrently
//! (§5), so the Open Question is resolved here in favour of an explicit
//! [`AnalysisContext`] passed into [`crate::driver::analyze`] rather than
//! any process-global toggle.

use std::sync::Arc;

use crate::traits::{AnalysisCache, ClassHierarchyOracle, FieldSummaryOracle};

/// Default cap on fixed-point iterations before the driver gives up and
/// reports [`crate::error::AnalysisError::NonConvergent`] (§4.5).
pub const DEFAULT_ITERATION_CAP: u32 = 40;

/// Everything the driver needs from outside the method body itself:
/// collaborators for field/class knowledge, an optional cross-call cache,
/// and the handful of toggles §6 calls out.
pub struct AnalysisContext {
  pub field_summaries: Arc<dyn FieldSummaryOracle + Send + Sync>,
  pub class_hierarchy: Arc<dyn ClassHierarchyOracle + Send + Sync>,
  pub cache: Option<Arc<dyn AnalysisCache + Send + Sync>>,

  /// Mirrors `INTERATIVE_OPCODE_STACK_ANALYSIS` (§4.5, §6): when `false`,
  /// the driver makes a single forward pass and never revisits a jump
  /// target, trading precision at loops/backward branches for speed.
  pub iterative: bool,

  /// Hard cap on driver iterations when `iterative` is set; exceeding it
  /// is reported rather than silently truncated (§4.5).
  pub iteration_cap: u32,

  /// When set, per-instruction transfer failures are logged at `debug`
  /// rather than `trace` (§6 "ocstack.debug" environment toggle, carried
  /// over from the original's debug flag).
  pub debug: bool,
}

impl AnalysisContext {
  pub fn new(
    field_summaries: Arc<dyn FieldSummaryOracle + Send + Sync>,
    class_hierarchy: Arc<dyn ClassHierarchyOracle + Send + Sync>,
  ) -> Self {
    Self {
      field_summaries,
      class_hierarchy,
      cache: None,
      iterative: true,
      iteration_cap: DEFAULT_ITERATION_CAP,
      debug: std::env::var_os("ocstack.debug").is_some(),
    }
  }

  pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache + Send + Sync>) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn non_iterative(mut self) -> Self {
    self.iterative = false;
    self
  }

  pub fn with_iteration_cap(mut self, cap: u32) -> Self {
    self.iteration_cap = cap;
    self
  }
}

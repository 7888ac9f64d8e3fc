//! External collaborators the core consults but never implements for real
//! use (§6): field/class knowledge and an optional cross-call cache. Class
//! file parsing and constant-pool resolution stay firmly on the caller's
//! side of these traits.

use crate::item::Item;
use crate::state::JumpInfo;

/// What the core is told about a field it doesn't own the bytecode for
/// (§6 "Field summary oracle").
#[derive(Clone, Debug)]
pub struct FieldSummary {
  /// The best [`Item`] the oracle can construct for the field's contents
  /// — e.g. a `static final` field's known constant, or just a typed
  /// placeholder if nothing more precise is known.
  pub item: Item,
  /// `true` if `item` fully characterises every possible value of the
  /// field (a `static final` constant); `false` if it's only a hint (a
  /// commonly-observed value, a declared-but-not-proven-constant type).
  pub complete: bool,
}

/// Knowledge about fields outside the method under analysis: used to seed
/// `getstatic`/`getfield` results more precisely than a bare typed `Item`
/// (§4.3 "Field access").
pub trait FieldSummaryOracle {
  fn is_public(&self, class: &str, field: &str) -> bool;
  fn summary(&self, class: &str, field: &str, descriptor: &str) -> Option<FieldSummary>;
}

/// Class-hierarchy knowledge needed for servlet-taint-source gating and
/// `instanceof`/`checkcast` modelling (§4.4 "Servlet request taint
/// sources"). Names are dotted (`javax.servlet.http.HttpServletRequest`),
/// matching how the oracle's backing store (a class hierarchy cache) tends
/// to key things, not slashed bytecode form.
pub trait ClassHierarchyOracle {
  fn is_subtype_of(&self, class: &str, of: &str) -> bool;
}

/// An optional cache the driver can use to persist [`JumpInfo`] between
/// analyses of the same method, e.g. across whole-program passes that
/// revisit a method more than once (§6 "may be persisted... and supplied
/// back in on a subsequent pass").
pub trait AnalysisCache {
  fn jump_info(&self, class: &str, method: &str, descriptor: &str) -> Option<JumpInfo>;
  fn store_jump_info(&self, class: &str, method: &str, descriptor: &str, info: JumpInfo);
}

#[cfg(test)]
pub(crate) mod test_support {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  #[derive(Default)]
  pub struct NullOracle;

  impl FieldSummaryOracle for NullOracle {
    fn is_public(&self, _class: &str, _field: &str) -> bool {
      false
    }
    fn summary(&self, _class: &str, _field: &str, _descriptor: &str) -> Option<FieldSummary> {
      None
    }
  }

  impl ClassHierarchyOracle for NullOracle {
    fn is_subtype_of(&self, class: &str, of: &str) -> bool {
      class == of
    }
  }

  /// A hierarchy oracle that lets tests declare a fixed subtype table,
  /// used for servlet-request-taint scenarios (§4.4).
  #[derive(Default)]
  pub struct FixedHierarchy {
    pub subtypes: HashMap<String, Vec<String>>,
  }

  impl ClassHierarchyOracle for FixedHierarchy {
    fn is_subtype_of(&self, class: &str, of: &str) -> bool {
      class == of
        || self
          .subtypes
          .get(class)
          .map(|sup| sup.iter().any(|s| s == of))
          .unwrap_or(false)
    }
  }

  #[derive(Default)]
  pub struct InMemoryCache {
    store: Mutex<HashMap<(String, String, String), JumpInfo>>,
  }

  impl AnalysisCache for InMemoryCache {
    fn jump_info(&self, class: &str, method: &str, descriptor: &str) -> Option<JumpInfo> {
      self
        .store
        .lock()
        .unwrap()
        .get(&(class.to_string(), method.to_string(), descriptor.to_string()))
        .cloned()
    }

    fn store_jump_info(&self, class: &str, method: &str, descriptor: &str, info: JumpInfo) {
      self.store.lock().unwrap().insert(
        (class.to_string(), method.to_string(), descriptor.to_string()),
        info,
      );
    }
  }
}

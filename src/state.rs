//! The per-program-point abstract state: the operand stack, the local
//! variable bindings, and the bookkeeping the driver needs to detect
//! fixed-point convergence across a method body (§4.2).

use indexmap::IndexMap;

use crate::item::Item;
use crate::merge::merge_lists;

/// A snapshot of locals and stack captured at a jump target, to be merged
/// into whatever state eventually reaches that pc (§4.2 "Jump entries",
/// §4.5).
#[derive(Clone, Debug, Default)]
pub struct JumpEntry {
  pub locals: IndexMap<u32, Item>,
  /// `None` until the first edge into this pc has been recorded; after
  /// that, every further edge merges into it pointwise (§4.6).
  pub stack: Option<Vec<Item>>,
}

/// Snapshots recorded against jump targets for one method, keyed by pc.
/// Implements §6's "may be persisted... and supplied back in" contract: it
/// carries no borrowed data and no reference to the method being analysed,
/// so an [`crate::traits::AnalysisCache`] can stash it between analyses of
/// the same method body (e.g. across an enclosing fixed-point driver run
/// that needs a second pass).
#[derive(Clone, Debug, Default)]
pub struct JumpInfo {
  pub entries: IndexMap<u32, JumpEntry>,
}

impl JumpInfo {
  pub fn new() -> Self {
    Self::default()
  }

  /// Merge `locals`/`stack` into the entry for `target`, creating it if
  /// this is the first edge recorded against that pc. Returns `true` if the
  /// merge changed anything the driver hasn't already seen, so back-edges
  /// that stabilise stop forcing further iterations (§4.5).
  pub fn record_edge(&mut self, target: u32, locals: &IndexMap<u32, Item>, stack: &[Item], debug: bool) -> bool {
    let entry = self.entries.entry(target).or_default();

    let mut changed = false;
    match &mut entry.stack {
      None => {
        entry.stack = Some(stack.to_vec());
        changed = true;
      }
      Some(existing) => {
        changed |= merge_lists(existing, stack, debug);
      }
    }

    for (reg, incoming) in locals {
      match entry.locals.get_mut(reg) {
        None => {
          entry.locals.insert(*reg, incoming.clone());
          changed = true;
        }
        Some(existing) => {
          let merged = crate::merge::merge(existing, incoming);
          if merged != *existing {
            changed = true;
          }
          *existing = merged;
        }
      }
    }

    changed
  }
}

/// The abstract state of the operand stack and locals at one program point
/// (§3 `State`/`Stack`, §4.2).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct State {
  stack: Vec<Item>,
  /// Sparse: most methods only ever populate a handful of local slots, and
  /// `J`/`D` locals only occupy their low slot here (the JVM's paired
  /// "unusable" follow-on slot is never modelled, §9).
  locals: IndexMap<u32, Item>,

  /// `true` once the state has been driven to the unreachable/unknown
  /// bottom element — e.g. after an opcode the transfer function can't
  /// model at all (§4.2 "top").
  pub top: bool,

  /// pc of the instruction that last wrote each register, for idiom
  /// recognition windows that need to look a fixed number of instructions
  /// back (§4.3).
  last_update: IndexMap<u32, u32>,

  /// Register an `iflt`/`ifle` just tested non-negative on the
  /// fall-through arm, so the following instruction can
  /// propagate [`crate::item::SpecialKind::NonNegative`] (§4.3 "Non-negative
  /// promotion").
  pub register_tested_found_to_be_nonnegative: Option<u32>,

  /// Mirrors `AnalysisContext::debug` (§6): when `true`, resynchronisation
  /// logging from this state's stack/merge operations goes to `debug`
  /// rather than `trace`. Set once at seeding and carried along through
  /// every clone/merge for the rest of the method's analysis.
  debug: bool,
}

impl State {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_debug(&mut self, debug: bool) {
    self.debug = debug;
  }

  pub fn stack(&self) -> &[Item] {
    &self.stack
  }

  pub fn stack_depth(&self) -> usize {
    self.stack.len()
  }

  pub fn push(&mut self, item: Item) {
    self.stack.push(item);
  }

  /// Pop one [`Item`]. On underflow, logs and returns a placeholder rather
  /// than propagating a hard error — per §4.2, the stack is resynchronised
  /// rather than aborting the whole analysis.
  pub fn pop(&mut self) -> Item {
    match self.stack.pop() {
      Some(item) => item,
      None => {
        if self.debug {
          tracing::debug!("pop on empty stack, returning placeholder");
        } else {
          tracing::trace!("pop on empty stack, returning placeholder");
        }
        Item::error_placeholder()
      }
    }
  }

  /// Pop `n` items, in stack order (first popped is deepest in the
  /// returned `Vec`... actually returned *shallowest-last*: index `0` is
  /// the item that was on top).
  pub fn pop_n(&mut self, n: usize) -> Vec<Item> {
    (0..n).map(|_| self.pop()).collect()
  }

  pub fn top(&self) -> Option<&Item> {
    self.stack.last()
  }

  /// Peek `offset` items down from the top (`0` is the top itself).
  pub fn peek(&self, offset: usize) -> Option<&Item> {
    let len = self.stack.len();
    if offset >= len {
      None
    } else {
      Some(&self.stack[len - 1 - offset])
    }
  }

  pub fn replace_top(&mut self, item: Item) {
    if let Some(slot) = self.stack.last_mut() {
      *slot = item;
    } else {
      self.stack.push(item);
    }
  }

  pub fn clear_stack(&mut self) {
    self.stack.clear();
  }

  pub fn local(&self, register: u32) -> Option<&Item> {
    self.locals.get(&register)
  }

  pub fn set_local(&mut self, register: u32, item: Item, pc: u32) {
    self.locals.insert(register, item);
    self.last_update.insert(register, pc);
  }

  pub fn locals(&self) -> &IndexMap<u32, Item> {
    &self.locals
  }

  /// Clear every local known to mirror `register`'s former contents other
  /// than `register` itself — used when a store invalidates other
  /// registers' stale `register_number` mirrors (§4.2 "Register mirrors").
  pub fn invalidate_mirrors_of(&mut self, register: u32) {
    for (reg, item) in self.locals.iter_mut() {
      if *reg != register && item.register_number == Some(register) {
        item.register_number = None;
      }
    }
    for item in self.stack.iter_mut() {
      if item.register_number == Some(register) {
        item.register_number = None;
      }
    }
  }

  pub fn last_update_pc(&self, register: u32) -> Option<u32> {
    self.last_update.get(&register).copied()
  }

  /// §4.5 pre-computation step: re-tag every stack/local item mirroring
  /// `register` as [`crate::item::SpecialKind::NonNegative`], then clear
  /// the field that requested it. Called by the driver before transferring
  /// the instruction immediately following an `iflt`/`ifle` branch.
  pub fn apply_pending_nonnegative_promotion(&mut self) {
    let Some(register) = self.register_tested_found_to_be_nonnegative.take() else {
      return;
    };
    for item in self.locals.values_mut() {
      if item.register_number == Some(register) {
        item.special_kind = crate::item::SpecialKind::NonNegative;
      }
    }
    for item in self.stack.iter_mut() {
      if item.register_number == Some(register) {
        item.special_kind = crate::item::SpecialKind::NonNegative;
      }
    }
  }

  /// §4.3 "Branches": `iflt/ifle/ifgt/ifge` on a value of a "could be
  /// negative" kind proves every other `Item` sharing that kind is bounded
  /// on this path too, so that kind is erased from them (reset to
  /// [`crate::item::SpecialKind::NotSpecial`]). Also used for the
  /// `if_icmp*`-vs-`Integer.MIN_VALUE` rule, which clears a
  /// `checkForIntegerMinValue` kind the same way.
  pub fn erase_special_kind(&mut self, kind: crate::item::SpecialKind) {
    for item in self.locals.values_mut() {
      if item.special_kind == kind {
        item.special_kind = crate::item::SpecialKind::NotSpecial;
      }
    }
    for item in self.stack.iter_mut() {
      if item.special_kind == kind {
        item.special_kind = crate::item::SpecialKind::NotSpecial;
      }
    }
  }

  /// Join `other` into `self` in place at a control-flow confluence,
  /// returning `true` if anything changed (§4.6). `top` dominates: merging
  /// with a `top` state produces `top`.
  pub fn merge_from(&mut self, other: &State) -> bool {
    if other.top && !self.top {
      self.top = true;
      return true;
    }
    if self.top {
      return false;
    }

    let mut changed = merge_lists(&mut self.stack, &other.stack, self.debug);

    for (reg, incoming) in &other.locals {
      match self.locals.get_mut(reg) {
        None => {
          self.locals.insert(*reg, incoming.clone());
          changed = true;
        }
        Some(existing) => {
          let merged = crate::merge::merge(existing, incoming);
          if merged != *existing {
            changed = true;
          }
          *existing = merged;
        }
      }
    }

    // A confluence of two predecessors that disagree on which register was
    // just proven non-negative isn't meaningfully either one; only keep it
    // when it's unambiguous.
    self.register_tested_found_to_be_nonnegative = match (
      self.register_tested_found_to_be_nonnegative,
      other.register_tested_found_to_be_nonnegative,
    ) {
      (Some(r1), Some(r2)) if r1 == r2 => Some(r1),
      (Some(r), None) | (None, Some(r)) => Some(r),
      _ => None,
    };

    changed
  }

  /// Capture a snapshot suitable for recording against a jump target.
  pub fn snapshot(&self) -> (IndexMap<u32, Item>, Vec<Item>) {
    (self.locals.clone(), self.stack.clone())
  }
}

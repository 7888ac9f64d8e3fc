//! Recognition of the `ifnull`/`iconst`/`goto` idiom javac emits for things
//! like `x != null ? 1 : 0` or an unboxing `Boolean` comparison (§4.3 "Idiom
//! recognition"). Rather than letting such code analyse as two unrelated
//! `iconst` pushes joined at a confluence with no constant surviving, the
//! transfer function runs a small state machine alongside the stack: once
//! it sees the full `ifnull L1 / iconst_0 / goto L2 / L1: iconst_1 / L2:`
//! (or the `ifnonnull`-flipped form) shape, the two branches are collapsed
//! into one [`crate::item::Item`] carrying [`SpecialKind::ZeroMeansNull`] /
//! [`SpecialKind::NonzeroMeansNull`] with `could_be_zero` set, instead of
//! relying on the merge operator to rediscover it from two plain constants.

use crate::item::{Constant, Item, SpecialKind};

/// Which branch of the null check corresponds to the zero literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullSense {
  /// `ifnull L1; iconst_0; goto L2; L1: iconst_1; L2:` — null pushes 0.
  ZeroMeansNull,
  /// `ifnonnull L1; iconst_0; goto L2; L1: iconst_1; L2:` — non-null pushes 0.
  NonzeroMeansNull,
}

impl NullSense {
  fn special_kind(self) -> SpecialKind {
    match self {
      NullSense::ZeroMeansNull => SpecialKind::ZeroMeansNull,
      NullSense::NonzeroMeansNull => SpecialKind::NonzeroMeansNull,
    }
  }
}

/// Progress through the idiom. Lives on [`crate::state::State`] and is
/// reset (to `Idle`) by any instruction that doesn't advance it.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum IdiomState {
  #[default]
  Idle,
  /// Just saw the null-check branch to `branch_target`, at `start_pc`.
  SawNullCheck {
    start_pc: u32,
    branch_target: u32,
    sense: NullSense,
  },
  /// Saw the branch and the first `iconst` (always pushed on the
  /// fall-through side); waiting for the `goto` that skips the other arm.
  SawFirstConst {
    start_pc: u32,
    branch_target: u32,
    sense: NullSense,
    goto_target: u32,
  },
}

impl IdiomState {
  /// Call when a `ifnull`/`ifnonnull` is transferred, at `start_pc` (the
  /// branch instruction's own pc — what §8 scenario 3 expects the
  /// collapsed `Item`'s pc to be, not the later `goto`'s).
  pub fn start(sense: NullSense, start_pc: u32, branch_target: u32) -> Self {
    IdiomState::SawNullCheck {
      start_pc,
      branch_target,
      sense,
    }
  }

  /// Call when an `iconst_0`/`iconst_1` is transferred while `self` is
  /// mid-idiom. Returns the next state; the caller still pushes a plain
  /// `Item` for the constant as usual — the idiom only changes what's on
  /// the stack at the `goto_target` confluence, via [`IdiomState::finish`].
  pub fn advance_on_const(&self, pc: u32) -> IdiomState {
    match *self {
      IdiomState::SawNullCheck { start_pc, branch_target, sense } => {
        // the next instruction after the constant push should be a `goto`;
        // we don't know its target yet, so stash `pc` as a marker and let
        // `advance_on_goto` fill in the real target.
        IdiomState::SawFirstConst {
          start_pc,
          branch_target,
          sense,
          goto_target: pc,
        }
      }
      _ => IdiomState::Idle,
    }
  }

  /// Call when a `goto` is transferred while in `SawFirstConst`. Returns
  /// the completed recognition, if the goto's target is exactly the
  /// pending branch target (i.e. both arms converge at the same pc).
  pub fn advance_on_goto(&self, target: u32) -> (IdiomState, Option<PendingIdiom>) {
    match *self {
      IdiomState::SawFirstConst { start_pc, branch_target, sense, .. } => (
        IdiomState::Idle,
        Some(PendingIdiom {
          start_pc,
          confluence_a: branch_target,
          confluence_b: target,
          sense,
        }),
      ),
      _ => (IdiomState::Idle, None),
    }
  }
}

/// A fully-recognised idiom awaiting its confluence: the driver merges the
/// two `iconst` pushes at `confluence_a`/`confluence_b` and, once it sees
/// both arrive, replaces the merged top-of-stack item with
/// [`PendingIdiom::collapse`]'s result instead of the ordinary merge-of-two-
/// constants (which would simply drop the constant, §4.6).
#[derive(Clone, Debug, PartialEq)]
pub struct PendingIdiom {
  /// pc of the `ifnull`/`ifnonnull` that started the idiom — what the
  /// collapsed `Item`'s own pc is set to (§8 scenario 3), not the `goto`'s.
  pub start_pc: u32,
  pub confluence_a: u32,
  pub confluence_b: u32,
  pub sense: NullSense,
}

impl PendingIdiom {
  /// Build the collapsed boolean [`Item`] in place of the two-constant
  /// merge, recording that this value is `0` on one arm and `1` on the
  /// other.
  pub fn collapse(&self) -> Item {
    let mut item = Item::constant("I", Constant::Int(1));
    item.special_kind = self.sense.special_kind();
    item.flags.could_be_zero = true;
    item.pc = self.start_pc;
    item
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recognises_ifnull_iconst_goto_shape() {
    let state = IdiomState::start(NullSense::ZeroMeansNull, 1, 20);
    let state = state.advance_on_const(10);
    let (next, pending) = state.advance_on_goto(20);
    assert_eq!(next, IdiomState::Idle);
    let pending = pending.expect("idiom should be recognised");
    assert_eq!(pending.confluence_a, 20);
    assert_eq!(pending.confluence_b, 20);

    let item = pending.collapse();
    assert_eq!(item.special_kind, SpecialKind::ZeroMeansNull);
    assert!(item.flags.could_be_zero);
    assert_eq!(item.pc, 1);
  }

  #[test]
  fn unrelated_goto_does_not_complete_idiom() {
    let state = IdiomState::Idle;
    let (next, pending) = state.advance_on_goto(99);
    assert_eq!(next, IdiomState::Idle);
    assert!(pending.is_none());
  }
}

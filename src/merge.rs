//! The confluence (join) operator, §4.6.

use crate::item::{Flags, Item, SpecialKind};

/// Join two [`Item`]s at a control-flow confluence.
pub fn merge(a: &Item, b: &Item) -> Item {
  if a == b {
    return a.clone();
  }

  if a.special_kind == SpecialKind::TypeOnly {
    return b.clone();
  }
  if b.special_kind == SpecialKind::TypeOnly {
    return a.clone();
  }

  let signature = if a.flags.is_null && !b.flags.is_null {
    b.signature.clone()
  } else if b.flags.is_null && !a.flags.is_null {
    a.signature.clone()
  } else if a.signature == b.signature {
    a.signature.clone()
  } else {
    // disagreement on a non-null/non-null pair: widen to Object.
    beef::lean::Cow::borrowed("Ljava/lang/Object;")
  };

  let constant = if a.constant == b.constant {
    a.constant.clone()
  } else {
    None
  };

  let source = if a.source == b.source {
    a.source.clone()
  } else {
    None
  };

  let user_value = match (&a.user_value, &b.user_value) {
    (Some(x), Some(y)) if std::sync::Arc::ptr_eq(x, y) => Some(x.clone()),
    _ => None,
  };

  let register_number = if a.register_number == b.register_number {
    a.register_number
  } else {
    None
  };

  let pc = if a.pc == b.pc { a.pc } else { 0 };

  let special_kind = merge_special_kind(a, b);
  let injection = if special_kind == SpecialKind::ServletRequestTainted {
    a.injection.clone().or_else(|| b.injection.clone())
  } else {
    None
  };

  Item {
    signature,
    constant,
    source,
    special_kind,
    flags: a.flags.intersect(b.flags),
    register_number,
    pc,
    user_value,
    injection,
  }
}

/// Special-kind merge rule: `SERVLET_REQUEST_TAINTED` wins over anything;
/// otherwise equal kinds survive; `NASTY_FLOAT_MATH` > `FLOAT_MATH` > other;
/// mismatched kinds collapse to `NOT_SPECIAL`.
fn merge_special_kind(a: &Item, b: &Item) -> SpecialKind {
  use SpecialKind::*;

  if a.special_kind == ServletRequestTainted || b.special_kind == ServletRequestTainted {
    return ServletRequestTainted;
  }
  if a.special_kind == b.special_kind {
    return a.special_kind;
  }
  let kinds = (a.special_kind, b.special_kind);
  if kinds == (NastyFloatMath, FloatMath) || kinds == (FloatMath, NastyFloatMath) {
    return NastyFloatMath;
  }
  NotSpecial
}

/// Pointwise merge of two stacks/local lists to `min(|into|, |from|)`
/// length. Returns `true` if any element actually changed, so the driver
/// knows whether to keep iterating (§4.6).
pub fn merge_lists(into: &mut Vec<Item>, from: &[Item], debug: bool) -> bool {
  let len = into.len().min(from.len());
  if into.len() != from.len() {
    if debug {
      tracing::debug!(
        into_len = into.len(),
        from_len = from.len(),
        "merge_lists: size mismatch, truncating to shorter list"
      );
    } else {
      tracing::trace!(
        into_len = into.len(),
        from_len = from.len(),
        "merge_lists: size mismatch, truncating to shorter list"
      );
    }
  }
  let mut changed = false;
  for i in 0..len {
    let merged = merge(&into[i], &from[i]);
    if merged != into[i] {
      changed = true;
    }
    into[i] = merged;
  }
  into.truncate(len);
  changed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::item::Constant;

  #[test]
  fn merge_idempotent() {
    let item = Item::constant("I", Constant::Int(42));
    assert_eq!(merge(&item, &item), item);
  }

  #[test]
  fn merge_disagreeing_constants_drops_constant() {
    let a = Item::constant("I", Constant::Int(1));
    let b = Item::constant("I", Constant::Int(2));
    let merged = merge(&a, &b);
    assert_eq!(merged.constant, None);
    assert_eq!(merged.signature, "I");
  }

  #[test]
  fn merge_null_adopts_other_signature() {
    let null = Item::null();
    let typed = Item::typed("Ljava/lang/String;");
    let merged = merge(&null, &typed);
    assert_eq!(merged.signature, "Ljava/lang/String;");
  }

  #[test]
  fn merge_tainted_wins_over_not_special() {
    let mut tainted = Item::typed("Ljava/lang/String;");
    tainted.special_kind = SpecialKind::ServletRequestTainted;
    let plain = Item::typed("Ljava/lang/String;");
    let merged = merge(&tainted, &plain);
    assert_eq!(merged.special_kind, SpecialKind::ServletRequestTainted);
  }

  #[test]
  fn merge_nasty_float_math_dominates_float_math() {
    let mut a = Item::typed("D");
    a.special_kind = SpecialKind::NastyFloatMath;
    let mut b = Item::typed("D");
    b.special_kind = SpecialKind::FloatMath;
    assert_eq!(merge(&a, &b).special_kind, SpecialKind::NastyFloatMath);
  }

  #[test]
  fn merge_lists_reports_change() {
    let mut into = vec![Item::constant("I", Constant::Int(1))];
    let from = vec![Item::constant("I", Constant::Int(2))];
    assert!(merge_lists(&mut into, &from, false));
    assert!(!merge_lists(&mut into, &from, false));
  }
}

//! Field access modelling (§4.3 "Field access"): turning `getstatic` /
//! `getfield` / `putstatic` / `putfield` into stack effects, consulting the
//! [`FieldSummaryOracle`] for anything sharper than "a value of this type".

use crate::config::AnalysisContext;
use crate::item::{FieldOwner, FieldRef, Item, SpecialKind, Source};
use crate::state::State;

/// `getstatic`: push the field's value with no receiver.
pub fn get_static(ctx: &AnalysisContext, state: &mut State, field: FieldRef) {
  let item = resolve(ctx, &field, FieldOwner::Static);
  state.push(item);
}

/// `putstatic`: pop the value being stored and invalidate any stale mirror
/// of this field's prior contents (§4.2 "Register mirrors" — the same
/// erasure rule applies to field mirrors as to local mirrors).
pub fn put_static(state: &mut State, field: &FieldRef) {
  let _value = state.pop();
  erase_knowledge_of(state, field);
}

/// `getfield`: pop the receiver, push the field's value. The receiver's
/// mirrored register (if the value on the stack was itself a plain local
/// load) is recorded as the field's owner so a later `putfield` through an
/// aliased reference can still invalidate it.
pub fn get_field(ctx: &AnalysisContext, state: &mut State, field: FieldRef) {
  let receiver = state.pop();
  let owner = receiver
    .register_number
    .map(FieldOwner::Instance)
    .unwrap_or(FieldOwner::Unknown);

  if field.class == "java/io/File" && field.name == "separator" {
    let mut item = Item::constant(
      "Ljava/lang/String;",
      crate::item::Constant::String(beef::lean::Cow::borrowed("/")),
    );
    item.special_kind = SpecialKind::FileSeparatorString;
    state.push(item);
    return;
  }

  let mut item = resolve(ctx, &field, owner);
  item.source = Some(Source::Field(field, owner));
  state.push(item);
}

/// `putfield`: pop value and receiver, invalidate knowledge of this field.
pub fn put_field(state: &mut State, field: &FieldRef) {
  let _value = state.pop();
  let _receiver = state.pop();
  erase_knowledge_of(state, field);
}

/// §4.3 "Field access": a summary is only trusted outright when the field
/// is non-public *and* the summary is complete — a public field can be
/// reassigned by code outside whatever made the summary, so even a
/// "complete" summary for one isn't safe to treat as the field's only
/// possible value. Anything short of that gets a fresh, sourced `Item`
/// instead.
fn resolve(ctx: &AnalysisContext, field: &FieldRef, owner: FieldOwner) -> Item {
  let is_public = ctx.field_summaries.is_public(&field.class, &field.name);
  if !is_public {
    if let Some(summary) = ctx.field_summaries.summary(&field.class, &field.name, &field.descriptor) {
      if summary.complete {
        return summary.item;
      }
    }
  }

  let mut item = Item::typed(field.descriptor.clone());
  item.source = Some(Source::Field(field.clone(), owner));
  item
}

/// Drop any stack/local item whose provenance is `field`, since a write
/// through some alias may have changed it (§4.2/§4.3 `eraseKnowledgeOf`).
fn erase_knowledge_of(state: &mut State, field: &FieldRef) {
  let stale: Vec<u32> = state
    .locals()
    .iter()
    .filter(|(_, item)| matches!(&item.source, Some(Source::Field(f, _)) if f == field))
    .map(|(reg, _)| *reg)
    .collect();

  for reg in stale {
    if let Some(existing) = state.local(reg).cloned() {
      state.set_local(reg, Item::typed(existing.signature.clone()), 0);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::traits::test_support::NullOracle;
  use std::sync::Arc;

  fn ctx() -> AnalysisContext {
    AnalysisContext::new(Arc::new(NullOracle), Arc::new(NullOracle))
  }

  fn field(name: &'static str, descriptor: &'static str) -> FieldRef {
    FieldRef {
      class: beef::lean::Cow::borrowed("com/example/Widget"),
      name: beef::lean::Cow::borrowed(name),
      descriptor: beef::lean::Cow::borrowed(descriptor),
    }
  }

  /// An oracle that always has a complete summary on hand, but may report
  /// the field as public — used to exercise the non-public-and-complete
  /// gating in [`resolve`].
  struct SummaryOracle {
    public: bool,
  }

  impl crate::traits::FieldSummaryOracle for SummaryOracle {
    fn is_public(&self, _class: &str, _field: &str) -> bool {
      self.public
    }
    fn summary(&self, _class: &str, _field: &str, _descriptor: &str) -> Option<crate::traits::FieldSummary> {
      Some(crate::traits::FieldSummary {
        item: Item::constant("I", crate::item::Constant::Int(42)),
        complete: true,
      })
    }
  }

  #[test]
  fn non_public_complete_summary_is_reused() {
    let ctx = AnalysisContext::new(Arc::new(SummaryOracle { public: false }), Arc::new(NullOracle));
    let mut state = State::new();
    get_static(&ctx, &mut state, field("count", "I"));
    assert_eq!(state.top().unwrap().constant, Some(crate::item::Constant::Int(42)));
  }

  #[test]
  fn public_fields_never_trust_a_summary_even_if_complete() {
    let ctx = AnalysisContext::new(Arc::new(SummaryOracle { public: true }), Arc::new(NullOracle));
    let mut state = State::new();
    get_static(&ctx, &mut state, field("count", "I"));
    let top = state.top().unwrap();
    assert_eq!(top.constant, None);
    assert_eq!(top.signature, "I");
  }

  #[test]
  fn getstatic_pushes_typed_item() {
    let ctx = ctx();
    let mut state = State::new();
    get_static(&ctx, &mut state, field("count", "I"));
    assert_eq!(state.top().unwrap().signature, "I");
  }

  #[test]
  fn getfield_pops_receiver_then_pushes_value() {
    let ctx = ctx();
    let mut state = State::new();
    state.push(Item::typed("Lcom/example/Widget;"));
    get_field(&ctx, &mut state, field("count", "I"));
    assert_eq!(state.stack_depth(), 1);
    assert_eq!(state.top().unwrap().signature, "I");
  }

  #[test]
  fn file_separator_is_tagged() {
    let ctx = ctx();
    let mut state = State::new();
    state.push(Item::null());
    get_field(
      &ctx,
      &mut state,
      FieldRef {
        class: beef::lean::Cow::borrowed("java/io/File"),
        name: beef::lean::Cow::borrowed("separator"),
        descriptor: beef::lean::Cow::borrowed("Ljava/lang/String;"),
      },
    );
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::FileSeparatorString);
  }
}

//! Method-call modelling (§4.4): turning `invoke*`/`invokedynamic` into
//! stack effects, recognising a fixed list of JDK idioms along the way.
//! Patterns are tried in priority order — the first one that matches a
//! [`MethodRef`] wins — mirroring the teacher's `call.rs` dispatch-by-name
//! style (a chain of `if let`/`match` arms rather than a generic registry,
//! since the pattern list here is closed and small enough that a registry
//! would only add indirection).

use crate::config::AnalysisContext;
use crate::descriptor;
use crate::instr::Bootstrap;
use crate::item::{Constant, Injection, Item, MethodRef, SpecialKind, Source};
use crate::state::State;

const SERVLET_REQUEST_CLASSES: [&str; 2] = ["javax.servlet.http.HttpServletRequest", "javax.servlet.ServletRequest"];

const TAINTED_GETTERS: [&str; 4] = ["getParameter", "getHeader", "getQueryString", "getRequestURI"];

const SANITISERS: [&str; 2] = ["trim", "toString"];

/// `invokestatic`/`invokevirtual`/`invokespecial`/`invokeinterface`:
/// consumes the receiver (unless static) and arguments, pushes the return
/// value (unless `V`), per §4.4.
pub fn invoke(ctx: &AnalysisContext, state: &mut State, method: MethodRef, is_static: bool, is_special: bool, pc: u32) {
  let params = method.params();
  let arg_count = params.len();
  // `pop_n` collects top-first; reverse to get left-to-right argument order.
  let mut args = state.pop_n(arg_count);
  args.reverse();

  let receiver = if is_static { None } else { Some(state.pop()) };

  if is_special && method.name == "<init>" {
    model_constructor(state, &method, receiver.as_ref(), &args);
    return;
  }

  // `append`/`toString` need to write the accumulated constant back into
  // whatever local mirrors the receiver (§4.2 "Register mirrors"), which
  // `recognise`'s stack-only signature can't do, so it's handled separately.
  if let Some(item) = string_builder(state, &method, receiver.as_ref(), &args) {
    push_unless_void(state, &method, item);
    return;
  }

  if let Some(item) = recognise(ctx, &method, receiver.as_ref(), &args, pc) {
    push_unless_void(state, &method, item);
    return;
  }

  push_unless_void(state, &method, default_return(&method));
}

fn push_unless_void(state: &mut State, method: &MethodRef, item: Item) {
  if method.return_signature() != "V" {
    state.push(item);
  }
}

fn default_return(method: &MethodRef) -> Item {
  let mut item = Item::typed(method.return_signature().to_string());
  item.source = Some(Source::Method(method.clone()));
  item
}

/// `new Foo(...)` is modelled as two bytecode events: `new; dup` pushes two
/// copies of a not-yet-initialised placeholder, `invokespecial <init>`
/// consumes one (the receiver) plus the constructor args, leaving the dup'd
/// copy on the stack still equal to what was just popped. The idiomatic
/// pattern is detected by that equality and the surviving copy is replaced
/// with a tagged one, which then flows on naturally through whatever
/// `astore`/`aload` the caller does next (§4.4 "Constructor idioms").
fn model_constructor(state: &mut State, method: &MethodRef, receiver: Option<&Item>, args: &[Item]) {
  let Some(receiver) = receiver else { return };
  let Some(tagged) = constructor_tag(method, receiver, args) else { return };
  if state.top() == Some(receiver) {
    state.replace_top(tagged);
  }
}

fn constructor_tag(method: &MethodRef, receiver: &Item, args: &[Item]) -> Option<Item> {
  if method.class == "java/io/FileOutputStream" {
    // ctor(String, boolean) / ctor(File, boolean) with append=true.
    if let Some(Constant::Int(1)) = args.get(1).and_then(|a| a.constant.as_ref()) {
      let mut tagged = receiver.clone();
      tagged.special_kind = SpecialKind::FileOpenedInAppendMode;
      return Some(tagged);
    }
    return None;
  }

  if matches!(method.class.as_ref(), "java/lang/StringBuilder" | "java/lang/StringBuffer") {
    let mut tagged = receiver.clone();
    tagged.constant = if method.descriptor.as_ref().starts_with("(Ljava/lang/String;") {
      args.first().and_then(|a| a.constant.as_ref()).and_then(Constant::as_str).map(owned_string)
    } else {
      Some(owned_string(""))
    };
    return Some(tagged);
  }

  None
}

fn owned_string(s: &str) -> Constant {
  Constant::String(beef::lean::Cow::owned(s.to_string()))
}

/// Render any known constant the way `StringBuilder.append` would — used
/// for non-`String` `append` overloads (`append(int)`, `append(char)`, …).
fn stringify(item: &Item) -> Option<String> {
  match item.constant.as_ref()? {
    Constant::Int(v) if item.signature.as_ref() == "C" => char::from_u32(*v as u32).map(String::from),
    Constant::Int(v) => Some(v.to_string()),
    Constant::Long(v) => Some(v.to_string()),
    Constant::Float(v) => Some(v.to_string()),
    Constant::Double(v) => Some(v.to_string()),
    Constant::String(s) => Some(s.to_string()),
    Constant::Class(_) => None,
  }
}

/// Write the updated receiver back into whichever local it's loaded from, so
/// a discarded `append` return value (the common `sb.append(x);` statement
/// form, which javac follows with a `pop`) doesn't leave that local's
/// mirrored `Item` stale (§4.2 "Register mirrors").
fn propagate_to_mirror(state: &mut State, receiver: &Item, updated: &Item) {
  if let Some(reg) = receiver.register_number {
    state.set_local(reg, updated.clone(), updated.pc);
  }
}

fn recognise(ctx: &AnalysisContext, method: &MethodRef, receiver: Option<&Item>, args: &[Item], pc: u32) -> Option<Item> {
  boxing_unboxing(method, args)
    .or_else(|| buffered_output_stream(method, args))
    .or_else(|| servlet_taint_source(ctx, method, receiver, pc))
    .or_else(|| sanitiser(method, receiver))
    .or_else(|| collection_factory(method, args))
    .or_else(|| require_non_null(method, args))
    .or_else(|| random_next_int(method, receiver))
    .or_else(|| hashcode(method, receiver))
    .or_else(|| math_abs(method, args))
    .or_else(|| collection_size(method, receiver))
    .or_else(|| string_constant_fold(method, receiver, args))
}

fn boxing_unboxing(method: &MethodRef, args: &[Item]) -> Option<Item> {
  const BOXES: [(&str, &str); 8] = [
    ("java/lang/Integer", "valueOf"),
    ("java/lang/Long", "valueOf"),
    ("java/lang/Float", "valueOf"),
    ("java/lang/Double", "valueOf"),
    ("java/lang/Boolean", "valueOf"),
    ("java/lang/Byte", "valueOf"),
    ("java/lang/Short", "valueOf"),
    ("java/lang/Character", "valueOf"),
  ];
  for (class, name) in BOXES {
    if method.is_named(class, name) {
      let arg = args.first()?;
      return Some(arg.reinterpret(format!("L{class};")));
    }
  }

  const UNBOX: [(&str, &str, &str); 8] = [
    ("java/lang/Integer", "intValue", "I"),
    ("java/lang/Long", "longValue", "J"),
    ("java/lang/Float", "floatValue", "F"),
    ("java/lang/Double", "doubleValue", "D"),
    ("java/lang/Boolean", "booleanValue", "Z"),
    ("java/lang/Byte", "byteValue", "B"),
    ("java/lang/Short", "shortValue", "S"),
    ("java/lang/Character", "charValue", "C"),
  ];
  for (class, name, prim) in UNBOX {
    if method.is_named(class, name) {
      return Some(Item::typed(prim));
    }
  }
  None
}

/// `StringBuilder`/`StringBuffer` `.append(x)`/`.toString()`: accumulate the
/// synthetic string constant when both receiver and argument are known,
/// otherwise drop to an unknown constant; either way the updated value is
/// written back to the receiver's mirrored local, since the return value of
/// a statement-form `append` call is usually immediately discarded (§4.4
/// "StringBuilder idiom").
fn string_builder(state: &mut State, method: &MethodRef, receiver: Option<&Item>, args: &[Item]) -> Option<Item> {
  if !matches!(method.class.as_ref(), "java/lang/StringBuilder" | "java/lang/StringBuffer") {
    return None;
  }
  let receiver = receiver?;

  if method.name == "append" {
    let mut updated = receiver.clone();
    // `append([CII)` (a char-array range) always invalidates, regardless of
    // whether the array itself is a known constant.
    if method.descriptor.as_ref().starts_with("([CII)") {
      updated.constant = None;
    } else {
      let base = receiver.constant.as_ref().and_then(Constant::as_str);
      let appended = args.first().and_then(stringify);
      updated.constant = match (base, appended) {
        (Some(base), Some(appended)) => Some(owned_string(&format!("{base}{appended}"))),
        _ => None,
      };
    }
    if receiver.special_kind == SpecialKind::ServletRequestTainted
      || args.first().is_some_and(|a| a.special_kind == SpecialKind::ServletRequestTainted)
    {
      updated.special_kind = SpecialKind::ServletRequestTainted;
    }
    propagate_to_mirror(state, receiver, &updated);
    return Some(updated);
  }

  if method.name == "toString" {
    return Some(match receiver.constant.as_ref().and_then(Constant::as_str) {
      Some(s) => Item::constant("Ljava/lang/String;", owned_string(s)),
      None => Item::typed("Ljava/lang/String;"),
    });
  }

  None
}

/// `new BufferedOutputStream(new FileOutputStream(path, true))` should
/// still read as append-mode at the `BufferedOutputStream` level — the
/// wrapper simply forwards the receiver's special kind (§4.4).
fn buffered_output_stream(method: &MethodRef, args: &[Item]) -> Option<Item> {
  if method.class != "java/io/BufferedOutputStream" || method.name != "<init>" {
    return None;
  }
  let inner = args.first()?;
  if inner.special_kind == SpecialKind::FileOpenedInAppendMode {
    let mut item = Item::typed("Ljava/io/BufferedOutputStream;");
    item.special_kind = SpecialKind::FileOpenedInAppendMode;
    return Some(item);
  }
  None
}

/// `request.getParameter(...)` and friends taint their result, gated on the
/// receiver being a subtype of *either* servlet request interface — by
/// design, not by method name, so a custom wrapper interface extending
/// `HttpServletRequest` still taints (§4.4 "Servlet request taint
/// sources").
fn servlet_taint_source(ctx: &AnalysisContext, method: &MethodRef, receiver: Option<&Item>, pc: u32) -> Option<Item> {
  if !TAINTED_GETTERS.contains(&method.name.as_ref()) {
    return None;
  }
  let receiver_class = match receiver.and_then(|r| r.signature.strip_prefix('L')).and_then(|s| s.strip_suffix(';')) {
    Some(c) => c,
    None => method.class.as_ref(),
  };
  // `ClassHierarchyOracle` (§traits) is keyed on dotted names; the receiver
  // class and the table above are both bytecode-form and slashed, so both
  // sides convert just before the lookup.
  let receiver_class = descriptor::to_dotted(receiver_class);
  let is_request = SERVLET_REQUEST_CLASSES
    .iter()
    .any(|req| ctx.class_hierarchy.is_subtype_of(&receiver_class, req));
  if !is_request {
    return None;
  }

  let mut item = Item::typed("Ljava/lang/String;");
  item.special_kind = SpecialKind::ServletRequestTainted;
  item.injection = Some(Injection {
    parameter_name: None,
    pc,
  });
  Some(item)
}

/// A handful of methods that, called on a tainted value, are assumed to
/// neutralise the taint rather than propagate it (`String.trim`,
/// `.toString()` on an already-validated wrapper, …). Anything not on this
/// short, explicit list keeps the taint via the default "typed, sourced"
/// return (§4.4 "Sanitisers").
fn sanitiser(method: &MethodRef, receiver: Option<&Item>) -> Option<Item> {
  let receiver = receiver?;
  if receiver.special_kind != SpecialKind::ServletRequestTainted {
    return None;
  }
  if !SANITISERS.contains(&method.name.as_ref()) {
    return None;
  }
  // explicitly untainted: plain string, no special kind.
  Some(Item::typed("Ljava/lang/String;"))
}

/// `List.of`, `Set.of`, `Map.of`, `Arrays.asList`, `Collections.emptyList`,
/// … all return a freshly-allocated collection of known interface type
/// (§4.4 "Collection factories").
fn collection_factory(method: &MethodRef, _args: &[Item]) -> Option<Item> {
  const FACTORIES: [(&str, &str, &str); 6] = [
    ("java/util/List", "of", "Ljava/util/List;"),
    ("java/util/Set", "of", "Ljava/util/Set;"),
    ("java/util/Map", "of", "Ljava/util/Map;"),
    ("java/util/Arrays", "asList", "Ljava/util/List;"),
    ("java/util/Collections", "emptyList", "Ljava/util/List;"),
    ("java/util/Collections", "emptyMap", "Ljava/util/Map;"),
  ];
  for (class, name, ret) in FACTORIES {
    if method.is_named(class, name) {
      let mut item = Item::typed(ret);
      item.special_kind = SpecialKind::NewlyAllocated;
      return Some(item);
    }
  }
  None
}

/// `Objects.requireNonNull(x)` / `Preconditions.checkNotNull(x)` both
/// return their first argument with the null flag cleared (§4.4).
fn require_non_null(method: &MethodRef, args: &[Item]) -> Option<Item> {
  let is_match = method.is_named("java/util/Objects", "requireNonNull")
    || method.is_named("com/google/common/base/Preconditions", "checkNotNull");
  if !is_match {
    return None;
  }
  let mut item = args.first()?.clone();
  item.flags.is_null = false;
  Some(item)
}

/// `new Random().nextInt()` / `Math.random()`-derived ints are tagged
/// `RandomInt` so a later `Math.abs`/`% n` on them can be recognised as
/// still-possibly-negative or a safe `% power-of-two` respectively (§4.4).
fn random_next_int(method: &MethodRef, receiver: Option<&Item>) -> Option<Item> {
  let receiver = receiver?;
  if !matches!(receiver.signature.as_ref(), "Ljava/util/Random;" | "Ljava/security/SecureRandom;") {
    return None;
  }
  if !matches!(method.name.as_ref(), "nextInt" | "nextLong") {
    return None;
  }
  let mut item = Item::typed(if method.name == "nextLong" { "J" } else { "I" });
  item.special_kind = SpecialKind::RandomInt;
  item.flags.could_be_zero = true;
  Some(item)
}

fn hashcode(method: &MethodRef, _receiver: Option<&Item>) -> Option<Item> {
  if method.name != "hashCode" || !method.params().is_empty() {
    return None;
  }
  let mut item = Item::typed("I");
  item.special_kind = SpecialKind::HashcodeInt;
  Some(item)
}

/// `Math.abs(x)` on a plain int is tagged `MathAbs`; on a known
/// `RandomInt`/`HashcodeInt` it specialises further so the "still could be
/// `Integer.MIN_VALUE`" edge case survives (§4.1 `checkForIntegerMinValue`,
/// §4.4).
fn math_abs(method: &MethodRef, args: &[Item]) -> Option<Item> {
  if !method.is_named("java/lang/Math", "abs") {
    return None;
  }
  let arg = args.first()?;
  let mut item = Item::typed(arg.signature.clone());
  item.special_kind = match arg.special_kind {
    SpecialKind::RandomInt => SpecialKind::MathAbsOfRandom,
    SpecialKind::HashcodeInt => SpecialKind::MathAbsOfHashcode,
    _ => SpecialKind::MathAbs,
  };
  Some(item)
}

fn collection_size(method: &MethodRef, receiver: Option<&Item>) -> Option<Item> {
  let receiver = receiver?;
  if method.name != "size" || !method.params().is_empty() {
    return None;
  }
  if !descriptor::is_reference(&receiver.signature) {
    return None;
  }
  let mut item = Item::typed("I");
  item.special_kind = SpecialKind::NonNegative;
  Some(item)
}

/// A short list of `String` methods whose result can be folded when the
/// receiver and arguments are all known constants (§4.4 "String constant
/// folding methods").
fn string_constant_fold(method: &MethodRef, receiver: Option<&Item>, args: &[Item]) -> Option<Item> {
  if method.class != "java/lang/String" {
    return None;
  }
  let receiver = receiver?;
  let s = receiver.constant.as_ref()?.as_str()?;
  match method.name.as_ref() {
    "length" => Some(Item::constant("I", Constant::Int(s.chars().count() as i32))),
    "trim" => Some(Item::constant(
      "Ljava/lang/String;",
      Constant::String(beef::lean::Cow::owned(s.trim().to_string())),
    )),
    "toUpperCase" if args.is_empty() => Some(Item::constant(
      "Ljava/lang/String;",
      Constant::String(beef::lean::Cow::owned(s.to_uppercase())),
    )),
    "toLowerCase" if args.is_empty() => Some(Item::constant(
      "Ljava/lang/String;",
      Constant::String(beef::lean::Cow::owned(s.to_lowercase())),
    )),
    "concat" => {
      let other = args.first()?.constant.as_ref()?.as_str()?;
      Some(Item::constant(
        "Ljava/lang/String;",
        Constant::String(beef::lean::Cow::owned(format!("{s}{other}"))),
      ))
    }
    _ => None,
  }
}

/// Reconstruct the concatenated string's static pieces for an
/// `invokedynamic makeConcatWithConstants` call site, per §4.4's
/// `invokedynamic` handling: the bootstrap's template records `` as a
/// placeholder for each dynamic argument, so the result is only a full
/// constant if every dynamic argument is itself a constant.
pub fn invoke_dynamic(state: &mut State, method: MethodRef, bootstrap: Bootstrap) {
  let params = method.params();
  let args = state.pop_n(params.len());

  match bootstrap {
    Bootstrap::StringConcat { template } => {
      let mut pieces = template.chars();
      let mut out = String::new();
      let mut all_constant = true;
      let mut arg_iter = args.iter().rev();
      while let Some(c) = pieces.next() {
        if c == '\u{1}' {
          match arg_iter.next().and_then(|a| a.constant.as_ref()) {
            Some(Constant::String(s)) => out.push_str(s),
            Some(Constant::Int(v)) => out.push_str(&v.to_string()),
            Some(Constant::Long(v)) => out.push_str(&v.to_string()),
            Some(Constant::Float(v)) => out.push_str(&v.to_string()),
            Some(Constant::Double(v)) => out.push_str(&v.to_string()),
            _ => all_constant = false,
          }
        } else {
          out.push(c);
        }
      }
      if all_constant {
        state.push(Item::constant(
          "Ljava/lang/String;",
          Constant::String(beef::lean::Cow::owned(out)),
        ));
      } else {
        state.push(Item::typed("Ljava/lang/String;"));
      }
    }
    Bootstrap::Other => {
      let mut item = Item::typed(method.return_signature().to_string());
      item.source = Some(Source::Method(method));
      state.push(item);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::traits::test_support::{FixedHierarchy, NullOracle};
  use std::collections::HashMap;
  use std::sync::Arc;

  fn ctx_with_hierarchy(h: FixedHierarchy) -> AnalysisContext {
    AnalysisContext::new(Arc::new(NullOracle), Arc::new(h))
  }

  fn method(class: &'static str, name: &'static str, descriptor: &'static str) -> MethodRef {
    MethodRef {
      class: beef::lean::Cow::borrowed(class),
      name: beef::lean::Cow::borrowed(name),
      descriptor: beef::lean::Cow::borrowed(descriptor),
      is_interface: false,
    }
  }

  #[test]
  fn math_abs_of_random_is_tagged() {
    let mut random = Item::typed("I");
    random.special_kind = SpecialKind::RandomInt;
    let result = math_abs(&method("java/lang/Math", "abs", "(I)I"), &[random]).unwrap();
    assert_eq!(result.special_kind, SpecialKind::MathAbsOfRandom);
  }

  #[test]
  fn string_length_folds_to_constant() {
    let receiver = Item::constant("Ljava/lang/String;", Constant::String(beef::lean::Cow::borrowed("ab")));
    let result = string_constant_fold(&method("java/lang/String", "length", "()I"), Some(&receiver), &[]).unwrap();
    assert_eq!(result.constant, Some(Constant::Int(2)));
  }

  #[test]
  fn servlet_taint_requires_subtype_match() {
    let mut subtypes = HashMap::new();
    subtypes.insert(
      "com.example.WrappedRequest".to_string(),
      vec!["javax.servlet.http.HttpServletRequest".to_string()],
    );
    let ctx = ctx_with_hierarchy(FixedHierarchy { subtypes });

    let mut receiver = Item::typed("Lcom/example/WrappedRequest;");
    receiver.signature = beef::lean::Cow::borrowed("Lcom/example/WrappedRequest;");
    let m = method("com/example/WrappedRequest", "getParameter", "(Ljava/lang/String;)Ljava/lang/String;");
    let result = servlet_taint_source(&ctx, &m, Some(&receiver), 42).unwrap();
    assert_eq!(result.special_kind, SpecialKind::ServletRequestTainted);
    assert_eq!(result.injection.unwrap().pc, 42);
  }

  #[test]
  fn sanitiser_clears_taint() {
    let mut receiver = Item::typed("Ljava/lang/String;");
    receiver.special_kind = SpecialKind::ServletRequestTainted;
    let m = method("java/lang/String", "trim", "()Ljava/lang/String;");
    let result = sanitiser(&m, Some(&receiver)).unwrap();
    assert_eq!(result.special_kind, SpecialKind::NotSpecial);
  }

  #[test]
  fn string_builder_append_accumulates_and_updates_mirror() {
    let mut state = State::new();
    let mut sb = Item::constant("Ljava/lang/StringBuilder;", owned_string(""));
    sb.register_number = Some(1);
    state.set_local(1, sb.clone(), 0);

    let append = method("java/lang/StringBuilder", "append", "(Ljava/lang/String;)Ljava/lang/StringBuilder;");
    let arg = Item::constant("Ljava/lang/String;", owned_string("ab"));
    let result = string_builder(&mut state, &append, Some(&sb), &[arg]).unwrap();

    assert_eq!(result.constant, Some(owned_string("ab")));
    assert_eq!(state.local(1).unwrap().constant, Some(owned_string("ab")));
  }

  #[test]
  fn string_builder_to_string_folds_accumulated_constant() {
    let mut state = State::new();
    let sb = Item::constant("Ljava/lang/StringBuilder;", owned_string("done"));
    let to_string = method("java/lang/StringBuilder", "toString", "()Ljava/lang/String;");
    let result = string_builder(&mut state, &to_string, Some(&sb), &[]).unwrap();
    assert_eq!(result.constant, Some(owned_string("done")));
  }

  #[test]
  fn constructor_idiom_replaces_duplicated_stack_copy() {
    let mut state = State::new();
    let receiver = Item::typed("Ljava/io/FileOutputStream;");
    state.push(receiver.clone());

    let ctor = method("java/io/FileOutputStream", "<init>", "(Ljava/lang/String;Z)V");
    let args = [Item::typed("Ljava/lang/String;"), Item::constant("Z", Constant::Int(1))];
    model_constructor(&mut state, &ctor, Some(&receiver), &args);

    assert_eq!(state.top().unwrap().special_kind, SpecialKind::FileOpenedInAppendMode);
  }

  #[test]
  fn string_concat_template_folds_when_args_are_constant() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(7)));
    let m = method(
      "java/lang/Invoke",
      "makeConcatWithConstants",
      "(I)Ljava/lang/String;",
    );
    invoke_dynamic(
      &mut state,
      m,
      Bootstrap::StringConcat {
        template: beef::lean::Cow::borrowed("n=\u{1}"),
      },
    );
    let item = state.top().unwrap();
    assert_eq!(item.constant, Some(Constant::String(beef::lean::Cow::borrowed("n=7"))));
  }
}

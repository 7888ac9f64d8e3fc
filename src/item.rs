//! The lattice element of the abstract interpreter: [`Item`]. See §3/§4.1.

use std::sync::{Arc, Mutex, OnceLock};

use beef::lean::Cow;

use crate::descriptor;

/// A literal value carried by an [`Item`], when known.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
  Int(i32),
  Long(i64),
  Float(f32),
  Double(f64),
  String(Cow<'static, str>),
  /// The slashed name of a class, for `ldc` of a `Class` constant.
  Class(Cow<'static, str>),
}

impl Constant {
  pub fn as_int(&self) -> Option<i32> {
    match self {
      Constant::Int(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_long(&self) -> Option<i64> {
    match self {
      Constant::Long(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_float(&self) -> Option<f32> {
    match self {
      Constant::Float(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_double(&self) -> Option<f64> {
    match self {
      Constant::Double(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Constant::String(v) | Constant::Class(v) => Some(v.as_ref()),
      _ => None,
    }
  }

  fn is_zero(&self) -> bool {
    match self {
      Constant::Int(v) => *v == 0,
      Constant::Long(v) => *v == 0,
      Constant::Float(v) => *v == 0.0,
      Constant::Double(v) => *v == 0.0,
      Constant::String(_) | Constant::Class(_) => false,
    }
  }

  /// `true` for a nonzero integral constant whose low 8 bits are clear.
  fn has_low_8_bits_clear(&self) -> bool {
    match self {
      Constant::Int(v) => *v != 0 && *v & 0xFF == 0,
      Constant::Long(v) => *v != 0 && *v & 0xFF == 0,
      _ => false,
    }
  }
}

/// A reference to a field, as furnished by the external bytecode dismantler
/// (§6). Opaque to this crate other than its identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
  pub class: Cow<'static, str>,
  pub name: Cow<'static, str>,
  pub descriptor: Cow<'static, str>,
}

/// A reference to a method, as furnished by the external bytecode
/// dismantler.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
  pub class: Cow<'static, str>,
  pub name: Cow<'static, str>,
  pub descriptor: Cow<'static, str>,
  pub is_interface: bool,
}

impl MethodRef {
  pub fn return_signature(&self) -> &str {
    descriptor::parse_method_descriptor(&self.descriptor)
      .map(|(_, ret)| ret)
      .unwrap_or("Ljava/lang/Object;")
  }

  pub fn params(&self) -> Vec<&str> {
    descriptor::parse_method_descriptor(&self.descriptor)
      .map(|(params, _)| params)
      .unwrap_or_default()
  }

  pub fn is_named(&self, class: &str, name: &str) -> bool {
    self.class == class && self.name == name
  }
}

/// Where the producing instance's receiver register sits, for a field
/// `source` — see §3's `fieldLoadedFromRegister`. Modelled as an enum rather
/// than the Java source's `-1`/`MAX_VALUE` sentinels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOwner {
  Instance(u32),
  Static,
  Unknown,
}

/// Provenance of a value: either a field load or a method call's return
/// value. §3 `source`.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
  Field(FieldRef, FieldOwner),
  Method(MethodRef),
}

/// Where a [`SpecialKind::ServletRequestTainted`] value came from: the
/// request-parameter name, if statically known, and the pc of the call that
/// introduced the taint.
#[derive(Clone, Debug, PartialEq)]
pub struct Injection {
  pub parameter_name: Option<Cow<'static, str>>,
  pub pc: u32,
}

/// The taxonomy of value provenances from §4.1. The "core" variants are
/// semantics-bearing: the transfer function and merge operator special-case
/// them. [`SpecialKind::Custom`] is the open extension point from §4.1/§9 —
/// detectors can mint new tags at runtime via [`define_special_kind`] and
/// they pass through `merge` opaquely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialKind {
  NotSpecial,
  SignedByte,
  RandomInt,
  Low8BitsClear,
  HashcodeInt,
  IntegerSum,
  AverageComputedUsingDivision,
  FloatMath,
  RandomIntRemainder,
  HashcodeIntRemainder,
  FileSeparatorString,
  MathAbs,
  MathAbsOfRandom,
  MathAbsOfHashcode,
  NonNegative,
  NastyFloatMath,
  FileOpenedInAppendMode,
  ServletRequestTainted,
  NewlyAllocated,
  ZeroMeansNull,
  NonzeroMeansNull,
  ResultOfI2L,
  ResultOfL2I,
  ServletOutput,
  TypeOnly,
  /// A runtime-registered tag; see [`define_special_kind`].
  Custom(u32),
}

impl SpecialKind {
  /// Special kinds whose underlying int is unbounded-signed: `Math.abs` of
  /// them cannot be proven non-negative because of the two's-complement
  /// minimum (§4.1 `checkForIntegerMinValue`).
  pub fn check_for_integer_min_value(self) -> bool {
    matches!(self, SpecialKind::RandomInt | SpecialKind::HashcodeInt)
  }

  fn could_be_negative_kind(self) -> bool {
    matches!(
      self,
      SpecialKind::RandomInt
        | SpecialKind::SignedByte
        | SpecialKind::HashcodeInt
        | SpecialKind::RandomIntRemainder
        | SpecialKind::HashcodeIntRemainder
        | SpecialKind::MathAbsOfRandom
        | SpecialKind::MathAbsOfHashcode
    )
  }
}

struct KindRegistry {
  names: Vec<String>,
}

static KIND_REGISTRY: OnceLock<Mutex<KindRegistry>> = OnceLock::new();

fn registry() -> &'static Mutex<KindRegistry> {
  KIND_REGISTRY.get_or_init(|| Mutex::new(KindRegistry { names: Vec::new() }))
}

/// Register a new special kind at runtime, per §4.1/§5. Insert-only and
/// safe to call concurrently from multiple analysis threads.
pub fn define_special_kind(name: impl Into<String>) -> SpecialKind {
  let mut reg = registry().lock().unwrap();
  let id = reg.names.len() as u32;
  reg.names.push(name.into());
  SpecialKind::Custom(id)
}

/// Look up the name a [`SpecialKind::Custom`] tag was registered under.
pub fn custom_kind_name(tag: u32) -> Option<String> {
  registry().lock().unwrap().names.get(tag as usize).cloned()
}

/// Flags bitset from §3: `isInitialParameter`, `couldBeZero`, `isNull`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
  pub is_initial_parameter: bool,
  pub could_be_zero: bool,
  pub is_null: bool,
}

impl Flags {
  pub(crate) fn intersect(self, other: Flags) -> Flags {
    Flags {
      is_initial_parameter: self.is_initial_parameter && other.is_initial_parameter,
      could_be_zero: self.could_be_zero || other.could_be_zero,
      is_null: self.is_null && other.is_null,
    }
  }
}

/// One abstract value. See §3 for the full field table; cloned (not shared)
/// across confluences and duplications, per the "immutable in intent"
/// ownership note.
#[derive(Clone, Debug)]
pub struct Item {
  pub signature: Cow<'static, str>,
  pub constant: Option<Constant>,
  pub source: Option<Source>,
  pub special_kind: SpecialKind,
  pub flags: Flags,
  /// Local slot this value currently mirrors, or `None` (§3 `registerNumber
  /// != -1`).
  pub register_number: Option<u32>,
  pub pc: u32,
  pub user_value: Option<Arc<dyn std::any::Any + Send + Sync>>,
  pub injection: Option<Injection>,
}

impl PartialEq for Item {
  fn eq(&self, other: &Self) -> bool {
    self.signature == other.signature
      && self.constant == other.constant
      && self.source == other.source
      && self.special_kind == other.special_kind
      && self.flags == other.flags
      && self.register_number == other.register_number
      && self.pc == other.pc
      && self.injection == other.injection
      && match (&self.user_value, &other.user_value) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
      }
  }
}

impl Item {
  /// `Item(sig)` — a value of a type, no constant, kind seeded from the
  /// signature alone (`B` => signed byte, `C` => non-negative, per §4.1).
  pub fn typed(signature: impl Into<Cow<'static, str>>) -> Self {
    let signature = signature.into();
    let special_kind = match signature.as_ref() {
      "B" => SpecialKind::SignedByte,
      "C" => SpecialKind::NonNegative,
      _ => SpecialKind::NotSpecial,
    };
    Item {
      signature,
      constant: None,
      source: None,
      special_kind,
      flags: Flags::default(),
      register_number: None,
      pc: 0,
      user_value: None,
      injection: None,
    }
  }

  /// `Item(sig, constant)` — a constant literal.
  pub fn constant(signature: impl Into<Cow<'static, str>>, constant: Constant) -> Self {
    let mut item = Item::typed(signature);
    if constant.has_low_8_bits_clear() {
      item.special_kind = SpecialKind::Low8BitsClear;
    }
    if constant.is_zero() {
      item.flags.could_be_zero = true;
    }
    item.constant = Some(constant);
    item
  }

  /// `Item(sig, fieldRef, regHoldingObject)` — a field load.
  pub fn from_field(
    signature: impl Into<Cow<'static, str>>,
    field: FieldRef,
    owner: FieldOwner,
  ) -> Self {
    let mut item = Item::typed(signature);
    item.source = Some(Source::Field(field, owner));
    item
  }

  /// `Item(existing, newSig)` — reinterpretation under a narrower/wider
  /// type, as used by boxing, `checkcast`, and numeric conversions.
  pub fn reinterpret(&self, new_signature: impl Into<Cow<'static, str>>) -> Self {
    let new_signature = new_signature.into();
    let mut out = self.clone();

    out.constant = match (&self.constant, new_signature.as_ref()) {
      (Some(Constant::Int(v)), "J") => Some(Constant::Long(*v as i64)),
      (Some(Constant::Int(v)), "F") => Some(Constant::Float(*v as f32)),
      (Some(Constant::Int(v)), "D") => Some(Constant::Double(*v as f64)),
      (Some(Constant::Int(v)), "B") => Some(Constant::Int(*v as i8 as i32)),
      (Some(Constant::Int(v)), "S") => Some(Constant::Int(*v as i16 as i32)),
      (Some(Constant::Int(v)), "C") => Some(Constant::Int(*v as u16 as i32)),
      (Some(Constant::Long(v)), "I") => Some(Constant::Int(*v as i32)),
      (Some(Constant::Long(v)), "F") => Some(Constant::Float(*v as f32)),
      (Some(Constant::Long(v)), "D") => Some(Constant::Double(*v as f64)),
      (Some(Constant::Float(v)), "I") => Some(Constant::Int(*v as i32)),
      (Some(Constant::Float(v)), "J") => Some(Constant::Long(*v as i64)),
      (Some(Constant::Float(v)), "D") => Some(Constant::Double(*v as f64)),
      (Some(Constant::Double(v)), "I") => Some(Constant::Int(*v as i32)),
      (Some(Constant::Double(v)), "J") => Some(Constant::Long(*v as i64)),
      (Some(Constant::Double(v)), "F") => Some(Constant::Float(*v as f32)),
      (other, _) => other.clone(),
    };

    if !crate::descriptor::is_reference(&new_signature) {
      out.source = None;
    }
    out.signature = new_signature;
    out
  }

  /// `Item()` — the untyped null literal.
  pub fn null() -> Self {
    let mut item = Item::typed("Ljava/lang/Object;");
    item.flags.is_null = true;
    item
  }

  /// `nullItem(sig)` — a typed null.
  pub fn null_typed(signature: impl Into<Cow<'static, str>>) -> Self {
    let mut item = Item::typed(signature);
    item.flags.is_null = true;
    item
  }

  /// Seed an initial method parameter / `this` (§3 lifecycle).
  pub fn initial_argument(signature: impl Into<Cow<'static, str>>, register: u32) -> Self {
    let mut item = Item::typed(signature);
    item.flags.is_initial_parameter = true;
    item.register_number = Some(register);
    item
  }

  /// `1` for all signatures except `J`/`D`, which occupy two abstract
  /// slots (§3 wide-value invariant).
  pub fn size(&self) -> u8 {
    if crate::descriptor::is_wide(&self.signature) {
      2
    } else {
      1
    }
  }

  pub fn is_non_negative(&self) -> bool {
    self.special_kind == SpecialKind::NonNegative
  }

  /// §4.1 `valueCouldBeNegative`.
  pub fn value_could_be_negative(&self) -> bool {
    self.special_kind.could_be_negative_kind() && !self.is_non_negative()
  }

  pub fn check_for_integer_min_value(&self) -> bool {
    self.special_kind.check_for_integer_min_value()
  }

  /// Resynchronisation placeholder pushed on stack underflow (§4.2).
  pub fn error_placeholder() -> Self {
    Item::typed("Lfindbugs/OpcodeStackError;")
  }
}

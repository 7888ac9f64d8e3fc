//! The per-opcode transfer function (§4.3): `State × Op -> State`. Organised
//! as one `match` over [`Op`], grouped the way §4.3 groups its
//! subsections, rather than one function per opcode — mirrors the
//! teacher's `vm/lib.rs` central dispatch loop more closely than its
//! one-handler-per-opcode style, since here the handlers are mostly a line
//! or two each and a single `match` keeps the stack-effect bookkeeping
//! (push/pop counts) visibly correct at each arm.

use crate::binop::{self, ArithOp, Ordering3};
use crate::call;
use crate::config::AnalysisContext;
use crate::descriptor;
use crate::idiom::{IdiomState, NullSense, PendingIdiom};
use crate::instr::{IfCmp, Instruction, LocalVariableTable, Op};
use crate::item::{Constant, Item, SpecialKind};
use crate::state::State;

/// Outcome of transferring one instruction: what the driver should do with
/// control flow next (§4.5).
pub struct TransferOutcome {
  /// Branch targets this instruction can jump to, paired with the state
  /// snapshot that should be recorded against each (identical for all
  /// targets of one instruction — multi-target switches still share one
  /// post-transfer state).
  pub branch_targets: Vec<u32>,
  /// `true` if fall-through to the next pc is impossible (return/throw/goto).
  pub terminates: bool,
  /// An idiom the driver should remember was just recognised, to apply at
  /// the relevant confluence (§4.3 "Idiom recognition").
  pub pending_idiom: Option<PendingIdiom>,
}

impl Default for TransferOutcome {
  fn default() -> Self {
    TransferOutcome {
      branch_targets: Vec::new(),
      terminates: false,
      pending_idiom: None,
    }
  }
}

/// Apply `instr`'s effect to `state` in place, returning how control flow
/// continues. `idiom_state` is threaded in/out so a multi-instruction idiom
/// recognition window can span calls (§4.3).
pub fn transfer(
  ctx: &AnalysisContext,
  state: &mut State,
  instr: &Instruction,
  idiom_state: &IdiomState,
  local_vars: Option<&LocalVariableTable>,
) -> (TransferOutcome, IdiomState) {
  let pc = instr.pc;
  tracing::trace!(pc, op = instr.op.name(), "transfer");
  let mut outcome = TransferOutcome::default();
  outcome.terminates = instr.op.terminates_fallthrough();
  let mut next_idiom = IdiomState::Idle;

  match &instr.op {
    Op::Nop => {}

    Op::AconstNull => state.push(Item::null()),
    Op::IConst(v) => {
      push_int_const(state, *v);
      next_idiom = idiom_state.advance_on_const(pc);
    }
    Op::LConst(v) => state.push(Item::constant("J", Constant::Long(*v))),
    Op::FConst(v) => state.push(Item::constant("F", Constant::Float(*v))),
    Op::DConst(v) => state.push(Item::constant("D", Constant::Double(*v))),

    Op::LdcInt(v) => state.push(Item::constant("I", Constant::Int(*v))),
    Op::LdcLong(v) => state.push(Item::constant("J", Constant::Long(*v))),
    Op::LdcFloat(v) => state.push(Item::constant("F", Constant::Float(*v))),
    Op::LdcDouble(v) => state.push(Item::constant("D", Constant::Double(*v))),
    Op::LdcString(s) => state.push(Item::constant("Ljava/lang/String;", Constant::String(s.clone()))),
    Op::LdcClass(c) => state.push(Item::constant("Ljava/lang/Class;", Constant::Class(c.clone()))),
    Op::LdcDynamic { signature, .. } => state.push(Item::typed(signature.clone())),

    Op::ILoad(r) => load(state, *r, "I"),
    Op::LLoad(r) => load(state, *r, "J"),
    Op::FLoad(r) => load(state, *r, "F"),
    Op::DLoad(r) => load(state, *r, "D"),
    Op::ALoad(r) => load_reference(state, *r, pc, local_vars),

    Op::IStore(r) => store(state, *r, pc),
    Op::LStore(r) => store(state, *r, pc),
    Op::FStore(r) => store(state, *r, pc),
    Op::DStore(r) => store(state, *r, pc),
    Op::AStore(r) => store(state, *r, pc),

    Op::IInc(r, amount) => {
      if let Some(existing) = state.local(*r).cloned() {
        let folded = existing.constant.as_ref().and_then(Constant::as_int).map(|v| v.wrapping_add(*amount));
        let mut item = Item::typed("I");
        if let Some(v) = folded {
          item = Item::constant("I", Constant::Int(v));
        }
        state.set_local(*r, item, pc);
      } else {
        state.set_local(*r, Item::typed("I"), pc);
      }
    }

    Op::Pop => {
      state.pop();
    }
    Op::Pop2 => {
      let top = state.pop();
      if top.size() == 1 {
        state.pop();
      }
    }
    Op::Dup => {
      let top = state.pop();
      state.push(top.clone());
      state.push(top);
    }
    Op::DupX1 => dup_x(state, 1),
    Op::DupX2 => dup_x(state, 2),
    Op::Dup2 => dup2(state, 0),
    Op::Dup2X1 => dup2(state, 1),
    Op::Dup2X2 => dup2(state, 2),
    Op::Swap => {
      let a = state.pop();
      let b = state.pop();
      state.push(a);
      state.push(b);
    }

    Op::IAdd => int_binop(state, ArithOp::Add, "I"),
    Op::ISub => int_binop(state, ArithOp::Sub, "I"),
    Op::IMul => int_binop(state, ArithOp::Mul, "I"),
    Op::IDiv => int_binop(state, ArithOp::Div, "I"),
    Op::IRem => int_rem(state),
    Op::IAnd => int_binop(state, ArithOp::And, "I"),
    Op::IOr => int_binop(state, ArithOp::Or, "I"),
    Op::IXor => int_binop(state, ArithOp::Xor, "I"),
    Op::IShl => int_shift(state, ArithOp::Shl),
    Op::IShr => int_shift(state, ArithOp::Shr),
    Op::IUshr => int_shift(state, ArithOp::Ushr),
    Op::INeg => {
      let a = state.pop();
      let item = match a.constant.as_ref().and_then(Constant::as_int) {
        Some(v) => Item::constant("I", Constant::Int(v.wrapping_neg())),
        None => Item::typed("I"),
      };
      state.push(item);
    }

    Op::LAdd => long_binop(state, ArithOp::Add),
    Op::LSub => long_binop(state, ArithOp::Sub),
    Op::LMul => long_binop(state, ArithOp::Mul),
    Op::LDiv => long_binop(state, ArithOp::Div),
    Op::LRem => long_binop(state, ArithOp::Rem),
    Op::LAnd => long_binop(state, ArithOp::And),
    Op::LOr => long_binop(state, ArithOp::Or),
    Op::LXor => long_binop(state, ArithOp::Xor),
    Op::LShl => long_shift(state, ArithOp::Shl),
    Op::LShr => long_shift(state, ArithOp::Shr),
    Op::LUshr => long_shift(state, ArithOp::Ushr),
    Op::LNeg => {
      let a = state.pop();
      let item = match a.constant.as_ref().and_then(Constant::as_long) {
        Some(v) => Item::constant("J", Constant::Long(v.wrapping_neg())),
        None => Item::typed("J"),
      };
      state.push(item);
    }

    Op::FAdd => float_binop(state, ArithOp::Add, false),
    Op::FSub => float_binop(state, ArithOp::Sub, false),
    Op::FMul => float_binop(state, ArithOp::Mul, true),
    Op::FDiv => float_binop(state, ArithOp::Div, true),
    Op::FRem => float_binop(state, ArithOp::Rem, true),
    Op::FNeg => {
      let a = state.pop();
      let item = match a.constant.as_ref().and_then(Constant::as_float) {
        Some(v) => Item::constant("F", Constant::Float(-v)),
        None => Item::typed("F"),
      };
      state.push(item);
    }

    Op::DAdd => double_binop(state, ArithOp::Add, false),
    Op::DSub => double_binop(state, ArithOp::Sub, false),
    Op::DMul => double_binop(state, ArithOp::Mul, true),
    Op::DDiv => double_binop(state, ArithOp::Div, true),
    Op::DRem => double_binop(state, ArithOp::Rem, true),
    Op::DNeg => {
      let a = state.pop();
      let item = match a.constant.as_ref().and_then(Constant::as_double) {
        Some(v) => Item::constant("D", Constant::Double(-v)),
        None => Item::typed("D"),
      };
      state.push(item);
    }

    Op::LCmp => {
      let b = state.pop();
      let a = state.pop();
      state.push(cmp_result(
        a.constant.as_ref().and_then(Constant::as_long).zip(b.constant.as_ref().and_then(Constant::as_long)).map(|(a, b)| binop::fold_long_cmp(a, b)),
      ));
    }
    Op::FCmpG => float_cmp(state, true),
    Op::FCmpL => float_cmp(state, false),
    Op::DCmpG => double_cmp(state, true),
    Op::DCmpL => double_cmp(state, false),

    Op::I2L => convert_widening_to_long(state, "I", |c| c.as_int().map(|v| Constant::Long(v as i64))),
    Op::I2F => convert(state, "I", "F", |c| c.as_int().map(|v| Constant::Float(v as f32))),
    Op::I2D => convert(state, "I", "D", |c| c.as_int().map(|v| Constant::Double(v as f64))),
    Op::L2I => convert_narrowing_to_int(state, "J", |c| c.as_long().map(|v| Constant::Int(v as i32))),
    Op::L2F => convert(state, "J", "F", |c| c.as_long().map(|v| Constant::Float(v as f32))),
    Op::L2D => convert(state, "J", "D", |c| c.as_long().map(|v| Constant::Double(v as f64))),
    Op::F2I => convert_narrowing_to_int(state, "F", |c| c.as_float().map(|v| Constant::Int(v as i32))),
    Op::F2L => convert_widening_to_long(state, "F", |c| c.as_float().map(|v| Constant::Long(v as i64))),
    Op::F2D => convert(state, "F", "D", |c| c.as_float().map(|v| Constant::Double(v as f64))),
    Op::D2I => convert_narrowing_to_int(state, "D", |c| c.as_double().map(|v| Constant::Int(v as i32))),
    Op::D2L => convert_widening_to_long(state, "D", |c| c.as_double().map(|v| Constant::Long(v as i64))),
    Op::D2F => convert(state, "D", "F", |c| c.as_double().map(|v| Constant::Float(v as f32))),
    Op::I2B => convert(state, "I", "B", |c| c.as_int().map(|v| Constant::Int(v as i8 as i32))),
    Op::I2C => {
      let a = state.pop();
      let mut item = match a.constant.as_ref().and_then(Constant::as_int) {
        Some(v) => Item::constant("C", Constant::Int(v as u16 as i32)),
        None => Item::typed("C"),
      };
      item.special_kind = SpecialKind::NonNegative;
      state.push(item);
    }
    Op::I2S => convert(state, "I", "S", |c| c.as_int().map(|v| Constant::Int(v as i16 as i32))),

    Op::New(class) => {
      let mut item = Item::typed(format!("L{class};"));
      item.special_kind = SpecialKind::NewlyAllocated;
      item.pc = pc;
      state.push(item);
    }
    Op::NewArray(t) => array_alloc(state, t.element_signature()),
    Op::ANewArray(elem) => array_alloc(state, &format!("L{elem};")),
    Op::MultiANewArray { element, dimensions } => {
      for _ in 0..*dimensions {
        state.pop();
      }
      let mut item = Item::typed(format!("[{element}"));
      item.special_kind = SpecialKind::NewlyAllocated;
      state.push(item);
    }
    Op::ArrayLength => {
      let array = state.pop();
      let mut item = match array.constant.as_ref().and_then(Constant::as_int) {
        Some(len) => Item::constant("I", Constant::Int(len)),
        None => Item::typed("I"),
      };
      item.special_kind = SpecialKind::NonNegative;
      state.push(item);
    }
    Op::CheckCast(class) => {
      let a = state.pop();
      state.push(a.reinterpret(format!("L{class};")));
    }
    Op::InstanceOf(_) => {
      state.pop();
      state.push(Item::typed("Z"));
    }

    Op::IALoad => array_load(state, "I"),
    Op::LALoad => array_load(state, "J"),
    Op::FALoad => array_load(state, "F"),
    Op::DALoad => array_load(state, "D"),
    Op::AALoad => array_load(state, "Ljava/lang/Object;"),
    Op::BALoad => array_load(state, "B"),
    Op::CALoad => array_load(state, "C"),
    Op::SALoad => array_load(state, "S"),
    Op::IAStore | Op::LAStore | Op::FAStore | Op::DAStore | Op::AAStore | Op::BAStore | Op::CAStore | Op::SAStore => {
      state.pop();
      state.pop();
      state.pop();
    }

    Op::GetStatic(f) => crate::field::get_static(ctx, state, f.clone()),
    Op::PutStatic(f) => crate::field::put_static(state, f),
    Op::GetField(f) => crate::field::get_field(ctx, state, f.clone()),
    Op::PutField(f) => crate::field::put_field(state, f),

    Op::IfNull(t) => {
      state.pop();
      outcome.branch_targets.push(*t);
      next_idiom = IdiomState::start(NullSense::ZeroMeansNull, pc, *t);
    }
    Op::IfNonNull(t) => {
      state.pop();
      outcome.branch_targets.push(*t);
      next_idiom = IdiomState::start(NullSense::NonzeroMeansNull, pc, *t);
    }
    Op::IfEq(t) | Op::IfNe(t) | Op::IfLt(t) | Op::IfLe(t) | Op::IfGt(t) | Op::IfGe(t) => {
      maybe_promote_nonnegative(state, &instr.op);
      let value = state.pop();
      if matches!(instr.op, Op::IfLt(_) | Op::IfLe(_) | Op::IfGt(_) | Op::IfGe(_)) && value.value_could_be_negative() {
        state.erase_special_kind(value.special_kind);
      }
      let taken = zero_cmp_decision(&instr.op, &value);
      apply_static_branch(&mut outcome, *t, taken);
    }
    Op::IfICmp(cmp, t) => {
      let b = state.pop();
      let a = state.pop();
      erase_min_value_comparison_kind(state, &a, &b);
      let taken = int_cmp_decision(*cmp, &a, &b);
      apply_static_branch(&mut outcome, *t, taken);
    }
    Op::IfACmpEq(t) | Op::IfACmpNe(t) => {
      state.pop();
      state.pop();
      outcome.branch_targets.push(*t);
    }
    Op::Goto(t) => {
      if let (next, Some(pending)) = idiom_state.advance_on_goto(*t) {
        next_idiom = next;
        outcome.pending_idiom = Some(pending);
      }
      outcome.branch_targets = instr.op.branch_targets();
    }
    Op::TableSwitch { .. } => {
      state.pop();
      outcome.branch_targets = instr.op.branch_targets();
    }
    Op::LookupSwitch { .. } => {
      state.pop();
      outcome.branch_targets = instr.op.branch_targets();
    }

    Op::InvokeVirtual(m) => call::invoke(ctx, state, m.clone(), false, false, pc),
    Op::InvokeInterface(m) => call::invoke(ctx, state, m.clone(), false, false, pc),
    Op::InvokeSpecial(m) => call::invoke(ctx, state, m.clone(), false, true, pc),
    Op::InvokeStatic(m) => call::invoke(ctx, state, m.clone(), true, false, pc),
    Op::InvokeDynamic { method, bootstrap } => call::invoke_dynamic(state, method.clone(), bootstrap.clone()),

    Op::Return => {}
    Op::IReturn | Op::LReturn | Op::FReturn | Op::DReturn | Op::AReturn => {
      state.pop();
    }
    Op::AThrow => {
      state.pop();
    }

    Op::Unknown(name) => {
      if ctx.debug {
        tracing::debug!(pc, name = name.as_ref(), "unsupported opcode, degrading state to top");
      } else {
        tracing::trace!(pc, name = name.as_ref(), "unsupported opcode, degrading state to top");
      }
      state.top = true;
    }
  }

  (outcome, next_idiom)
}

fn push_int_const(state: &mut State, v: i32) {
  state.push(Item::constant("I", Constant::Int(v)));
}

fn load(state: &mut State, register: u32, default_sig: &'static str) {
  let item = state
    .local(register)
    .cloned()
    .unwrap_or_else(|| Item::typed(default_sig));
  state.push(item);
}

/// `aload`: like [`load`], but when the register has no tracked value yet,
/// consult the local-variable table (if the dismantler supplied one) for
/// the declared reference type instead of defaulting straight to
/// `Ljava/lang/Object;` (§4.3 "Local loads/stores").
fn load_reference(state: &mut State, register: u32, pc: u32, local_vars: Option<&LocalVariableTable>) {
  let item = state.local(register).cloned().unwrap_or_else(|| {
    let sig = local_vars.and_then(|t| t.signature_at(pc, register)).unwrap_or("Ljava/lang/Object;");
    Item::typed(sig.to_string())
  });
  state.push(item);
}

fn store(state: &mut State, register: u32, pc: u32) {
  let mut value = state.pop();
  value.register_number = Some(register);
  state.invalidate_mirrors_of(register);
  state.set_local(register, value, pc);
}

fn dup_x(state: &mut State, insert_depth: usize) {
  let top = state.pop();
  let mut buried = Vec::with_capacity(insert_depth);
  for _ in 0..insert_depth {
    buried.push(state.pop());
  }
  state.push(top.clone());
  while let Some(item) = buried.pop() {
    state.push(item);
  }
  state.push(top);
}

fn dup2(state: &mut State, insert_depth: usize) {
  let first = state.pop();
  // wide values (size 2) only ever appear alone in the dup2 family; narrow
  // values come in pairs.
  let group = if first.size() == 2 {
    vec![first]
  } else {
    let second = state.pop();
    vec![second, first]
  };

  let mut buried = Vec::with_capacity(insert_depth);
  for _ in 0..insert_depth {
    buried.push(state.pop());
  }
  for item in &group {
    state.push(item.clone());
  }
  while let Some(item) = buried.pop() {
    state.push(item);
  }
  for item in group {
    state.push(item);
  }
}

/// §4.3 "Integer/long arithmetic" bullet list, for the ops that need more
/// than plain constant folding: `iadd` of two non-constants is tagged
/// `INTEGER_SUM`; `idiv` by 2 of an `INTEGER_SUM` is tagged
/// `AVERAGE_COMPUTED_USING_DIVISION` (the `ishr`-by-1 half of that rule
/// lives in [`int_shift`]); `iand`/`ior` propagate a `ZERO_MEANS_NULL` /
/// `NONZERO_MEANS_NULL` operand through, or else tag `LOW_8_BITS_CLEAR`
/// when the mask clears the low byte (`iand` only — `ishl`'s half of that
/// rule also lives in [`int_shift`]) or `NON_NEGATIVE` when either operand
/// is a known non-negative constant.
fn int_binop(state: &mut State, op: ArithOp, sig: &'static str) {
  let b = state.pop();
  let a = state.pop();
  let item = match (a.constant.as_ref().and_then(Constant::as_int), b.constant.as_ref().and_then(Constant::as_int)) {
    (Some(av), Some(bv)) => match binop::fold_int(op, av, bv) {
      Some(v) => Item::constant(sig, Constant::Int(v)),
      None => Item::typed(sig),
    },
    (av, bv) => {
      let mut item = Item::typed(sig);
      match op {
        ArithOp::Add => item.special_kind = SpecialKind::IntegerSum,
        ArithOp::Div => {
          if bv == Some(2) && a.special_kind == SpecialKind::IntegerSum {
            item.special_kind = SpecialKind::AverageComputedUsingDivision;
          }
        }
        ArithOp::And | ArithOp::Or => {
          let null_sense = if op == ArithOp::And {
            SpecialKind::ZeroMeansNull
          } else {
            SpecialKind::NonzeroMeansNull
          };
          if a.special_kind == null_sense || b.special_kind == null_sense {
            item.special_kind = null_sense;
          } else if let Some(mask) = av.or(bv) {
            if op == ArithOp::And && binop::clears_low_byte(ArithOp::And, mask) {
              item.special_kind = SpecialKind::Low8BitsClear;
            } else if mask >= 0 {
              item.special_kind = SpecialKind::NonNegative;
            }
          }
        }
        _ => {}
      }
      item
    }
  };
  state.push(item);
}

/// `irem` gets its own arm: a `RandomInt`/`HashcodeInt` dividend is tagged
/// `RandomIntRemainder`/`HashcodeIntRemainder`, *except* when the divisor
/// is a known power of two, which clears the special kind entirely (§4.3
/// "Integer/long arithmetic").
fn int_rem(state: &mut State) {
  let b = state.pop();
  let a = state.pop();
  if let (Some(av), Some(bv)) = (a.constant.as_ref().and_then(Constant::as_int), b.constant.as_ref().and_then(Constant::as_int)) {
    let item = match binop::fold_int(ArithOp::Rem, av, bv) {
      Some(v) => Item::constant("I", Constant::Int(v)),
      None => Item::typed("I"),
    };
    state.push(item);
    return;
  }

  let divisor_is_power_of_two = b.constant.as_ref().and_then(Constant::as_int).is_some_and(binop::is_power_of_two);
  let mut item = Item::typed("I");
  item.special_kind = match a.special_kind {
    SpecialKind::RandomInt | SpecialKind::HashcodeInt if divisor_is_power_of_two => SpecialKind::NotSpecial,
    SpecialKind::RandomInt => SpecialKind::RandomIntRemainder,
    SpecialKind::HashcodeInt => SpecialKind::HashcodeIntRemainder,
    _ => item.special_kind,
  };
  state.push(item);
}

/// `ishl`/`ishr`/`iushr`. `ishl` by a mask-like shift amount is tagged
/// `Low8BitsClear` the same way `iand` is (§4.3 "Integer/long arithmetic");
/// `ishr` by exactly 1 of an `IntegerSum`-tagged operand is the other half
/// of the `AverageComputedUsingDivision` rule that `int_binop`'s `idiv`
/// arm starts (`x + y >> 1` is as common an average idiom as `/ 2`).
fn int_shift(state: &mut State, op: ArithOp) {
  let b = state.pop();
  let a = state.pop();
  match (a.constant.as_ref().and_then(Constant::as_int), b.constant.as_ref().and_then(Constant::as_int)) {
    (Some(av), Some(bv)) => state.push(match binop::fold_int(op, av, bv) {
      Some(v) => Item::constant("I", Constant::Int(v)),
      None => Item::typed("I"),
    }),
    (_, bv) => {
      let mut item = Item::typed("I");
      match op {
        ArithOp::Shl => {
          if let Some(amount) = bv {
            if binop::clears_low_byte(ArithOp::Shl, amount) {
              item.special_kind = SpecialKind::Low8BitsClear;
            }
          }
        }
        ArithOp::Shr => {
          if bv == Some(1) && a.special_kind == SpecialKind::IntegerSum {
            item.special_kind = SpecialKind::AverageComputedUsingDivision;
          }
        }
        _ => {}
      }
      state.push(item);
    }
  }
}

fn long_binop(state: &mut State, op: ArithOp) {
  let b = state.pop();
  let a = state.pop();
  let item = match (a.constant.as_ref().and_then(Constant::as_long), b.constant.as_ref().and_then(Constant::as_long)) {
    (Some(a), Some(b)) => match binop::fold_long(op, a, b) {
      Some(v) => Item::constant("J", Constant::Long(v)),
      None => Item::typed("J"),
    },
    _ => Item::typed("J"),
  };
  state.push(item);
}

fn long_shift(state: &mut State, op: ArithOp) {
  let shift_amount = state.pop();
  let a = state.pop();
  let item = match (a.constant.as_ref().and_then(Constant::as_long), shift_amount.constant.as_ref().and_then(Constant::as_int)) {
    (Some(a), Some(b)) => match binop::fold_long(op, a, b as i64) {
      Some(v) => Item::constant("J", Constant::Long(v)),
      None => Item::typed("J"),
    },
    _ => Item::typed("J"),
  };
  state.push(item);
}

fn float_binop(state: &mut State, op: ArithOp, nasty: bool) {
  let b = state.pop();
  let a = state.pop();
  let item = match (a.constant.as_ref().and_then(Constant::as_float), b.constant.as_ref().and_then(Constant::as_float)) {
    (Some(a), Some(b)) => match binop::fold_float(op, a, b) {
      Some(v) => Item::constant("F", Constant::Float(v)),
      None => Item::typed("F"),
    },
    _ => {
      let mut item = Item::typed("F");
      item.special_kind = if nasty { SpecialKind::NastyFloatMath } else { SpecialKind::FloatMath };
      item
    }
  };
  state.push(item);
}

fn double_binop(state: &mut State, op: ArithOp, nasty: bool) {
  let b = state.pop();
  let a = state.pop();
  let item = match (a.constant.as_ref().and_then(Constant::as_double), b.constant.as_ref().and_then(Constant::as_double)) {
    (Some(a), Some(b)) => match binop::fold_double(op, a, b) {
      Some(v) => Item::constant("D", Constant::Double(v)),
      None => Item::typed("D"),
    },
    _ => {
      let mut item = Item::typed("D");
      item.special_kind = if nasty { SpecialKind::NastyFloatMath } else { SpecialKind::FloatMath };
      item
    }
  };
  state.push(item);
}

fn cmp_result(folded: Option<Ordering3>) -> Item {
  match folded {
    Some(Ordering3::Less) => Item::constant("I", Constant::Int(-1)),
    Some(Ordering3::Equal) => Item::constant("I", Constant::Int(0)),
    Some(Ordering3::Greater) => Item::constant("I", Constant::Int(1)),
    None => Item::typed("I"),
  }
}

fn float_cmp(state: &mut State, nan_is_greater: bool) {
  let b = state.pop();
  let a = state.pop();
  let folded = a
    .constant
    .as_ref()
    .and_then(Constant::as_float)
    .zip(b.constant.as_ref().and_then(Constant::as_float))
    .map(|(a, b)| binop::fold_float_cmp(a, b, nan_is_greater));
  state.push(cmp_result(folded));
}

fn double_cmp(state: &mut State, nan_is_greater: bool) {
  let b = state.pop();
  let a = state.pop();
  let folded = a
    .constant
    .as_ref()
    .and_then(Constant::as_double)
    .zip(b.constant.as_ref().and_then(Constant::as_double))
    .map(|(a, b)| binop::fold_double_cmp(a, b, nan_is_greater));
  state.push(cmp_result(folded));
}

fn convert(state: &mut State, _from: &str, to: &'static str, fold: impl Fn(&Constant) -> Option<Constant>) {
  let a = state.pop();
  let item = match a.constant.as_ref().and_then(fold) {
    Some(c) => Item::constant(to, c),
    None => Item::typed(to),
  };
  state.push(item);
}

/// `i2l`/`d2l`/`f2l`: attach `ResultOfI2L`, unless the source carried
/// `SignedByte` (§4.3 "Conversions").
fn convert_widening_to_long(state: &mut State, _from: &'static str, fold: impl Fn(&Constant) -> Option<Constant>) {
  let a = state.pop();
  let mut item = match a.constant.as_ref().and_then(fold) {
    Some(c) => Item::constant("J", c),
    None => Item::typed("J"),
  };
  if a.special_kind != SpecialKind::SignedByte {
    item.special_kind = SpecialKind::ResultOfI2L;
  }
  state.push(item);
}

/// `l2i`/`d2i`/`f2i`: attach `ResultOfL2I`, but only when the source had no
/// prior special kind of its own to preserve (§4.3 "Conversions").
fn convert_narrowing_to_int(state: &mut State, _from: &'static str, fold: impl Fn(&Constant) -> Option<Constant>) {
  let a = state.pop();
  let mut item = match a.constant.as_ref().and_then(fold) {
    Some(c) => Item::constant("I", c),
    None => Item::typed("I"),
  };
  if a.special_kind == SpecialKind::NotSpecial {
    item.special_kind = SpecialKind::ResultOfL2I;
  }
  state.push(item);
}

/// `newarray`/`anewarray`: a known-constant dimension becomes the new
/// array `Item`'s constant, since its length is then known too (§4.3
/// "Allocation").
fn array_alloc(state: &mut State, element_sig: &str) {
  let dimension = state.pop();
  let mut item = match dimension.constant.as_ref().and_then(Constant::as_int) {
    Some(len) => Item::constant(format!("[{element_sig}"), Constant::Int(len)),
    None => Item::typed(format!("[{element_sig}")),
  };
  item.special_kind = SpecialKind::NewlyAllocated;
  state.push(item);
}

fn array_load(state: &mut State, element_sig: &str) {
  state.pop();
  let array = state.pop();
  let sig = descriptor::array_element(&array.signature)
    .map(|s| s.to_string())
    .unwrap_or_else(|| element_sig.to_string());
  state.push(Item::typed(sig));
}

/// §4.3 "Branches": when both operands are known, decide statically whether
/// the branch fires instead of recording (and merging into) a target that
/// can never be reached.
fn apply_static_branch(outcome: &mut TransferOutcome, target: u32, taken: Option<bool>) {
  match taken {
    Some(true) => {
      outcome.branch_targets.push(target);
      // Fall-through is unreachable; the driver must not merge into it.
      outcome.terminates = true;
    }
    Some(false) => {}
    None => outcome.branch_targets.push(target),
  }
}

fn zero_cmp_decision(op: &Op, value: &Item) -> Option<bool> {
  let Some(Constant::Int(v)) = &value.constant else { return None };
  let v = *v;
  Some(match op {
    Op::IfEq(_) => v == 0,
    Op::IfNe(_) => v != 0,
    Op::IfLt(_) => v < 0,
    Op::IfLe(_) => v <= 0,
    Op::IfGt(_) => v > 0,
    Op::IfGe(_) => v >= 0,
    _ => return None,
  })
}

fn int_cmp_decision(cmp: IfCmp, a: &Item, b: &Item) -> Option<bool> {
  let (Some(Constant::Int(x)), Some(Constant::Int(y))) = (&a.constant, &b.constant) else {
    return None;
  };
  let (x, y) = (*x, *y);
  Some(match cmp {
    IfCmp::Eq => x == y,
    IfCmp::Ne => x != y,
    IfCmp::Lt => x < y,
    IfCmp::Le => x <= y,
    IfCmp::Gt => x > y,
    IfCmp::Ge => x >= y,
  })
}

/// §4.3 "Non-negative promotion": `iflt`/`ifle` on a register `r` means the
/// fall-through arm is only reached when `r >= 0`. Recorded on `state` for
/// the driver's pre-computation step to pick up at the very next
/// instruction, which re-tags every mirror of `r` as `NonNegative` (§4.5).
/// `if_icmp*` comparing `Integer.MIN_VALUE` against a `checkForIntegerMinValue`
/// kind (`RandomInt`/`HashcodeInt`) clears that kind everywhere — the
/// comparison is the guard a detector looks for before trusting an
/// `abs()` of the value (§4.3 "Branches").
fn erase_min_value_comparison_kind(state: &mut State, a: &Item, b: &Item) {
  const MIN_VALUE: i32 = i32::MIN;
  let min_side_kind = match (a.constant.as_ref().and_then(Constant::as_int), b.constant.as_ref().and_then(Constant::as_int)) {
    (Some(MIN_VALUE), _) if b.check_for_integer_min_value() => Some(b.special_kind),
    (_, Some(MIN_VALUE)) if a.check_for_integer_min_value() => Some(a.special_kind),
    _ => None,
  };
  if let Some(kind) = min_side_kind {
    state.erase_special_kind(kind);
  }
}

fn maybe_promote_nonnegative(state: &mut State, op: &Op) {
  let Some(top) = state.top() else { return };
  let Some(register) = top.register_number else { return };
  if matches!(op, Op::IfLt(_) | Op::IfLe(_)) {
    state.register_tested_found_to_be_nonnegative = Some(register);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::instr::Instruction;
  use crate::traits::test_support::NullOracle;
  use std::sync::Arc;

  fn ctx() -> AnalysisContext {
    AnalysisContext::new(Arc::new(NullOracle), Arc::new(NullOracle))
  }

  fn step(state: &mut State, op: Op) -> TransferOutcome {
    let (outcome, _) = transfer(&ctx(), state, &Instruction { pc: 0, op }, &IdiomState::Idle, None);
    outcome
  }

  #[test]
  fn iadd_folds_constants() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(2)));
    state.push(Item::constant("I", Constant::Int(3)));
    step(&mut state, Op::IAdd);
    assert_eq!(state.top().unwrap().constant, Some(Constant::Int(5)));
  }

  #[test]
  fn idiv_by_zero_is_not_constant() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(1)));
    state.push(Item::constant("I", Constant::Int(0)));
    step(&mut state, Op::IDiv);
    assert_eq!(state.top().unwrap().constant, None);
  }

  #[test]
  fn iadd_of_non_constants_is_tagged_integer_sum_unconditionally() {
    let mut state = State::new();
    state.push(Item::typed("I"));
    state.push(Item::typed("I"));
    step(&mut state, Op::IAdd);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::IntegerSum);
  }

  #[test]
  fn idiv_by_two_of_integer_sum_is_average_computed_using_division() {
    let mut state = State::new();
    let mut sum = Item::typed("I");
    sum.special_kind = SpecialKind::IntegerSum;
    state.push(sum);
    state.push(Item::constant("I", Constant::Int(2)));
    step(&mut state, Op::IDiv);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::AverageComputedUsingDivision);
  }

  #[test]
  fn ishr_by_one_of_integer_sum_is_average_computed_using_division() {
    let mut state = State::new();
    let mut sum = Item::typed("I");
    sum.special_kind = SpecialKind::IntegerSum;
    state.push(sum);
    state.push(Item::constant("I", Constant::Int(1)));
    step(&mut state, Op::IShr);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::AverageComputedUsingDivision);
  }

  #[test]
  fn iand_with_low_byte_mask_is_tagged_low_8_bits_clear() {
    let mut state = State::new();
    state.push(Item::typed("I"));
    state.push(Item::constant("I", Constant::Int(0xFFFFFF00u32 as i32)));
    step(&mut state, Op::IAnd);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::Low8BitsClear);
  }

  #[test]
  fn ishl_by_eight_is_tagged_low_8_bits_clear() {
    let mut state = State::new();
    state.push(Item::typed("I"));
    state.push(Item::constant("I", Constant::Int(8)));
    step(&mut state, Op::IShl);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::Low8BitsClear);
  }

  #[test]
  fn iand_with_non_negative_constant_is_tagged_non_negative() {
    let mut state = State::new();
    state.push(Item::typed("I"));
    state.push(Item::constant("I", Constant::Int(0x7FFF)));
    step(&mut state, Op::IAnd);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::NonNegative);
  }

  #[test]
  fn iand_propagates_zero_means_null() {
    let mut state = State::new();
    let mut flag = Item::typed("I");
    flag.special_kind = SpecialKind::ZeroMeansNull;
    state.push(flag);
    state.push(Item::typed("I"));
    step(&mut state, Op::IAnd);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::ZeroMeansNull);
  }

  #[test]
  fn ior_propagates_nonzero_means_null() {
    let mut state = State::new();
    let mut flag = Item::typed("I");
    flag.special_kind = SpecialKind::NonzeroMeansNull;
    state.push(flag);
    state.push(Item::typed("I"));
    step(&mut state, Op::IOr);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::NonzeroMeansNull);
  }

  #[test]
  fn irem_of_hashcode_int_is_tagged_remainder_by_default() {
    let mut state = State::new();
    let mut hash = Item::typed("I");
    hash.special_kind = SpecialKind::HashcodeInt;
    state.push(hash);
    state.push(Item::constant("I", Constant::Int(7)));
    step(&mut state, Op::IRem);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::HashcodeIntRemainder);
  }

  #[test]
  fn irem_of_random_int_by_power_of_two_is_not_special() {
    let mut state = State::new();
    let mut random = Item::typed("I");
    random.special_kind = SpecialKind::RandomInt;
    state.push(random);
    state.push(Item::constant("I", Constant::Int(16)));
    step(&mut state, Op::IRem);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::NotSpecial);
  }

  #[test]
  fn dup_duplicates_top() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(7)));
    step(&mut state, Op::Dup);
    assert_eq!(state.stack_depth(), 2);
    assert_eq!(state.top().unwrap().constant, Some(Constant::Int(7)));
  }

  #[test]
  fn istore_then_iload_roundtrips() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(9)));
    step(&mut state, Op::IStore(3));
    step(&mut state, Op::ILoad(3));
    assert_eq!(state.top().unwrap().constant, Some(Constant::Int(9)));
  }

  #[test]
  fn newarray_of_constant_dimension_carries_length_as_constant() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(4)));
    step(&mut state, Op::NewArray(crate::instr::ArrayType::Int));
    let top = state.top().unwrap();
    assert_eq!(top.constant, Some(Constant::Int(4)));
    assert_eq!(top.special_kind, SpecialKind::NewlyAllocated);
  }

  #[test]
  fn arraylength_carries_over_a_known_array_length_constant() {
    let mut state = State::new();
    state.push(Item::constant("[I", Constant::Int(4)));
    step(&mut state, Op::ArrayLength);
    let top = state.top().unwrap();
    assert_eq!(top.constant, Some(Constant::Int(4)));
    assert_eq!(top.special_kind, SpecialKind::NonNegative);
  }

  #[test]
  fn arraylength_of_unknown_array_is_just_non_negative() {
    let mut state = State::new();
    state.push(Item::typed("[I"));
    step(&mut state, Op::ArrayLength);
    let top = state.top().unwrap();
    assert_eq!(top.constant, None);
    assert_eq!(top.special_kind, SpecialKind::NonNegative);
  }

  #[test]
  fn i2l_attaches_result_of_i2l() {
    let mut state = State::new();
    state.push(Item::typed("I"));
    step(&mut state, Op::I2L);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::ResultOfI2L);
  }

  #[test]
  fn i2l_of_signed_byte_does_not_attach_result_of_i2l() {
    let mut state = State::new();
    state.push(Item::typed("B"));
    step(&mut state, Op::I2L);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::SignedByte);
  }

  #[test]
  fn l2i_attaches_result_of_l2i_when_source_had_no_prior_kind() {
    let mut state = State::new();
    state.push(Item::typed("J"));
    step(&mut state, Op::L2I);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::ResultOfL2I);
  }

  #[test]
  fn l2i_of_a_source_with_a_prior_kind_does_not_attach_result_of_l2i() {
    let mut state = State::new();
    let mut hash = Item::typed("J");
    hash.special_kind = SpecialKind::HashcodeInt;
    state.push(hash);
    step(&mut state, Op::L2I);
    assert_ne!(state.top().unwrap().special_kind, SpecialKind::ResultOfL2I);
  }

  #[test]
  fn iflt_on_a_could_be_negative_value_erases_that_kind_from_other_locals() {
    let mut state = State::new();
    let mut mirror = Item::typed("I");
    mirror.special_kind = SpecialKind::RandomInt;
    state.set_local(5, mirror, 0);
    let mut tested = Item::typed("I");
    tested.special_kind = SpecialKind::RandomInt;
    state.push(tested);
    step(&mut state, Op::IfLt(99));
    assert_eq!(state.local(5).unwrap().special_kind, SpecialKind::NotSpecial);
  }

  #[test]
  fn ifeq_does_not_erase_could_be_negative_kinds() {
    let mut state = State::new();
    let mut mirror = Item::typed("I");
    mirror.special_kind = SpecialKind::RandomInt;
    state.set_local(5, mirror, 0);
    let mut tested = Item::typed("I");
    tested.special_kind = SpecialKind::RandomInt;
    state.push(tested);
    step(&mut state, Op::IfEq(99));
    assert_eq!(state.local(5).unwrap().special_kind, SpecialKind::RandomInt);
  }

  #[test]
  fn if_icmp_against_integer_min_value_clears_the_kind_everywhere() {
    let mut state = State::new();
    let mut mirror = Item::typed("I");
    mirror.special_kind = SpecialKind::HashcodeInt;
    state.set_local(5, mirror, 0);
    let mut hash = Item::typed("I");
    hash.special_kind = SpecialKind::HashcodeInt;
    state.push(hash);
    state.push(Item::constant("I", Constant::Int(i32::MIN)));
    step(&mut state, Op::IfICmp(IfCmp::Eq, 99));
    assert_eq!(state.local(5).unwrap().special_kind, SpecialKind::NotSpecial);
  }

  #[test]
  fn unknown_opcode_poisons_state() {
    let mut state = State::new();
    step(&mut state, Op::Unknown(beef::lean::Cow::borrowed("jsr")));
    assert!(state.top);
  }

  #[test]
  fn math_cos_followed_by_float_math_tag() {
    // cos is not a string-fold method, so a plain call falls back to a
    // typed item; the FLOAT_MATH tagging lives on fadd/fsub/etc, so here
    // we check that an untagged call result stays NOT_SPECIAL.
    let mut state = State::new();
    let m = crate::item::MethodRef {
      class: beef::lean::Cow::borrowed("java/lang/Math"),
      name: beef::lean::Cow::borrowed("cos"),
      descriptor: beef::lean::Cow::borrowed("(D)D"),
      is_interface: false,
    };
    state.push(Item::typed("D"));
    call::invoke(&ctx(), &mut state, m, true, false);
    assert_eq!(state.top().unwrap().special_kind, SpecialKind::NotSpecial);
  }

  #[test]
  fn constant_branch_not_taken_suppresses_target() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(0)));
    let outcome = step(&mut state, Op::IfGt(99));
    assert!(outcome.branch_targets.is_empty());
    assert!(!outcome.terminates);
  }

  #[test]
  fn constant_branch_always_taken_terminates_fallthrough() {
    let mut state = State::new();
    state.push(Item::constant("I", Constant::Int(5)));
    let outcome = step(&mut state, Op::IfGt(99));
    assert_eq!(outcome.branch_targets, vec![99]);
    assert!(outcome.terminates);
  }

  #[test]
  fn unknown_value_branch_keeps_target_without_terminating() {
    let mut state = State::new();
    state.push(Item::typed("I"));
    let outcome = step(&mut state, Op::IfGt(99));
    assert_eq!(outcome.branch_targets, vec![99]);
    assert!(!outcome.terminates);
  }

  #[test]
  fn iflt_promotes_mirrored_register_to_nonnegative_on_next_instruction() {
    let mut state = State::new();
    state.push(Item::typed("I"));
    step(&mut state, Op::IStore(3));
    step(&mut state, Op::ILoad(3));
    step(&mut state, Op::IfLt(99));
    assert_eq!(
      state.register_tested_found_to_be_nonnegative,
      Some(3),
      "iflt on a mirror of register 3 should queue the promotion"
    );
    state.apply_pending_nonnegative_promotion();
    assert_eq!(state.local(3).unwrap().special_kind, SpecialKind::NonNegative);
  }

  #[test]
  fn aload_of_untracked_register_recovers_signature_from_local_variable_table() {
    use crate::instr::LocalVarEntry;

    let table = LocalVariableTable::new(vec![LocalVarEntry {
      start_pc: 0,
      length: 10,
      register: 2,
      signature: beef::lean::Cow::borrowed("Ljava/lang/String;"),
    }]);

    let mut state = State::new();
    let (outcome, _) = transfer(
      &ctx(),
      &mut state,
      &Instruction { pc: 1, op: Op::ALoad(2) },
      &IdiomState::Idle,
      Some(&table),
    );
    assert!(outcome.branch_targets.is_empty());
    assert_eq!(state.top().unwrap().signature, "Ljava/lang/String;");
  }

  #[test]
  fn aload_without_a_table_falls_back_to_object() {
    let mut state = State::new();
    step(&mut state, Op::ALoad(2));
    assert_eq!(state.top().unwrap().signature, "Ljava/lang/Object;");
  }
}

//! The fixed-point driver (§4.5): walks a method's instructions, feeding
//! each through [`crate::transfer::transfer`], recording branch-target
//! snapshots in a [`JumpInfo`], and re-scanning until nothing changes or
//! the state stabilises. Grounded on the teacher's `vm/lib.rs` dispatch
//! loop for the "keep stepping an instruction pointer through a flat
//! instruction list" shape; the fixed-point/worklist part itself has no
//! teacher analogue (the teacher's VM never needs to re-visit an
//! instruction), so it's modelled directly on §4.5's own procedure.

use indexmap::IndexMap;

use crate::config::AnalysisContext;
use crate::error::{AnalysisError, Result};
use crate::idiom::IdiomState;
use crate::instr::{Instruction, MethodInput};
use crate::item::Item;
use crate::state::{JumpInfo, State};
use crate::transfer::transfer;

/// The final per-instruction states produced by a converged analysis,
/// keyed by pc — what a caller (a bug detector) actually wants out of this
/// crate (§1 Purpose).
#[derive(Debug, Default)]
pub struct AnalysisResult {
  pub states: IndexMap<u32, State>,
  pub jump_info: JumpInfo,
  pub iterations: u32,
}

/// Run the fixed-point (or single-pass, if `ctx.iterative` is `false`)
/// analysis over one method body (§4.5).
pub fn analyze(ctx: &AnalysisContext, method: &impl MethodInput) -> Result<AnalysisResult> {
  let instructions = method.instructions();
  if instructions.is_empty() {
    return Err(AnalysisError::EmptyMethod);
  }

  let by_pc: IndexMap<u32, &Instruction> = instructions.iter().map(|i| (i.pc, i)).collect();
  let order: Vec<u32> = instructions.iter().map(|i| i.pc).collect();
  let local_vars = method.local_variable_table();

  let mut jump_info = JumpInfo::new();

  // First handler wins when two protected regions share a handler_pc with
  // different caught types; real bytecode never does this deliberately.
  let mut handler_catch_types: IndexMap<u32, Option<beef::lean::Cow<'static, str>>> = IndexMap::new();
  for h in method.exception_handlers() {
    handler_catch_types.entry(h.handler_pc).or_insert_with(|| h.catch_type.clone());
  }
  let mut states: IndexMap<u32, State> = IndexMap::new();
  let entry_pc = order[0];
  states.insert(entry_pc, seed_entry_state(method, ctx.debug));
  for (&pc, catch_type) in &handler_catch_types {
    states.entry(pc).or_insert_with(|| seed_handler_state(catch_type.as_deref(), ctx.debug));
  }

  let max_iterations = if ctx.iterative { ctx.iteration_cap } else { 1 };
  let mut iterations = 0;
  let mut stable = false;

  // Convergence is judged by comparing the whole `states` map before and
  // after a pass, not by an incremental "did any single merge change
  // anything" flag: the idiom fixup below means a pc can legitimately be
  // rewritten (tagged, then merged back to plain, then re-tagged) within
  // a single pass without the *net* result differing from the previous
  // pass, and a per-merge flag would see that churn and never settle.
  while iterations < max_iterations {
    iterations += 1;
    let before = states.clone();
    let mut idiom_state = IdiomState::Idle;
    // Collected rather than applied in place: the idiom's *other* arm may
    // still be ahead of us in `order` and will merge its own plain
    // constant into `target` later this same pass, which would stomp an
    // immediate fixup. Applying all of them after the pass has visited
    // every instruction guarantees the collapse is the last write.
    let mut idiom_fixups: Vec<(u32, crate::idiom::PendingIdiom)> = Vec::new();

    for (i, &pc) in order.iter().enumerate() {
      let Some(instr) = by_pc.get(&pc) else { continue };

      // Every handler pc was pre-seeded above, so a miss here just means
      // this pc hasn't been reached by any predecessor yet.
      let Some(mut state) = states.get(&pc).cloned() else { continue };
      // §4.5 pre-computation step: an `iflt`/`ifle` on the predecessor
      // queued this up for whichever instruction runs next.
      state.apply_pending_nonnegative_promotion();

      let (outcome, next_idiom) = transfer(ctx, &mut state, instr, &idiom_state, local_vars);
      idiom_state = next_idiom;

      // `state.register_tested_found_to_be_nonnegative` is set by
      // `iflt`/`ifle` before which arm is taken is even decided; it only
      // describes the fall-through (not-taken) arm, so a branch-taken
      // target must not inherit it — otherwise a value just proven
      // *negative* on the taken arm gets promoted to `NonNegative` by the
      // next instruction's pre-computation step.
      for &target in &outcome.branch_targets {
        let (locals, stack) = state.snapshot();
        jump_info.record_edge(target, &locals, &stack, ctx.debug);
        let mut branch_state = state.clone();
        branch_state.register_tested_found_to_be_nonnegative = None;
        merge_into(&mut states, target, &branch_state);

        if let Some(pending) = &outcome.pending_idiom {
          idiom_fixups.push((target, pending.clone()));
        }
      }

      if !outcome.terminates {
        if let Some(&next_pc) = order.get(i + 1) {
          merge_into(&mut states, next_pc, &state);
        }
      }
    }

    // Collapse the `ifnull`/`iconst`/`goto` idiom (§4.3) now that every
    // instruction (and thus both arms' contributions) has been merged.
    for (target, pending) in &idiom_fixups {
      if let Some(joined) = states.get_mut(target) {
        let collapsed = pending.collapse();
        if joined.top() != Some(&collapsed) {
          joined.replace_top(collapsed);
        }
      }
    }

    if states == before {
      stable = true;
      break;
    }
  }

  if ctx.iterative && !stable {
    return Err(AnalysisError::NonConvergent { iterations });
  }

  // Persisting `jump_info` via `ctx.cache` (§6) is the caller's job: only
  // the caller knows the class/method/descriptor identity to key it under.
  Ok(AnalysisResult {
    states,
    jump_info,
    iterations,
  })
}

fn merge_into(states: &mut IndexMap<u32, State>, pc: u32, incoming: &State) {
  match states.get_mut(&pc) {
    Some(existing) => {
      existing.merge_from(incoming);
    }
    None => {
      states.insert(pc, incoming.clone());
    }
  }
}

/// Seed the state at pc 0: `this` (if not static) and declared parameters,
/// each an [`Item::initial_argument`] (§3 lifecycle, §4.2).
fn seed_entry_state(method: &impl MethodInput, debug: bool) -> State {
  let mut state = State::new();
  state.set_debug(debug);
  let mut register = 0u32;
  if !method.is_static() {
    state.set_local(register, Item::initial_argument("Ljava/lang/Object;", register), 0);
    register += 1;
  }

  if let Some((params, _ret)) = crate::descriptor::parse_method_descriptor(method.descriptor()) {
    for param in params {
      let item = Item::initial_argument(param.to_string(), register);
      let width = item.size();
      state.set_local(register, item, 0);
      register += width as u32;
    }
  }

  state
}

/// Exception handlers start with a stack holding just the thrown exception,
/// typed to the handler's catch type (§4.5 step 2(d)); nothing in the
/// instruction stream ever branches to a handler_pc, so this one-time seed
/// is the only state a handler's locals and stack ever get.
fn seed_handler_state(catch_type: Option<&str>, debug: bool) -> State {
  let mut state = State::new();
  state.set_debug(debug);
  state.push(Item::typed(catch_type.unwrap_or("Ljava/lang/Throwable;").to_string()));
  state
}

//! An abstract interpreter over JVM bytecode: tracks, at every program
//! point in a method body, what's on the operand stack and in the local
//! variables — constants where they're known, provenance (which field or
//! method produced a value) and a handful of semantic tags (random
//! numbers, hash codes, tainted servlet input, …) where they're not.
//!
//! This crate owns none of class-file parsing, constant-pool resolution,
//! or bug reporting: it consumes an already-dismantled [`instr::MethodInput`]
//! and external [`traits::FieldSummaryOracle`]/[`traits::ClassHierarchyOracle`]
//! collaborators, and hands back a per-pc [`driver::AnalysisResult`] for a
//! caller (typically a bug detector) to query.

pub mod binop;
pub mod call;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod field;
pub mod idiom;
pub mod instr;
pub mod item;
pub mod merge;
pub mod state;
pub mod traits;
pub mod transfer;

pub use config::AnalysisContext;
pub use driver::{analyze, AnalysisResult};
pub use error::{AnalysisError, Result};
pub use instr::{
  ArrayType, Bootstrap, ExceptionHandler, Instruction, LocalVarEntry, LocalVariableTable, MethodInput, Op,
};
pub use item::{Constant, FieldRef, Flags, Item, MethodRef, SpecialKind};
pub use state::{JumpInfo, State};
pub use traits::{AnalysisCache, ClassHierarchyOracle, FieldSummary, FieldSummaryOracle};

//! Mermaid validation and repair.
//!
//! Flow: [`extract_blocks`] finds fenced diagrams, [`Validator`] checks each
//! one against a [`DiagramEngine`], [`Repairer`] asks a model to rewrite the
//! broken ones, and [`apply_fixes`] splices the results back. [`MermaidFixer`]
//! drives the whole pass.

pub mod blocks;
pub mod engine;
pub mod fixer;
pub mod patch;
pub mod repair;
pub mod validate;

pub use blocks::{extract_blocks, fence, Blocks, DiagramBlock};
pub use engine::{DiagramEngine, EngineKind, MmdcEngine, NativeEngine};
pub use fixer::{
    detect_errors, AutoConfirmation, BlockError, DetectionReport, FixConfirmation, FixDecision, FixOutcome,
    FixSessionOutcome, MermaidFixer,
};
pub use patch::{apply_fix, apply_fixes};
pub use repair::{clean_model_output, collect_stream, RepairRequest, Repairer, DEFAULT_REPAIR_PROMPT};
pub use validate::{ValidationResult, Validator};

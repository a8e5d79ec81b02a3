//! Offline processing of finished sessions: payload assembly, trace
//! archival shapes, structural verification, and key-event
//! distillation.

pub mod distill;
pub mod export;
pub mod verify;

pub use distill::{distill, DistilledTrace, KeyEvent, PairedStep, ReplayAction};
pub use export::{build_payload, trace_document, without_html};
pub use verify::{verify_document, verify_file, TraceCheck, TraceReport};

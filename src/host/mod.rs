//! Deterministic page host.
//!
//! The engine instruments live documents through this in-process DOM:
//! an arena of nodes per document, synchronous event dispatch with
//! capture and bubble phases, a custom-event bus for the marker
//! protocol, mutation observation, and frame/shadow-root trees. All
//! interaction flows through [`page::Page`] so captures are
//! reproducible under test clocks.

pub mod dom;
pub mod event;
pub mod page;
pub mod parser;
pub mod serialize;

pub use dom::{DocId, ElementData, Node, NodeId, NodeKind, Rect, ShadowMode};
pub use event::{
    CustomEvent, DomEvent, EventDetail, EventFlow, KeyDetail, ListenerId, ListenerTier,
    MouseDetail, NavigationDetail, Phase, ScrollDetail,
};
pub use page::{Document, FrameMessage, MutationKind, MutationRecord, Page, ReadyState};
pub use serialize::SerializeOptions;

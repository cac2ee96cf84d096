// Copyright 2026 Facteur Contributors
// SPDX-License-Identifier: Apache-2.0

//! Facteur — resilient browser-side automation core for invoice retrieval
//! and expense entry.
//!
//! The core authenticates into billing portals, locates and downloads
//! invoice documents, and re-enters extracted data into an expense tool,
//! across structurally different, uncooperative sites. Everything rests on
//! four primitives: bounded polling ([`wait`]), snapshot-based element
//! resolution ([`dom`]), synthetic user interaction ([`interact`]), and
//! download-URL/filename resolution ([`download`]). Site-specific behavior
//! lives in tagged workflow variants ([`providers`]) behind one shared
//! capability contract; the expense tool has its own workflow ([`expense`]).
//!
//! The orchestration, transport, and UI around this core are external
//! collaborators: they speak the action contract in [`protocol`] and
//! nothing else.

pub mod config;
pub mod dom;
pub mod download;
pub mod error;
pub mod expense;
pub mod interact;
pub mod page;
pub mod protocol;
pub mod providers;
pub mod wait;

pub use config::SelectorConfig;
pub use error::{FlowError, FlowResult};
pub use page::PageDriver;
pub use protocol::{handle_action, ActionKind, ActionPayload, ActionRequest, ProviderId};

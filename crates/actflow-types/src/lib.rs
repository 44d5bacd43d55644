//! Core types for actflow.
//!
//! This crate is the leaf of the actflow workspace:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  actflow-types   : Action, TypeMatcher, ErrorCode  ◄── HERE │
//! │  actflow-event   : MonitorEvent, Monitor, CancelSignal      │
//! │  actflow-hook    : LogicSpec, LogicUnit, hook handles       │
//! │  actflow-runtime : Stage, DispatchChannel, LogicMiddleware  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Actions
//!
//! [`Action`] is the tagged record every logic unit observes. Its
//! `type` is the matching key for [`TypeMatcher`].
//!
//! # Errors
//!
//! All actflow error types implement [`ErrorCode`].

mod action;
mod error;
mod matcher;

pub use action::{Action, ActionCreator, UNHANDLED_LOGIC_ERROR};
pub use error::{ErrorCode, TypesError};
pub use matcher::{TypeMatcher, WILDCARD};

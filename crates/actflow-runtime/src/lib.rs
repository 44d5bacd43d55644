//! actflow runtime: runs logic units as action middleware.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  actflow-types   : Action, TypeMatcher, ErrorCode           │
//! │  actflow-event   : MonitorEvent, Monitor, CancelSignal      │
//! │  actflow-hook    : LogicSpec, LogicUnit, hook handles       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  actflow-runtime : Stage, DispatchChannel, LogicMiddleware  │
//! │                                                   ◄HERE     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Flow
//!
//! ```text
//!  MiddlewareFn::call(a)
//!        │ top
//!        ▼
//!  ┌──────────┐ no match  ┌──────────┐         ┌────────────┐
//!  │ stage 0  │ ────────► │ stage 1  │ ──…───► │ Next::next │ bottom
//!  └────┬─────┘           └──────────┘         └────────────┘
//!       │ match: begin
//!       ▼
//!  intercept ──► next / nextDisp / filtered
//!       │
//!       ▼
//!  process ──► DispatchChannel ──► Host::dispatch ──► end
//! ```
//!
//! # Usage
//!
//! ```
//! use actflow_hook::LogicSpec;
//! use actflow_runtime::testing::RecordingHost;
//! use actflow_runtime::{Deps, LogicMiddleware};
//! use actflow_types::Action;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let fetch = LogicSpec::new("FETCH")
//!     .success_type("FETCH_DONE")
//!     .process(|ctx| Ok(ctx.action.payload.clone().unwrap_or_default()))
//!     .build()
//!     .expect("valid logic");
//!
//! let host = Arc::new(RecordingHost::new());
//! let mw = LogicMiddleware::new(vec![fetch], Deps::new()).expect("no duplicates");
//! let call = mw.bind(host.clone()).expect("first host").connect(host.next_fn());
//!
//! call.call(Action::new("FETCH").with_payload(json!(7)));
//! mw.when_complete().await;
//!
//! assert_eq!(host.dispatched()[0], Action::new("FETCH_DONE").with_payload(json!(7)));
//! # }
//! ```
//!
//! # Modules
//!
//! - `host`: [`Host`] and [`Next`] collaborator traits
//! - `middleware`: [`LogicMiddleware`] and its runtime controls
//! - [`testing`]: [`RecordingHost`](testing::RecordingHost) test double

mod channel;
mod host;
mod intercept;
mod middleware;
mod stage;
pub mod testing;

pub use host::{Host, HostError, Next};
pub use middleware::{BoundMiddleware, LogicMiddleware, MiddlewareFn};

pub use actflow_event::{CancelSignal, Monitor, MonitorEvent, MonitorOp};
pub use actflow_hook::{Deps, LogicError, LogicSpec, LogicUnit};

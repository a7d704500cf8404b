//! The Nova chat-request orchestrator.
//!
//! One inbound utterance enters [`dispatch::dispatch_turn`]; exactly one
//! assistant reply leaves through the [`collab::Broadcaster`] seam, with a
//! complete [`nova_domain::turn::RunSummary`] written to the dev log: even
//! when providers stall, tools time out, or the model returns nothing.

pub mod cancel;
pub mod collab;
pub mod constraints;
pub mod dedupe;
pub mod dispatch;
pub mod enrichment;
pub mod fallback;
pub mod fastpath;
pub mod guardrails;
pub mod normalize;
pub mod pending;
pub mod policy;
pub mod shortterm;
pub mod state;
pub mod telemetry;
pub mod tool_loop;
pub mod turn;

pub use dispatch::dispatch_turn;
pub use state::EngineState;

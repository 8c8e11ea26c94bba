//! Session orchestration core for a voice conversation agent.
//!
//! The [`session::SessionOrchestrator`] alternates between listening to the
//! user ([`capture`]), asking a language model for a reply ([`completion`])
//! and speaking it ([`playback`]), never doing two of those at once. The
//! platform speech engines sit behind the traits in [`engine`].

pub mod capture;
pub mod completion;
pub mod engine;
pub mod error;
pub mod playback;
pub mod relevance;
pub mod retry;
pub mod session;

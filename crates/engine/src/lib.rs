#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! # Arx engine
//!
//! The block-production pipeline and everything feeding it: commitment
//! validation, the round manager (drain → persist → tree → anchor →
//! block), the second-aligned round scheduler, the trust-anchor clients,
//! the boot-time tree reload, and the request-facing [`Aggregator`].

/// The request-facing aggregator surface.
pub mod aggregator;
/// Trust-anchor clients: the in-process mock and the HTTP ledger client.
pub mod anchor;
/// Boot-time SMT reload from the leaf store.
pub mod reload;
/// The round manager.
pub mod round;
/// The wallclock-aligned round scheduler.
pub mod scheduler;
/// Commitment validation.
pub mod validator;

pub use aggregator::Aggregator;
pub use anchor::{HttpAnchorClient, MockAnchorClient};
pub use reload::{reload_smt, RELOAD_CHUNK};
pub use round::{RoundConfig, RoundManager};
pub use scheduler::BlockProducer;
pub use validator::CommitmentValidator;

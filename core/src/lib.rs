//! Mintbridge interbank settlement.
//!
//! Transfers are split into fixed-denomination legs, burned into the
//! destination's commitment pools and withdrawn with zero-knowledge proofs.

pub mod api;
pub mod ledger;
pub mod settlement;
pub mod storage;

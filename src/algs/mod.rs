//! Process-group plumbing: communicators, collectives and wire records.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
pub use exchange::{all_gather_bytes, all_gather_u64, all_reduce_or, all_to_all};

//! The four stages of the chat invocation state machine.
//!
//! Execution order on a cache miss is cache-check → contextualize → retrieve
//! → generate; a hit ends the invocation after cache-check. Routing between
//! them lives in [`pipeline::next_stage`](crate::pipeline::next_stage).

mod cache_check;
mod contextualize;
mod generate;
mod retrieve;

pub use cache_check::CacheCheckStage;
pub use contextualize::ContextualizeStage;
pub use generate::GenerateStage;
pub use retrieve::RetrieveStage;

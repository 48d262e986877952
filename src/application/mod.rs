//! Application layer containing the pipeline orchestration.
//!
//! `AdmissionGateway` is the synchronous front door that decides and enqueues;
//! `TransactionApplier` is the consumer that turns queued messages into ledger
//! changes. They only meet through the queue.

pub mod applier;
pub mod gateway;
pub mod retry;

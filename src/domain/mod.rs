//! Domain layer: ledger entities, the queue message contract and the storage ports.

pub mod account;
pub mod message;
pub mod ports;
pub mod transaction;

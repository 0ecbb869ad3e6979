// src/blockchain/mod.rs
//! zkSync blockchain interactions.

pub mod zksync_client;

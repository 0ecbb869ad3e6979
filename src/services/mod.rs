// src/services/mod.rs
//! Business logic composed from the wallet, vault and ledger layers.

pub mod identity_service;
pub mod verifier;

// src/contracts/mod.rs
//! Smart contract interfaces.

pub mod identity_registry;

//! Attestation crafter
//!
//! Builds a software supply chain attestation incrementally: initialize a
//! crafting state from a contract, add typed materials (hashing them and
//! pushing their bytes to a content-addressable store), validate, then render
//! and sign an in-toto statement in a DSSE envelope.
//!
//! The CI runner registry and the CAS wire types live in their own crates,
//! `ci-runners` and `cas-protocol`.

pub mod api;
pub mod casclient;
pub mod config;
pub mod controlplane;
pub mod crafter;
pub mod materials;
pub mod renderer;
pub mod statemanager;

pub use api::{CraftingSchema, CraftingState, Material, MaterialType};
pub use crafter::{Crafter, CrafterError, InitOptions};
pub use materials::{CasBackend, MaterialError};

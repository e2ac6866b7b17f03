//! stackplan: one fixed multi-stack deployment, parameterized per stage.
//!
//! A stage table resolves to a profile, pure constructors turn the profile
//! into typed resource nodes, and a composition graph orders and validates
//! them before a manifest is handed to a render target.

pub mod cli;
pub mod core;
pub mod resources;
pub mod secrets;

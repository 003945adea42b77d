// handlers/mod.rs - two security tiers
//
// Public (no token) -> Protected (full transaction + auth + role chain)
pub mod protected;
pub mod public;

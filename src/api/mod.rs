// =============================================================================
// API Module
// =============================================================================
//
// REST surface for the decision engine, plus Bearer-token authentication.

pub mod auth;
pub mod rest;

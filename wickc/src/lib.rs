//! The Wick compiler back end.
//!
//! This crate takes typed statement/expression trees (produced by the front
//! end) and lowers them, one method body at a time, into linear instruction
//! streams for the Wick stack machine, then packages the compiled types of
//! a translation unit into a kit.

pub mod backend;
pub mod errors;
pub mod ir;
pub mod symbols;
pub mod trees;

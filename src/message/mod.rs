//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer; the trait then provides
//! broadcast, reduce, and reduce-all collectives on top. Two transports are
//! included: an in-process channel group (one communicator per thread, used
//! by the tests and the multi-rank demo) and a pure-Rust TCP host for
//! multi-machine runs. The `mail` submodule layers tagged, typed envelopes
//! over the raw byte transport for the mesh engine's point-to-point phases.
//!

mod backoff;
pub mod comm;
pub mod local;
pub mod mail;
pub mod tcp;
pub mod util;

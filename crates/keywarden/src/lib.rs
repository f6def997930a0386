//! Conversational custodian for blockchain wallets.
//!
//! The crate is organized around four seams: [`cipher`] seals secrets at
//! rest, [`vault`] owns the per-user wallet collection, [`conversation`]
//! models pending free-text follow-ups, and [`flows`] orchestrates chat
//! events over a pluggable [`transport`] and [`store`].

pub mod cipher;
pub mod config;
pub mod conversation;
pub mod doctor;
pub mod errors;
pub mod flows;
pub mod fsutil;
pub mod paths;
pub mod store;
pub mod transport;
pub mod vault;
pub mod wallet;

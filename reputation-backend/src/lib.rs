//! Cross-chain agent identity and reputation indexer.
//!
//! Scans ERC-8004 registries on EVM chains and the SATI program on Solana,
//! resolves every registration to a master agent id, and keeps a unified
//! reputation per agent (or per linked wallet group) in SQLite.

pub mod config;
pub mod db;
pub mod error;
pub mod evm;
pub mod hooks;
pub mod identity;
pub mod jsonrpc;
pub mod linker;
pub mod reputation;
pub mod sati;
pub mod worker;

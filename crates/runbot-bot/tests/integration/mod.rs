//! Integration tests for runbot-bot.
//!
//! These tests verify the interaction between components:
//! - WebSocket connection lifecycle and authorization
//! - Purchase, contract settlement and ledger recording over the wire
//! - End-to-end strategy runs

pub mod common;

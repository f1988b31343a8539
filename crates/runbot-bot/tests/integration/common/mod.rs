//! Shared integration test fixtures.

pub mod mock_broker;

//! Error handling tests

mod network_test;
mod protocol_test;

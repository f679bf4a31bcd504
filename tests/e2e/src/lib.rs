//! End-to-end test harness for the memory engine

pub mod fixtures;

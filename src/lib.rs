//! value_rnn - recurrent value network for reinforcement-learning agents
//!
//! This library provides:
//! - The value network and its building blocks (network module)
//! - Command line modes for inspecting and exercising networks (modes module)
//! - Logger setup for the binary (logging module)

pub mod logging;
pub mod modes;
pub mod network;

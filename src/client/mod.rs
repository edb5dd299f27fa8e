mod core;
mod entrypoint;
mod extended;
mod simple_query;
mod startup;

pub use core::{Client, TransactionStatus};
pub use entrypoint::client_entrypoint;

#[cfg(test)]
mod session_tests;

//! Concrete [`ReasoningClient`](crate::client_wrapper::ReasoningClient)
//! implementations.

pub mod anthropic;

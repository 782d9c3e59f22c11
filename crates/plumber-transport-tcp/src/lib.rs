//! TCP transport module for Plumber (spec.md §4.6, §6).
//!
//! Binds a `std::net::TcpListener` and registers it into a
//! [`plumber_core::module::ModuleRegistry`] as an event-producing module:
//! `Scheduler::start` spawns a blocking event thread over it that calls
//! `accept_event` in a loop, handing each new connection off as a paired
//! input/output pipe handle (spec.md §4.1).

mod listener;

pub use listener::bind;

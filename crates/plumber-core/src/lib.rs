//! Plumber request execution engine: service graph, pipe layer,
//! request-local scope and scheduler.
//!
//! This crate is the runtime core a host binary embeds (spec.md §6): it
//! owns the service graph, the pipe abstraction over transport modules,
//! per-request scope storage, and the scheduler that drives requests to
//! completion. Transport modules (TCP, the in-memory test harness) and
//! servlets are supplied by other crates and registered into a
//! [`module::ModuleRegistry`] / [`servlet::ServletFactory`] at startup.

pub mod config;
pub mod error;
pub mod graph;
pub mod module;
pub mod pipe;
pub mod pool;
pub mod prelude;
pub mod rls;
pub mod scheduler;
pub mod sealed;
pub mod servlet;
pub mod task;

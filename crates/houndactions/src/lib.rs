//! Concrete action surfaces for the workflow engine
//!
//! Two families: HTTP-backed surfaces that forward action and ingest
//! envelopes to remote peers, and in-memory simulated surfaces for
//! local runs and tests.

mod http;
mod sim;

pub use http::{HttpAutomation, HttpIngest};
pub use sim::{MemoryIngest, SimulatedPage};

//! Dispatch scenarios, one module per concern.

mod concurrency;
mod filtering;
mod ordering;
mod telemetry;

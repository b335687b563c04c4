//! Custom-datatype pack/unpack engine for the `mpicd` point-to-point
//! runtime.
//!
//! This crate is the part of the runtime that lets applications register
//! user-defined aggregate types whose in-memory layout is opaque to the
//! engine, then drives sends and receives of those types incrementally
//! against transport fragments whose size the engine does not control.
//! Process bootstrap, rank assignment, collective operations and the
//! reliable-delivery transport itself all live outside this crate; see
//! [`slot`] for the seam the engine expects its transport to implement.
//!
//! Four components, leaves first:
//! - [`registry`] — the process-wide table of registered datatype
//!   descriptors.
//! - [`driver`] — one pack/unpack state machine per strategy
//!   (`StreamCallbacks`, `MemoryRegions`, `Primitive`).
//! - [`driver::region`] — the region descriptor resolver used by
//!   `MemoryRegions` transfers.
//! - [`transfer`] — the controller that owns one in-flight transfer: its
//!   driver, its callback state, its cursor, and the state machine that
//!   governs `state-free`.

pub mod callback;
pub mod driver;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod registry;
pub mod slot;
#[macro_use]
mod state;
pub mod transfer;

pub use callback::{CallbackSet, Count};
pub use error::{DatatypeError, ErrorCode};
pub use handle::DatatypeHandle;
pub use registry::{RegistryConfig, TypeRegistry};
pub use transfer::{Direction, TransferController};
pub use driver::StepResult;

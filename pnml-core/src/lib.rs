//! Parsing, registry, firing, and debug-driver primitives for PNML-YAML
//! workflow nets. See [`parser`], [`engine`], and [`debug`] for the three
//! layers a host typically wires together.

pub mod async_ops;
pub mod debug;
pub mod engine;
pub mod error;
pub mod parser;
pub mod registry;
pub mod types;

pub use debug::DebugDriver;
pub use engine::{Engine, StepOutcome};
pub use error::{InscriptionError, ParseError, ShimProtocolError};
pub use registry::{CallableOutcome, Registry, RegistryFunc};
pub use types::{Arc, HistoryEntry, Inscription, InscriptionKind, Net, PendingOp, Place, PlaceIndex, Token, Transition};

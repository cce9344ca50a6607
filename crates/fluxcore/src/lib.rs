//! Core data model for the flux dataflow engine.
//!
//! This crate provides the pieces the runtime is built from: typed data
//! boxes, the conversion registry, ports, connections, keyed events and the
//! engine's error type. It carries no execution machinery; scheduling lives
//! in `fluxruntime`.

pub mod connection;
pub mod data;
pub mod error;
pub mod events;
pub mod name;
pub mod port;
pub mod types;

pub use connection::{Connection, Connections, SharedConnection};
pub use data::{
    DataBox, DataValue, FunctionOutput, OpaqueValue, SharedData, TimeSpan, TimeUnit, Value,
};
pub use error::{FluxError, Result};
pub use events::EventDispatcher;
pub use name::IndexableName;
pub use port::{Port, SharedPort};
pub use types::{TypeRegistry, ANY_TAG};
pub use uuid::Uuid;

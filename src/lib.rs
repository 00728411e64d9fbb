//! Aerodynamic shape optimization bridge and adjoint-driven mesh
//! adaptation on top of an external flow engine. The engine is an opaque
//! collaborator behind the [`engine::FlowEngine`] trait; optimizers talk
//! to it through CSV exchange files via [`bridge::OptimizationBridge`],
//! and [`adapt::MeshAdaptationController`] drives error-directed mesh
//! refinement campaigns against it.

pub mod adapt;
pub mod bridge;
pub mod config;
pub mod datatypes;
pub mod engine;
pub mod error;
pub mod external;
pub mod tables;

pub use adapt::{AdaptationParams, AdjointSchedule, MeshAdaptationController};
pub use bridge::{BridgeCycle, OptimizationBridge};
pub use engine::{EngineError, FlowEngine};
pub use error::CamberError;
pub use external::ExternalEngine;

//! The team runtime: role-agent orchestration over a shared transcript.
//!
//! A run takes one user prompt through a pipeline (or fan-out) of
//! role-specialized agents, streams every agent's incremental reasoning
//! through the [`bus::TraceBus`], and distills the final transcript into
//! a diagram graph plus a Bicep/Terraform bundle.

pub mod artifact;
pub mod bus;
pub mod diagram;
pub mod iac;
pub mod redact;
pub mod roles;
pub mod runner;
pub mod workflow;

pub use artifact::RunArtifact;
pub use bus::TraceBus;
pub use iac::{IacBundle, IacGenerator, IacTemplate};
pub use workflow::{TeamWorkflow, Topology};

//! Capture session management (client side)
//!
//! - Form binding and validation before devices are touched
//! - Fragment collection from a [`CaptureDevice`]
//! - Assembly of the fragments into a single artifact
//! - Two-phase handoff through an [`crate::client::IngestionClient`]

mod assembler;
mod controller;
mod device;
mod form;
mod state;

pub use assembler::{AssembleError, Artifact, FragmentBuffer, MediaAssembler};
pub use controller::{CaptureController, CaptureError, CaptureFailure};
pub use device::{
    CaptureConfig, CaptureDevice, ChannelDevice, DeviceError, FragmentSink, FragmentSinks,
    MediaFragment,
};
pub use form::ConsultationForm;
pub use state::{SessionState, SessionStats};

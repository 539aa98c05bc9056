//! Error taxonomy for the lighting pipeline.
//!
//! Fatal errors abort startup. Recoverable errors are counted and logged by the
//! component that hit them and never leave the frame loop. Safety violations
//! are not errors at all; they show up as output transformations and flags on
//! `SafetyState`.

use prism_fixtures::PatchError;
use thiserror::Error;

use crate::artnet::{ArtNetError, PacketError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error(transparent)]
    Recoverable(#[from] RecoverableError),
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Failed to open {interface} output: {reason}")]
    Connection { interface: String, reason: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    FixtureProfile(#[from] PatchError),
    #[error("Default scene '{scene}' not found in {dir}")]
    Scene { scene: String, dir: String },
}

#[derive(Debug, Error)]
pub enum RecoverableError {
    #[error("DMX transmission failed: {0}")]
    Transmission(String),
    #[error("Invalid DMX channel {0}")]
    Address(u32),
    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },
}

impl From<ArtNetError> for RecoverableError {
    fn from(err: ArtNetError) -> Self {
        RecoverableError::Transmission(err.to_string())
    }
}

impl From<PacketError> for RecoverableError {
    fn from(err: PacketError) -> Self {
        RecoverableError::Transmission(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

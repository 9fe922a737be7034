use thiserror::Error;

use crate::{modulation::source::ModulatorId, patch::params::ParamId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModulationError {
    #[error("{modulator:?} cannot modulate parameter {param:?}")]
    InvalidRouting {
        param: ParamId,
        modulator: ModulatorId,
    },
    #[error("modulation depth must be finite, got {0}")]
    NonFiniteDepth(f32),
    #[error("source scene {0} does not exist")]
    NoSuchScene(usize),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchError {
    #[error("no patch with id {0}")]
    NotFound(usize),
    #[error("patch {id} is malformed: {reason}")]
    Malformed { id: usize, reason: String },
    #[error("patch {id} has {found} parameter values, expected {expected}")]
    ParameterCount {
        id: usize,
        found: usize,
        expected: usize,
    },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DspError {
    #[error("voice unit produced non-finite output")]
    NonFinite,
    #[error("voice unit failed: {0}")]
    Failed(&'static str),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("control queue is full")]
    QueueFull,
    #[error("parameter {0:?} does not exist")]
    UnknownParameter(ParamId),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Modulation(#[from] ModulationError),
    #[error("failed to spawn patch loader thread")]
    Spawn(#[from] std::io::Error),
}

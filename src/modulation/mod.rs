//! Modulation sources, controller smoothing and the routing matrix.

pub mod bank;
pub mod controller;
pub mod interpolator;
pub mod routing;
pub mod source;

pub use bank::{ModulatorBank, NoteDraw};
pub use controller::{ControllerSource, SmoothingMode};
pub use interpolator::InterpolatorPool;
pub use routing::{is_valid_modulation, Routing, RoutingMatrix, RoutingSpec};
pub use source::ModulatorId;

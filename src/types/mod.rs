pub mod ids;
pub mod instrument;
pub mod observation;

pub use ids::{CycleId, RunId, SourceId, Symbol};
pub use instrument::{AssetClass, DataType, Instrument};
pub use observation::{Observation, Payload, PositioningRecord};

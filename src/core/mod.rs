pub mod cycle;
pub mod orchestrator;
pub mod publisher;
pub mod scheduler;
pub mod status;

pub use cycle::{Cycle, Stage, TierOutcome, TierOutcomes};
pub use orchestrator::Orchestrator;
pub use publisher::ArtifactWriter;
pub use scheduler::Scheduler;
pub use status::{PipelineStatus, ProviderStatus};

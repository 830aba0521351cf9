pub mod queues;
pub mod stats;

pub use queues::Timeout;
pub use stats::StatsSnapshot;

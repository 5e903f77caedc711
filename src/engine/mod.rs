//! Ingestion engine: worker pool, fetch-and-persist unit, batch throttle,
//! shutdown coordination.

pub mod control;
pub mod pool;
pub mod retry;
pub mod shutdown;
pub mod throttle;
pub mod unit;

pub use control::{Ingestor, QueueMode, RunReport};
pub use pool::WorkerPool;
pub use retry::RetryPolicy;
pub use shutdown::{RunState, Shutdown};
pub use throttle::BatchThrottle;
pub use unit::FetchAndPersist;

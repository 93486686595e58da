pub mod observer;
pub mod queue;
pub mod session_store;

pub use observer::{RecordingObserver, SessionActivity, SessionObserver, TracingObserver};
pub use queue::{QueueManager, QueueOp, QueueOutcome};
pub use session_store::{QueueChange, SessionStore};

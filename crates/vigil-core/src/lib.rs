//! vigil-core — presence-driven lock coordination.
//!
//! Consumes presence transitions and authoritative lock-state events and
//! derives a consistent lock/unlock decision with a cancellable countdown.
//! All I/O lives behind the [`SessionBackend`] and [`PresenceSource`] seams.

pub mod backend;
pub mod coordinator;
pub mod events;
pub mod scheduler;

pub use backend::{
    BackendError, InhibitCookie, InhibitGuard, NullPresenceSource, PresenceSource, SessionBackend,
};
pub use coordinator::{Coordinator, CoordinatorError};
pub use events::{Notification, NotificationBus, NotificationReceiver};
pub use scheduler::{ScheduleError, TrainError, TrainingJob, TrainingScheduler};

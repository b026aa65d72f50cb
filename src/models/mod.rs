//! Domain models shared by the pipeline stages.

pub mod event;
pub mod keys;
pub mod queue;
pub mod subscriber;
pub mod tag;
pub mod trigger;

pub use event::{Event, EventValidationError, kinds};
pub use queue::{NotificationPayload, PendingNotifications, QueueItem};
pub use subscriber::{
    Frequency, Preferences, PreferencesUpdate, PushKeys, QuietHours, SubscriberRecord,
};
pub use tag::{EventTag, Tag};
pub use trigger::{NotificationTrigger, Priority, TriggerType};

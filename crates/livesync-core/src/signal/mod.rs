//! Refresh triggers: push subscriptions, debouncing, polling, and the
//! loading watchdog.

mod debounce;
mod polling;
mod subscription;
mod watchdog;

pub use debounce::DebounceGate;
pub use polling::PollingScheduler;
pub use subscription::{
    BroadcastPushChannel, ChangeSubscription, PushChannel, PushSignal, SubscriptionHandle,
};
pub use watchdog::SafetyWatchdog;

//! Storefront side of the upsell: decides when to surface the prompt and
//! drives the proxy calls behind it.

pub mod client;
pub mod clock;
pub mod controller;
pub mod runtime;
pub mod storage;
pub mod view;
pub mod watcher;

pub use client::{
    CartClient, ClientError, HttpCartClient, HttpUpsellApi, RecommendationParams, UpsellApi,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use controller::{PageContext, TriggerCommand, TriggerConfig, TriggerController, TriggerState};
pub use runtime::{HostPage, WidgetHandle, WidgetRuntime, WidgetSnapshot};
pub use storage::{
    EngagementSnapshot, EngagementStore, JsonFileStore, KeyValueStore, MemoryStore, StorageError,
};
pub use view::{CartFollowUp, ItemStatus, ItemView, PromptModel, PromptView};
pub use watcher::{SelectionWatcher, WatchTick};

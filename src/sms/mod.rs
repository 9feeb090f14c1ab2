pub mod events;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod processor;
pub mod provider;
pub mod repo;
pub mod webhook;

pub use lock::LockRepo;
pub use model::{NewSms, SmsMessage, SmsStatus};
pub use processor::{PassSummary, QueueProcessor};
pub use provider::{SendOutcome, SmsProvider};
pub use repo::SmsRepo;
pub use webhook::Reconciler;

pub mod api;
pub mod config;
pub mod db;
pub mod ratelimit;
pub mod sms;
pub mod telemetry;

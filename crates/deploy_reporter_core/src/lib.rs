pub mod changes;
pub mod config;
pub mod dedup;
pub mod deploy_alerts;
pub mod http;
pub mod notify;
pub mod orchestrator;
pub mod publish;
pub mod render;
pub mod runlog;
pub mod snapshot;
pub mod tracker;
pub mod window;

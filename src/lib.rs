pub mod auth;
pub mod engine;
pub mod jobs;
pub mod limits;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod tasks;
pub mod tls;
pub mod wal;
pub mod wire;

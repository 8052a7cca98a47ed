pub mod channel;
pub mod cipher;
pub mod config;
pub mod error;
pub mod job;
pub mod state;
pub mod supervisor;

pub use channel::send_input;
pub use cipher::CipherGateway;
pub use config::Config;
pub use error::BgjobError;
pub use job::{JobRecord, JobStatus, StateDoc, resolve_id, short_id};
pub use state::{StateStore, pid_alive, reconcile};
pub use supervisor::Supervisor;

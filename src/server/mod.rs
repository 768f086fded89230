pub mod context;
pub mod file_api;
pub mod log_channel;
pub mod routes;
pub mod ws;

pub use context::{AppContext, AppError};
pub use file_api::{delete_file, read_file, resolve_safe_path, write_file, FileApiError};
pub use log_channel::{LogChannelRegistry, ProjectChannel, SharedLogChannels, SubscriptionId};
pub use routes::{build_router, run_server, serve};

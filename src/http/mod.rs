mod handlers;
mod server;

pub use handlers::{routes, AppState};
pub use server::start_server;

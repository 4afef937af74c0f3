pub mod chat;
pub mod embeddings;
pub mod keys;
pub mod models;
pub mod response;
pub mod send_message;
pub mod state;

pub use response::ApiError;
pub use state::AppState;

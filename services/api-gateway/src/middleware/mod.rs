pub mod auth;
pub mod error_handling;
pub mod request_id;
pub mod tier;

pub use auth::*;
pub use error_handling::*;
pub use request_id::*;
pub use tier::*;

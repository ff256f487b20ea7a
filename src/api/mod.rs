//! Web response surface — the volunteer-facing HTTP paths.

pub mod response;
pub mod routes;

pub use response::ResponseService;
pub use routes::{ApiState, api_routes};

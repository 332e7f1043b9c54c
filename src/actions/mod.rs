pub mod executor;
pub mod governor;
pub mod models;
pub mod routes;

pub use executor::Executor;
pub use governor::{ActionGovernor, Decision, GovernorError};
pub use models::{ActionStatus, ActionType, PendingAction};

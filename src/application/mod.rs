// Application layer - use cases and orchestration.
// The account ledger owns every balance mutation; clients (CLI, HTTP)
// only hand it an authenticated user id and a typed request.

mod accounts;
pub mod error;
mod locks;
pub mod password;
mod requests;
mod service;

pub use error::*;
pub use locks::{UserLockGuard, UserLocks};
pub use requests::{AddFundsRequest, ConvertRequest, IssueCardRequest};
pub use service::*;

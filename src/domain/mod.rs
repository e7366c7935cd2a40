mod card;
mod ledger;
mod money;
mod notification;
mod transaction;
mod user;

pub use card::*;
pub use ledger::*;
pub use money::*;
pub use notification::*;
pub use transaction::*;
pub use user::*;

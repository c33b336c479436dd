mod account;
mod audit;
mod integrity;
mod money;
mod scope;
mod transaction;

pub use account::*;
pub use audit::*;
pub use integrity::*;
pub use money::*;
pub use scope::*;
pub use transaction::*;

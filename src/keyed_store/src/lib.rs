mod async_store;
mod memory_store;
mod simple_store;
mod sqlite_store;
mod transaction;


pub use async_store::*;
pub use memory_store::*;
pub use simple_store::*;
pub use sqlite_store::*;
pub use transaction::*;

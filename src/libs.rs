pub mod core;
pub mod friendship;
pub mod gateway;
pub mod logging;
pub mod messaging;
pub mod storage;
pub mod sync;
pub mod users;

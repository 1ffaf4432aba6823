pub mod aggregate;
pub mod crypto;
pub mod error;
pub mod merge;
pub mod models;
pub mod quota;
pub mod relay;
pub mod storage;
pub mod store;
pub mod sync;

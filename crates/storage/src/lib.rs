pub mod sled;

pub use sled::SledDB;

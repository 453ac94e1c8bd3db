pub mod converter;
pub mod db_keys;
pub mod config;
pub mod logging;

pub mod content_api;
pub mod dynamodb;
pub mod in_process;
pub mod integration;
pub mod invoke;
pub mod state_store;

pub mod config;
pub mod queue;
pub mod routes;
pub mod sandbox;
pub mod toolchain;
pub mod web_server;
pub mod worker;

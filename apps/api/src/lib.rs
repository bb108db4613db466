// Library surface shared by the `api` service binary and the
// `build-index` batch binary.

pub mod catalog;
pub mod config;
pub mod db;
pub mod errors;
pub mod llm_client;
pub mod matcher;
pub mod models;
pub mod projects;
pub mod routes;
pub mod state;
pub mod vector_store;

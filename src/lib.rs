pub mod app;
pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod poller;
pub mod store;
pub mod tmdb;
pub mod view;

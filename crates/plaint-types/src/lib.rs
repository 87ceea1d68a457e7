pub mod api;
pub mod catalog;
pub mod events;
pub mod models;

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod game;
pub mod pending;
pub mod reconcile;
pub mod ui;

// homeboard - home dashboard backend with an encrypted OAuth credential cache

pub mod calendar;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod oauth;
pub mod photos;
pub mod server;
pub mod services;
pub mod utils;

pub mod auth;
pub mod constants;
pub mod correlation;
pub mod handlers;
pub mod idp;
pub mod service;
pub mod signing;
pub mod vault;

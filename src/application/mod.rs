//! Application services: identity resolution and account authorization.

pub mod authorization;
pub mod error;
pub mod identity;
pub mod repos;

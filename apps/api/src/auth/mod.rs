// Credential and session management: access tokens, rotating refresh
// sessions, email verification and password reset.

pub mod account;
pub mod cookies;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod tokens;

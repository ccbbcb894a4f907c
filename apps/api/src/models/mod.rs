pub mod preference;
pub mod user;

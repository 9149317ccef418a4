pub mod admin;
pub mod auth;
pub mod biometrics;
pub mod certificates;
pub mod company;
pub mod sessions;

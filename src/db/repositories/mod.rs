mod certificate_repository;
mod postgres;
mod session_repository;
mod user_repository;

pub use certificate_repository::CertificateRepository;
pub use postgres::{PgStore, PgTx};
pub use session_repository::SessionRepository;
pub use user_repository::UserRepository;

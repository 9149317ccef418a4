mod certificate;
mod company;
mod student;
mod task;
mod training_session;
mod user;

pub use certificate::*;
pub use company::*;
pub use student::*;
pub use task::*;
pub use training_session::*;
pub use user::*;

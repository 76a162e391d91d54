//! Repository implementations for PostgreSQL.

mod buildset;
mod change;
mod scheduler;
mod sourcestamp;

pub use buildset::PgBuildsetRepository;
pub use change::PgChangeRepository;
pub use scheduler::PgSchedulerStateRepository;
pub use sourcestamp::PgSourceStampRepository;

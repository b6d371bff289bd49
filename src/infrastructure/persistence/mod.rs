pub mod log_entry_in_memory;
pub mod log_entry_postgres;

pub use log_entry_in_memory::InMemoryLogEntryRepository;
pub use log_entry_postgres::LogEntryPostgresRepository;

pub mod log_entry_repository;

pub use log_entry_repository::LogEntryRepository;

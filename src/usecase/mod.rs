pub mod delete_log_entry;
pub mod emit_log;
pub mod get_log_entries_by_date_range;
pub mod get_log_entries_by_request_id;
pub mod get_log_entries_by_user_id;
pub mod get_log_entry;
pub mod ingest_log;
pub mod list_log_entries;

pub use delete_log_entry::DeleteLogEntryUseCase;
pub use emit_log::{ApiRequestLog, EmitLogInput, EmitLogUseCase};
pub use get_log_entries_by_date_range::GetLogEntriesByDateRangeUseCase;
pub use get_log_entries_by_request_id::GetLogEntriesByRequestIdUseCase;
pub use get_log_entries_by_user_id::GetLogEntriesByUserIdUseCase;
pub use get_log_entry::GetLogEntryUseCase;
pub use ingest_log::{IngestError, IngestLogUseCase};
pub use list_log_entries::ListLogEntriesUseCase;

pub const EVENTS_RECEIVED: &str = "processor_events_received_total";
pub const EVENTS_WRITTEN: &str = "processor_events_written_total";
pub const BATCHES_PROCESSED: &str = "processor_batches_processed_total";
pub const BATCH_SIZE: &str = "processor_batch_size";
pub const BATCH_PROCESSING_TIME: &str = "processor_batch_processing_time_ms";
pub const BATCHES_DEAD_LETTERED: &str = "processor_batches_dead_lettered_total";
pub const DEAD_LETTER_RECORDS: &str = "processor_dead_letter_records_total";
pub const DEAD_LETTER_PUBLISH_FAILURES: &str = "processor_dead_letter_publish_failures_total";
pub const EMPTY_RECORDS: &str = "processor_empty_records_total";
pub const RECV_ERRORS: &str = "processor_recv_errors_total";
pub const BATCH_RETRIES: &str = "processor_batch_retries_total";
pub const CONSUMER_LAG: &str = "processor_consumer_lag";
pub const ARCHIVE_BUFFERED_PAYLOADS: &str = "processor_archive_buffered_payloads";
pub const ARCHIVED_PAYLOADS: &str = "processor_archived_payloads_total";
pub const ARCHIVE_FLUSHES: &str = "processor_archive_flushes_total";
pub const ARCHIVE_FLUSH_FAILURES: &str = "processor_archive_flush_failures_total";
pub const ARCHIVE_FLUSH_TIME: &str = "processor_archive_flush_time_ms";
pub const STREAM_SUBSCRIBERS: &str = "processor_metrics_stream_subscribers";

mod common;
mod job_queue_tests;

mod common;
mod resync_tests;
mod service_tests;

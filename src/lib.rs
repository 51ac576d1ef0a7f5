pub mod ledger;
pub mod metrics;
pub mod models;
pub mod scanner;
pub mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub mod capture;
pub mod clean;
pub mod dedup;
pub mod dispatch;
pub mod oracle;
pub mod parse;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod transport;
pub mod worker;

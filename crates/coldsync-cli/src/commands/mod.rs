pub mod common;
pub mod enqueue;
pub mod failed;
pub mod reap;
pub mod restore;
pub mod retry;
pub mod run;
pub mod scan;
pub mod stats;

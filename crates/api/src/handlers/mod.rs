pub mod jobs;
pub mod storage;

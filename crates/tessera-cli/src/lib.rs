pub mod report;
pub mod scene;

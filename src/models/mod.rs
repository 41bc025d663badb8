pub mod backup;
pub mod policy;
pub mod report;
pub mod settings;

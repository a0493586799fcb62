pub mod backup;
pub mod core;
pub mod documents;
pub mod exports;
pub mod records;
pub mod reports;
pub mod search;
pub mod selection;
pub mod setup;

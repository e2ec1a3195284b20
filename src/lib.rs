pub mod af;
pub mod app;
pub mod dbsnp;
pub mod error;
pub mod store;
pub mod table;
pub mod tissue;
pub mod variant;

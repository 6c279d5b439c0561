pub mod local;
pub mod mysql;

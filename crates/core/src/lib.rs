pub mod config;
pub mod datasources;
pub mod execution;
pub mod history;
pub mod multiplexer;
pub mod notice;
pub mod pager;
pub mod polling;
pub mod reconciler;
pub mod run_mode;
pub mod service;
pub mod session;
pub mod statements;
pub mod tab_store;
pub mod virtualizer;
pub mod workbench;

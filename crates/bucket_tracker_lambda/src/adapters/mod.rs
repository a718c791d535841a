pub mod history_table;
pub mod log_sink;
pub mod memory;
pub mod object_store;
pub mod plot_endpoint;

pub mod capture_sink;
pub mod page_protector;

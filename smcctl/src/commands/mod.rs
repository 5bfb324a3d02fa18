mod catalog;
mod serve;

pub use catalog::{CatalogCommands, CatalogListArgs};
pub use serve::{parse_listen_addr, serve, ServeArgs};

pub mod changelog;
pub mod layout;
pub mod links;
pub mod remote;
pub mod schema;

pub use layout::Layout;
pub use remote::{RemoteStore, Scope};
pub use schema::SchemaRegistry;

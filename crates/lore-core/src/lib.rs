pub mod document;
pub mod error;
pub mod links;
pub mod model;

pub use document::*;
pub use error::*;
pub use links::*;
pub use model::*;

pub mod config;
pub mod engine;
pub mod query;
pub mod replicate;
pub mod validator;
pub mod view;

pub use config::EngineConfig;
pub use engine::KnowledgeGraph;
pub use query::{GrepMatch, GrepOptions};
pub use validator::{
    custom, freeze_schema, no_orphans, requires_field, requires_link, requires_tag, Rule,
    Validator,
};
pub use view::GraphView;

pub use lore_core::{LoreError, LoreResult, Metadata, NodeInfo, Violation, UNTYPED};
pub use lore_store::{Layout, RemoteStore, Scope};

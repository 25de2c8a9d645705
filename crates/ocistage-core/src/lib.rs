mod config;
mod pending;
mod tags;

pub use config::{BackendConfig, StageConfig, ToolConfig};
pub use pending::PendingConfig;
pub use tags::{
    contains_tag, next_version_tag, parse_tag_list, version_tag_prefix, EMPTY_TAG,
};

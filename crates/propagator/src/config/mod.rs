pub mod loader;
pub mod resolver;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use resolver::{ConfigResolver, LayerConfig, MergeDefaults, RepoLayerConfig, StaticConfigResolver};
pub use schema::{
    AuthType, Config, GitConfig, HostingConfig, HostingProvider, LayerMapping, MergeConfig,
    RepoAuth, RepoLocation, RepositoryConfig, WaitForBlockedConfig,
};

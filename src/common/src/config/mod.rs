use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "metricsql.toml";

/// Prefix for environment overrides, e.g. `METRICSQL__TRANSPILER__CANONICAL_GROUPING`
pub const ENV_PREFIX: &str = "METRICSQL__";

/// Settings that shape the SQL produced by the transpiler
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranspilerConfig {
    /// Group `by (...)` aggregations on the extracted label values instead of
    /// the full label string
    pub canonical_grouping: bool,
    /// Use the historical `label_del` (drop matching rows) and `label_keep`
    /// (pass-through) behavior
    pub legacy_label_ops: bool,
    /// Bind `=~` / `!~` patterns anchored so SQL matching agrees with the
    /// in-process matcher
    pub anchor_regex_matchers: bool,
    /// Upper bound on the size of a query string accepted by the frontend
    pub max_query_bytes: usize,
}

impl Default for TranspilerConfig {
    fn default() -> Self {
        Self {
            canonical_grouping: true,
            legacy_label_ops: false,
            anchor_regex_matchers: false,
            max_query_bytes: 64 * 1024, // 64KB
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Transpiler behavior
    pub transpiler: TranspilerConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

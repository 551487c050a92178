use serde::{Deserialize, Serialize};

/// Output format and verbosity for structured logs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// https://docs.swh.dev/winery/configuration/logging/
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Logging {
    /// _Default:_ `pretty`
    #[serde(default)]
    pub format: LogFormat,

    /// `tracing-subscriber` `EnvFilter` directive, e.g. `info` or
    /// `winery=debug,sqlx=warn`.
    ///
    /// _Default:_ `info`
    #[serde(default = "Logging::filter")]
    pub filter: String,
}

impl Logging {
    fn filter() -> String {
        "info".into()
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: Self::filter(),
        }
    }
}

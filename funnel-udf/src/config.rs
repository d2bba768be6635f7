use envconfig::Envconfig;
use funnel_engine::definition::{parse_window, WindowSpec, DEFAULT_CONVERSION_WINDOW};
use funnel_engine::FunnelError;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Size of the rayon pool used for matching. 0 lets rayon pick one thread per core.
    #[envconfig(from = "FUNNEL_EVAL_NUM_THREADS", default = "0")]
    pub eval_num_threads: usize,

    /// Window used when a funnel does not set one
    #[envconfig(from = "FUNNEL_DEFAULT_CONVERSION_WINDOW", default = "24h")]
    pub default_conversion_window: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            eval_num_threads: 0,
            default_conversion_window: DEFAULT_CONVERSION_WINDOW.to_string(),
        }
    }
}

impl Config {
    /// Parses the default window once. Funnels that do not set a window get it as whole seconds.
    pub fn default_window(&self) -> Result<WindowSpec, FunnelError> {
        let window = parse_window(&self.default_conversion_window)?;
        Ok(WindowSpec::Seconds(window.num_seconds()))
    }
}

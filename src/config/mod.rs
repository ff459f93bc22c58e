mod settings;

pub use settings::{
    LogFormat, LoggingConfig, PipelineConfig, Settings, ShutdownSettings, SimulationConfig,
    TopicOverride,
};

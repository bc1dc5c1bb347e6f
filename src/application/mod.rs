pub mod scores_service;

pub use scores_service::MonitorScoresService;

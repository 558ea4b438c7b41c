/// Stage a worker is in; the CLI colours its bar accordingly
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    RED,
    GREEN,
}

impl BarColor {
    pub fn stage_name(&self) -> &'static str {
        match self {
            BarColor::CYAN => "Monitoring",
            BarColor::RED => "Skipped",
            BarColor::GREEN => "Done",
        }
    }
}

/// Progress message sent by a worker over its mpsc channel
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub period: String,
    pub channel: String,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(
        progress: f32,
        period: &str,
        channel: &str,
        worker_id: usize,
        color: BarColor,
    ) -> Self {
        Self {
            progress,
            period: period.to_string(),
            channel: channel.to_string(),
            worker_id,
            color,
        }
    }
}

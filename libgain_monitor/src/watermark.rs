use std::path::Path;

use super::error::WatermarkError;

/// The "last checked" unix timestamp shared between pipeline invocations. Samples at or
/// before it have already been scanned for alerts.
pub struct Watermark;

impl Watermark {
    /// Read the watermark. A missing file means nothing was checked yet.
    pub fn load(path: &Path) -> Result<Option<f64>, WatermarkError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let contents = contents.trim();
        if contents.is_empty() {
            return Ok(None);
        }
        Ok(Some(contents.parse::<f64>()?))
    }

    /// Persist a new watermark, replacing the old one
    pub fn store(path: &Path, timestamp: f64) -> Result<(), WatermarkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{timestamp}\n"))?;
        Ok(())
    }
}

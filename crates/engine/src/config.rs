//! Engine tunables. Front-ends load these from their own config layer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows carried in the `preview` of a `finished` event.
    pub preview_rows: usize,
    /// Rows per import/export batch; cancellation and progress are checked per batch.
    pub chunk_rows: usize,
    /// Rows sampled to infer column types for CSV and JSON imports.
    pub infer_sample_rows: usize,
    /// Lines inspected when sniffing a CSV delimiter.
    pub sniff_lines: usize,
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_rows: 10,
            chunk_rows: 10_000,
            infer_sample_rows: 1_000,
            sniff_lines: 20,
            event_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("preview_rows", self.preview_rows),
            ("chunk_rows", self.chunk_rows),
            ("infer_sample_rows", self.infer_sample_rows),
            ("sniff_lines", self.sniff_lines),
            ("event_capacity", self.event_capacity),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg: EngineConfig = serde_yaml::from_str("chunk_rows: 500\n").unwrap();
        assert_eq!(cfg.chunk_rows, 500);
        assert_eq!(cfg.preview_rows, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let cfg = EngineConfig {
            event_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            cfg.validate().unwrap_err(),
            "event_capacity must be greater than zero"
        );
    }

    #[test]
    fn test_zero_preview_rows_rejected() {
        let cfg: EngineConfig = serde_yaml::from_str("preview_rows: 0\n").unwrap();
        assert_eq!(
            cfg.validate().unwrap_err(),
            "preview_rows must be greater than zero"
        );
    }
}

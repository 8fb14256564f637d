//! Workflow data model and configuration format.
//!
//! A workflow is immutable input: host/port, an optional output file path,
//! an ordered step list, and ramp-up tuning. The JSON wire format keeps the
//! historical PascalCase field names. Rows and columns are 1-based here;
//! the driver converts to 0-based on the wire.

use crate::transpile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tn3270_common::{WorkflowError, WorkflowResult};
use tn3270_emulator::AidKey;

/// Default ramp-up batch size when the configured value is absent or
/// non-positive.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default inter-batch delay when the configured value is absent or
/// non-positive.
pub const DEFAULT_RAMP_DELAY: Duration = Duration::from_secs(1);

/// Field-ready wait applied implicitly after every Connect step.
pub const CONNECT_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Screen coordinates as they appear in workflow JSON. Zero means "unset".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(rename = "Row", default)]
    pub row: u16,
    #[serde(rename = "Column", default)]
    pub column: u16,
    #[serde(rename = "Length", default)]
    pub length: u16,
}

/// One step as parsed from JSON, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    #[serde(rename = "Type")]
    pub step_type: String,
    #[serde(rename = "Coordinates", default)]
    pub coordinates: Coordinates,
    #[serde(rename = "Text", default)]
    pub text: String,
}

/// Top-level workflow configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(rename = "Host", default)]
    pub host: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "OutputFilePath", default)]
    pub output_file_path: String,
    #[serde(rename = "InputFilePath", default)]
    pub input_file_path: String,
    #[serde(rename = "Steps", default)]
    pub steps: Vec<RawStep>,
    #[serde(rename = "RampUpBatchSize", default)]
    pub ramp_up_batch_size: i64,
    #[serde(rename = "RampUpDelay", default)]
    pub ramp_up_delay: f64,
}

/// A validated workflow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Connect,
    Disconnect,
    WaitForField { timeout: Duration },
    MoveCursor { row: u16, col: u16 },
    FillString { row: u16, col: u16, text: String },
    SetString { text: String },
    GetValue { row: u16, col: u16, length: u16 },
    CheckValue { row: u16, col: u16, length: u16, expected: String },
    Press(AidKey),
    AsciiScreenGrab,
    InitializeOutput,
}

impl Step {
    /// Parses and validates one raw step.
    pub fn from_raw(raw: &RawStep) -> WorkflowResult<Self> {
        let c = raw.coordinates;
        match raw.step_type.as_str() {
            "Connect" => Ok(Step::Connect),
            "Disconnect" => Ok(Step::Disconnect),
            "AsciiScreenGrab" => Ok(Step::AsciiScreenGrab),
            "InitializeOutput" => Ok(Step::InitializeOutput),
            "WaitForField" => {
                let timeout = raw
                    .text
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| *secs > 0.0)
                    .map(Duration::from_secs_f64)
                    .unwrap_or(CONNECT_SETTLE_TIMEOUT);
                Ok(Step::WaitForField { timeout })
            }
            "MoveCursor" => {
                if c.row == 0 || c.column == 0 {
                    return Err(WorkflowError::config(
                        "coordinates are incomplete in a MoveCursor step",
                    ));
                }
                Ok(Step::MoveCursor {
                    row: c.row,
                    col: c.column,
                })
            }
            "FillString" => {
                if raw.text.is_empty() {
                    return Err(WorkflowError::config("text is empty in a FillString step"));
                }
                Ok(Step::FillString {
                    row: c.row,
                    col: c.column,
                    text: raw.text.clone(),
                })
            }
            "SetString" => {
                if raw.text.is_empty() {
                    return Err(WorkflowError::config("text is empty in a SetString step"));
                }
                Ok(Step::SetString {
                    text: raw.text.clone(),
                })
            }
            "GetValue" => {
                if c.row == 0 || c.column == 0 || c.length == 0 {
                    return Err(WorkflowError::config(
                        "coordinates are incomplete in a GetValue step",
                    ));
                }
                Ok(Step::GetValue {
                    row: c.row,
                    col: c.column,
                    length: c.length,
                })
            }
            "CheckValue" => {
                if c.row == 0 || c.column == 0 || c.length == 0 {
                    return Err(WorkflowError::config(
                        "coordinates are incomplete in a CheckValue step",
                    ));
                }
                if raw.text.is_empty() {
                    return Err(WorkflowError::config("text is empty in a CheckValue step"));
                }
                Ok(Step::CheckValue {
                    row: c.row,
                    col: c.column,
                    length: c.length,
                    expected: raw.text.clone(),
                })
            }
            "Press" => {
                let key = AidKey::parse(&raw.text)
                    .map_err(|e| WorkflowError::config(e.to_string()))?;
                Ok(Step::Press(key))
            }
            // PressEnter, PressTab, PressPF1 .. PressPF24
            other if other.starts_with("Press") => {
                let key = AidKey::parse(&other["Press".len()..])
                    .map_err(|_| WorkflowError::unknown_step(other))?;
                Ok(Step::Press(key))
            }
            other => Err(WorkflowError::unknown_step(other)),
        }
    }

    /// Step tag for logs and error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Connect => "Connect",
            Step::Disconnect => "Disconnect",
            Step::WaitForField { .. } => "WaitForField",
            Step::MoveCursor { .. } => "MoveCursor",
            Step::FillString { .. } => "FillString",
            Step::SetString { .. } => "SetString",
            Step::GetValue { .. } => "GetValue",
            Step::CheckValue { .. } => "CheckValue",
            Step::Press(_) => "Press",
            Step::AsciiScreenGrab => "AsciiScreenGrab",
            Step::InitializeOutput => "InitializeOutput",
        }
    }
}

/// A validated, immutable workflow.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub host: String,
    pub port: u16,
    pub output_path: Option<PathBuf>,
    pub steps: Vec<Step>,
    pub batch_size: usize,
    pub delay: Duration,
}

impl Workflow {
    /// Validates a parsed configuration. When `InputFilePath` is set, the
    /// transpiled file replaces the `Steps` array.
    pub fn from_config(config: &WorkflowConfig) -> WorkflowResult<Self> {
        if config.host.is_empty() {
            return Err(WorkflowError::config("host is empty"));
        }
        if config.port == 0 {
            return Err(WorkflowError::config("port is invalid"));
        }

        let steps = if config.input_file_path.is_empty() {
            config
                .steps
                .iter()
                .map(Step::from_raw)
                .collect::<WorkflowResult<Vec<_>>>()?
        } else {
            transpile::load_input_file(Path::new(&config.input_file_path))?
        };

        let batch_size = if config.ramp_up_batch_size > 0 {
            config.ramp_up_batch_size as usize
        } else {
            DEFAULT_BATCH_SIZE
        };
        let delay = if config.ramp_up_delay > 0.0 {
            Duration::from_secs_f64(config.ramp_up_delay)
        } else {
            DEFAULT_RAMP_DELAY
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            output_path: if config.output_file_path.is_empty() {
                None
            } else {
                Some(PathBuf::from(&config.output_file_path))
            },
            steps,
            batch_size,
            delay,
        })
    }

    /// Loads and validates a workflow JSON file.
    pub fn load(path: &Path) -> WorkflowResult<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: WorkflowConfig = serde_json::from_str(&data)
            .map_err(|e| WorkflowError::config(format!("invalid workflow JSON: {e}")))?;
        Self::from_config(&config)
    }
}

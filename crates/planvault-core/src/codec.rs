use crate::error::Result;
use crate::paths;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const YAML_EXT: &str = ".yaml";
pub const JSON_EXT: &str = ".json";

// ---------------------------------------------------------------------------
// HistoryFormat
// ---------------------------------------------------------------------------

/// On-disk format for history records. Chosen once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryFormat {
    #[default]
    Yaml,
    FormattedJson,
    CompressedJson,
}

impl HistoryFormat {
    pub fn extension(self) -> &'static str {
        match self {
            HistoryFormat::Yaml => YAML_EXT,
            HistoryFormat::FormattedJson | HistoryFormat::CompressedJson => JSON_EXT,
        }
    }

    pub fn is_json(self) -> bool {
        !matches!(self, HistoryFormat::Yaml)
    }

    /// The extension the other family of formats writes.
    pub fn alternate_extension(self) -> &'static str {
        if self.is_json() {
            YAML_EXT
        } else {
            JSON_EXT
        }
    }
}

impl fmt::Display for HistoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HistoryFormat::Yaml => "Yaml",
            HistoryFormat::FormattedJson => "FormattedJson",
            HistoryFormat::CompressedJson => "CompressedJson",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    format: HistoryFormat,
}

impl Codec {
    pub fn new(format: HistoryFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> HistoryFormat {
        self.format
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    pub fn encode<T: Serialize>(&self, record: &T) -> Result<String> {
        encode(record, self.format)
    }

    /// Decode using the format implied by `key`'s extension, so records
    /// written under an earlier format still load. Unknown extensions are
    /// read as YAML.
    pub fn decode<T: DeserializeOwned>(&self, key: &str, text: &str) -> Result<T> {
        decode(key, text)
    }
}

pub fn encode<T: Serialize>(record: &T, format: HistoryFormat) -> Result<String> {
    let text = match format {
        HistoryFormat::Yaml => serde_yaml::to_string(record)?,
        HistoryFormat::FormattedJson => serde_json::to_string_pretty(record)?,
        HistoryFormat::CompressedJson => serde_json::to_string(record)?,
    };
    Ok(text)
}

pub fn decode<T: DeserializeOwned>(key: &str, text: &str) -> Result<T> {
    match paths::extension(key).as_deref() {
        Some(JSON_EXT) => Ok(serde_json::from_str(text)?),
        _ => Ok(serde_yaml::from_str(text)?),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionItem, Plan, StatusType};
    use chrono::Utc;

    fn sample() -> Plan {
        let mut plan = Plan::new("sample");
        plan.instance_id = 638_000_000_000_000_001;
        plan.description = Some("nightly rollup".into());
        plan.result.status = StatusType::Running;
        plan.result.begin_time = Some(Utc::now());
        let mut step = ActionItem::new("extract", 0).with_status(StatusType::Complete);
        step.parameters = Some(serde_yaml::from_str("Target: warehouse\nRetries: 3\n").unwrap());
        step.actions.push(ActionItem::new("load", 0));
        plan.actions.push(step);
        plan
    }

    #[test]
    fn every_format_round_trips_structurally() {
        let plan = sample();
        for format in [
            HistoryFormat::Yaml,
            HistoryFormat::FormattedJson,
            HistoryFormat::CompressedJson,
        ] {
            let codec = Codec::new(format);
            let text = codec.encode(&plan).unwrap();
            let key = format!("h/sample_1{}", codec.extension());
            let back: Plan = codec.decode(&key, &text).unwrap();
            assert_eq!(back, plan, "format {format}");
        }
    }

    #[test]
    fn compressed_json_is_single_line() {
        let text = encode(&sample(), HistoryFormat::CompressedJson).unwrap();
        assert!(!text.contains('\n'));
        let pretty = encode(&sample(), HistoryFormat::FormattedJson).unwrap();
        assert!(pretty.contains("\n  \"UniqueName\""));
    }

    #[test]
    fn decode_follows_extension_not_active_format() {
        let plan = sample();
        let json = encode(&plan, HistoryFormat::FormattedJson).unwrap();
        let yaml_codec = Codec::new(HistoryFormat::Yaml);
        let back: Plan = yaml_codec.decode("h/sample_1.JSON", &json).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn extensions() {
        assert_eq!(HistoryFormat::Yaml.extension(), ".yaml");
        assert_eq!(HistoryFormat::CompressedJson.extension(), ".json");
        assert_eq!(HistoryFormat::FormattedJson.alternate_extension(), ".yaml");
        assert_eq!(HistoryFormat::Yaml.alternate_extension(), ".json");
    }
}

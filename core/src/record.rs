use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// One structured command from a recorded session.
///
/// `output` carries the line editor's snapshot verbatim, trailing `\r\n`
/// included. `id` is the decimal rendering of the process-wide record
/// counter; it starts at 1 and never repeats, resets included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub command: String,
    pub output: String,
    #[serde(with = "rfc3339_nanos")]
    pub return_timestamp: DateTime<Utc>,
}

impl Record {
    pub fn new(
        sequence: u64,
        command: String,
        output: String,
        return_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: sequence.to_string(),
            command,
            output,
            return_timestamp,
        }
    }
}

/// RFC-3339 with forced nanosecond precision and an explicit offset, so two
/// records stamped within the same microsecond still order textually.
mod rfc3339_nanos {
    use chrono::DateTime;
    use chrono::SecondsFormat;
    use chrono::Utc;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use serde::de::Error as _;

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

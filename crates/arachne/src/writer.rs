use std::borrow::Cow;
use std::path::PathBuf;

use arachne_crawler::serde_json::Value;
use arachne_crawler::Settings;
use serde::{Deserialize, Serialize};

/// Root directory of exported files
pub const EXPORT_DIR: &str = "EXPORT_DIR";

/// Optional [`CsvWriterConfig`] used by the CSV export
pub const CSV_WRITER: &str = "CSV_WRITER";

pub fn export_dir(settings: &Settings) -> anyhow::Result<PathBuf> {
    Ok(settings
        .get_as::<PathBuf>(EXPORT_DIR)?
        .unwrap_or_else(|| PathBuf::from("exports")))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsvWriterConfig {
    #[serde(default = "default_csv_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub escape: Option<char>,
    #[serde(default)]
    pub flexible: bool,
    #[serde(default = "default_csv_terminator")]
    pub terminator: CsvTerminator,
}

impl Default for CsvWriterConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            escape: None,
            flexible: false,
            terminator: CsvTerminator::Any('\n'),
        }
    }
}

fn default_csv_delimiter() -> char {
    CsvWriterConfig::default().delimiter
}

fn default_csv_terminator() -> CsvTerminator {
    CsvWriterConfig::default().terminator
}

impl CsvWriterConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let config: Self = settings.get_as(CSV_WRITER)?.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// The csv writer works on single bytes.
    pub fn validate(&self) -> anyhow::Result<()> {
        let terminator = match self.terminator {
            CsvTerminator::CRLF => None,
            CsvTerminator::Any(c) => Some(("terminator", c)),
        };
        let chars = [("delimiter", self.delimiter)]
            .into_iter()
            .chain(self.escape.map(|c| ("escape", c)))
            .chain(terminator);
        for (field, c) in chars {
            if !c.is_ascii() {
                anyhow::bail!("{CSV_WRITER} {field} must be an ASCII character, got: {c:?}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CsvTerminator {
    CRLF,
    Any(char),
}

impl From<CsvTerminator> for csv::Terminator {
    fn from(source: CsvTerminator) -> Self {
        match source {
            CsvTerminator::CRLF => Self::CRLF,
            CsvTerminator::Any(c) => Self::Any(c as u8),
        }
    }
}

impl From<&CsvWriterConfig> for csv::WriterBuilder {
    fn from(c: &CsvWriterConfig) -> Self {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(c.delimiter as u8);
        builder.terminator(c.terminator.into());
        builder.flexible(c.flexible);
        if let Some(escape) = c.escape {
            builder.double_quote(false);
            builder.escape(escape as u8);
        } else {
            builder.double_quote(true);
        }
        builder
    }
}

/// Renders an item field as a CSV cell: strings as is, missing and null
/// fields empty, anything else as JSON.
pub fn csv_field(value: Option<&Value>) -> Cow<'_, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(s)) => Cow::Borrowed(s),
        Some(other) => Cow::Owned(other.to_string()),
    }
}

//! Item pipelines enabled through the `EXPORT_JSON` and `EXPORT_CSV` flags.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use arachne_crawler::{Item, ItemPipeline, PipelineRegistry, Settings};

use crate::settings::{EXPORT_CSV_PIPELINE, EXPORT_JSON_PIPELINE};
use crate::writer::{csv_field, export_dir, CsvWriterConfig};

/// The registry of every built-in pipeline.
pub fn registry() -> PipelineRegistry {
    let mut registry = PipelineRegistry::new();
    registry
        .register(EXPORT_JSON_PIPELINE, |settings| {
            Ok(Box::new(ExportJson::from_settings(settings)?))
        })
        .register(EXPORT_CSV_PIPELINE, |settings| {
            Ok(Box::new(ExportCsv::from_settings(settings)?))
        });
    registry
}

fn create_export(dir: &Path, file_name: String) -> Result<(PathBuf, fs_err::File)> {
    fs_err::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let file = fs_err::File::create(&path)?;
    Ok((path, file))
}

/// Writes items as a JSON array to `<EXPORT_DIR>/json/<spider>.json`.
#[derive(Debug)]
pub struct ExportJson {
    dir: PathBuf,
    path: Option<PathBuf>,
    wtr: Option<BufWriter<fs_err::File>>,
    count: usize,
}

impl ExportJson {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            dir: export_dir(settings)?.join("json"),
            path: None,
            wtr: None,
            count: 0,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ItemPipeline for ExportJson {
    fn open_spider(&mut self, spider: &str) -> Result<()> {
        let (path, file) = create_export(&self.dir, format!("{spider}.json"))?;
        let mut wtr = BufWriter::new(file);
        wtr.write_all(b"[")?;
        log::info!("Exporting items to {}", path.display());
        self.path = Some(path);
        self.wtr = Some(wtr);
        self.count = 0;
        Ok(())
    }

    fn process_item(&mut self, item: Item) -> Result<Option<Item>> {
        let wtr = self
            .wtr
            .as_mut()
            .ok_or_else(|| anyhow!("JSON export isn't opened"))?;
        if self.count > 0 {
            wtr.write_all(b",")?;
        }
        wtr.write_all(b"\n")?;
        arachne_crawler::serde_json::to_writer(&mut *wtr, &item)?;
        self.count += 1;
        Ok(Some(item))
    }

    fn close_spider(&mut self) -> Result<()> {
        if let Some(mut wtr) = self.wtr.take() {
            wtr.write_all(b"\n]\n")?;
            wtr.flush()?;
        }
        Ok(())
    }
}

/// Writes items as CSV rows to `<EXPORT_DIR>/csv/<spider>.csv`, the header is
/// made of the first item's fields.
#[derive(Debug)]
pub struct ExportCsv {
    dir: PathBuf,
    config: CsvWriterConfig,
    path: Option<PathBuf>,
    wtr: Option<csv::Writer<fs_err::File>>,
    fields: Option<Vec<String>>,
}

impl ExportCsv {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            dir: export_dir(settings)?.join("csv"),
            config: CsvWriterConfig::from_settings(settings)?,
            path: None,
            wtr: None,
            fields: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ItemPipeline for ExportCsv {
    fn open_spider(&mut self, spider: &str) -> Result<()> {
        let (path, file) = create_export(&self.dir, format!("{spider}.csv"))?;
        log::info!("Exporting items to {}", path.display());
        self.wtr = Some(csv::WriterBuilder::from(&self.config).from_writer(file));
        self.path = Some(path);
        self.fields = None;
        Ok(())
    }

    fn process_item(&mut self, item: Item) -> Result<Option<Item>> {
        let wtr = self
            .wtr
            .as_mut()
            .ok_or_else(|| anyhow!("CSV export isn't opened"))?;

        if self.fields.is_none() {
            let fields = item.keys().cloned().collect::<Vec<_>>();
            wtr.write_record(&fields)?;
            self.fields = Some(fields);
        }
        let fields = self.fields.as_deref().unwrap_or_default();

        wtr.write_record(fields.iter().map(|f| csv_field(item.get(f)).into_owned()))?;
        Ok(Some(item))
    }

    fn close_spider(&mut self) -> Result<()> {
        if let Some(mut wtr) = self.wtr.take() {
            wtr.flush()?;
        }
        Ok(())
    }
}

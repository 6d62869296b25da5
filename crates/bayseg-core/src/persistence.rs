//! Saving and loading trained models as JSON.
//!
//! The document carries every seating count directly, so a loaded model
//! predicts exactly what the saved one did without replaying customers.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ModelConfig, ModelKind};
use crate::error::{Result, SegError};
use crate::model::Model;
use crate::npylm::NpylmRecord;
use crate::pyhsmm::PyhsmmRecord;

const FORMAT: &str = "bayseg";
const VERSION: u32 = 1;

/// Whitespace style of a saved model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Indent,
    NotIndent,
}

impl SaveFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveFormat::Indent => "indent",
            SaveFormat::NotIndent => "notindent",
        }
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveFormat {
    type Err = SegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "indent" => Ok(SaveFormat::Indent),
            "notindent" => Ok(SaveFormat::NotIndent),
            other => Err(SegError::config(
                "format",
                format!("unknown save format {other:?} (expected indent or notindent)"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ModelRecord {
    Npylm(NpylmRecord),
    Pyhsmm(PyhsmmRecord),
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    format: String,
    version: u32,
    kind: ModelKind,
    config: ModelConfig,
    model: ModelRecord,
}

fn write_document<W: Write>(writer: W, document: &Document, format: SaveFormat) -> Result<()> {
    match format {
        SaveFormat::Indent => serde_json::to_writer_pretty(writer, document)?,
        SaveFormat::NotIndent => serde_json::to_writer(writer, document)?,
    }
    Ok(())
}

/// Serialize `model` to JSON bytes.
pub fn to_bytes(model: &Model, format: SaveFormat) -> Result<Vec<u8>> {
    let document = Document {
        format: FORMAT.to_string(),
        version: VERSION,
        kind: model.kind(),
        config: model.config().clone(),
        model: model.to_record(),
    };
    let mut buf = Vec::new();
    write_document(&mut buf, &document, format)?;
    Ok(buf)
}

/// Parse a model of the expected `kind` from JSON bytes.
pub fn from_bytes(kind: ModelKind, bytes: &[u8]) -> Result<Model> {
    let document: Document = serde_json::from_slice(bytes)?;
    from_document(kind, document)
}

fn from_document(kind: ModelKind, document: Document) -> Result<Model> {
    if document.format != FORMAT {
        return Err(SegError::Persistence(format!(
            "not a model file (format {:?})",
            document.format
        )));
    }
    if document.version != VERSION {
        return Err(SegError::Persistence(format!(
            "unsupported version {} (expected {VERSION})",
            document.version
        )));
    }
    if document.kind != kind {
        return Err(SegError::Persistence(format!(
            "file holds a {} model, expected {kind}",
            document.kind
        )));
    }
    Model::from_record(kind, document.config, document.model)
}

/// Atomic write: write to .tmp then rename.
pub fn save(model: &Model, path: &Path, format: SaveFormat) -> Result<()> {
    let tmp = path.with_extension("tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let bytes = to_bytes(model, format)?;
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(&bytes)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), kind = %model.kind(), %format, "model saved");
    Ok(())
}

/// Load a model of the expected `kind`. Nothing is returned unless the whole
/// file parses and every table passes its consistency checks.
pub fn load(kind: ModelKind, path: &Path) -> Result<Model> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            SegError::Persistence(format!("{} does not exist", path.display()))
        }
        _ => SegError::Io(e),
    })?;
    let document: Document = serde_json::from_reader(BufReader::new(file))?;
    let model = from_document(kind, document)?;
    info!(path = %path.display(), %kind, "model loaded");
    Ok(model)
}

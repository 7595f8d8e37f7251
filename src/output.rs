use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ExportOutcome, UploadOutcome};
use crate::store::DatasetRecord;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_upload(result: &UploadOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_records(result: &[DatasetRecord]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_record(result: &DatasetRecord) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Reference co-simulation scenarios exercising the kernel, registry and topology."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Tab-separated data-file writer for scenario time series.
///
/// Columns are named once in a header line; every row after that is
/// whatever the scenario appends, already formatted. Buffered; flushed
/// explicitly at scenario end and implicitly on drop.
#[derive(Debug)]
pub struct DataRecorder {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl DataRecorder {
    pub fn create(directory: &Path, file_name: &str, columns: &[&str]) -> io::Result<Self> {
        fs::create_dir_all(directory)?;
        let path = directory.join(file_name);
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{}", columns.join("\t"))?;
        Ok(Self { writer, path })
    }

    pub fn append_row(&mut self, fields: &[String]) -> io::Result<()> {
        writeln!(self.writer, "{}", fields.join("\t"))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_rows_are_tab_separated() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder =
            DataRecorder::create(dir.path(), "series.tsv", &["sim_ms", "value"]).unwrap();
        recorder
            .append_row(&["20".to_owned(), "0.125".to_owned()])
            .unwrap();
        recorder.flush().unwrap();

        let contents = std::fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(contents, "sim_ms\tvalue\n20\t0.125\n");
    }
}

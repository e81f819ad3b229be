//! Pipeline Exporters
//!
//! Pure translations from a finalized workflow to external pipeline
//! formats. Lowering to the shared step records (with all expressibility
//! checks) lives in [`ir`]; [`snakemake`] and [`cwl`] only render.
//!
//! Every exporter produces the same pair of artifacts: the pipeline text
//! and a companion values file carrying wildcard value sets and config.

pub mod cwl;
pub mod ir;
pub mod snakemake;

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::workflow::error::WorkflowError;

/// The rendered pipeline plus its companion values document.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub pipeline: String,
    pub values: String,
}

impl ExportArtifact {
    /// Companion file path for a pipeline path: `<stem>.config.yml` next
    /// to the pipeline file.
    pub fn companion_path(pipeline: &Path) -> PathBuf {
        let stem = pipeline
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("pipeline");
        pipeline.with_file_name(format!("{stem}.config.yml"))
    }

    /// Writes the pipeline and its companion file to disk.
    pub fn write(&self, path: &Path) -> Result<(), WorkflowError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &self.pipeline)?;
        let companion = Self::companion_path(path);
        fs::write(&companion, &self.values)?;
        info!(
            "Exported pipeline to {} (values in {})",
            path.display(),
            companion.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companion_path() {
        let p = ExportArtifact::companion_path(Path::new("out/Snakefile"));
        assert_eq!(p, Path::new("out/Snakefile.config.yml"));
        let p = ExportArtifact::companion_path(Path::new("pipeline.cwl"));
        assert_eq!(p, Path::new("pipeline.config.yml"));
    }

    #[test]
    fn test_write_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Snakefile");
        let artifact = ExportArtifact {
            pipeline: "rule all:\n".to_string(),
            values: "wildcards: {}\n".to_string(),
        };
        artifact.write(&path).unwrap();
        assert!(path.is_file());
        assert!(dir.path().join("Snakefile.config.yml").is_file());
    }
}

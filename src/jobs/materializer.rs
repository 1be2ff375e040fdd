//! # Materializador de Resultados
//! src/jobs/materializer.rs
//!
//! Escribe las reseñas de un job como un arreglo JSON en
//! `{output_dir}/{job_id}.json`. La escritura va primero a un archivo
//! temporal que se sincroniza a disco y luego se renombra, así que un
//! artefacto publicado nunca está a medio escribir.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::types::ArtifactRef;
use crate::error::MaterializeError;
use crate::extraction::ReviewRecord;

pub struct ResultMaterializer {
    output_dir: PathBuf,
}

impl ResultMaterializer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", job_id))
    }

    /// Crea el directorio de salida si no existe
    pub async fn prepare(&self) -> Result<(), MaterializeError> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| MaterializeError::Write {
                path: self.output_dir.clone(),
                source,
            })
    }

    /// Escribe el artefacto y retorna su referencia
    pub async fn write(
        &self,
        job_id: &str,
        records: &[ReviewRecord],
    ) -> Result<ArtifactRef, MaterializeError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let path = self.artifact_path(job_id);
        let temp_path = self.output_dir.join(format!("{}.json.tmp", job_id));

        self.prepare().await?;

        if let Err(source) = write_synced(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(MaterializeError::Write {
                path: temp_path,
                source,
            });
        }

        if let Err(source) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(MaterializeError::Write { path, source });
        }

        debug!(job_id, path = %path.display(), bytes = bytes.len(), "artifact written");

        Ok(ArtifactRef {
            file_name: format!("{}.json", job_id),
            path,
            record_count: records.len(),
            size_bytes: bytes.len() as u64,
            sha256: digest_hex(&bytes),
        })
    }

    /// Lee un artefacto publicado y verifica su integridad
    pub async fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, MaterializeError> {
        let bytes = fs::read(&artifact.path)
            .await
            .map_err(|source| MaterializeError::Read {
                path: artifact.path.clone(),
                source,
            })?;

        if digest_hex(&bytes) != artifact.sha256 {
            warn!(path = %artifact.path.display(), "artifact digest mismatch");
            return Err(MaterializeError::Corrupted {
                path: artifact.path.clone(),
            });
        }

        Ok(bytes)
    }

    /// Borra el artefacto de un job. Retorna `false` si no existía.
    pub async fn discard(&self, job_id: &str) -> Result<bool, MaterializeError> {
        let path = self.artifact_path(job_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(source) => Err(MaterializeError::Write { path, source }),
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// SHA-256 en hexadecimal
pub fn digest_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::fake::sample_reviews;

    #[tokio::test]
    async fn test_write_and_read_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path().join("output"));

        let artifact = materializer.write("job-1", &sample_reviews(3)).await.unwrap();
        assert_eq!(artifact.file_name, "job-1.json");
        assert_eq!(artifact.record_count, 3);
        assert_eq!(artifact.sha256.len(), 64);
        assert!(artifact.path.exists());
        assert!(!dir.path().join("output/job-1.json.tmp").exists());

        let bytes = materializer.read(&artifact).await.unwrap();
        assert_eq!(bytes.len() as u64, artifact.size_bytes);

        let records: Vec<ReviewRecord> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(records, sample_reviews(3));
    }

    #[tokio::test]
    async fn test_write_keeps_unicode_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());

        let mut records = sample_reviews(1);
        records[0].review_text = "Excelente café, muy rico".to_string();
        let artifact = materializer.write("job-utf8", &records).await.unwrap();

        let text = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(text.contains("café"));
    }

    #[tokio::test]
    async fn test_write_fails_when_output_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let materializer = ResultMaterializer::new(&blocker);
        let result = materializer.write("job-1", &sample_reviews(1)).await;
        assert!(matches!(result, Err(MaterializeError::Write { .. })));
    }

    #[tokio::test]
    async fn test_read_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());
        let artifact = materializer.write("job-1", &sample_reviews(2)).await.unwrap();

        std::fs::write(&artifact.path, b"[]").unwrap();
        let result = materializer.read(&artifact).await;
        assert!(matches!(result, Err(MaterializeError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_discard() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());
        materializer.write("job-1", &sample_reviews(1)).await.unwrap();

        assert!(materializer.discard("job-1").await.unwrap());
        assert!(!materializer.discard("job-1").await.unwrap());
        assert!(!materializer.artifact_path("job-1").exists());
    }

    #[test]
    fn test_digest_hex() {
        assert_eq!(
            digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

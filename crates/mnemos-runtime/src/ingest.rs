//! Ingestion and recall flows.
//!
//! [`Ingestor`] turns raw content into memories and queries into hits:
//!
//! | call              | pipeline                                     |
//! |-------------------|----------------------------------------------|
//! | `remember_text`   | embed → store (modality `text`)              |
//! | `remember_image`  | read → caption → embed caption → store       |
//! | `remember_audio`  | transcribe → embed transcript → store        |
//! | `recall`          | embed query → nearest-neighbour search       |
//!
//! Producers are injected as trait objects so the same flows run against
//! Ollama in the CLI and against fakes in tests.
//!
//! Images and recordings are copied into the store's data directory
//! (`images/<uuid>.<ext>`, `audio/<uuid>.<ext>`) and the copy's path is what
//! the memory records, so moving or deleting the source does not orphan it.
//! In-memory stores have no data directory and record the source path.

use mnemos_memory::{MemoryStore, StoreError};
use mnemos_types::{Captioner, Embedder, Embedding, MemoryRecord, Modality, ProducerError, SearchHit, Transcriber};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Subdirectory of the data directory holding image copies.
pub const IMAGE_DIR: &str = "images";
/// Subdirectory of the data directory holding audio copies.
pub const AUDIO_DIR: &str = "audio";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no captioner configured")]
    NoCaptioner,
    #[error("no transcriber configured")]
    NoTranscriber,
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestor
// ─────────────────────────────────────────────────────────────────────────────

pub struct Ingestor {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    captioner: Option<Arc<dyn Captioner>>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl Ingestor {
    /// Fails with [`StoreError::DimensionMismatch`] when the embedder's
    /// vectors could never be stored.
    pub fn new(store: Arc<MemoryStore>, embedder: Arc<dyn Embedder>) -> Result<Self, IngestError> {
        if embedder.dimension() != store.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimension(),
            }
            .into());
        }
        Ok(Self {
            store,
            embedder,
            captioner: None,
            transcriber: None,
        })
    }

    pub fn with_captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub async fn remember_text(&self, text: &str) -> Result<MemoryRecord, IngestError> {
        let text = text.trim();
        let embedding = self.embedder.embed(text).await?;
        let record = self.store.add_memory(text, Modality::Text, "", embedding)?;
        info!(id = %record.id, "text remembered");
        Ok(record)
    }

    pub async fn remember_image(&self, path: &Path) -> Result<MemoryRecord, IngestError> {
        let captioner = self.captioner.as_ref().ok_or(IngestError::NoCaptioner)?;
        let bytes = read(path).await?;
        let caption = captioner.caption(&bytes).await?;
        let embedding = self.embedder.embed(&caption).await?;
        let kept = self.keep_copy(IMAGE_DIR, "png", path, &bytes).await?;
        let record = self.store_media(&caption, Modality::Image, &kept, embedding).await?;
        info!(id = %record.id, caption = %record.caption, "image remembered");
        Ok(record)
    }

    pub async fn remember_audio(&self, path: &Path) -> Result<MemoryRecord, IngestError> {
        let transcriber = self.transcriber.as_ref().ok_or(IngestError::NoTranscriber)?;
        let bytes = read(path).await?;
        let kept = self.keep_copy(AUDIO_DIR, "mp3", path, &bytes).await?;
        let stored = async {
            let transcript = transcriber.transcribe(&kept).await?;
            let embedding = self.embedder.embed(&transcript).await?;
            Ok::<_, IngestError>((transcript, embedding))
        }
        .await;
        let (transcript, embedding) = match stored {
            Ok(pair) => pair,
            Err(e) => {
                self.discard_copy(&kept).await;
                return Err(e);
            }
        };
        let record = self.store_media(&transcript, Modality::Audio, &kept, embedding).await?;
        info!(id = %record.id, "audio remembered");
        Ok(record)
    }

    /// Copy `bytes` to `<data_dir>/<subdir>/<uuid>.<ext>`. Without a data
    /// directory the source path is used as is.
    async fn keep_copy(
        &self,
        subdir: &str,
        default_ext: &str,
        source: &Path,
        bytes: &[u8],
    ) -> Result<PathBuf, IngestError> {
        let Some(data_dir) = self.store.data_dir() else {
            return Ok(source.to_path_buf());
        };
        let dir = data_dir.join(subdir);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(default_ext)
            .to_ascii_lowercase();
        let target = dir.join(format!("{}.{ext}", Uuid::new_v4().simple()));
        tokio::fs::write(&target, bytes).await.map_err(|e| io_error(&target, e))?;
        Ok(target)
    }

    /// Remove a copy made by [`Self::keep_copy`] for a memory that was not stored.
    async fn discard_copy(&self, kept: &Path) {
        if self.store.data_dir().is_none() {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(kept).await {
            warn!(path = %kept.display(), error = %e, "failed to remove media copy");
        }
    }

    async fn store_media(
        &self,
        caption: &str,
        modality: Modality,
        kept: &Path,
        embedding: Embedding,
    ) -> Result<MemoryRecord, IngestError> {
        match self
            .store
            .add_memory(caption, modality, &kept.display().to_string(), embedding)
        {
            Ok(record) => Ok(record),
            Err(e) => {
                self.discard_copy(kept).await;
                Err(e.into())
            }
        }
    }

    /// The `k` memories closest to `query`, nearest first.
    pub async fn recall(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IngestError> {
        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.search_memory(&embedding, k)?)
    }
}

async fn read(path: &Path) -> Result<Vec<u8>, IngestError> {
    tokio::fs::read(path).await.map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> IngestError {
    IngestError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mnemos_memory::StoreConfig;
    use std::io::Write;

    /// One axis per keyword; anything else lands on the last axis.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Embedding, ProducerError> {
            if text.is_empty() {
                return Err(ProducerError::EncodingError("empty".into()));
            }
            let v = if text.contains("beach") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("snow") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            };
            Ok(Embedding::new(v))
        }
    }

    struct FixedCaption(&'static str);

    #[async_trait]
    impl Captioner for FixedCaption {
        async fn caption(&self, _image: &[u8]) -> Result<String, ProducerError> {
            Ok(self.0.to_string())
        }
    }

    struct Offline;

    #[async_trait]
    impl Captioner for Offline {
        async fn caption(&self, _image: &[u8]) -> Result<String, ProducerError> {
            Err(ProducerError::ModelUnavailable("offline".into()))
        }
    }

    struct Echo;

    #[async_trait]
    impl Transcriber for Echo {
        async fn transcribe(&self, audio: &Path) -> Result<String, ProducerError> {
            Ok(format!("recording {}", audio.display()))
        }
    }

    fn ingestor() -> Ingestor {
        let store = Arc::new(MemoryStore::open_in_memory(3).unwrap());
        Ingestor::new(store, Arc::new(KeywordEmbedder)).unwrap()
    }

    fn image_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("photo.png");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0x89, b'P', b'N', b'G']).unwrap();
        path
    }

    #[test]
    fn mismatched_embedder_is_rejected() {
        let store = Arc::new(MemoryStore::open_in_memory(384).unwrap());
        let err = Ingestor::new(store, Arc::new(KeywordEmbedder)).err().unwrap();
        assert!(matches!(
            err,
            IngestError::Store(StoreError::DimensionMismatch {
                expected: 384,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn text_is_remembered_and_recalled() {
        let ingestor = ingestor();
        let beach = ingestor.remember_text("a day at the beach").await.unwrap();
        ingestor.remember_text("snow on the roof").await.unwrap();
        ingestor.remember_text("a meeting").await.unwrap();

        assert_eq!(beach.modality, Modality::Text);
        let hits = ingestor.recall("beach volleyball", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, beach.id);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[tokio::test]
    async fn empty_text_stores_nothing() {
        let ingestor = ingestor();
        let err = ingestor.remember_text("   ").await.unwrap_err();
        assert!(matches!(err, IngestError::Producer(ProducerError::EncodingError(_))));
        assert_eq!(ingestor.store().memory_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn image_is_captioned_then_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_file(&dir);
        let ingestor = ingestor().with_captioner(Arc::new(FixedCaption("kids on a snowy hill")));

        let record = ingestor.remember_image(&path).await.unwrap();
        assert_eq!(record.modality, Modality::Image);
        assert_eq!(record.caption, "kids on a snowy hill");
        assert_eq!(record.filepath, path.display().to_string());

        let hits = ingestor.recall("snow", 1).await.unwrap();
        assert_eq!(hits[0].record.id, record.id);
    }

    #[tokio::test]
    async fn image_without_captioner_or_file_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor();
        let err = ingestor.remember_image(&image_file(&dir)).await.unwrap_err();
        assert!(matches!(err, IngestError::NoCaptioner));

        let ingestor = ingestor.with_captioner(Arc::new(FixedCaption("x")));
        let err = ingestor.remember_image(&dir.path().join("missing.png")).await.unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
        assert_eq!(ingestor.store().memory_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn captioner_outage_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor().with_captioner(Arc::new(Offline));
        let err = ingestor.remember_image(&image_file(&dir)).await.unwrap_err();
        assert!(matches!(err, IngestError::Producer(ProducerError::ModelUnavailable(_))));
        assert_eq!(ingestor.store().memory_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn audio_needs_a_transcriber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        let ingestor = ingestor();
        assert!(matches!(
            ingestor.remember_audio(&path).await.unwrap_err(),
            IngestError::NoTranscriber
        ));

        let ingestor = ingestor.with_transcriber(Arc::new(Echo));
        let record = ingestor.remember_audio(&path).await.unwrap();
        assert_eq!(record.modality, Modality::Audio);
        assert_eq!(record.caption, format!("recording {}", path.display()));
    }

    struct Deaf;

    #[async_trait]
    impl Transcriber for Deaf {
        async fn transcribe(&self, _audio: &Path) -> Result<String, ProducerError> {
            Err(ProducerError::ModelUnavailable("no whisper".into()))
        }
    }

    fn persistent_ingestor(dir: &tempfile::TempDir) -> Ingestor {
        let cfg = StoreConfig::new(dir.path().join("data"), 3);
        let store = Arc::new(MemoryStore::open(&cfg).unwrap());
        Ingestor::new(store, Arc::new(KeywordEmbedder)).unwrap()
    }

    #[tokio::test]
    async fn media_is_kept_under_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let image = image_file(&dir);
        let audio = dir.path().join("note.WAV");
        std::fs::write(&audio, b"RIFF....").unwrap();
        let ingestor = persistent_ingestor(&dir)
            .with_captioner(Arc::new(FixedCaption("a beach at dusk")))
            .with_transcriber(Arc::new(Echo));

        let picture = ingestor.remember_image(&image).await.unwrap();
        let voice = ingestor.remember_audio(&audio).await.unwrap();
        std::fs::remove_file(&image).unwrap();
        std::fs::remove_file(&audio).unwrap();

        let data_dir = dir.path().join("data");
        let kept_image = PathBuf::from(&picture.filepath);
        assert!(kept_image.starts_with(data_dir.join(IMAGE_DIR)));
        assert_eq!(kept_image.extension().unwrap(), "png");
        assert_eq!(std::fs::read(&kept_image).unwrap(), vec![0x89, b'P', b'N', b'G']);

        let kept_audio = PathBuf::from(&voice.filepath);
        assert!(kept_audio.starts_with(data_dir.join(AUDIO_DIR)));
        assert_eq!(kept_audio.extension().unwrap(), "wav");
        assert_eq!(std::fs::read(&kept_audio).unwrap(), b"RIFF....");
        // The transcriber reads the kept copy.
        assert_eq!(voice.caption, format!("recording {}", kept_audio.display()));

        let stored = ingestor.store().get_memory(picture.id).unwrap().unwrap();
        assert_eq!(stored.filepath, picture.filepath);
    }

    #[tokio::test]
    async fn failed_ingest_leaves_no_copy_behind() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("note.mp3");
        std::fs::write(&audio, b"ID3").unwrap();
        let ingestor = persistent_ingestor(&dir).with_transcriber(Arc::new(Deaf));

        let err = ingestor.remember_audio(&audio).await.unwrap_err();
        assert!(matches!(err, IngestError::Producer(ProducerError::ModelUnavailable(_))));
        assert_eq!(ingestor.store().memory_count().unwrap(), 0);
        let copies = std::fs::read_dir(dir.path().join("data").join(AUDIO_DIR)).unwrap().count();
        assert_eq!(copies, 0);
    }
}

pub mod agreements;
pub mod chunker;
pub mod embedder;
pub mod fingerprint;
pub mod learned_pairs;
pub mod search;
pub mod store;
pub mod validator;
pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use anyhow::Result;

pub use agreements::{Agreement, AgreementsGenerator};
pub use fingerprint::{FileFingerprint, FingerprintStore, SyncResult};
pub use learned_pairs::{LearnedPair, LearnedPairCache};
pub use search::SearchResult;
pub use store::{Confidence, IndexStats, SearchOutcome, VectorStore};
pub use validator::EmbeddingValidator;

/// Source extensions this system indexes by default; mirrors the extensions
/// `watcher::is_indexable_ext` recognizes but expressed as the explicit list
/// `FingerprintStore::get_changed_files` takes.
const DEFAULT_EXTENSIONS: &[&str] = &[
    ".rs", ".py", ".js", ".ts", ".jsx", ".tsx", ".go", ".java", ".c", ".cpp", ".h", ".hpp",
    ".rb",
];

#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub phase: &'static str,
    pub indexed: usize,
    pub total: usize,
    pub complete: bool,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            phase: "idle",
            indexed: 0,
            total: 0,
            complete: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub embedding_mode: String,
    pub exclude: Vec<String>,
}

pub struct CodeIndex {
    store: store::VectorStore,
    fingerprints: Mutex<fingerprint::FingerprintStore>,
    learned_pairs: Mutex<learned_pairs::LearnedPairCache>,
    agreements: agreements::AgreementsGenerator,
    embedder: Arc<dyn embedder::Embedder>,
    project_root: PathBuf,
    exclude: Vec<String>,
    extensions: Vec<String>,
    progress: Arc<Mutex<IndexProgress>>,
}

impl CodeIndex {
    /// Synchronous constructor. Opens (or creates) the SQLite index DB and
    /// selects the embedding backend. The index is NOT built yet -- call
    /// `build()` afterwards (typically in a background task).
    pub fn open_sync(project_root: &Path, api_key: Option<String>) -> Result<Self> {
        Self::open_sync_with_options(project_root, api_key, IndexOptions::default())
    }

    pub fn open_sync_with_options(
        project_root: &Path,
        api_key: Option<String>,
        options: IndexOptions,
    ) -> Result<Self> {
        let store = store::VectorStore::open(project_root)?;
        let fingerprints = fingerprint::FingerprintStore::open(project_root)?;
        let learned_pairs = learned_pairs::LearnedPairCache::open(project_root)?;

        let mode = options.embedding_mode.trim().to_ascii_lowercase();
        let embedder: Arc<dyn embedder::Embedder> = match mode.as_str() {
            "tfidf" | "local" => Arc::new(embedder::TfIdfEmbedder::new()),
            "api" | "openai" => {
                if let Some(key) = api_key {
                    Arc::new(embedder::ApiEmbedder::new(key))
                } else {
                    tracing::warn!(
                        "index.embedding={} requested but API key unavailable; falling back to tfidf",
                        mode
                    );
                    Arc::new(embedder::TfIdfEmbedder::new())
                }
            }
            "auto" | "" => {
                if let Some(key) = api_key {
                    Arc::new(embedder::ApiEmbedder::new(key))
                } else {
                    Arc::new(embedder::TfIdfEmbedder::new())
                }
            }
            other => {
                tracing::warn!(
                    "Unknown index.embedding mode '{}'; falling back to auto selection",
                    other
                );
                if let Some(key) = api_key {
                    Arc::new(embedder::ApiEmbedder::new(key))
                } else {
                    Arc::new(embedder::TfIdfEmbedder::new())
                }
            }
        };

        let agreements = agreements::AgreementsGenerator::new(embedder.clone());

        Ok(Self {
            store,
            fingerprints: Mutex::new(fingerprints),
            learned_pairs: Mutex::new(learned_pairs),
            agreements,
            embedder,
            project_root: project_root.to_path_buf(),
            exclude: options.exclude,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            progress: Arc::new(Mutex::new(IndexProgress::default())),
        })
    }

    pub async fn open(project_root: &Path, api_key: Option<String>) -> Result<Self> {
        Self::open_sync(project_root, api_key)
    }

    pub async fn open_with_options(
        project_root: &Path,
        api_key: Option<String>,
        options: IndexOptions,
    ) -> Result<Self> {
        Self::open_sync_with_options(project_root, api_key, options)
    }

    /// Incremental sync: asks the fingerprint store which files changed
    /// since the last run, re-chunks and re-embeds only those, and removes
    /// anything that was deleted from both the fingerprint store and the
    /// vector store.
    pub async fn build(&self) -> Result<IndexStats> {
        {
            let mut p = self.progress.lock().await;
            p.phase = "walking";
            p.indexed = 0;
            p.total = 0;
            p.complete = false;
        }

        let extensions: Vec<&str> = self
            .extensions
            .iter()
            .map(|s| s.as_str())
            .collect();
        let (added, modified, deleted) = {
            let fp = self.fingerprints.lock().await;
            fp.get_changed_files(&["."], &extensions, &self.exclude)?
        };

        let total = added.len() + modified.len();
        {
            let mut p = self.progress.lock().await;
            p.total = total;
            p.phase = "indexing";
        }

        let dims = self.embedder.dimensions();
        let mut indexed = 0usize;

        for abs_path in added.iter().chain(modified.iter()) {
            let (rel, hash) = {
                let fp = self.fingerprints.lock().await;
                (fp.relative_path(abs_path), fp.compute_hash(abs_path))
            };

            let content = match std::fs::read_to_string(abs_path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %abs_path.display(), error = %e, "failed to read file, skipping");
                    indexed += 1;
                    continue;
                }
            };

            let chunks = chunker::chunk_file(&rel, &content);
            let chunk_count = chunks.len();

            if chunks.is_empty() {
                self.store.upsert_file(&rel, &hash, 0)?;
            } else {
                let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
                let embeddings = self.embedder.embed(&texts).await?;
                let model_id = self.embedder.model_id();
                self.store.upsert_file(&rel, &hash, chunk_count)?;
                self.store
                    .replace_chunks(&rel, &chunks, &embeddings, model_id, dims)?;
            }

            {
                let mut fp = self.fingerprints.lock().await;
                fp.mark_indexed(abs_path, chunk_count)?;
            }

            indexed += 1;
            let mut p = self.progress.lock().await;
            p.indexed = indexed;
        }

        for rel in &deleted {
            self.store.remove_file(rel)?;
            let mut fp = self.fingerprints.lock().await;
            fp.mark_deleted(rel)?;
        }

        self.store.refresh_forest()?;

        {
            let fp = self.fingerprints.lock().await;
            fp.mark_sync_completed()?;
        }

        {
            let mut p = self.progress.lock().await;
            p.phase = "complete";
            p.indexed = indexed;
            p.complete = true;
        }

        self.stats()
    }

    /// Re-chunks and re-embeds a single file immediately, bypassing the
    /// fingerprint diff. Used when a tool call just edited a file and the
    /// index should reflect it before the next full sync.
    pub async fn update_file(&self, rel_path: &str) -> Result<()> {
        let abs = self.project_root.join(rel_path);
        let content = std::fs::read_to_string(&abs)?;

        let chunks = chunker::chunk_file(rel_path, &content);
        let chunk_count = chunks.len();
        let dims = self.embedder.dimensions();
        let hash = {
            let fp = self.fingerprints.lock().await;
            fp.compute_hash(&abs)
        };

        if chunks.is_empty() {
            self.store.upsert_file(rel_path, &hash, 0)?;
        } else {
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            let model_id = self.embedder.model_id();
            self.store.upsert_file(rel_path, &hash, chunk_count)?;
            self.store
                .replace_chunks(rel_path, &chunks, &embeddings, model_id, dims)?;
        }

        {
            let mut fp = self.fingerprints.lock().await;
            fp.mark_indexed(&abs, chunk_count)?;
        }
        self.store.refresh_forest()
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<SearchOutcome> {
        let query_embedding = self.embedder.embed(&[query]).await?;
        if query_embedding.is_empty() {
            return Ok(SearchOutcome {
                results: vec![],
                confidence: Confidence::Low,
                forest_skipped: false,
            });
        }
        self.store.search(&query_embedding[0], query, limit)
    }

    /// Records a learned natural-language-term -> symbol association in the
    /// map collection so future searches for the same term short-circuit
    /// straight to it, and in the session-spanning learned-pair cache.
    pub async fn learn_pair(
        &self,
        nl_term: &str,
        symbol: &str,
        similarity: f32,
        code_evidence: &str,
        session_id: &str,
    ) -> Result<()> {
        let embedding = self.embedder.embed(&[nl_term]).await?;
        if let Some(vec) = embedding.into_iter().next() {
            self.store.upsert_map_entry(
                nl_term,
                symbol,
                &format!("learned:{session_id}"),
                &vec,
                self.embedder.model_id(),
            )?;
        }
        let mut cache = self.learned_pairs.lock().await;
        cache.learn(nl_term, symbol, similarity, code_evidence, session_id)
    }

    /// Previously learned symbols for `nl_term`, ranked by similarity at the
    /// time they were learned. Checked before falling back to a full search.
    pub async fn find_learned(&self, nl_term: &str) -> Vec<LearnedPair> {
        let cache = self.learned_pairs.lock().await;
        cache.find_matches(nl_term).into_iter().cloned().collect()
    }

    /// Writes a durable agreement record and indexes it into the map
    /// collection in one step.
    pub async fn record_agreement(&self, agreement: &Agreement) -> Result<PathBuf> {
        self.agreements
            .record(&self.project_root, &self.store, agreement)
            .await
    }

    pub async fn auto_context(&self, query: &str, limit: usize) -> Result<String> {
        let outcome = self.search(query, limit).await?;
        if outcome.results.is_empty() {
            return Ok(String::new());
        }

        let mut xml = String::from("<codebase_context>\n");
        for r in &outcome.results {
            xml.push_str(&format!(
                "<chunk file=\"{}\" lines=\"{}-{}\" score=\"{:.2}\">\n{}\n</chunk>\n",
                r.file, r.start_line, r.end_line, r.score, r.content
            ));
        }
        xml.push_str("</codebase_context>");
        Ok(xml)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.store.stats()
    }

    pub async fn progress(&self) -> IndexProgress {
        self.progress.lock().await.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.store.vector_count() > 0
    }

    /// The embedding backend this index was opened with, for components
    /// (the Embedding Validator) that need to compute their own similarity
    /// scores rather than go through `search`.
    pub fn embedder(&self) -> Arc<dyn embedder::Embedder> {
        self.embedder.clone()
    }
}

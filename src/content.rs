//! Offline content downloads: Bible text, commentaries, and topics.
//!
//! Each bundle lands through the bulk-insert path and is recorded in
//! `offline_metadata` under a `kind:identifier` resource key, with the
//! manifest's freshness timestamp and the payload size as transferred.
//! Re-downloading a resource replaces its rows.
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::api::model::{
    OfflineManifest, RemoteExplanation, RemoteTopic, RemoteTopicExplanation, RemoteTopicReference,
    RemoteVerse, TopicsBundle,
};
use crate::api::ContentApi;
use crate::db::model::{
    DownloadStatus, ExplanationRow, TopicExplanationRow, TopicReferenceRow, TopicRow, TopicRows,
};
use crate::db::repo::{self, Pool};
use crate::error::SyncError;
use crate::model::Verse;

/// What one completed download wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub resource_key: String,
    pub rows: u64,
    pub size_bytes: i64,
}

pub struct ContentService {
    pool: Pool,
    api: Arc<dyn ContentApi>,
}

impl ContentService {
    pub fn new(pool: Pool, api: Arc<dyn ContentApi>) -> Self {
        Self { pool, api }
    }

    /// Current server-side catalog. Fetch once and pass to the download
    /// methods; they need its freshness timestamps.
    pub async fn manifest(&self) -> Result<OfflineManifest, SyncError> {
        Ok(self.api.fetch_manifest().await?)
    }

    pub async fn download_bible(
        &self,
        manifest: &OfflineManifest,
        version_key: &str,
    ) -> Result<DownloadSummary, SyncError> {
        let entry = manifest.bible_version(version_key).ok_or_else(|| {
            SyncError::NotFound(format!("bible version {version_key} not in manifest"))
        })?;
        let fetched = self.api.fetch_bible(version_key).await?;
        let verses: Vec<Verse> = fetched.data.iter().map(verse_from_remote).collect();

        repo::remove_verses(&self.pool, version_key).await?;
        let rows = repo::load_verses(&self.pool, version_key, &verses).await?;
        let resource_key = format!("bible:{version_key}");
        repo::record_download(
            &self.pool,
            &resource_key,
            entry.updated_at,
            Utc::now(),
            fetched.size_bytes,
        )
        .await?;
        info!(resource_key, rows, size_bytes = fetched.size_bytes, "downloaded bible text");
        Ok(DownloadSummary {
            resource_key,
            rows,
            size_bytes: fetched.size_bytes,
        })
    }

    pub async fn download_commentaries(
        &self,
        manifest: &OfflineManifest,
        language_code: &str,
    ) -> Result<DownloadSummary, SyncError> {
        let entry = manifest.commentary_language(language_code).ok_or_else(|| {
            SyncError::NotFound(format!("commentary language {language_code} not in manifest"))
        })?;
        let fetched = self.api.fetch_commentaries(language_code).await?;
        let entries: Vec<ExplanationRow> =
            fetched.data.iter().map(explanation_from_remote).collect();

        repo::remove_explanations(&self.pool, language_code).await?;
        let rows = repo::load_explanations(&self.pool, language_code, &entries).await?;
        let resource_key = format!("commentary:{language_code}");
        repo::record_download(
            &self.pool,
            &resource_key,
            entry.updated_at,
            Utc::now(),
            fetched.size_bytes,
        )
        .await?;
        info!(resource_key, rows, size_bytes = fetched.size_bytes, "downloaded commentaries");
        Ok(DownloadSummary {
            resource_key,
            rows,
            size_bytes: fetched.size_bytes,
        })
    }

    pub async fn download_topics(
        &self,
        manifest: &OfflineManifest,
        language_code: &str,
    ) -> Result<DownloadSummary, SyncError> {
        let entry = manifest.topic_language(language_code).ok_or_else(|| {
            SyncError::NotFound(format!("topic language {language_code} not in manifest"))
        })?;
        let fetched = self.api.fetch_topics(language_code).await?;
        let bundle = topic_rows_from_bundle(&fetched.data);

        repo::remove_topics(&self.pool, language_code).await?;
        let rows = repo::load_topics(&self.pool, &bundle).await?;
        let resource_key = format!("topics:{language_code}");
        repo::record_download(
            &self.pool,
            &resource_key,
            entry.updated_at,
            Utc::now(),
            fetched.size_bytes,
        )
        .await?;
        info!(resource_key, rows, size_bytes = fetched.size_bytes, "downloaded topics");
        Ok(DownloadSummary {
            resource_key,
            rows,
            size_bytes: fetched.size_bytes,
        })
    }

    /// Metadata rows for everything downloaded, oldest key first.
    pub async fn status(&self) -> Result<Vec<DownloadStatus>, SyncError> {
        Ok(repo::list_downloads(&self.pool).await?)
    }

    /// Whether the server has a newer copy of an already-downloaded
    /// resource. Resources never downloaded report false.
    pub async fn update_available(
        &self,
        manifest: &OfflineManifest,
        resource_key: &str,
    ) -> Result<bool, SyncError> {
        let Some(recorded) = repo::download_status(&self.pool, resource_key).await? else {
            return Ok(false);
        };
        let manifest_updated = match resource_key.split_once(':') {
            Some(("bible", key)) => manifest.bible_version(key).map(|v| v.updated_at),
            Some(("commentary", code)) => manifest.commentary_language(code).map(|l| l.updated_at),
            Some(("topics", code)) => manifest.topic_language(code).map(|l| l.updated_at),
            _ => None,
        };
        Ok(matches!(manifest_updated, Some(ts) if ts > recorded.last_updated_at))
    }

    /// Delete one resource's rows and its metadata entry.
    pub async fn remove(&self, resource_key: &str) -> Result<(), SyncError> {
        match resource_key.split_once(':') {
            Some(("bible", key)) => {
                repo::remove_verses(&self.pool, key).await?;
            }
            Some(("commentary", code)) => {
                repo::remove_explanations(&self.pool, code).await?;
            }
            Some(("topics", code)) => {
                repo::remove_topics(&self.pool, code).await?;
            }
            _ => {
                return Err(SyncError::Validation(format!(
                    "unknown resource key {resource_key}"
                )))
            }
        }
        repo::remove_download(&self.pool, resource_key).await?;
        info!(resource_key, "removed offline resource");
        Ok(())
    }
}

fn verse_from_remote(r: &RemoteVerse) -> Verse {
    Verse {
        book_id: r.book_id,
        chapter_number: r.chapter_number,
        verse_number: r.verse_number,
        text: r.text.clone(),
    }
}

fn explanation_from_remote(r: &RemoteExplanation) -> ExplanationRow {
    ExplanationRow {
        explanation_id: r.explanation_id,
        book_id: r.book_id,
        chapter_number: r.chapter_number,
        verse_start: r.verse_start,
        verse_end: r.verse_end,
        typ: r.typ.clone(),
        explanation: r.explanation.clone(),
    }
}

fn topic_rows_from_bundle(bundle: &TopicsBundle) -> TopicRows {
    TopicRows {
        topics: bundle.topics.iter().map(topic_from_remote).collect(),
        references: bundle
            .references
            .iter()
            .map(reference_from_remote)
            .collect(),
        explanations: bundle
            .explanations
            .iter()
            .map(topic_explanation_from_remote)
            .collect(),
    }
}

fn topic_from_remote(r: &RemoteTopic) -> TopicRow {
    TopicRow {
        language_code: r.language_code.clone(),
        topic_id: r.topic_id.clone(),
        name: r.name.clone(),
        content: r.content.clone(),
        category: r.category.clone(),
        sort_order: r.sort_order,
    }
}

fn reference_from_remote(r: &RemoteTopicReference) -> TopicReferenceRow {
    TopicReferenceRow {
        topic_id: r.topic_id.clone(),
        reference_content: r.reference_content.clone(),
    }
}

fn topic_explanation_from_remote(r: &RemoteTopicExplanation) -> TopicExplanationRow {
    TopicExplanationRow {
        language_code: r.language_code.clone(),
        topic_id: r.topic_id.clone(),
        typ: r.typ.clone(),
        explanation: r.explanation.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Fetched;
    use crate::error::ApiError;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;

    struct StubContent {
        manifest: OfflineManifest,
        verses: Vec<RemoteVerse>,
    }

    #[async_trait]
    impl ContentApi for StubContent {
        async fn fetch_manifest(&self) -> Result<OfflineManifest, ApiError> {
            Ok(self.manifest.clone())
        }

        async fn fetch_bible(
            &self,
            _version_key: &str,
        ) -> Result<Fetched<Vec<RemoteVerse>>, ApiError> {
            Ok(Fetched {
                data: self.verses.clone(),
                size_bytes: 2048,
            })
        }

        async fn fetch_commentaries(
            &self,
            _language_code: &str,
        ) -> Result<Fetched<Vec<RemoteExplanation>>, ApiError> {
            Ok(Fetched {
                data: Vec::new(),
                size_bytes: 0,
            })
        }

        async fn fetch_topics(
            &self,
            _language_code: &str,
        ) -> Result<Fetched<TopicsBundle>, ApiError> {
            Ok(Fetched {
                data: TopicsBundle {
                    topics: Vec::new(),
                    references: Vec::new(),
                    explanations: Vec::new(),
                },
                size_bytes: 0,
            })
        }
    }

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        repo::run_migrations(&pool).await.unwrap();
        pool
    }

    fn stub() -> StubContent {
        let updated = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        StubContent {
            manifest: OfflineManifest {
                bible_versions: vec![crate::api::model::ManifestVersion {
                    key: "NASB1995".into(),
                    name: Some("NASB 1995".into()),
                    updated_at: updated,
                }],
                commentary_languages: Vec::new(),
                topic_languages: Vec::new(),
            },
            verses: vec![
                RemoteVerse {
                    book_id: 1,
                    chapter_number: 1,
                    verse_number: 1,
                    text: "In the beginning".into(),
                },
                RemoteVerse {
                    book_id: 1,
                    chapter_number: 1,
                    verse_number: 2,
                    text: "And the earth".into(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn bible_download_records_metadata() {
        let pool = setup_pool().await;
        let service = ContentService::new(pool.clone(), Arc::new(stub()));

        let manifest = service.manifest().await.unwrap();
        let summary = service.download_bible(&manifest, "NASB1995").await.unwrap();
        assert_eq!(summary.resource_key, "bible:NASB1995");
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.size_bytes, 2048);

        let status = service.status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].size_bytes, 2048);
        assert_eq!(repo::count_verses(&pool, "NASB1995").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_manifest_entries_are_not_found() {
        let pool = setup_pool().await;
        let service = ContentService::new(pool, Arc::new(stub()));
        let manifest = service.manifest().await.unwrap();
        assert!(matches!(
            service.download_bible(&manifest, "KJV").await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_available_compares_manifest_timestamps() {
        let pool = setup_pool().await;
        let service = ContentService::new(pool, Arc::new(stub()));
        let mut manifest = service.manifest().await.unwrap();
        service.download_bible(&manifest, "NASB1995").await.unwrap();

        assert!(!service
            .update_available(&manifest, "bible:NASB1995")
            .await
            .unwrap());
        manifest.bible_versions[0].updated_at += Duration::days(1);
        assert!(service
            .update_available(&manifest, "bible:NASB1995")
            .await
            .unwrap());
        // Never downloaded, so nothing to update.
        assert!(!service
            .update_available(&manifest, "bible:KJV")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn remove_drops_rows_and_metadata() {
        let pool = setup_pool().await;
        let service = ContentService::new(pool.clone(), Arc::new(stub()));
        let manifest = service.manifest().await.unwrap();
        service.download_bible(&manifest, "NASB1995").await.unwrap();

        service.remove("bible:NASB1995").await.unwrap();
        assert_eq!(repo::count_verses(&pool, "NASB1995").await.unwrap(), 0);
        assert!(service.status().await.unwrap().is_empty());

        assert!(matches!(
            service.remove("fonts:Inter").await,
            Err(SyncError::Validation(_))
        ));
    }
}

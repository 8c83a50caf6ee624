//! The top-level filesystem façade
//!
//! Composes the enforcer, metadata façade, content store, revision
//! counter, and search daemon into the write/read/delete/rename/list/
//! search surface described in the architecture table. Every mutation
//! follows the same shape: authorize, then one metadata transaction over
//! the CAS write, then a revision bump, then a debounced search refresh.

use nexus_cas::ContentStore;
use nexus_core::{
    CasConfig, ConsistencyToken, DaemonConfig, EnforcerConfig, NexusError, ObjectRef,
    Permission, RebacConfig, ResolverConfig, Result, TokenCodec, ZoneId,
};
use nexus_locks::{LockService, RevisionCounter};
use nexus_memory::{MemoryContent, MemoryStore};
use nexus_metadata::{FileMetadata, MetadataStore};
use nexus_rebac::{
    AccessContext, NamespaceRegistry, PermissionEnforcer, RebacEngine, TupleInput,
};
use nexus_records::{NewChunk, PaginatedResult, RecordStore};
use nexus_search::{
    ChangeType, Embedder, FusionMethod, HashEmbedder, SearchDaemon, SearchMode, SearchResult,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Configuration for the whole stack
#[derive(Clone)]
pub struct NexusConfig {
    pub cas: CasConfig,
    pub rebac: RebacConfig,
    pub resolver: ResolverConfig,
    pub daemon: DaemonConfig,
    pub enforcer: EnforcerConfig,
    /// Server key for consistency-token MACs
    pub token_key: Vec<u8>,
}

impl Default for NexusConfig {
    fn default() -> Self {
        NexusConfig {
            cas: CasConfig::default(),
            rebac: RebacConfig::default(),
            resolver: ResolverConfig::default(),
            daemon: DaemonConfig::default(),
            enforcer: EnforcerConfig::default(),
            token_key: Uuid::new_v4().as_bytes().to_vec(),
        }
    }
}

/// Outcome of a successful file write
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    /// Content hash of the stored bytes
    pub etag: String,
    /// File version after the write
    pub version: u64,
    /// Zone revision after the write
    pub revision: u64,
    /// Token for read-your-writes downstream
    pub consistency_token: String,
}

/// The composed filesystem
pub struct NexusFs {
    cas: Arc<ContentStore>,
    records: Arc<RecordStore>,
    metadata: MetadataStore,
    engine: Arc<RebacEngine>,
    enforcer: PermissionEnforcer,
    resolver: nexus_rebac::NamespaceResolver,
    daemon: Arc<SearchDaemon>,
    memory: MemoryStore,
    tokens: TokenCodec,
}

impl NexusFs {
    /// Open a filesystem rooted at a directory, with defaults
    ///
    /// Content lands under `<root>/storage`, the SQL source of truth at
    /// `<root>/metadata.db`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(root, NexusConfig::default(), Arc::new(HashEmbedder::default()))
    }

    /// Open with explicit configuration and embedding provider
    pub fn open_with(
        root: impl AsRef<Path>,
        config: NexusConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let cas = Arc::new(ContentStore::open(root.join("storage"), config.cas.clone())?);
        let records = Arc::new(RecordStore::open(root.join("metadata.db"))?);
        Self::assemble(cas, records, config, embedder)
    }

    /// Fully in-memory instance (tests); content still needs a directory
    pub fn open_ephemeral(content_dir: impl AsRef<Path>) -> Result<Self> {
        let cas = Arc::new(ContentStore::open(
            content_dir.as_ref(),
            CasConfig::default(),
        )?);
        let records = Arc::new(RecordStore::open_in_memory()?);
        Self::assemble(
            cas,
            records,
            NexusConfig::default(),
            Arc::new(HashEmbedder::default()),
        )
    }

    fn assemble(
        cas: Arc<ContentStore>,
        records: Arc<RecordStore>,
        config: NexusConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let locks = Arc::new(LockService::new());
        let revisions = Arc::new(RevisionCounter::new());
        let tokens = TokenCodec::new(config.token_key.clone());

        let metadata = MetadataStore::new(
            Arc::clone(&records),
            Arc::clone(&locks),
            Arc::clone(&revisions),
        );
        let engine = Arc::new(RebacEngine::new(
            Arc::clone(&records),
            Arc::clone(&revisions),
            NamespaceRegistry::builtin(),
            config.rebac.clone(),
            tokens.clone(),
        ));
        let enforcer = PermissionEnforcer::new(
            Arc::clone(&engine),
            Arc::clone(&records),
            config.enforcer.clone(),
        );
        let resolver = nexus_rebac::NamespaceResolver::new(
            Arc::clone(&records),
            Arc::clone(&revisions),
            NamespaceRegistry::builtin(),
            config.resolver.clone(),
        );
        let daemon = SearchDaemon::new(config.daemon.clone(), Arc::clone(&records), embedder);
        let memory = MemoryStore::new(Arc::clone(&records));

        Ok(NexusFs {
            cas,
            records,
            metadata,
            engine,
            enforcer,
            resolver,
            daemon,
            memory,
            tokens,
        })
    }

    // ========================================================================
    // Component access
    // ========================================================================

    /// The content store
    pub fn cas(&self) -> &Arc<ContentStore> {
        &self.cas
    }

    /// The record store
    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    /// The metadata façade
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// The ReBAC engine
    pub fn rebac(&self) -> &Arc<RebacEngine> {
        &self.engine
    }

    /// The permission enforcer
    pub fn enforcer(&self) -> &PermissionEnforcer {
        &self.enforcer
    }

    /// The mount resolver
    pub fn resolver(&self) -> &nexus_rebac::NamespaceResolver {
        &self.resolver
    }

    /// The search daemon
    pub fn search_daemon(&self) -> &Arc<SearchDaemon> {
        &self.daemon
    }

    /// The memory store
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Warm the search indexes and start the refresh loop
    pub async fn start_search(&self) -> Result<()> {
        self.daemon.startup().await
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Write a file: authorize, store content, record metadata, index
    ///
    /// The first write to a path makes the writer its owner so they can
    /// read their own file back without a separate grant.
    pub fn write_file(
        &self,
        path: &str,
        content: &[u8],
        ctx: &AccessContext,
    ) -> Result<WriteReceipt> {
        nexus_core::VirtualPath::new(path)?;
        self.enforce_or_first_write(path, ctx)?;
        let zone = zone_of(ctx);

        let etag = self.cas.write(content)?;
        let existing = self.metadata.get(zone.as_str(), path)?;
        let put = match self.metadata.put(
            &FileMetadata::new(path, zone.as_str())
                .with_content(etag.clone(), content.len() as u64)
                .with_owner(ctx.subject.subject_id.clone()),
        ) {
            Ok(put) => put,
            Err(e) => {
                // Roll the content reference back; the metadata
                // transaction itself already rolled back
                let _ = self.cas.delete(&etag);
                return Err(e);
            }
        };

        // Replacing content releases the previous blob reference. When
        // the bytes are unchanged this drops the extra reference the
        // duplicate write just took, keeping ref_count equal to the
        // number of rows pointing at the hash.
        if let Some(previous) = existing.as_ref().and_then(|m| m.etag.clone()) {
            let _ = self.cas.delete(&previous);
        } else if existing.is_none() {
            self.engine.write_tuple(
                &TupleInput {
                    subject: ctx.subject.clone(),
                    relation: "owner".to_string(),
                    object: ObjectRef::file(path),
                    conditions: None,
                    expires_at: None,
                },
                &zone,
            )?;
        }

        // Index the text for search when it is text
        if let Ok(text) = std::str::from_utf8(content) {
            let chunks: Vec<NewChunk> = chunk_text(text, 1_000)
                .into_iter()
                .map(|chunk_text| NewChunk {
                    chunk_text,
                    embedding: None,
                })
                .collect();
            self.records.replace_document_chunks(&put.path_id, &chunks)?;
        }
        self.daemon.notify_file_change(path, ChangeType::Updated);

        let consistency_token = self
            .tokens
            .encode(&ConsistencyToken::new(zone.clone(), put.revision))?;
        debug!(path, etag = etag.as_str(), version = put.version, "file written");
        Ok(WriteReceipt {
            etag,
            version: put.version,
            revision: put.revision,
            consistency_token,
        })
    }

    /// Read a file's bytes
    pub fn read_file(&self, path: &str, ctx: &AccessContext) -> Result<Vec<u8>> {
        self.enforcer.check(path, Permission::Read, ctx)?;
        let zone = zone_of(ctx);
        let meta = self
            .metadata
            .get(zone.as_str(), path)?
            .ok_or_else(|| NexusError::NotFound(path.to_string()))?;
        let etag = meta
            .etag
            .ok_or_else(|| NexusError::NotFound(format!("{path} has no content")))?;
        self.cas.read(&etag)
    }

    /// File metadata, authorization included
    pub fn stat(&self, path: &str, ctx: &AccessContext) -> Result<Option<FileMetadata>> {
        self.enforcer.check(path, Permission::Read, ctx)?;
        self.metadata.get(zone_of(ctx).as_str(), path)
    }

    /// Delete a file: soft-delete metadata, drop the content reference
    pub fn delete_file(&self, path: &str, ctx: &AccessContext) -> Result<bool> {
        self.enforcer.check(path, Permission::Write, ctx)?;
        let zone = zone_of(ctx);

        let deleted = self.metadata.delete(zone.as_str(), path)?;
        let Some(deleted) = deleted else {
            return Ok(false);
        };
        if let Some(etag) = &deleted.etag {
            let _ = self.cas.delete(etag);
        }
        self.daemon.notify_file_change(path, ChangeType::Deleted);
        Ok(true)
    }

    /// Rename a file; requires write on both ends
    pub fn rename(&self, old_path: &str, new_path: &str, ctx: &AccessContext) -> Result<()> {
        nexus_core::VirtualPath::new(new_path)?;
        self.enforcer.check(old_path, Permission::Write, ctx)?;
        self.enforcer.check(new_path, Permission::Write, ctx)?;
        let zone = zone_of(ctx);
        self.metadata.rename(zone.as_str(), old_path, new_path)?;
        self.daemon.notify_file_change(old_path, ChangeType::Deleted);
        self.daemon.notify_file_change(new_path, ChangeType::Updated);
        Ok(())
    }

    /// List files under a prefix, filtered to what the subject can see
    pub fn list(&self, prefix: &str, ctx: &AccessContext) -> Result<Vec<FileMetadata>> {
        let zone = zone_of(ctx);
        let all = self.metadata.list(prefix, true, Some(zone.as_str()))?;
        self.filter_listing(all, ctx, &zone)
    }

    /// Paginated listing with the same visibility filter
    pub fn list_paginated(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
        ctx: &AccessContext,
    ) -> Result<PaginatedResult<FileMetadata>> {
        let zone = zone_of(ctx);
        let page = self
            .metadata
            .list_paginated(prefix, true, limit, cursor, Some(zone.as_str()))?;
        let items = self.filter_listing(page.items, ctx, &zone)?;
        Ok(PaginatedResult {
            items,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        })
    }

    fn filter_listing(
        &self,
        items: Vec<FileMetadata>,
        ctx: &AccessContext,
        zone: &ZoneId,
    ) -> Result<Vec<FileMetadata>> {
        if ctx.is_admin || ctx.is_system {
            return Ok(items);
        }
        let paths: Vec<String> = items.iter().map(|m| m.path.clone()).collect();
        let visible =
            self.resolver
                .filter_visible(&ctx.subject, &paths, zone.as_str())?;
        let visible: std::collections::HashSet<String> = visible.into_iter().collect();
        Ok(items
            .into_iter()
            .filter(|m| visible.contains(&m.path))
            .collect())
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Search, with results filtered to the subject's visible paths
    #[allow(clippy::too_many_arguments)]
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        path_filter: Option<&str>,
        alpha: f32,
        fusion: FusionMethod,
        ctx: &AccessContext,
    ) -> Result<Vec<SearchResult>> {
        let hits = self
            .daemon
            .search(query, mode, limit, path_filter, alpha, fusion)
            .await?;
        if ctx.is_admin || ctx.is_system {
            return Ok(hits);
        }
        let zone = zone_of(ctx);
        let mut visible = Vec::with_capacity(hits.len());
        for hit in hits {
            if self
                .resolver
                .is_visible(&ctx.subject, &hit.path, zone.as_str())?
            {
                visible.push(hit);
            }
        }
        Ok(visible)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Authorize a write, allowing first-writes into unclaimed paths
    ///
    /// A path with no metadata and no conflicting grant may be created by
    /// any authenticated subject; the write then records them as owner.
    /// Existing paths require a write grant.
    fn enforce_or_first_write(&self, path: &str, ctx: &AccessContext) -> Result<()> {
        let zone = zone_of(ctx);
        if self.metadata.exists(zone.as_str(), path)? {
            return self.enforcer.check(path, Permission::Write, ctx);
        }
        match self.enforcer.check(path, Permission::Write, ctx) {
            Ok(()) => Ok(()),
            Err(NexusError::PermissionDenied {
                reason: nexus_core::DenialReason::NoGrant,
                ..
            }) if !ctx.subject.subject_id.is_empty() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// CAS-backed content port for the memory subsystem
pub struct CasMemoryContent {
    cas: Arc<ContentStore>,
}

impl CasMemoryContent {
    /// Wrap a content store
    pub fn new(cas: Arc<ContentStore>) -> Self {
        CasMemoryContent { cas }
    }
}

impl MemoryContent for CasMemoryContent {
    fn load(&self, content_hash: &str) -> Result<String> {
        let bytes = self.cas.read(content_hash)?;
        String::from_utf8(bytes)
            .map_err(|e| NexusError::Serialization(format!("memory content not utf-8: {e}")))
    }

    fn store(&self, text: &str) -> Result<String> {
        self.cas.write(text.as_bytes())
    }
}

fn zone_of(ctx: &AccessContext) -> ZoneId {
    ctx.zone_id.clone().unwrap_or_else(ZoneId::default_zone)
}

/// Split text into chunks of at most `max_len` characters on line breaks
///
/// Lines longer than `max_len` are split hard. Always returns at least
/// one chunk for non-empty text.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let mut line = line;
        while line.len() > max_len {
            let split_at = floor_char_boundary(line, max_len);
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(line[..split_at].to_string());
            line = &line[split_at..];
        }
        if current.len() + line.len() + 1 > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() && !text.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    if index == 0 {
        // First char is wider than the budget; take it whole
        s.chars().next().map(|c| c.len_utf8()).unwrap_or(s.len())
    } else {
        index
    }
}

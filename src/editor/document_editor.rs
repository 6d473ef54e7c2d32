//! Document editor facade.
//!
//! Holds the decoded text of every page content stream, scans it for
//! editable items, applies mutations to it, and writes the changed streams
//! back either as an appended revision or, when the page-to-object mapping
//! cannot be resolved, as a full rewrite. Dictionary values listed by
//! [`DocumentEditor::safe_items`] are saved the same way, as replaced
//! objects.

use super::incremental::{Edit, IncrementalWriter};
use super::safe_items::{scan_safe_items, updated_dictionary, SafeItem, SafeValue};
use super::scheduler::{EditScheduler, ReconcileTicket};
use crate::config::{ScanOptions, SessionConfig};
use crate::content::mutation::plan;
use crate::content::scanner::{scan_page, scan_stream, ScanRequest};
use crate::content::{EditableItem, Mutation, PageItems, ScanPool, XObjectKind};
use crate::error::{Error, Result};
use crate::mapping::{build_mapping, scan_mapping, DocumentMapping};
use crate::object::{Dict, Object, ObjectRef};
use crate::tree::{DocumentTree, ObjectTree, SerializeOptions};
use crate::utils::{latin1_decode, latin1_encode};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// Limit on `/Parent` hops when looking for inherited resources.
const MAX_INHERIT_DEPTH: usize = 32;

/// How [`DocumentEditor::save`] writes changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Append changed streams as a new revision
    Incremental,
    /// Rewrite the whole document
    Full,
}

/// Decoded content of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    /// Text of each content stream, in mapping order
    pub streams: Vec<String>,
    /// XObject resource name to subtype
    pub xobject_kinds: HashMap<String, XObjectKind>,
}

/// Editor for one open document.
pub struct DocumentEditor {
    bytes: Vec<u8>,
    tree: ObjectTree,
    mapping: DocumentMapping,
    pages: Vec<PageContent>,
    dirty: BTreeSet<(usize, usize)>,
    dirty_objects: BTreeSet<ObjectRef>,
    revision: u64,
    scheduler: EditScheduler,
    writer: IncrementalWriter,
    mode: SaveMode,
    scan_options: ScanOptions,
    config: SessionConfig,
    serialize_options: SerializeOptions,
}

impl DocumentEditor {
    /// Open a document with default options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use pdf_patch::DocumentEditor;
    ///
    /// let editor = DocumentEditor::open(std::fs::read("document.pdf")?)?;
    /// println!("{} pages", editor.page_count());
    /// ```
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        Self::open_with(bytes, ScanOptions::default(), SessionConfig::default())
    }

    /// Open a document.
    ///
    /// Parses the whole file, maps pages to their content streams, decodes
    /// every stream, and opens the incremental writer. When the mapping is
    /// incomplete or the last cross-reference section is unreadable, the
    /// editor falls back to full rewrites.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseError`] when no object can be parsed.
    pub fn open_with(bytes: Vec<u8>, scan_options: ScanOptions, config: SessionConfig) -> Result<Self> {
        let loaded = load_document(&bytes)?;

        let mut writer = IncrementalWriter::new().with_xref_widths(config.xref_widths);
        let mode = match loaded
            .mapping
            .ensure_usable()
            .and_then(|_| writer.open(bytes.clone(), loaded.mapping.clone()))
        {
            Ok(pages) => {
                log::debug!("Incremental saving enabled for {} pages", pages);
                SaveMode::Incremental
            },
            Err(e) if e.is_fallback_signal() => {
                log::warn!("Falling back to full rewrites: {}", e);
                SaveMode::Full
            },
            Err(e) => return Err(e),
        };

        Ok(Self {
            bytes,
            tree: loaded.tree,
            mapping: loaded.mapping,
            pages: loaded.pages,
            dirty: BTreeSet::new(),
            dirty_objects: BTreeSet::new(),
            revision: 0,
            scheduler: EditScheduler::new(config.debounce, config.reconcile_idle),
            writer,
            mode,
            scan_options,
            config,
            serialize_options: SerializeOptions {
                compress: true,
                indent_width: 0,
            },
        })
    }

    /// Options for full rewrites.
    pub fn with_serialize_options(mut self, options: SerializeOptions) -> Self {
        self.serialize_options = options;
        self
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page-to-object mapping.
    pub fn mapping(&self) -> &DocumentMapping {
        &self.mapping
    }

    /// Parsed object tree of the last loaded or saved bytes.
    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    /// Latest saved buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Current text of a content stream.
    pub fn stream_text(&self, page: usize, stream: usize) -> Option<&str> {
        self.pages.get(page)?.streams.get(stream).map(String::as_str)
    }

    /// Number of content streams on a page.
    pub fn stream_count(&self, page: usize) -> usize {
        self.pages.get(page).map_or(0, |p| p.streams.len())
    }

    /// Whether saves append revisions.
    pub fn is_incremental(&self) -> bool {
        self.mode == SaveMode::Incremental
    }

    /// Save mode chosen at open.
    pub fn save_mode(&self) -> SaveMode {
        self.mode
    }

    /// Whether any stream or dictionary value changed since the last save.
    pub fn is_modified(&self) -> bool {
        !self.dirty.is_empty() || !self.dirty_objects.is_empty()
    }

    /// Number of saves so far, counting direct appends.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Pages with unsaved changes.
    pub fn dirty_pages(&self) -> Vec<usize> {
        let pages: BTreeSet<usize> = self.dirty.iter().map(|(page, _)| *page).collect();
        pages.into_iter().collect()
    }

    /// Edit epoch of a page; bumped by every change to it.
    pub fn page_epoch(&self, page: usize) -> u64 {
        self.scheduler.epoch(page)
    }

    /// Scan request for a page's current text.
    pub fn scan_request(&self, page: usize) -> Result<ScanRequest> {
        let content = self.page(page)?;
        Ok(ScanRequest {
            page_index: page,
            streams: content.streams.clone(),
            xobject_kinds: content.xobject_kinds.clone(),
            options: self.scan_options.clone(),
        })
    }

    /// Scan pages on the calling thread. `None` scans every page.
    pub fn scan(&self, pages: Option<&[usize]>) -> Result<Vec<PageItems>> {
        self.page_list(pages)
            .into_iter()
            .map(|page| self.scan_request(page).map(|request| scan_page(&request)))
            .collect()
    }

    /// Scan pages through a worker pool. Results are in request order.
    pub fn scan_with(&self, pool: &mut ScanPool, pages: Option<&[usize]>) -> Result<Vec<PageItems>> {
        let requests = self
            .page_list(pages)
            .into_iter()
            .map(|page| self.scan_request(page))
            .collect::<Result<Vec<_>>>()?;
        pool.scan_all(requests)
    }

    /// Apply `mutation` to `item` and return the item as rescanned from
    /// the changed stream.
    ///
    /// Every other item scanned from the same stream is stale afterwards.
    ///
    /// # Errors
    ///
    /// - [`Error::StreamNotFound`] when scanning the current text no longer
    ///   yields the item unchanged.
    /// - [`Error::InvalidState`] when the mutation does not apply to the item.
    /// - [`Error::Scan`] when the changed stream no longer yields the item.
    ///
    /// The stream is unchanged in every error case.
    pub fn apply_mutation(&mut self, item: &EditableItem, mutation: &Mutation) -> Result<EditableItem> {
        let (page, stream) = (item.page(), item.stream());
        let src = self.stream_text(page, stream).ok_or(Error::StreamNotFound {
            page,
            stream,
            offset: item.range().start,
        })?;
        let kinds = &self.pages[page].xobject_kinds;

        let current = scan_stream(page, stream, src, kinds, &self.scan_options).into_items();
        if find_item(&current, item, item.range().start).as_ref() != Some(item) {
            return Err(Error::StreamNotFound {
                page,
                stream,
                offset: item.range().start,
            });
        }

        let replacement = plan(item, src, mutation, self.config.number_precision)?;
        let updated_text = replacement.apply(src)?;

        let start = replacement.map_offset(item.range().start);
        let rescanned = scan_stream(page, stream, &updated_text, kinds, &self.scan_options);
        let updated = find_item(&rescanned.into_items(), item, start).ok_or_else(|| Error::Scan {
            offset: start,
            reason: "edited item not found on rescan".to_string(),
        })?;

        log::debug!(
            "Page {} stream {}: replaced {}..{} ({:+} bytes)",
            page,
            stream,
            replacement.range.start,
            replacement.range.end,
            replacement.delta()
        );
        self.set_stream_text(page, stream, updated_text);
        Ok(updated)
    }

    /// Regex find/replace over the content streams of `pages` (`None` for
    /// all). `pattern` may be wrapped as `/pattern/flags` with flags `i`,
    /// `m` and `s`. Returns the number of streams changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`] for an invalid pattern.
    pub fn regex_replace(&mut self, pattern: &str, replacement: &str, pages: Option<&[usize]>) -> Result<usize> {
        let re = compile_pattern(pattern)?;
        let mut changed = 0;
        for page in self.page_list(pages) {
            for stream in 0..self.stream_count(page) {
                let updated = match re.replace_all(&self.pages[page].streams[stream], replacement) {
                    Cow::Owned(text) => text,
                    Cow::Borrowed(_) => continue,
                };
                if updated != self.pages[page].streams[stream] {
                    self.set_stream_text(page, stream, updated);
                    changed += 1;
                }
            }
        }
        log::debug!("Regex replace changed {} stream(s)", changed);
        Ok(changed)
    }

    /// Replace a whole stream's text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] for an unknown page or stream.
    pub fn set_stream(&mut self, page: usize, stream: usize, text: impl Into<String>) -> Result<()> {
        if self.stream_text(page, stream).is_none() {
            return Err(Error::StreamNotFound {
                page,
                stream,
                offset: 0,
            });
        }
        self.set_stream_text(page, stream, text.into());
        Ok(())
    }

    fn set_stream_text(&mut self, page: usize, stream: usize, text: String) {
        self.pages[page].streams[stream] = text;
        self.dirty.insert((page, stream));
        self.scheduler.touch(page);
    }

    /// Dictionary values that can be changed without touching any content
    /// stream, as of the last change.
    pub fn safe_items(&self) -> Vec<SafeItem> {
        scan_safe_items(&self.tree, &self.mapping)
    }

    /// Store `value` for `item` and return the item as it now reads. The
    /// change is written by the next [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] when the value changed since `item` was
    ///   listed or `value` does not suit the item.
    /// - [`Error::ObjectNotFound`] when the object is gone.
    /// - [`Error::EditResolution`] when the object is a content stream.
    pub fn set_safe_item(&mut self, item: &SafeItem, value: SafeValue) -> Result<SafeItem> {
        if self.mapping.contains(item.object) {
            return Err(Error::EditResolution(format!(
                "{} is a content stream",
                item.object
            )));
        }
        let updated = updated_dictionary(&self.tree, item, &value)?;
        log::debug!("{}: {} -> {}", item.label, item.value.preview(), value.preview());
        self.tree.set(item.object, updated);
        self.dirty_objects.insert(item.object);
        Ok(SafeItem {
            value,
            ..item.clone()
        })
    }

    /// Open the incremental writer on other bytes. Does nothing when it is
    /// already open.
    pub fn open_incremental(&mut self, bytes: Vec<u8>, mapping: DocumentMapping) -> Result<usize> {
        let pages = self.writer.open(bytes, mapping)?;
        self.mode = SaveMode::Incremental;
        Ok(pages)
    }

    /// Append `edits` as one revision.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] when the writer is closed,
    /// [`Error::EditResolution`] when an edit cannot be resolved.
    pub fn apply_edits(&mut self, edits: &[Edit]) -> Result<Vec<u8>> {
        self.append_revision(edits, &[])
    }

    fn append_revision(&mut self, edits: &[Edit], objects: &[(ObjectRef, Object)]) -> Result<Vec<u8>> {
        let out = self.writer.apply_revision(edits, objects)?;
        if !edits.is_empty() || !objects.is_empty() {
            self.scheduler.record_append(Instant::now());
            self.revision += 1;
        }
        self.bytes.clone_from(&out);
        Ok(out)
    }

    /// Write all unsaved changes and return the new document bytes.
    ///
    /// In incremental mode the changed streams are appended as one
    /// revision; otherwise the whole document is rewritten.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        let out = match self.mode {
            SaveMode::Incremental => {
                let edits: Vec<Edit> = self
                    .dirty
                    .iter()
                    .map(|&(page, stream)| Edit::slot(page, stream, self.pages[page].streams[stream].clone()))
                    .collect();
                let objects: Vec<(ObjectRef, Object)> = self
                    .dirty_objects
                    .iter()
                    .filter_map(|id| self.tree.get(*id).map(|obj| (*id, obj.clone())))
                    .collect();
                self.append_revision(&edits, &objects)?
            },
            SaveMode::Full => self.save_full()?,
        };
        self.dirty.clear();
        self.dirty_objects.clear();
        Ok(out)
    }

    fn save_full(&mut self) -> Result<Vec<u8>> {
        let mut tree = self.tree.clone();
        for &(page, stream) in &self.dirty {
            let id = self.mapping.resolve(page, stream).ok_or_else(|| {
                Error::MappingUnresolved(format!("no object for page {} stream {}", page + 1, stream))
            })?;
            tree.set_stream_data(id, latin1_encode(&self.pages[page].streams[stream]))?;
        }
        let out = tree.serialize(&self.serialize_options)?;
        log::debug!("Full rewrite: {} bytes", out.len());
        self.tree = tree;
        self.revision += 1;
        self.bytes.clone_from(&out);
        Ok(out)
    }

    /// Start a background re-parse of the latest bytes.
    ///
    /// Run the returned job on any thread, then hand its outcome to
    /// [`finish_reconcile`](Self::finish_reconcile).
    pub fn begin_reconcile(&mut self) -> ReconcileJob {
        ReconcileJob {
            bytes: self.bytes.clone(),
            revision: self.revision,
            ticket: self.scheduler.dispatch_reconcile(),
        }
    }

    /// Adopt a re-parse. Pages edited after the job was dispatched, or with
    /// unsaved changes, keep their in-memory text, and unsaved dictionary
    /// values carry over. Returns the pages whose text was corrected.
    ///
    /// An outcome parsed from bytes that a later save replaced is dropped
    /// whole.
    pub fn finish_reconcile(&mut self, outcome: ReconcileOutcome) -> Vec<usize> {
        if outcome.revision != self.revision {
            log::debug!(
                "Reconcile: dropping outcome of revision {}, now at {}",
                outcome.revision,
                self.revision
            );
            return Vec::new();
        }

        let keep: BTreeSet<usize> = self
            .scheduler
            .touched_since(&outcome.ticket)
            .into_iter()
            .chain(self.dirty_pages())
            .collect();

        let mut pages = outcome.loaded.pages;
        let mut refreshed = Vec::new();
        for (index, fresh) in pages.iter_mut().enumerate() {
            let Some(current) = self.pages.get_mut(index) else {
                continue;
            };
            if keep.contains(&index) {
                log::debug!("Reconcile: keeping edited page {}", index);
                std::mem::swap(fresh, current);
            } else if fresh.streams != current.streams {
                refreshed.push(index);
            }
        }
        if pages.len() < self.pages.len() {
            log::warn!(
                "Reconcile found {} pages, had {}",
                pages.len(),
                self.pages.len()
            );
        }

        let mut tree = outcome.loaded.tree;
        for id in &self.dirty_objects {
            if let Some(obj) = self.tree.get(*id) {
                tree.set(*id, obj.clone());
            }
        }

        self.pages = pages;
        self.tree = tree;
        self.mapping = outcome.loaded.mapping;
        refreshed
    }

    fn page(&self, page: usize) -> Result<&PageContent> {
        self.pages
            .get(page)
            .ok_or_else(|| Error::InvalidState(format!("page {} out of range ({} pages)", page, self.pages.len())))
    }

    fn page_list(&self, pages: Option<&[usize]>) -> Vec<usize> {
        match pages {
            Some(list) => list.to_vec(),
            None => (0..self.pages.len()).collect(),
        }
    }
}

/// Pending full re-parse.
#[derive(Debug, Clone)]
pub struct ReconcileJob {
    bytes: Vec<u8>,
    revision: u64,
    ticket: ReconcileTicket,
}

impl ReconcileJob {
    /// Parse the bytes captured at dispatch.
    pub fn run(self) -> Result<ReconcileOutcome> {
        let loaded = load_document(&self.bytes)?;
        Ok(ReconcileOutcome {
            loaded,
            revision: self.revision,
            ticket: self.ticket,
        })
    }
}

/// Result of a [`ReconcileJob`].
pub struct ReconcileOutcome {
    loaded: LoadedDocument,
    revision: u64,
    ticket: ReconcileTicket,
}

struct LoadedDocument {
    tree: ObjectTree,
    mapping: DocumentMapping,
    pages: Vec<PageContent>,
}

fn load_document(bytes: &[u8]) -> Result<LoadedDocument> {
    let tree = ObjectTree::parse(bytes)?;
    let mapping = DocumentMapping::merge(&build_mapping(&tree), &scan_mapping(bytes));
    log::debug!("Mapped {} pages", mapping.page_count());

    let pages = mapping
        .pages
        .iter()
        .map(|page| PageContent {
            streams: page.contents.iter().map(|id| stream_text(&tree, *id)).collect(),
            xobject_kinds: xobject_kinds(&tree, page.page_obj),
        })
        .collect();

    Ok(LoadedDocument { tree, mapping, pages })
}

fn stream_text(tree: &ObjectTree, id: ObjectRef) -> String {
    match tree.get(id).map(Object::decode_stream_data) {
        Some(Ok(data)) => latin1_decode(&data),
        Some(Err(e)) => {
            log::warn!("Content stream {} could not be decoded: {}", id, e);
            String::new()
        },
        None => {
            log::warn!("Content stream {} is missing", id);
            String::new()
        },
    }
}

fn xobject_kinds(tree: &ObjectTree, page: Option<ObjectRef>) -> HashMap<String, XObjectKind> {
    let mut kinds = HashMap::new();
    let Some(mut node) = page.and_then(|id| tree.get(id)).and_then(Object::as_dict) else {
        return kinds;
    };

    for _ in 0..MAX_INHERIT_DEPTH {
        if let Some(resources) = lookup_dict(tree, node, "Resources") {
            if let Some(xobjects) = lookup_dict(tree, resources, "XObject") {
                for (name, value) in xobjects {
                    let kind = match tree.resolve(value).and_then(Object::as_dict) {
                        Some(dict) => match dict.get("Subtype").and_then(Object::as_name) {
                            Some("Image") => XObjectKind::Image,
                            Some("Form") => XObjectKind::Form,
                            _ => XObjectKind::Unknown,
                        },
                        None => XObjectKind::Unknown,
                    };
                    kinds.insert(name.clone(), kind);
                }
            }
            break;
        }
        match lookup_dict(tree, node, "Parent") {
            Some(parent) => node = parent,
            None => break,
        }
    }
    kinds
}

fn lookup_dict<'a>(tree: &'a ObjectTree, dict: &'a Dict, key: &str) -> Option<&'a Dict> {
    dict.get(key).and_then(|v| tree.resolve(v)).and_then(Object::as_dict)
}

fn find_item(items: &[EditableItem], original: &EditableItem, start: usize) -> Option<EditableItem> {
    items
        .iter()
        .find(|candidate| candidate.same_kind(original) && candidate.range().start == start)
        .cloned()
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    let (body, flags) = match pattern.strip_prefix('/').and_then(|rest| rest.rsplit_once('/')) {
        Some((body, flags)) if flags.chars().all(|c| c.is_ascii_alphabetic()) => (body, flags),
        _ => (pattern, ""),
    };
    Ok(RegexBuilder::new(body)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()?)
}

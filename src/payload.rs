//! Drag payload sources and dragged-file extraction.
//!
//! The OS exposes drag content through a clipboard-like payload source that
//! becomes available asynchronously and inconsistently across source
//! applications. The [`Extractor`] tries an ordered list of formats against a
//! [`PayloadSource`], keeps the first non-empty result and turns every raw
//! reference into a [`DraggedItemDescriptor`]. Failures along the way are
//! soft: they are logged and treated as "no files".

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A format the extractor can ask the payload source for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PayloadFormat {
    /// Typed list of file URLs / file references.
    FileUrls,
    /// Legacy list of plain filenames.
    FilenameList,
    /// Deferred (promised) files that do not exist on disk yet.
    PromisedFiles,
    /// A vendor-specific format identified by its OS type name.
    Vendor(String),
}

impl PayloadFormat {
    /// Default extraction order.
    pub fn default_strategies() -> Vec<PayloadFormat> {
        vec![
            PayloadFormat::FileUrls,
            PayloadFormat::FilenameList,
            PayloadFormat::PromisedFiles,
        ]
    }
}

/// One file reference as read from the payload source, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawReference {
    /// A filesystem path.
    Path(PathBuf),
    /// A `file://` URL.
    FileUrl(String),
    /// The display name of a promised file with no path yet.
    Promised(String),
}

/// Whether a dragged item is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ItemKind {
    /// Regular file (also used for items that do not exist).
    File,
    /// Directory.
    Folder,
}

/// Metadata about one dragged item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DraggedItemDescriptor {
    /// Full path (or the bare name for promised files).
    pub path: PathBuf,
    /// Last path component.
    pub name: String,
    /// File or folder.
    pub kind: ItemKind,
    /// Whether the path exists right now.
    pub exists: bool,
    /// Size in bytes for existing files.
    pub size: Option<u64>,
    /// Extension without the dot, for files only.
    pub extension: Option<String>,
}

impl DraggedItemDescriptor {
    /// Describe a filesystem path, resolving existence, kind and size.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = display_name(&path);
        let metadata = fs::metadata(&path).ok();
        let exists = metadata.is_some();
        let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());
        let size = metadata
            .as_ref()
            .filter(|m| m.is_file())
            .map(|m| m.len());
        let extension = if is_dir { None } else { extension_of(&name) };

        Self {
            path,
            name,
            kind: if is_dir { ItemKind::Folder } else { ItemKind::File },
            exists,
            size,
            extension,
        }
    }

    /// Describe a promised file known only by name.
    pub fn promised(name: &str) -> Self {
        Self {
            path: PathBuf::from(name),
            name: name.to_string(),
            kind: ItemKind::File,
            exists: false,
            size: None,
            extension: extension_of(name),
        }
    }

    /// Whether this item is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn extension_of(name: &str) -> Option<String> {
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => Some(name[i + 1..].to_string()),
        _ => None,
    }
}

/// Turn a raw reference into a descriptor. Unusable references yield `None`.
pub fn normalize(reference: RawReference) -> Option<DraggedItemDescriptor> {
    match reference {
        RawReference::Path(path) => {
            if path.as_os_str().is_empty() {
                None
            } else {
                Some(DraggedItemDescriptor::from_path(path))
            }
        }
        RawReference::FileUrl(url) => file_url_to_path(&url).map(DraggedItemDescriptor::from_path),
        RawReference::Promised(name) => {
            let name = name.trim();
            (!name.is_empty()).then(|| DraggedItemDescriptor::promised(name))
        }
    }
}

/// Convert a `file://` URL (percent-encoded) into a path.
pub fn file_url_to_path(raw: &str) -> Option<PathBuf> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "file" {
        return None;
    }
    parsed.to_file_path().ok()
}

/// Parse a `text/uri-list` body: one URI per line, `#` starts a comment.
pub fn parse_uri_list(body: &str) -> Vec<RawReference> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if line.starts_with("file:") {
                RawReference::FileUrl(line.to_string())
            } else {
                RawReference::Path(PathBuf::from(line))
            }
        })
        .collect()
}

/// The OS object through which drag content becomes available.
///
/// Implementations must be cheap to query for [`change_count`] since the
/// poller calls it on every tick.
///
/// [`change_count`]: PayloadSource::change_count
pub trait PayloadSource: Send + Sync {
    /// A counter that advances whenever the payload content changes.
    fn change_count(&self) -> Result<i64>;

    /// Read the references available in `format`.
    ///
    /// Returns an empty list when the format is absent.
    fn read(&self, format: &PayloadFormat) -> Result<Vec<RawReference>>;
}

/// Runs the ordered extraction strategies against a payload source.
#[derive(Debug, Clone)]
pub struct Extractor {
    strategies: Vec<PayloadFormat>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(PayloadFormat::default_strategies())
    }
}

impl Extractor {
    /// Create an extractor trying `strategies` in order.
    pub fn new(strategies: Vec<PayloadFormat>) -> Self {
        Self { strategies }
    }

    /// Strategies in the order they are tried.
    pub fn strategies(&self) -> &[PayloadFormat] {
        &self.strategies
    }

    /// Extract dragged items, stopping at the first non-empty strategy.
    ///
    /// Never fails: any error is logged and the strategy is skipped.
    pub fn extract(&self, source: &dyn PayloadSource) -> Vec<DraggedItemDescriptor> {
        for format in &self.strategies {
            let references = match source.read(format) {
                Ok(references) => references,
                Err(e) => {
                    log::debug!("extraction via {format:?} failed: {e}");
                    continue;
                }
            };

            let mut seen = HashSet::new();
            let items: Vec<_> = references
                .into_iter()
                .filter_map(normalize)
                .filter(|item| seen.insert(item.path.clone()))
                .collect();

            if !items.is_empty() {
                log::debug!("extracted {} item(s) via {format:?}", items.len());
                return items;
            }
        }
        Vec::new()
    }
}

/// Payload source with no content, used when the platform has none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPayloadSource;

impl PayloadSource for NullPayloadSource {
    fn change_count(&self) -> Result<i64> {
        Ok(0)
    }

    fn read(&self, _format: &PayloadFormat) -> Result<Vec<RawReference>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct MemoryContent {
    change_count: i64,
    formats: HashMap<PayloadFormat, Vec<RawReference>>,
    failure: Option<String>,
}

/// In-process payload source whose content is set programmatically.
///
/// Every mutation advances the change counter, like an OS pasteboard.
#[derive(Debug, Default)]
pub struct MemoryPayloadSource {
    content: Mutex<MemoryContent>,
}

impl MemoryPayloadSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_content<R>(&self, f: impl FnOnce(&mut MemoryContent) -> R) -> R {
        let mut content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut content)
    }

    /// Replace the references offered in `format`.
    pub fn set(&self, format: PayloadFormat, references: Vec<RawReference>) {
        self.with_content(|c| {
            c.formats.insert(format, references);
            c.change_count += 1;
        });
    }

    /// Offer `paths` as typed file references.
    pub fn set_paths<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let references = paths
            .into_iter()
            .map(|p| RawReference::Path(p.into()))
            .collect();
        self.set(PayloadFormat::FileUrls, references);
    }

    /// Remove all content.
    pub fn clear(&self) {
        self.with_content(|c| {
            c.formats.clear();
            c.change_count += 1;
        });
    }

    /// Make every read fail with `message` until cleared with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        self.with_content(|c| c.failure = message.map(str::to_string));
    }
}

impl PayloadSource for MemoryPayloadSource {
    fn change_count(&self) -> Result<i64> {
        Ok(self.with_content(|c| c.change_count))
    }

    fn read(&self, format: &PayloadFormat) -> Result<Vec<RawReference>> {
        self.with_content(|c| match &c.failure {
            Some(message) => Err(Error::ExtractionFailed(message.clone())),
            None => Ok(c.formats.get(format).cloned().unwrap_or_default()),
        })
    }
}

#[derive(Debug, Default)]
struct ListInner {
    items: Vec<DraggedItemDescriptor>,
    generation: u64,
}

/// The current drag's items, guarded by a lock of its own.
///
/// The hook callback never takes this lock: it invalidates the list with an
/// atomic generation bump and schedules deferred clears with an atomic
/// deadline. The lock is only taken by the poller and by readers.
#[derive(Debug)]
pub struct DescriptorList {
    inner: Mutex<ListInner>,
    generation: AtomicU64,
    /// Deadline in ms since `origin`; 0 means no clear is pending.
    clear_at: AtomicU64,
    count: AtomicUsize,
    origin: Instant,
}

impl Default for DescriptorList {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ListInner::default()),
            generation: AtomicU64::new(0),
            clear_at: AtomicU64::new(0),
            count: AtomicUsize::new(0),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 + 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bring `inner` up to date with invalidations and due deadlines.
    fn settle(&self, inner: &mut ListInner) {
        let generation = self.generation.load(Ordering::SeqCst);
        if inner.generation != generation {
            inner.items.clear();
            inner.generation = generation;
        }
        let deadline = self.clear_at.load(Ordering::SeqCst);
        if deadline != 0
            && self.now() >= deadline
            && self
                .clear_at
                .compare_exchange(deadline, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            log::debug!("dragged items cleared after grace window");
            inner.items.clear();
        }
        self.count.store(inner.items.len(), Ordering::SeqCst);
    }

    /// Replace the items, cancelling any pending clear.
    pub fn replace(&self, items: Vec<DraggedItemDescriptor>) {
        let mut inner = self.lock();
        self.clear_at.store(0, Ordering::SeqCst);
        inner.generation = self.generation.load(Ordering::SeqCst);
        inner.items = items;
        self.count.store(inner.items.len(), Ordering::SeqCst);
    }

    /// Whether `items` equal the current content.
    pub fn matches(&self, items: &[DraggedItemDescriptor]) -> bool {
        let mut inner = self.lock();
        self.settle(&mut inner);
        inner.items == items
    }

    /// Copy of the current items.
    pub fn snapshot(&self) -> Vec<DraggedItemDescriptor> {
        let mut inner = self.lock();
        self.settle(&mut inner);
        inner.items.clone()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        if self.clear_at.load(Ordering::SeqCst) != 0 {
            let mut inner = self.lock();
            self.settle(&mut inner);
        }
        self.count.load(Ordering::SeqCst)
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedule a clear after `delay`. Lock-free.
    pub fn schedule_clear(&self, delay: Duration) {
        let deadline = self.now() + delay.as_millis() as u64;
        self.clear_at.store(deadline, Ordering::SeqCst);
    }

    /// Whether a deferred clear is pending.
    pub fn clear_pending(&self) -> bool {
        self.clear_at.load(Ordering::SeqCst) != 0
    }

    /// Preempt a pending deferred clear with an immediate one. Lock-free.
    ///
    /// Returns whether a clear was pending.
    pub fn preempt_pending_clear(&self) -> bool {
        if self.clear_at.swap(0, Ordering::SeqCst) == 0 {
            return false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.count.store(0, Ordering::SeqCst);
        true
    }

    /// Apply a deferred clear if its deadline has passed.
    pub fn clear_if_due(&self) {
        let deadline = self.clear_at.load(Ordering::SeqCst);
        if deadline != 0 && self.now() >= deadline {
            let mut inner = self.lock();
            self.settle(&mut inner);
        }
    }

    /// Clear immediately.
    pub fn clear(&self) {
        let mut inner = self.lock();
        self.clear_at.store(0, Ordering::SeqCst);
        inner.items.clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

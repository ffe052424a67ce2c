//! Metadata write requests and the groups that own them
//!
//! A producer allocates a [`RequestGroup`] holding every request of one
//! batch, then hands [`RequestRef`] handles to the updater. The group keeps a
//! live count of members that have not yet been reclaimed; the reclamation
//! scan that drops it to zero is the only path that releases the group.

use crate::range::PageRange;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Group identifier, unique within the process
pub type GroupId = u64;

/// Callback fired once when a group's storage is released
pub type ReleaseHook = Box<dyn FnOnce(GroupId) + Send>;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// One metadata page write
///
/// The I/O layer flips `finished` exactly once when the write is done. The
/// updater only ever reads it.
#[derive(Debug)]
pub struct MetadataIoRequest {
    range: PageRange,
    finished: AtomicBool,
    submitted: AtomicBool,
}

impl MetadataIoRequest {
    fn new(range: PageRange) -> Self {
        Self {
            range,
            finished: AtomicBool::new(false),
            submitted: AtomicBool::new(false),
        }
    }

    /// Pages written by this request
    pub fn range(&self) -> PageRange {
        self.range
    }

    /// Whether the I/O layer has completed the write
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// A batch of metadata writes sharing one allocation
pub struct RequestGroup {
    id: GroupId,
    requests: Box<[MetadataIoRequest]>,
    /// Members not yet reclaimed by the updater
    active: AtomicUsize,
    released: AtomicBool,
    on_release: Mutex<Option<ReleaseHook>>,
}

impl RequestGroup {
    /// Allocate a group with one request per range
    ///
    /// # Panics
    ///
    /// If `ranges` is empty; a group with no members could never be released.
    pub fn new(ranges: impl IntoIterator<Item = PageRange>) -> Arc<Self> {
        Self::build(ranges, None)
    }

    /// Allocate a group whose release also runs `hook`
    ///
    /// Panics on an empty `ranges`, like [`RequestGroup::new`].
    ///
    /// The hook runs on the thread performing reclamation while the updater's
    /// queue lock is held, so it must not call back into the updater.
    pub fn with_release_hook(
        ranges: impl IntoIterator<Item = PageRange>,
        hook: impl FnOnce(GroupId) + Send + 'static,
    ) -> Arc<Self> {
        Self::build(ranges, Some(Box::new(hook)))
    }

    fn build(ranges: impl IntoIterator<Item = PageRange>, hook: Option<ReleaseHook>) -> Arc<Self> {
        let requests: Box<[MetadataIoRequest]> =
            ranges.into_iter().map(MetadataIoRequest::new).collect();
        assert!(!requests.is_empty(), "request group must have at least one member");
        let active = AtomicUsize::new(requests.len());

        Arc::new(Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            requests,
            active,
            released: AtomicBool::new(false),
            on_release: Mutex::new(hook),
        })
    }

    /// Group identifier
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Number of requests in the group
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the group has no requests
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Members that have not been reclaimed yet
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the group's storage has been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Handle to the request at `index`
    pub fn request(self: &Arc<Self>, index: usize) -> Option<RequestRef> {
        (index < self.requests.len()).then(|| RequestRef {
            group: Arc::clone(self),
            index,
        })
    }

    /// Handles to every request, in index order
    pub fn requests(self: &Arc<Self>) -> impl Iterator<Item = RequestRef> + '_ {
        (0..self.requests.len()).map(|index| RequestRef {
            group: Arc::clone(self),
            index,
        })
    }

    /// Drop one live member; returns true when it was the last one
    pub(crate) fn put_active(&self) -> bool {
        let prev = self.active.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "request group {} live count underflow", self.id);
        prev == 1
    }

    /// Release the group's storage
    pub(crate) fn release(&self) {
        let already = self.released.swap(true, Ordering::AcqRel);
        assert!(!already, "request group {} released twice", self.id);

        debug!("Releasing metadata request group {}", self.id);
        let hook = self.on_release.lock().take();
        if let Some(hook) = hook {
            hook(self.id);
        }
    }
}

impl fmt::Debug for RequestGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGroup")
            .field("id", &self.id)
            .field("len", &self.requests.len())
            .field("active", &self.active())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Handle to one request inside its group
#[derive(Clone)]
pub struct RequestRef {
    group: Arc<RequestGroup>,
    index: usize,
}

impl RequestRef {
    /// The request this handle names
    pub fn request(&self) -> &MetadataIoRequest {
        &self.group.requests[self.index]
    }

    /// Owning group
    pub fn group(&self) -> &Arc<RequestGroup> {
        &self.group
    }

    /// Position within the owning group
    pub fn index(&self) -> usize {
        self.index
    }

    /// Pages written by this request
    pub fn range(&self) -> PageRange {
        self.request().range()
    }

    /// Whether the I/O layer has completed the write
    pub fn is_finished(&self) -> bool {
        self.request().is_finished()
    }

    /// Record completion of the write; called once by the I/O layer
    pub fn mark_finished(&self) {
        let was = self.request().finished.swap(true, Ordering::AcqRel);
        debug_assert!(
            !was,
            "request {}/{} finished twice",
            self.group.id, self.index
        );
    }

    /// Claim the request for submission; false if it was already submitted
    pub(crate) fn claim(&self) -> bool {
        !self.request().submitted.swap(true, Ordering::AcqRel)
    }

    /// Whether both handles name the same request
    pub fn same_request(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.group, &other.group) && self.index == other.index
    }
}

impl fmt::Debug for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRef")
            .field("group", &self.group.id)
            .field("index", &self.index)
            .field("range", &self.range())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_layout() {
        let group = RequestGroup::new([PageRange::new(0, 4), PageRange::new(8, 2)]);
        assert_eq!(group.len(), 2);
        assert_eq!(group.active(), 2);
        assert!(!group.is_released());

        let second = group.request(1).unwrap();
        assert_eq!(second.range(), PageRange::new(8, 2));
        assert!(!second.is_finished());
        assert!(group.request(2).is_none());

        let ranges: Vec<_> = group.requests().map(|r| r.range()).collect();
        assert_eq!(ranges, vec![PageRange::new(0, 4), PageRange::new(8, 2)]);
    }

    #[test]
    fn test_group_ids_are_unique() {
        let a = RequestGroup::new([PageRange::new(0, 1)]);
        let b = RequestGroup::new([PageRange::new(0, 1)]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_mark_finished() {
        let group = RequestGroup::new([PageRange::new(0, 1)]);
        let req = group.request(0).unwrap();
        let other_handle = group.request(0).unwrap();

        req.mark_finished();
        assert!(other_handle.is_finished());
        assert!(req.same_request(&other_handle));
    }

    #[test]
    fn test_claim_only_once() {
        let group = RequestGroup::new([PageRange::new(0, 1)]);
        let req = group.request(0).unwrap();
        assert!(req.claim());
        assert!(!req.claim());
    }

    #[test]
    fn test_release_fires_hook_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let group = RequestGroup::with_release_hook(
            [PageRange::new(0, 1), PageRange::new(1, 1)],
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(!group.put_active());
        assert!(group.put_active());
        group.release();

        assert!(group.is_released());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "at least one member")]
    fn test_empty_group_rejected() {
        let _ = RequestGroup::new(std::iter::empty::<PageRange>());
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let group = RequestGroup::new([PageRange::new(0, 1)]);
        group.release();
        group.release();
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_live_count_underflow_panics() {
        let group = RequestGroup::new([PageRange::new(0, 1)]);
        group.put_active();
        group.put_active();
    }
}

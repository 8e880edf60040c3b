//! Growable byte container with bidirectional headroom.
//!
//! Layout: one backing allocation of `capacity` bytes; the payload occupies
//! the interior window `[head, head + len)`. Bytes before the window are
//! headroom (available to `prepend`), bytes after it are tailroom
//! (available to `append`). Both operations reuse the allocation when the
//! requested bytes fit and reallocate exactly once when they do not, so
//! building a message inside-out stays amortised linear.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

/// Opaque per-buffer handle carried alongside the payload.
///
/// The handle is shared, not transferred: [`Buffer::duplicate`] clones it,
/// and both buffers then observe the same underlying object.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Locked view into a buffer's bytes.
///
/// Holding the guard keeps the owning buffer locked, so the window it
/// exposes cannot move or be resized until the guard is dropped.
pub type PayloadGuard<'a> = MappedMutexGuard<'a, [u8]>;

/// Interior state, private to the buffer's lock.
struct Inner {
    /// Backing allocation. Empty means no allocation yet.
    store: Box<[u8]>,
    /// Offset of the payload window inside `store`.
    head: usize,
    /// Payload length in bytes.
    len: usize,
    /// Opaque application handle.
    user_data: Option<UserData>,
}

impl Inner {
    fn empty() -> Self {
        Self { store: Box::default(), head: 0, len: 0, user_data: None }
    }

    /// Reserve `length` bytes immediately before the payload.
    ///
    /// Fit path: the payload is shifted toward the tail within the existing
    /// allocation and the vacated prefix is zeroed. Grow path: a fresh
    /// allocation of `head + len + length` bytes, with the prior headroom
    /// preserved and a `length`-byte gap left in front of the payload.
    fn make_front_room(&mut self, length: usize) {
        if self.store.is_empty() {
            self.store = zeroed(length);
            self.head = 0;
            self.len = length;
            return;
        }

        let end = self.head + self.len;
        if end + length <= self.store.len() {
            self.store.copy_within(self.head..end, self.head + length);
            self.store[self.head..self.head + length].fill(0);
        } else {
            let mut grown = zeroed(end + length);
            grown[self.head + length..end + length]
                .copy_from_slice(&self.store[self.head..end]);
            self.store = grown;
        }
        self.len += length;

        debug_assert!(self.head + self.len <= self.store.len());
    }

    /// Reserve `length` bytes immediately after the payload, preserving
    /// `head` on the grow path.
    fn make_back_room(&mut self, length: usize) {
        if self.store.is_empty() {
            self.store = zeroed(length);
            self.head = 0;
            self.len = length;
            return;
        }

        let end = self.head + self.len;
        if end + length > self.store.len() {
            let mut grown = zeroed(end + length);
            grown[self.head..end].copy_from_slice(&self.store[self.head..end]);
            self.store = grown;
        }
        self.len += length;

        debug_assert!(self.head + self.len <= self.store.len());
    }
}

fn zeroed(length: usize) -> Box<[u8]> {
    vec![0u8; length].into_boxed_slice()
}

/// Mutable byte container used for every inbound and outbound wire message.
///
/// # Invariants
///
/// - `0 <= head <= head + len <= capacity` at all times.
/// - A buffer with zero capacity has no backing allocation; the first
///   reservation allocates exactly the requested size with `head = 0`.
/// - Every operation serialises on the buffer's lock. Window guards
///   returned by [`prepend`](Self::prepend), [`append`](Self::append),
///   [`trim_front`](Self::trim_front), and [`payload`](Self::payload) hold
///   that lock for their lifetime.
pub struct Buffer {
    inner: Mutex<Inner>,
}

impl Buffer {
    /// Create an empty buffer with no backing allocation.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::empty()) }
    }

    /// Create an empty buffer backed by `capacity` zeroed bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity != 0, "buffer capacity must be non-zero");

        Self {
            inner: Mutex::new(Inner {
                store: zeroed(capacity),
                head: 0,
                len: 0,
                user_data: None,
            }),
        }
    }

    /// Reserve `length` zeroed bytes immediately before the payload and
    /// return a window over them.
    ///
    /// The payload grows by `length`; existing payload bytes are untouched
    /// (the fit path shifts them within the allocation, the grow path
    /// copies them once).
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero.
    pub fn prepend(&self, length: usize) -> PayloadGuard<'_> {
        assert!(length != 0, "prepend length must be non-zero");

        let mut inner = self.inner.lock();
        inner.make_front_room(length);
        let head = inner.head;
        MutexGuard::map(inner, move |inner| &mut inner.store[head..head + length])
    }

    /// Reserve `length` zeroed bytes at the end of the payload and return a
    /// window over them.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero.
    pub fn append(&self, length: usize) -> PayloadGuard<'_> {
        assert!(length != 0, "append length must be non-zero");

        let mut inner = self.inner.lock();
        inner.make_back_room(length);
        let start = inner.head + inner.len - length;
        MutexGuard::map(inner, move |inner| &mut inner.store[start..start + length])
    }

    /// Copy `bytes` in front of the payload.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is empty.
    pub fn prepend_bytes(&self, bytes: &[u8]) {
        self.prepend(bytes.len()).copy_from_slice(bytes);
    }

    /// Copy `bytes` after the payload.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is empty.
    pub fn append_bytes(&self, bytes: &[u8]) {
        self.append(bytes.len()).copy_from_slice(bytes);
    }

    /// Discard `length` bytes from the front of the payload and return a
    /// window over what remains.
    ///
    /// The bytes stay inside the allocation as headroom; no copy happens.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero or exceeds the payload length. Over-trim
    /// is a caller bug, not a recoverable condition.
    pub fn trim_front(&self, length: usize) -> PayloadGuard<'_> {
        assert!(length != 0, "trim length must be non-zero");

        let mut inner = self.inner.lock();
        assert!(
            length <= inner.len,
            "cannot trim {length} bytes from a {} byte payload",
            inner.len
        );
        inner.head += length;
        inner.len -= length;
        let (head, len) = (inner.head, inner.len);
        MutexGuard::map(inner, move |inner| &mut inner.store[head..head + len])
    }

    /// Window over the current payload.
    pub fn payload(&self) -> PayloadGuard<'_> {
        let inner = self.inner.lock();
        let (head, len) = (inner.head, inner.len);
        MutexGuard::map(inner, move |inner| &mut inner.store[head..head + len])
    }

    /// Copy of the current payload.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.store[inner.head..inner.head + inner.len].to_vec()
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the backing allocation in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().store.len()
    }

    /// Offset of the payload window inside the backing allocation.
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.inner.lock().head
    }

    /// Deep copy of this buffer.
    ///
    /// The entire backing allocation is copied, so the copy preserves the
    /// window offset and capacity as well as the payload. The `user_data`
    /// handle is cloned; both buffers then share the object it points to.
    /// The copy carries its own lock and mutations on either side do not
    /// affect the other.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let inner = self.inner.lock();
        Self {
            inner: Mutex::new(Inner {
                store: inner.store.clone(),
                head: inner.head,
                len: inner.len,
                user_data: inner.user_data.clone(),
            }),
        }
    }

    /// Render the payload as a lowercase hexadecimal string and hand it to
    /// `sink` exactly once.
    pub fn dump(&self, sink: impl FnOnce(&str)) {
        let inner = self.inner.lock();
        let hex = hex::encode(&inner.store[inner.head..inner.head + inner.len]);
        sink(&hex);
    }

    /// The opaque application handle, if one is attached.
    #[must_use]
    pub fn user_data(&self) -> Option<UserData> {
        self.inner.lock().user_data.clone()
    }

    /// Attach or clear the opaque application handle.
    pub fn set_user_data(&self, user_data: Option<UserData>) {
        self.inner.lock().user_data = user_data;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Buffer")
            .field("len", &inner.len)
            .field("head", &inner.head)
            .field("capacity", &inner.store.len())
            .finish_non_exhaustive()
    }
}

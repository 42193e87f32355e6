use std::sync::{LazyLock, Mutex};

// Retention caps keep the free list from pinning memory after a burst of
// large responses.
const MAX_POOLED_BUFFERS: usize = 64;
const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024;

static FREE_LIST: LazyLock<Mutex<Vec<Vec<u8>>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Fetches a cleared scratch buffer from the pool.
///
/// Pooled buffers must never be aliased into caller-visible state: copy the
/// bytes out (see [`copy_out`]) before calling [`put`].
pub(crate) fn get() -> Vec<u8> {
    let mut free_list = lock_free_list();
    free_list.pop().unwrap_or_default()
}

/// Returns a buffer to the pool. Oversized buffers and overflow beyond the
/// retention cap are dropped instead of retained.
pub(crate) fn put(mut buffer: Vec<u8>) {
    if buffer.capacity() > MAX_POOLED_CAPACITY {
        return;
    }
    buffer.clear();
    let mut free_list = lock_free_list();
    if free_list.len() < MAX_POOLED_BUFFERS {
        free_list.push(buffer);
    }
}

/// Copies the pooled buffer's contents into owned [`bytes::Bytes`] and
/// releases the buffer in one step.
pub(crate) fn copy_out(buffer: Vec<u8>) -> bytes::Bytes {
    let owned = bytes::Bytes::copy_from_slice(&buffer);
    put(buffer);
    owned
}

fn lock_free_list() -> std::sync::MutexGuard<'static, Vec<Vec<u8>>> {
    match FREE_LIST.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

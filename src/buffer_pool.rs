use crossbeam_queue::ArrayQueue;

/// What a pooled buffer is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPurpose {
    /// Packet payloads read while decoding rows
    Row,
    /// Chunks of a local file streamed to the server
    FileTransfer,
}

impl BufferPurpose {
    fn baseline(self) -> usize {
        match self {
            BufferPurpose::Row => 1024,
            BufferPurpose::FileTransfer => 8 * 1024,
        }
    }
}

const SLOTS_PER_PURPOSE: usize = 4;

/// Small per-connection pool of reusable byte buffers.
///
/// A returned buffer whose capacity grew past `retain_threshold` is shrunk back
/// to its purpose's baseline, so one huge row does not pin memory for the rest
/// of the connection's life.
#[derive(Debug)]
pub struct BufferPool {
    row: ArrayQueue<Vec<u8>>,
    file_transfer: ArrayQueue<Vec<u8>>,
    retain_threshold: usize,
}

impl BufferPool {
    pub fn new(retain_threshold: usize) -> Self {
        Self {
            row: ArrayQueue::new(SLOTS_PER_PURPOSE),
            file_transfer: ArrayQueue::new(SLOTS_PER_PURPOSE),
            retain_threshold,
        }
    }

    fn queue(&self, purpose: BufferPurpose) -> &ArrayQueue<Vec<u8>> {
        match purpose {
            BufferPurpose::Row => &self.row,
            BufferPurpose::FileTransfer => &self.file_transfer,
        }
    }

    /// Take an empty buffer, reusing a pooled allocation when one is available.
    pub fn take(&self, purpose: BufferPurpose) -> Vec<u8> {
        self.queue(purpose)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(purpose.baseline()))
    }

    pub fn give_back(&self, purpose: BufferPurpose, mut buf: Vec<u8>) {
        buf.clear();
        if buf.capacity() > self.retain_threshold {
            tracing::trace!(
                capacity = buf.capacity(),
                ?purpose,
                "shrinking oversized pooled buffer"
            );
            buf.shrink_to(purpose.baseline());
        }
        // Ignore if pool is full
        let _ = self.queue(purpose).push(buf);
    }

    pub fn retain_threshold(&self) -> usize {
        self.retain_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_returned_buffers() {
        let pool = BufferPool::new(1 << 20);
        let mut buf = pool.take(BufferPurpose::Row);
        buf.extend_from_slice(&[1; 4096]);
        let capacity = buf.capacity();
        pool.give_back(BufferPurpose::Row, buf);

        let buf = pool.take(BufferPurpose::Row);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn shrinks_buffers_over_threshold() {
        let pool = BufferPool::new(64 * 1024);
        let mut buf = pool.take(BufferPurpose::FileTransfer);
        buf.resize(1 << 20, 0);
        pool.give_back(BufferPurpose::FileTransfer, buf);

        let buf = pool.take(BufferPurpose::FileTransfer);
        assert!(buf.capacity() <= 64 * 1024);
    }

    #[test]
    fn purposes_do_not_share_buffers() {
        let pool = BufferPool::new(1 << 20);
        let mut buf = pool.take(BufferPurpose::Row);
        buf.reserve(100_000);
        pool.give_back(BufferPurpose::Row, buf);

        let other = pool.take(BufferPurpose::FileTransfer);
        assert!(other.capacity() < 100_000);
    }
}

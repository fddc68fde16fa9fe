use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Lock-free single-producer/single-consumer ring of audio samples.
///
/// The capture thread is the only caller of [`push`](Self::push); one consumer
/// calls [`pop`](Self::pop), [`peek`](Self::peek) and
/// [`peek_recent`](Self::peek_recent). Both cursors advance monotonically and
/// are reduced modulo the capacity only to index the slots. Cursor stores use
/// release ordering and loads use acquire, so one producer and one consumer
/// can run concurrently without a lock. More than one of either is not
/// supported.
///
/// `push` never checks free space. A producer that outruns the consumer
/// overwrites unread samples; the consumer then resumes at the oldest sample
/// still held, i.e. the last `capacity` written. The number of samples lost
/// this way is reported by [`overwritten`](Self::overwritten).
///
/// Samples are stored as `f32` bit patterns in atomics so a consumer racing an
/// overwrite reads a stale or fresh sample, never a torn one.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Box<[AtomicU32]>,
    capacity: usize,
    write_pos: AtomicU64,
    read_pos: AtomicU64,
    overwritten: AtomicU64,
}

impl RingBuffer {
    /// Allocate a ring of `capacity` samples. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            capacity,
            write_pos: AtomicU64::new(0),
            read_pos: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Producer side. Writes every sample and advances the write cursor by
    /// `data.len()`, overwriting unread samples if the consumer lags.
    pub fn push(&self, data: &[f32]) {
        if data.is_empty() {
            return;
        }

        let write_pos = self.write_pos.load(Ordering::Relaxed);

        // Anything before the last `capacity` samples would be overwritten
        // within this same call.
        let skip = data.len().saturating_sub(self.capacity);
        let start = write_pos + skip as u64;
        for (i, &sample) in data[skip..].iter().enumerate() {
            self.slot(start + i as u64)
                .store(sample.to_bits(), Ordering::Relaxed);
        }

        self.write_pos
            .store(write_pos + data.len() as u64, Ordering::Release);
    }

    /// Consumer side. Moves up to `dest.len()` unread samples into `dest`,
    /// oldest first, and returns how many were copied.
    pub fn pop(&self, dest: &mut [f32]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.catch_up(write_pos);

        let to_read = dest.len().min((write_pos - read_pos) as usize);
        self.copy_out(read_pos, &mut dest[..to_read]);

        self.read_pos
            .store(read_pos + to_read as u64, Ordering::Release);
        to_read
    }

    /// Consumer side. Copies up to `dest.len()` unread samples without
    /// consuming them.
    pub fn peek(&self, dest: &mut [f32]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let oldest = read_pos.max(write_pos.saturating_sub(self.capacity as u64));

        let to_read = dest.len().min((write_pos - oldest) as usize);
        self.copy_out(oldest, &mut dest[..to_read]);
        to_read
    }

    /// Consumer side. Copies the most recently written `dest.len()` samples
    /// (bounded by what is unread) without consuming anything. Intended for
    /// oscilloscope-style views.
    pub fn peek_recent(&self, dest: &mut [f32]) -> usize {
        let to_read = dest.len().min(self.available());
        if to_read == 0 {
            return 0;
        }

        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.copy_out(write_pos - to_read as u64, &mut dest[..to_read]);
        to_read
    }

    /// Unread samples, never more than the capacity.
    pub fn available(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        (write_pos.saturating_sub(read_pos) as usize).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Total samples lost to overwrites, as observed by the consumer.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Consumer side. Discards every unread sample.
    pub fn clear(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, position: u64) -> &AtomicU32 {
        &self.slots[(position % self.capacity as u64) as usize]
    }

    /// Skips the read cursor past overwritten samples and returns it.
    fn catch_up(&self, write_pos: u64) -> u64 {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let oldest = write_pos.saturating_sub(self.capacity as u64);
        if read_pos >= oldest {
            return read_pos;
        }

        self.overwritten
            .fetch_add(oldest - read_pos, Ordering::Relaxed);
        self.read_pos.store(oldest, Ordering::Release);
        oldest
    }

    fn copy_out(&self, from: u64, dest: &mut [f32]) {
        for (i, out) in dest.iter_mut().enumerate() {
            *out = f32::from_bits(self.slot(from + i as u64).load(Ordering::Relaxed));
        }
    }
}

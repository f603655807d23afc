// Growable array of field metas with a consumed index and a parsed count
//
// Slot 0 always holds the start sentinel for the first unread record, so a
// record popped as `index..=j` carries its own leading sentinel: field k
// starts at `metas[k].next_start()` and ends at `metas[k + 1].end()`.

use std::ops::RangeInclusive;

use super::meta::Meta;

/// Where the buffer is in its scan/consume cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaState {
    /// Nothing parsed.
    Idle,
    /// Fields parsed but no complete record left.
    Scanning,
    /// At least one complete record is ready to pop.
    Ready,
}

#[derive(Debug, Clone)]
pub struct MetaBuffer {
    metas: Vec<Meta>,
    /// Metas up to and including this slot belong to consumed records.
    index: usize,
    /// Metas parsed so far, sentinel excluded.
    count: usize,
}

impl MetaBuffer {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut metas = Vec::with_capacity(capacity.max(1));
        metas.push(Meta::START_OF_DATA);
        MetaBuffer {
            metas,
            index: 0,
            count: 0,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn as_slice(&self) -> &[Meta] {
        &self.metas[..=self.count]
    }

    /// Offset of the first token no parsed meta covers.
    #[inline]
    pub fn unread_start(&self) -> usize {
        self.metas[self.count].next_start()
    }

    #[inline]
    pub fn push(&mut self, meta: Meta) {
        self.count += 1;
        if self.count < self.metas.len() {
            self.metas[self.count] = meta;
        } else {
            self.metas.push(meta);
        }
    }

    /// Pop the next complete record: the range of its metas, sentinel first.
    pub fn try_pop(&mut self) -> Option<RangeInclusive<usize>> {
        let from = self.index;
        let end = (from + 1..=self.count).find(|&i| self.metas[i].is_eol())?;
        self.index = end;
        Some(from..=end)
    }

    pub fn state(&self) -> MetaState {
        if self.count == 0 {
            MetaState::Idle
        } else if self.metas[self.index + 1..=self.count]
            .iter()
            .any(Meta::is_eol)
        {
            MetaState::Ready
        } else {
            MetaState::Scanning
        }
    }

    /// Drop consumed metas and rebase the unread ones to offset 0.
    ///
    /// Returns the number of tokens the consumed records covered, which the
    /// caller must advance its buffer by.
    pub fn reset(&mut self) -> usize {
        if self.index == 0 {
            return 0;
        }
        let offset = self.metas[self.index].next_start();
        let unread = self.count - self.index;
        for i in 1..=unread {
            self.metas[i] = self.metas[self.index + i].shifted(offset);
        }
        self.metas[0] = Meta::START_OF_DATA;
        self.count = unread;
        self.index = 0;
        offset
    }

    /// Drop metas of the record still being scanned, keeping complete ones.
    pub fn discard_partial(&mut self) {
        let keep = (self.index..=self.count)
            .rev()
            .find(|&i| i == self.index || self.metas[i].is_eol())
            .unwrap_or(self.index);
        self.count = keep;
    }

    pub fn clear(&mut self) {
        self.metas.truncate(1);
        self.metas[0] = Meta::START_OF_DATA;
        self.index = 0;
        self.count = 0;
    }
}

impl Default for MetaBuffer {
    fn default() -> Self {
        Self::new()
    }
}

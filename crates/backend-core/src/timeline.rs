use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::types::{Chat, ChatKey, TimelineOp, default_watermark};

/// Hard upper bound for one catch-up page.
const MAX_PAGE_SIZE: u16 = 500;

/// In-memory chat timeline: ascending by `created_at`, deduplicated by
/// [`ChatKey`], with bounded retention.
#[derive(Debug, Clone)]
pub struct ChatTimeline {
    items: Vec<Chat>,
    seen: HashSet<ChatKey>,
    max_items: usize,
}

impl ChatTimeline {
    /// Create a timeline with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current messages in display order.
    pub fn items(&self) -> &[Chat] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&Chat> {
        self.items.last()
    }

    /// Apply operations in order and return the ones that changed the
    /// timeline. Duplicate appends are dropped; a reset is returned with its
    /// deduplicated, sorted contents.
    pub fn apply_ops(&mut self, ops: &[TimelineOp]) -> Vec<TimelineOp> {
        let mut applied = Vec::new();
        for op in ops {
            match op {
                TimelineOp::Reset(chats) => {
                    self.items.clear();
                    self.seen.clear();
                    for chat in chats {
                        self.insert(chat.clone());
                    }
                    self.trim_to_max();
                    applied.push(TimelineOp::Reset(self.items.clone()));
                }
                TimelineOp::Append(chat) => {
                    let key = chat.key();
                    if self.insert(chat.clone()) {
                        self.trim_to_max();
                        // An append older than a full timeline is trimmed at once.
                        if self.seen.contains(&key) {
                            applied.push(op.clone());
                        }
                    }
                }
            }
        }
        applied
    }

    /// Append a batch of messages, returning the effective operations.
    pub fn merge(&mut self, chats: impl IntoIterator<Item = Chat>) -> Vec<TimelineOp> {
        let ops: Vec<TimelineOp> = chats.into_iter().map(TimelineOp::Append).collect();
        self.apply_ops(&ops)
    }

    /// Timestamp of the newest message in `stored`, or the default watermark.
    pub fn watermark(stored: &[Chat]) -> DateTime<Utc> {
        stored
            .iter()
            .map(|chat| chat.created_at)
            .max()
            .unwrap_or_else(default_watermark)
    }

    /// Clamp a requested catch-up page size. The result is always in `1..=500`.
    pub fn bounded_page_size(requested: u16, server_cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.max(1);
        safe_requested.min(safe_cap).min(MAX_PAGE_SIZE)
    }

    fn insert(&mut self, chat: Chat) -> bool {
        if !self.seen.insert(chat.key()) {
            return false;
        }
        // Equal timestamps keep arrival order.
        let idx = self
            .items
            .partition_point(|existing| existing.created_at <= chat.created_at);
        self.items.insert(idx, chat);
        true
    }

    fn trim_to_max(&mut self) {
        if self.items.len() <= self.max_items {
            return;
        }

        let excess = self.items.len() - self.max_items;
        for dropped in self.items.drain(0..excess) {
            self.seen.remove(&dropped.key());
        }
    }
}

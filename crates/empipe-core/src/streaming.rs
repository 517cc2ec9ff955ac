//! # Streaming Consumption
//!
//! A streaming stage consumes a set while another process is still
//! appending to it. The producer commits batches; the consumer polls
//! the committed tail, decides between processing and sleeping, and
//! remembers the last id it consumed.
//!
//! The decision itself is a pure function, [`plan_step`], so the
//! batching contract is testable without storage or clocks:
//!
//! - batch size `0`: take everything available in one step
//! - batch size `1`: take everything available, item by item
//! - batch size `n > 1`: take only whole groups of `n`; a short tail
//!   waits for more input, unless the producer has closed the stream
//! - nothing available: sleep, or finish once the stream is closed

use crate::item::Item;
use crate::set::ObjectSet;
use crate::types::{EmpipeError, ItemId};
use std::time::Duration;

/// Streaming knobs of a consuming stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Number of items grouped into one processing step. `0` takes
    /// all available items at once; `1` imposes no grouping.
    pub batch_size: u64,
    /// How long to sleep when no input is ready. Zero re-polls
    /// immediately.
    pub sleep: Duration,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            batch_size: 1,
            sleep: Duration::ZERO,
        }
    }
}

impl StreamParams {
    /// Group items into steps of `n`.
    #[must_use]
    pub const fn with_batch_size(mut self, n: u64) -> Self {
        self.batch_size = n;
        self
    }

    /// Sleep this long when waiting for input.
    #[must_use]
    pub const fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }
}

/// What a streaming consumer should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStep {
    /// Consume this many items now.
    Process(u64),
    /// Nothing ready; wait this long and poll again.
    Sleep(Duration),
    /// The stream is closed and fully consumed.
    Finished,
}

/// Decide the next step from the number of unconsumed items and
/// whether the producer has closed the stream.
#[must_use]
pub fn plan_step(params: &StreamParams, available: u64, closed: bool) -> StreamStep {
    if available == 0 {
        return if closed {
            StreamStep::Finished
        } else {
            StreamStep::Sleep(params.sleep)
        };
    }
    match params.batch_size {
        0 | 1 => StreamStep::Process(available),
        n => {
            let whole_groups = (available / n) * n;
            if whole_groups > 0 {
                StreamStep::Process(whole_groups)
            } else if closed {
                // The closing tail is processed even when short.
                StreamStep::Process(available)
            } else {
                StreamStep::Sleep(params.sleep)
            }
        }
    }
}

/// Stateful poller over one growing set: tracks the last consumed id
/// and turns [`plan_step`] decisions into item batches.
#[derive(Debug)]
pub struct StreamPoller {
    params: StreamParams,
    last_consumed: Option<ItemId>,
}

impl StreamPoller {
    #[must_use]
    pub const fn new(params: StreamParams) -> Self {
        Self {
            params,
            last_consumed: None,
        }
    }

    /// Id of the last item handed out, if any.
    #[must_use]
    pub const fn last_consumed(&self) -> Option<ItemId> {
        self.last_consumed
    }

    /// Poll once: count the unconsumed tail, plan, and when the plan
    /// says process, fetch that batch and advance the watermark.
    pub fn poll(
        &mut self,
        set: &mut ObjectSet,
        closed: bool,
    ) -> Result<(StreamStep, Vec<Item>), EmpipeError> {
        let mut available = 0u64;
        for item in set.iter_after(self.last_consumed)? {
            let _ = item?;
            available += 1;
        }

        let step = plan_step(&self.params, available, closed);
        let StreamStep::Process(count) = step else {
            return Ok((step, Vec::new()));
        };

        let mut batch = Vec::with_capacity(count as usize);
        for item in set.iter_after(self.last_consumed)?.take(count as usize) {
            let item = item?;
            if let Some(id) = item.id() {
                self.last_consumed = Some(id);
            }
            batch.push(item);
        }
        Ok((step, batch))
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Per-request span stack with strict LIFO nesting.
//!
//! A [`SpanTracker`] belongs to exactly one request. Spans are pushed by
//! [`SpanTracker::start`] and may only be popped by [`SpanTracker::finish`]
//! while they are the innermost open span, so the finished timeline always
//! mirrors the call structure that produced it. The parent of a span is the
//! span that was innermost when it started; it is recorded as a handle, not
//! owned.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Tag written onto spans that were closed by [`SpanTracker::unwind`].
pub const UNWOUND_TAG: (&str, &str) = ("error", "unwound");

/// Opaque reference to a span started by a [`SpanTracker`].
///
/// Handles are never reused within a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanHandle(u64);

impl SpanHandle {
    /// Sequence number of the span within its request, starting at 0 for the root.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct OpenSpan {
    handle: SpanHandle,
    name: String,
    parent: Option<SpanHandle>,
    started_at: Instant,
    tags: BTreeMap<String, String>,
}

impl OpenSpan {
    fn close(self, ended_at: Instant) -> FinishedSpan {
        FinishedSpan {
            handle: self.handle,
            name: self.name,
            parent: self.parent,
            started_at: self.started_at,
            ended_at,
            tags: self.tags,
        }
    }
}

/// A span whose end time has been stamped. Immutable from here on.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub handle: SpanHandle,
    pub name: String,
    /// Span that was innermost when this one started; `None` for the root.
    pub parent: Option<SpanHandle>,
    pub started_at: Instant,
    pub ended_at: Instant,
    pub tags: BTreeMap<String, String>,
}

impl FinishedSpan {
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.ended_at.duration_since(self.started_at)
    }
}

/// Misuse of the span stack. Always a wiring bug in the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpanError {
    #[error("span {handle:?} is not the innermost open span (innermost is {innermost:?})")]
    NotInnermost {
        handle: SpanHandle,
        innermost: Option<SpanHandle>,
    },
    #[error("span {0:?} is already finished")]
    AlreadyFinished(SpanHandle),
    #[error("span {0:?} was never started by this tracker")]
    Unknown(SpanHandle),
}

/// Stack of open spans for a single request plus the spans it has finished.
#[derive(Debug, Default)]
pub struct SpanTracker {
    open: Vec<OpenSpan>,
    finished: Vec<FinishedSpan>,
    next_id: u64,
}

impl SpanTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a span nested under the current innermost span.
    pub fn start(&mut self, name: impl Into<String>) -> SpanHandle {
        let handle = SpanHandle(self.next_id);
        self.next_id += 1;
        self.open.push(OpenSpan {
            handle,
            name: name.into(),
            parent: self.current(),
            started_at: Instant::now(),
            tags: BTreeMap::new(),
        });
        handle
    }

    /// Closes `handle` and returns its duration.
    ///
    /// # Errors
    ///
    /// Returns [`SpanError::NotInnermost`] if another span opened after
    /// `handle` is still open; the stack is left untouched in that case.
    pub fn finish(&mut self, handle: SpanHandle) -> Result<Duration, SpanError> {
        if self.current() != Some(handle) {
            return Err(self.misuse(handle));
        }
        let Some(span) = self.open.pop() else {
            return Err(self.misuse(handle));
        };
        let finished = span.close(Instant::now());
        let duration = finished.duration();
        self.finished.push(finished);
        Ok(duration)
    }

    /// Sets a tag on an open span, replacing any previous value for `key`.
    ///
    /// # Errors
    ///
    /// Fails if the span has already finished or was never started here.
    pub fn tag(
        &mut self,
        handle: SpanHandle,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SpanError> {
        if let Some(span) = self.open.iter_mut().find(|s| s.handle == handle) {
            span.tags.insert(key.into(), value.into());
            return Ok(());
        }
        Err(self.misuse(handle))
    }

    /// Runs `f` inside a span that is started before and finished right after it.
    ///
    /// # Errors
    ///
    /// Fails if `f` left the stack unbalanced.
    pub fn in_span<T>(
        &mut self,
        name: impl Into<String>,
        f: impl FnOnce() -> T,
    ) -> Result<T, SpanError> {
        let handle = self.start(name);
        let value = f();
        self.finish(handle)?;
        Ok(value)
    }

    /// Innermost open span, if any.
    #[must_use]
    pub fn current(&self) -> Option<SpanHandle> {
        self.open.last().map(|s| s.handle)
    }

    /// Number of open spans.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Finishes every open span innermost-first, tagging each with [`UNWOUND_TAG`].
    ///
    /// Returns how many spans had to be closed. Zero on a well-formed request.
    pub fn unwind(&mut self) -> usize {
        let mut closed = 0;
        while let Some(mut span) = self.open.pop() {
            span.tags
                .insert(UNWOUND_TAG.0.to_string(), UNWOUND_TAG.1.to_string());
            self.finished.push(span.close(Instant::now()));
            closed += 1;
        }
        closed
    }

    /// Spans finished so far, in finish order.
    #[must_use]
    pub fn finished(&self) -> &[FinishedSpan] {
        &self.finished
    }

    /// Hands over the finished spans, leaving the tracker's finished list empty.
    pub fn drain_finished(&mut self) -> Vec<FinishedSpan> {
        std::mem::take(&mut self.finished)
    }

    fn misuse(&self, handle: SpanHandle) -> SpanError {
        if handle.0 >= self.next_id {
            SpanError::Unknown(handle)
        } else if self.open.iter().any(|s| s.handle == handle) {
            SpanError::NotInnermost {
                handle,
                innermost: self.current(),
            }
        } else {
            SpanError::AlreadyFinished(handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_spans_finish_in_lifo_order() {
        let mut tracker = SpanTracker::new();
        let outer = tracker.start("outer");
        let inner = tracker.start("inner");

        let inner_duration = tracker.finish(inner).unwrap();
        let outer_duration = tracker.finish(outer).unwrap();

        assert!(inner_duration <= outer_duration);
        assert_eq!(tracker.depth(), 0);

        let names: Vec<_> = tracker.finished().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["inner", "outer"]);
    }

    #[test]
    fn finishing_outer_before_inner_is_rejected() {
        let mut tracker = SpanTracker::new();
        let outer = tracker.start("outer");
        let inner = tracker.start("inner");

        let err = tracker.finish(outer).unwrap_err();
        assert_eq!(
            err,
            SpanError::NotInnermost {
                handle: outer,
                innermost: Some(inner),
            }
        );
        // The failed call must not disturb the stack.
        assert_eq!(tracker.depth(), 2);
        assert!(tracker.finish(inner).is_ok());
        assert!(tracker.finish(outer).is_ok());
    }

    #[test]
    fn parent_is_the_innermost_span_at_start_time() {
        let mut tracker = SpanTracker::new();
        let root = tracker.start("root");
        let first = tracker.start("first");
        tracker.finish(first).unwrap();
        let second = tracker.start("second");
        tracker.finish(second).unwrap();
        tracker.finish(root).unwrap();

        let spans = tracker.finished();
        assert_eq!(spans[0].parent, Some(root));
        assert_eq!(spans[1].parent, Some(root));
        assert_eq!(spans[2].parent, None);
    }

    #[test]
    fn finishing_twice_reports_already_finished() {
        let mut tracker = SpanTracker::new();
        let span = tracker.start("once");
        tracker.finish(span).unwrap();
        assert_eq!(tracker.finish(span), Err(SpanError::AlreadyFinished(span)));
    }

    #[test]
    fn foreign_handle_is_unknown() {
        let mut other = SpanTracker::new();
        other.start("a");
        let foreign = other.start("b");

        let mut tracker = SpanTracker::new();
        assert_eq!(tracker.finish(foreign), Err(SpanError::Unknown(foreign)));
    }

    #[test]
    fn tags_are_mutable_until_finish() {
        let mut tracker = SpanTracker::new();
        let span = tracker.start("tagged");
        tracker.tag(span, "status", "pending").unwrap();
        tracker.tag(span, "status", "200").unwrap();
        tracker.finish(span).unwrap();

        assert_eq!(tracker.finished()[0].tags["status"], "200");
        assert_eq!(
            tracker.tag(span, "late", "value"),
            Err(SpanError::AlreadyFinished(span))
        );
    }

    #[test]
    fn in_span_closes_around_the_closure() {
        let mut tracker = SpanTracker::new();
        let root = tracker.start("root");
        let value = tracker.in_span("work", || 7).unwrap();
        assert_eq!(value, 7);
        assert_eq!(tracker.current(), Some(root));
        assert_eq!(tracker.finished()[0].name, "work");
        assert_eq!(tracker.finished()[0].parent, Some(root));
    }

    #[test]
    fn unwind_closes_everything_innermost_first() {
        let mut tracker = SpanTracker::new();
        tracker.start("root");
        tracker.start("child");

        assert_eq!(tracker.unwind(), 2);
        assert_eq!(tracker.depth(), 0);

        let spans = tracker.drain_finished();
        assert_eq!(spans[0].name, "child");
        assert_eq!(spans[1].name, "root");
        assert!(spans.iter().all(|s| s.tags["error"] == "unwound"));
        assert!(tracker.finished().is_empty());
    }

    #[test]
    fn unwind_on_balanced_tracker_is_a_noop() {
        let mut tracker = SpanTracker::new();
        let span = tracker.start("root");
        tracker.finish(span).unwrap();
        assert_eq!(tracker.unwind(), 0);
    }
}

//! Dispatch Timeline
//!
//! Records when each dispatched run starts and ends, for run reports and
//! for checking the dispatch order after the fact. Only the most recent
//! events are kept; older ones are dropped as new ones arrive.

use std::collections::VecDeque;
use std::time::Instant;

/// Events kept by [`DispatchTimeline::new`], two per run.
pub const DEFAULT_EVENT_CAPACITY: usize = 2_000;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Fresh execution handed to the processor
    Started,
    /// Suspended execution handed back to the processor with a job
    Resumed,
    /// Processor returned control
    Finished,
    /// Processor failed or panicked
    Errored,
}

impl EventType {
    fn opens_run(self) -> bool {
        matches!(self, Self::Started | Self::Resumed)
    }
}

/// A single event in the dispatch timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub execution_id: u64,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// One processor invocation, from hand-off to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpan {
    pub execution_id: u64,
    pub resumed: bool,
    pub start_ms: u128,
    /// `None` while the run is still in flight
    pub end_ms: Option<u128>,
    pub errored: bool,
}

/// Tracks the latest processor invocations made by a scheduler.
#[derive(Debug, Clone)]
pub struct DispatchTimeline {
    events: VecDeque<TimelineEvent>,
    capacity: usize,
    start_time: Instant,
}

impl DispatchTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a timeline keeping at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            start_time: Instant::now(),
        }
    }

    /// Records an event for an execution, dropping the oldest one when full.
    pub fn add_event(&mut self, execution_id: u64, event_type: EventType) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(TimelineEvent {
            execution_id,
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns the retained events, oldest first.
    pub fn get_events(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.events.iter()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Pairs up opening and closing events into run spans, in start order.
    /// A closing event whose opening was already dropped is ignored.
    pub fn runs(&self) -> Vec<RunSpan> {
        let mut spans: Vec<RunSpan> = Vec::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            if event.event_type.opens_run() {
                spans.push(RunSpan {
                    execution_id: event.execution_id,
                    resumed: event.event_type == EventType::Resumed,
                    start_ms: elapsed,
                    end_ms: None,
                    errored: false,
                });
            } else if let Some(span) = spans
                .iter_mut()
                .rev()
                .find(|s| s.execution_id == event.execution_id && s.end_ms.is_none())
            {
                span.end_ms = Some(elapsed);
                span.errored = event.event_type == EventType::Errored;
            }
        }

        spans
    }

    /// Execution ids in the order the processor was invoked for them.
    pub fn dispatch_order(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter(|e| e.event_type.opens_run())
            .map(|e| e.execution_id)
            .collect()
    }

    /// Highest number of runs that were open at the same time.
    pub fn max_concurrency(&self) -> usize {
        let mut open = 0usize;
        let mut peak = 0usize;
        for event in &self.events {
            if event.event_type.opens_run() {
                open += 1;
                peak = peak.max(open);
            } else {
                open = open.saturating_sub(1);
            }
        }
        peak
    }

    /// Generates an ASCII Gantt chart of the recorded runs.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nDispatch Timeline:\n\n");

        let total_time = self.start_time.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        for span in self.runs() {
            let end = span.end_ms.unwrap_or(total_time);
            let start_pos = (span.start_ms as f64 * scale) as usize;
            let width = ((end.saturating_sub(span.start_ms)) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            let marker = match (span.resumed, span.errored) {
                (_, true) => " error",
                (true, false) => " resumed",
                (false, false) => "",
            };
            output.push_str(&format!(
                "{:>12} |{}| ({} ms){}\n",
                format!("exec {}", span.execution_id),
                bar,
                end.saturating_sub(span.start_ms),
                marker
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for DispatchTimeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timeline_creation() {
        let timeline = DispatchTimeline::new();
        assert!(timeline.is_empty());
        assert_eq!(timeline.get_events().count(), 0);
        assert_eq!(timeline.max_concurrency(), 0);
    }

    #[test]
    fn test_runs_pair_events() {
        let mut timeline = DispatchTimeline::new();
        timeline.add_event(1, EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event(1, EventType::Finished);
        timeline.add_event(1, EventType::Resumed);
        timeline.add_event(1, EventType::Errored);

        let runs = timeline.runs();
        assert_eq!(runs.len(), 2);
        assert!(!runs[0].resumed);
        assert!(runs[0].end_ms.unwrap() - runs[0].start_ms >= 20);
        assert!(runs[1].resumed);
        assert!(runs[1].errored);
    }

    #[test]
    fn test_open_run_has_no_end() {
        let mut timeline = DispatchTimeline::new();
        timeline.add_event(4, EventType::Started);

        let runs = timeline.runs();
        assert_eq!(runs[0].end_ms, None);
    }

    #[test]
    fn test_dispatch_order_and_concurrency() {
        let mut timeline = DispatchTimeline::new();
        timeline.add_event(2, EventType::Started);
        timeline.add_event(2, EventType::Finished);
        timeline.add_event(1, EventType::Resumed);
        timeline.add_event(1, EventType::Finished);

        assert_eq!(timeline.dispatch_order(), vec![2, 1]);
        assert_eq!(timeline.max_concurrency(), 1);

        timeline.add_event(3, EventType::Started);
        timeline.add_event(4, EventType::Started);
        assert_eq!(timeline.max_concurrency(), 2);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = DispatchTimeline::new();

        timeline.add_event(1, EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event(1, EventType::Finished);
        timeline.add_event(2, EventType::Resumed);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event(2, EventType::Errored);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("exec 1"));
        assert!(chart.contains("exec 2"));
        assert!(chart.contains("error"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = DispatchTimeline::default();
        let chart = timeline.gantt_chart();
        assert!(chart.contains("Timeline"));
    }

    #[test]
    fn test_timeline_keeps_latest_events() {
        let mut timeline = DispatchTimeline::with_capacity(4);
        for id in 1..=10 {
            timeline.add_event(id, EventType::Started);
            timeline.add_event(id, EventType::Finished);
        }

        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.dispatch_order(), vec![9, 10]);
        assert_eq!(timeline.runs().len(), 2);
        assert_eq!(timeline.max_concurrency(), 1);
    }

    #[test]
    fn test_orphaned_close_is_ignored() {
        let mut timeline = DispatchTimeline::with_capacity(3);
        timeline.add_event(1, EventType::Started);
        timeline.add_event(1, EventType::Errored);
        timeline.add_event(2, EventType::Started);
        timeline.add_event(2, EventType::Finished);

        let runs = timeline.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].execution_id, 2);
        assert!(!runs[0].errored);
        assert_eq!(timeline.max_concurrency(), 1);
    }

    #[test]
    fn test_timeline_elapsed() {
        let timeline = DispatchTimeline::new();
        thread::sleep(Duration::from_millis(20));
        assert!(timeline.elapsed().as_millis() >= 20);
    }
}

/// Command queue and correlator
///
/// Commands are issued in order with a bounded number in flight. Each
/// output carrying a result record answers the oldest command in
/// flight. Breakpoints reported along the way are cached here.

use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

use crate::commands::{Command, CommandAndOutput};
use crate::communication::{ChannelError, CommandSink};
use crate::types::{BreakPoint, Output, ResultKind, ResultPayload};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("result record ^{kind} arrived with no command in flight")]
    OrphanResult { kind: ResultKind },
}

/// Breakpoints known to the engine, keyed by number
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakpointCache {
    breakpoints: BTreeMap<u32, BreakPoint>,
}

impl BreakpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge reported breakpoints. A full table replaces the cache: numbers
    /// it does not list are dropped.
    pub fn merge(&mut self, breakpoints: &BTreeMap<u32, BreakPoint>, full_table: bool) {
        if full_table {
            self.breakpoints.retain(|number, _| breakpoints.contains_key(number));
        }
        for (number, bp) in breakpoints {
            self.breakpoints.insert(*number, bp.clone());
        }
    }

    pub fn remove(&mut self, number: u32) -> Option<BreakPoint> {
        self.breakpoints.remove(&number)
    }

    pub fn get(&self, number: u32) -> Option<&BreakPoint> {
        self.breakpoints.get(&number)
    }

    pub fn all(&self) -> &BTreeMap<u32, BreakPoint> {
        &self.breakpoints
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }
}

pub struct CommandQueue {
    queued: VecDeque<Command>,
    started: VecDeque<Command>,
    max_in_flight: usize,
    breakpoints: BreakpointCache,
    orphans: usize,
}

impl CommandQueue {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            queued: VecDeque::new(),
            started: VecDeque::new(),
            max_in_flight: max_in_flight.max(1),
            breakpoints: BreakpointCache::new(),
            orphans: 0,
        }
    }

    /// Append a command. It is written out by the next `issue_ready`.
    pub fn queue_command(&mut self, command: Command) {
        log::debug!("QUEUE: {}", command.text);
        self.queued.push_back(command);
    }

    /// Issue queued commands while fewer than `max_in_flight` are started
    pub fn issue_ready(&mut self, sink: &mut dyn CommandSink) -> Result<(), ChannelError> {
        while self.started.len() < self.max_in_flight {
            let command = match self.queued.pop_front() {
                Some(command) => command,
                None => break,
            };
            if let Err(e) = sink.write_line(&command.text) {
                self.queued.push_front(command);
                return Err(e);
            }
            self.started.push_back(command);
        }
        Ok(())
    }

    /// Pair an output with the command it answers and update the
    /// breakpoint cache. A result with nothing in flight is logged and
    /// dropped; the out-of-band records of the output are kept.
    pub fn correlate(&mut self, mut output: Output) -> CommandAndOutput {
        let kind = match &output.result_record {
            Some(record) => record.kind,
            None => return CommandAndOutput::new(None, output),
        };

        // The overloads menu interrupts a command that is still running
        if kind == ResultKind::Undefined {
            return CommandAndOutput::new(self.started.front().cloned(), output);
        }

        let command = match self.started.pop_front() {
            Some(command) => command,
            None => {
                let err = CorrelationError::OrphanResult { kind };
                log::warn!("{}: {:?}", err, output.raw);
                self.orphans += 1;
                output.result_record = None;
                return CommandAndOutput::new(None, output);
            }
        };
        log::debug!("RECV: ^{} for {:?}", kind, command.text);

        if let Some(record) = &output.result_record {
            if let Some(ResultPayload::Breakpoints {
                breakpoints,
                full_table,
            }) = &record.payload
            {
                self.breakpoints.merge(breakpoints, *full_table);
            }
            if kind == ResultKind::Done {
                for number in command.deleted_breakpoints() {
                    self.breakpoints.remove(number);
                }
            }
        }
        CommandAndOutput::new(Some(command), output)
    }

    pub fn breakpoints(&self) -> &BreakpointCache {
        &self.breakpoints
    }

    pub fn in_flight(&self) -> usize {
        self.started.len()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Number of result records that arrived with nothing in flight
    pub fn orphan_count(&self) -> usize {
        self.orphans
    }

    /// Forget every pending command
    pub fn clear(&mut self) {
        self.queued.clear();
        self.started.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutOfBandRecord, ResultRecord, StreamRecord};

    #[derive(Default)]
    struct RecordingSink {
        lines: Vec<String>,
    }

    impl CommandSink for RecordingSink {
        fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
            self.lines.push(line.to_string());
            Ok(())
        }
    }

    struct ClosedSink;

    impl CommandSink for ClosedSink {
        fn write_line(&mut self, _line: &str) -> Result<(), ChannelError> {
            Err(ChannelError::Closed)
        }
    }

    fn done() -> Output {
        Output {
            result_record: Some(ResultRecord::new(ResultKind::Done)),
            parsed_ok: true,
            ..Default::default()
        }
    }

    fn bp(number: u32, line: u32) -> BreakPoint {
        BreakPoint {
            number,
            enabled: true,
            address: "0x1".into(),
            file_name: "a.c".into(),
            line,
            ..Default::default()
        }
    }

    fn breakpoints_output(bps: &[BreakPoint], full_table: bool) -> Output {
        let mut record = ResultRecord::new(ResultKind::Done);
        record.payload = Some(ResultPayload::Breakpoints {
            breakpoints: bps.iter().map(|b| (b.number, b.clone())).collect(),
            full_table,
        });
        Output {
            result_record: Some(record),
            parsed_ok: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_command_in_flight() {
        let mut queue = CommandQueue::new(1);
        let mut sink = RecordingSink::default();
        queue.queue_command(Command::new("-exec-run"));
        queue.issue_ready(&mut sink).unwrap();
        queue.queue_command(Command::new("-exec-next"));
        queue.issue_ready(&mut sink).unwrap();
        assert_eq!(sink.lines, vec!["-exec-run"]);
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(queue.queued(), 1);

        let answered = queue.correlate(done());
        assert_eq!(answered.command.unwrap().text, "-exec-run");
        queue.issue_ready(&mut sink).unwrap();
        assert_eq!(sink.lines, vec!["-exec-run", "-exec-next"]);
    }

    #[test]
    fn test_wider_in_flight_window() {
        let mut queue = CommandQueue::new(2);
        let mut sink = RecordingSink::default();
        for text in ["a", "b", "c"] {
            queue.queue_command(Command::new(text));
            queue.issue_ready(&mut sink).unwrap();
        }
        assert_eq!(sink.lines, vec!["a", "b"]);
        assert_eq!(queue.correlate(done()).command.unwrap().text, "a");
        assert_eq!(queue.correlate(done()).command.unwrap().text, "b");
    }

    #[test]
    fn test_commands_wait_for_a_sink() {
        let mut queue = CommandQueue::new(1);
        queue.queue_command(Command::new("-break-list"));
        assert_eq!(queue.in_flight(), 0);
        let mut sink = RecordingSink::default();
        queue.issue_ready(&mut sink).unwrap();
        assert_eq!(sink.lines, vec!["-break-list"]);
    }

    #[test]
    fn test_failed_write_keeps_command_queued() {
        let mut queue = CommandQueue::new(1);
        queue.queue_command(Command::new("-exec-run"));
        let result = queue.issue_ready(&mut ClosedSink);
        assert!(matches!(result, Err(ChannelError::Closed)));
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_output_without_result_has_no_command() {
        let mut queue = CommandQueue::new(1);
        let mut sink = RecordingSink::default();
        queue.queue_command(Command::new("-exec-run"));
        queue.issue_ready(&mut sink).unwrap();
        let stop = Output {
            out_of_band: vec![OutOfBandRecord {
                is_stopped: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(queue.correlate(stop).command.is_none());
        assert_eq!(queue.in_flight(), 1);
    }

    #[test]
    fn test_orphan_result_keeps_out_of_band_records() {
        let mut queue = CommandQueue::new(1);
        let mut output = done();
        output.out_of_band.push(OutOfBandRecord {
            stream_record: Some(StreamRecord::Console("hi".into())),
            ..Default::default()
        });
        let answered = queue.correlate(output);
        assert!(answered.command.is_none());
        assert!(answered.output.result_record.is_none());
        assert_eq!(answered.output.out_of_band.len(), 1);
        assert_eq!(queue.orphan_count(), 1);
    }

    #[test]
    fn test_idempotent_merge() {
        let mut queue = CommandQueue::new(1);
        let mut sink = RecordingSink::default();
        let reported = [bp(1, 10)];
        for _ in 0..2 {
            queue.queue_command(Command::set_breakpoint("a.c", 10, None, 0));
            queue.issue_ready(&mut sink).unwrap();
            queue.correlate(breakpoints_output(&reported, false));
        }
        assert_eq!(queue.breakpoints().len(), 1);
        assert_eq!(queue.breakpoints().get(1), Some(&reported[0]));
    }

    #[test]
    fn test_full_table_is_authoritative() {
        let mut cache = BreakpointCache::new();
        let partial: BTreeMap<_, _> = [(1, bp(1, 10)), (2, bp(2, 20))].into_iter().collect();
        cache.merge(&partial, false);
        let table: BTreeMap<_, _> = [(2, bp(2, 21)), (3, bp(3, 30))].into_iter().collect();
        cache.merge(&table, true);
        assert_eq!(cache.all().keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(cache.get(2).unwrap().line, 21);
    }

    #[test]
    fn test_delete_breakpoint_evicts_entry() {
        let mut queue = CommandQueue::new(1);
        let mut sink = RecordingSink::default();
        queue.queue_command(Command::list_breakpoints());
        queue.issue_ready(&mut sink).unwrap();
        queue.correlate(breakpoints_output(&[bp(1, 10), bp(2, 20)], true));
        queue.queue_command(Command::delete_breakpoint(1));
        queue.issue_ready(&mut sink).unwrap();
        queue.correlate(done());
        assert!(queue.breakpoints().get(1).is_none());
        assert!(queue.breakpoints().get(2).is_some());
    }
}

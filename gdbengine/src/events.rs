/// Event handling and state management for GDB engine
///
/// Correlated outputs are fanned out to every handler that accepts them.
/// Handlers turn records into [`GdbEvent`]s and drive the session state
/// machine.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::commands::CommandAndOutput;
use crate::types::{
    BreakPoint, Frame, OutOfBandRecord, OverloadsChoiceEntry, Output, ResultKind, ResultPayload,
    ResultRecord, StopReason, StreamRecord,
};
use crate::variables::VariableTree;

/// Current state of the debugging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// GDB launched, not yet answered
    NotStarted,
    /// Waiting for commands; the inferior, if any, is stopped
    Ready,
    Running,
    /// The inferior exited or GDB went away. Terminal.
    ProgramExited,
}

/// Events delivered to the front end
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GdbEvent {
    ConsoleMessage {
        text: String,
    },
    TargetOutputMessage {
        text: String,
    },
    ErrorMessage {
        text: String,
    },
    BreakpointsSet {
        breakpoints: BTreeMap<u32, BreakPoint>,
        full_table: bool,
        cookie: Option<String>,
    },
    BreakpointDeleted {
        number: u32,
        cookie: Option<String>,
    },
    Stopped {
        reason: StopReason,
        frame: Option<Frame>,
        breakpoint_number: Option<u32>,
        thread_id: Option<u32>,
        signal_name: Option<String>,
        signal_meaning: Option<String>,
        cookie: Option<String>,
    },
    Running {
        thread_id: Option<u32>,
        cookie: Option<String>,
    },
    CommandDone {
        command: Option<String>,
        cookie: Option<String>,
    },
    CommandError {
        command: Option<String>,
        message: String,
        cookie: Option<String>,
    },
    ProgramExited {
        exit_code: Option<i32>,
        reason: Option<StopReason>,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    FramesListed {
        frames: Vec<Frame>,
        cookie: Option<String>,
    },
    FramesArgumentsListed {
        arguments: BTreeMap<u32, VariableTree>,
        cookie: Option<String>,
    },
    CurrentFrame {
        frame: Frame,
        cookie: Option<String>,
    },
    LocalVariablesListed {
        variables: VariableTree,
        cookie: Option<String>,
    },
    VariableValue {
        name: String,
        variable: VariableTree,
        cookie: Option<String>,
    },
    ThreadsListed {
        thread_ids: Vec<u32>,
        cookie: Option<String>,
    },
    ThreadSelected {
        thread_id: u32,
        frame: Option<Frame>,
        cookie: Option<String>,
    },
    FilesListed {
        files: Vec<String>,
        cookie: Option<String>,
    },
    RegisterNamesListed {
        names: BTreeMap<u32, String>,
        cookie: Option<String>,
    },
    ChangedRegistersListed {
        registers: Vec<u32>,
        cookie: Option<String>,
    },
    RegisterValuesListed {
        values: BTreeMap<u32, String>,
        cookie: Option<String>,
    },
    MemoryRead {
        start_address: u64,
        bytes: Vec<u8>,
        cookie: Option<String>,
    },
    OverloadsChoice {
        entries: Vec<OverloadsChoiceEntry>,
        cookie: Option<String>,
    },
    /// GDB's output channel hung up
    EngineDied,
}

/// Tracks the session state. Every transition yields a `StateChanged`
/// event for the caller to deliver.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    launched: bool,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::NotStarted,
            launched: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_launched(&self) -> bool {
        self.launched
    }

    pub fn set_launched(&mut self) {
        self.launched = true;
    }

    fn transition(&mut self, to: SessionState) -> Option<GdbEvent> {
        if self.state == to || self.state == SessionState::ProgramExited {
            return None;
        }
        let from = self.state;
        self.state = to;
        log::debug!("STATE: {:?} -> {:?}", from, to);
        Some(GdbEvent::StateChanged { from, to })
    }

    /// A command completed or breakpoints were set
    pub fn on_command_done(&mut self) -> Option<GdbEvent> {
        if self.state == SessionState::NotStarted && self.launched {
            self.transition(SessionState::Ready)
        } else {
            None
        }
    }

    /// `^running` may be the first answer GDB gives when no init
    /// commands were issued
    pub fn on_running(&mut self) -> Option<GdbEvent> {
        match self.state {
            SessionState::Ready => self.transition(SessionState::Running),
            SessionState::NotStarted if self.launched => self.transition(SessionState::Running),
            _ => None,
        }
    }

    pub fn on_stopped(&mut self) -> Option<GdbEvent> {
        if self.state == SessionState::Running {
            self.transition(SessionState::Ready)
        } else {
            None
        }
    }

    pub fn on_exit(&mut self) -> Option<GdbEvent> {
        self.transition(SessionState::ProgramExited)
    }
}

/// What a handler gets to work with: the state machine and the list of
/// events produced so far
pub struct HandlerContext<'a> {
    pub state: &'a mut SessionStateMachine,
    events: Vec<GdbEvent>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(state: &'a mut SessionStateMachine) -> Self {
        Self {
            state,
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: GdbEvent) {
        log::debug!("EVENT: {:?}", event);
        self.events.push(event);
    }

    fn emit_transition(&mut self, transition: Option<GdbEvent>) {
        if let Some(event) = transition {
            self.emit(event);
        }
    }

    pub fn events(&self) -> &[GdbEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<GdbEvent> {
        self.events
    }
}

pub trait OutputHandler: Send {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool;
    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>);
}

fn result_record(cao: &CommandAndOutput) -> Option<&ResultRecord> {
    cao.output.result_record.as_ref()
}

fn result_kind(cao: &CommandAndOutput) -> Option<ResultKind> {
    result_record(cao).map(|r| r.kind)
}

fn payload(cao: &CommandAndOutput) -> Option<&ResultPayload> {
    result_record(cao)
        .filter(|r| r.kind == ResultKind::Done)
        .and_then(|r| r.payload.as_ref())
}

fn command_name(cao: &CommandAndOutput) -> Option<String> {
    cao.command_name().map(str::to_string)
}

fn deleted_breakpoints(cao: &CommandAndOutput) -> Vec<u32> {
    cao.command
        .as_ref()
        .map(|c| c.deleted_breakpoints())
        .unwrap_or_default()
}

fn out_of_band(cao: &CommandAndOutput) -> impl Iterator<Item = &OutOfBandRecord> {
    cao.output.out_of_band.iter()
}

/// Console, target and log streams
pub struct StreamHandler;

impl OutputHandler for StreamHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        out_of_band(cao).any(|r| r.stream_record.is_some())
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        for stream in out_of_band(cao).filter_map(|r| r.stream_record.as_ref()) {
            let event = match stream {
                StreamRecord::Console(text) => GdbEvent::ConsoleMessage { text: text.clone() },
                StreamRecord::Target(text) => GdbEvent::TargetOutputMessage { text: text.clone() },
                StreamRecord::Log(text) => GdbEvent::ErrorMessage { text: text.clone() },
            };
            ctx.emit(event);
        }
    }
}

/// Breakpoints reported by a command, and deletions
pub struct BreakpointHandler;

impl OutputHandler for BreakpointHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        if result_kind(cao) != Some(ResultKind::Done) {
            return false;
        }
        matches!(payload(cao), Some(ResultPayload::Breakpoints { .. }))
            || !deleted_breakpoints(cao).is_empty()
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        if let Some(ResultPayload::Breakpoints {
            breakpoints,
            full_table,
        }) = payload(cao)
        {
            ctx.emit(GdbEvent::BreakpointsSet {
                breakpoints: breakpoints.clone(),
                full_table: *full_table,
                cookie: cao.cookie(),
            });
            let transition = ctx.state.on_command_done();
            ctx.emit_transition(transition);
            return;
        }

        for number in deleted_breakpoints(cao) {
            ctx.emit(GdbEvent::BreakpointDeleted {
                number,
                cookie: cao.cookie(),
            });
        }
    }
}

/// `*stopped` records other than the inferior exiting
pub struct StoppedHandler;

impl OutputHandler for StoppedHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        out_of_band(cao).any(|r| r.is_stopped && !r.stop_reason.is_exit())
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        for record in out_of_band(cao).filter(|r| r.is_stopped && !r.stop_reason.is_exit()) {
            ctx.emit(GdbEvent::Stopped {
                reason: record.stop_reason,
                frame: record.frame.clone(),
                breakpoint_number: record.breakpoint_number,
                thread_id: record.thread_id,
                signal_name: record.signal_name.clone(),
                signal_meaning: record.signal_meaning.clone(),
                cookie: cao.cookie(),
            });
            let transition = ctx.state.on_stopped();
            ctx.emit_transition(transition);
        }
    }
}

/// `^running`, and `*running` records nobody asked for
pub struct RunningHandler;

impl OutputHandler for RunningHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        result_kind(cao) == Some(ResultKind::Running)
            || (!cao.has_command() && out_of_band(cao).any(|r| r.is_running))
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        if result_kind(cao) == Some(ResultKind::Running) {
            ctx.emit(GdbEvent::Running {
                thread_id: None,
                cookie: cao.cookie(),
            });
        } else {
            if ctx.state.state() == SessionState::Running {
                return;
            }
            let thread_id = out_of_band(cao).find(|r| r.is_running).and_then(|r| r.thread_id);
            ctx.emit(GdbEvent::Running {
                thread_id,
                cookie: None,
            });
        }
        let transition = ctx.state.on_running();
        ctx.emit_transition(transition);
    }
}

/// `^exit` and the exit stop reasons
pub struct ExitHandler;

impl OutputHandler for ExitHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        result_kind(cao) == Some(ResultKind::Exit)
            || out_of_band(cao).any(|r| r.is_stopped && r.stop_reason.is_exit())
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        let stop = out_of_band(cao).find(|r| r.is_stopped && r.stop_reason.is_exit());
        let (exit_code, reason) = match stop {
            Some(record) => {
                let code = match record.stop_reason {
                    StopReason::ExitedNormally => Some(record.exit_code.unwrap_or(0)),
                    _ => record.exit_code,
                };
                (code, Some(record.stop_reason))
            }
            None => (None, None),
        };
        ctx.emit(GdbEvent::ProgramExited { exit_code, reason });
        let transition = ctx.state.on_exit();
        ctx.emit_transition(transition);
    }
}

/// `^error,msg="..."`
pub struct ErrorHandler;

impl OutputHandler for ErrorHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        result_kind(cao) == Some(ResultKind::Error)
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        let message = result_record(cao)
            .and_then(|r| r.message())
            .unwrap_or("unknown error")
            .to_string();
        log::debug!("GDB ERROR for {:?}: {}", command_name(cao), message);
        ctx.emit(GdbEvent::CommandError {
            command: command_name(cao),
            message,
            cookie: cao.cookie(),
        });
    }
}

/// Call stacks, frame arguments and the current frame
pub struct FramesHandler;

impl OutputHandler for FramesHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        matches!(
            payload(cao),
            Some(ResultPayload::CallStack(_) | ResultPayload::FrameArguments(_) | ResultPayload::Frame(_))
        )
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        let cookie = cao.cookie();
        match payload(cao) {
            Some(ResultPayload::CallStack(frames)) => ctx.emit(GdbEvent::FramesListed {
                frames: frames.clone(),
                cookie,
            }),
            Some(ResultPayload::FrameArguments(arguments)) => ctx.emit(GdbEvent::FramesArgumentsListed {
                arguments: arguments.clone(),
                cookie,
            }),
            Some(ResultPayload::Frame(frame)) => ctx.emit(GdbEvent::CurrentFrame {
                frame: frame.clone(),
                cookie,
            }),
            _ => {}
        }
    }
}

/// Local variables and evaluated expressions
pub struct VariablesHandler;

impl OutputHandler for VariablesHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        matches!(
            payload(cao),
            Some(ResultPayload::LocalVariables(_) | ResultPayload::Variable(_))
        )
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        let cookie = cao.cookie();
        match payload(cao) {
            Some(ResultPayload::LocalVariables(variables)) => ctx.emit(GdbEvent::LocalVariablesListed {
                variables: variables.clone(),
                cookie,
            }),
            Some(ResultPayload::Variable(variable)) => {
                let name = cao
                    .command
                    .as_ref()
                    .and_then(|c| c.variable.clone())
                    .unwrap_or_default();
                let mut variable = variable.clone();
                if let Some(root) = variable.roots().first().copied() {
                    if let Some(var) = variable.get_mut(root) {
                        var.name = name.clone();
                    }
                }
                ctx.emit(GdbEvent::VariableValue {
                    name,
                    variable,
                    cookie,
                });
            }
            _ => {}
        }
    }
}

/// Thread lists and thread selection
pub struct ThreadsHandler;

impl OutputHandler for ThreadsHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        matches!(
            payload(cao),
            Some(ResultPayload::ThreadIds(_) | ResultPayload::NewThread { .. })
        )
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        let cookie = cao.cookie();
        match payload(cao) {
            Some(ResultPayload::ThreadIds(ids)) => ctx.emit(GdbEvent::ThreadsListed {
                thread_ids: ids.clone(),
                cookie,
            }),
            Some(ResultPayload::NewThread { thread_id, frame }) => ctx.emit(GdbEvent::ThreadSelected {
                thread_id: *thread_id,
                frame: frame.clone(),
                cookie,
            }),
            _ => {}
        }
    }
}

pub struct FilesHandler;

impl OutputHandler for FilesHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        matches!(payload(cao), Some(ResultPayload::Files(_)))
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        if let Some(ResultPayload::Files(files)) = payload(cao) {
            ctx.emit(GdbEvent::FilesListed {
                files: files.clone(),
                cookie: cao.cookie(),
            });
        }
    }
}

/// Register names, changed registers and register values
pub struct RegistersHandler;

impl OutputHandler for RegistersHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        matches!(
            payload(cao),
            Some(
                ResultPayload::RegisterNames(_)
                    | ResultPayload::ChangedRegisters(_)
                    | ResultPayload::RegisterValues(_)
            )
        )
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        let cookie = cao.cookie();
        match payload(cao) {
            Some(ResultPayload::RegisterNames(names)) => ctx.emit(GdbEvent::RegisterNamesListed {
                names: names.clone(),
                cookie,
            }),
            Some(ResultPayload::ChangedRegisters(registers)) => ctx.emit(GdbEvent::ChangedRegistersListed {
                registers: registers.clone(),
                cookie,
            }),
            Some(ResultPayload::RegisterValues(values)) => ctx.emit(GdbEvent::RegisterValuesListed {
                values: values.clone(),
                cookie,
            }),
            _ => {}
        }
    }
}

pub struct MemoryHandler;

impl OutputHandler for MemoryHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        matches!(payload(cao), Some(ResultPayload::Memory { .. }))
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        if let Some(ResultPayload::Memory {
            start_address,
            bytes,
        }) = payload(cao)
        {
            ctx.emit(GdbEvent::MemoryRead {
                start_address: *start_address,
                bytes: bytes.clone(),
                cookie: cao.cookie(),
            });
        }
    }
}

/// The menu GDB shows when a location matches several overloads
pub struct OverloadsHandler;

impl OutputHandler for OverloadsHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        matches!(
            result_record(cao).and_then(|r| r.payload.as_ref()),
            Some(ResultPayload::OverloadsChoice(_))
        )
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        if let Some(ResultPayload::OverloadsChoice(entries)) = result_record(cao).and_then(|r| r.payload.as_ref()) {
            ctx.emit(GdbEvent::OverloadsChoice {
                entries: entries.clone(),
                cookie: cao.cookie(),
            });
        }
    }
}

/// `^done` for any command
pub struct CommandDoneHandler;

impl OutputHandler for CommandDoneHandler {
    fn can_handle(&self, cao: &CommandAndOutput) -> bool {
        result_kind(cao) == Some(ResultKind::Done)
    }

    fn handle(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        ctx.emit(GdbEvent::CommandDone {
            command: command_name(cao),
            cookie: cao.cookie(),
        });
        let transition = ctx.state.on_command_done();
        ctx.emit_transition(transition);
    }
}

/// Fans each output out to the handlers, out-of-band records first in
/// the order GDB printed them, then the result record
pub struct OutputDispatcher {
    handlers: Vec<Box<dyn OutputHandler>>,
}

impl Default for OutputDispatcher {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl OutputDispatcher {
    /// A dispatcher with no handlers
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with_default_handlers() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.add_handler(Box::new(StreamHandler));
        dispatcher.add_handler(Box::new(StoppedHandler));
        dispatcher.add_handler(Box::new(RunningHandler));
        dispatcher.add_handler(Box::new(ErrorHandler));
        dispatcher.add_handler(Box::new(BreakpointHandler));
        dispatcher.add_handler(Box::new(FramesHandler));
        dispatcher.add_handler(Box::new(VariablesHandler));
        dispatcher.add_handler(Box::new(ThreadsHandler));
        dispatcher.add_handler(Box::new(FilesHandler));
        dispatcher.add_handler(Box::new(RegistersHandler));
        dispatcher.add_handler(Box::new(MemoryHandler));
        dispatcher.add_handler(Box::new(OverloadsHandler));
        dispatcher.add_handler(Box::new(CommandDoneHandler));
        dispatcher.add_handler(Box::new(ExitHandler));
        dispatcher
    }

    pub fn add_handler(&mut self, handler: Box<dyn OutputHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, cao: &CommandAndOutput, ctx: &mut HandlerContext<'_>) {
        for piece in split_output(cao) {
            for handler in &self.handlers {
                if handler.can_handle(&piece) {
                    handler.handle(&piece, ctx);
                }
            }
        }
    }
}

/// One piece per out-of-band record, then one for the result record
fn split_output(cao: &CommandAndOutput) -> Vec<CommandAndOutput> {
    let mut pieces: Vec<CommandAndOutput> = cao
        .output
        .out_of_band
        .iter()
        .map(|record| {
            CommandAndOutput::new(
                cao.command.clone(),
                Output {
                    parsed_ok: cao.output.parsed_ok,
                    out_of_band: vec![record.clone()],
                    ..Default::default()
                },
            )
        })
        .collect();
    if let Some(record) = &cao.output.result_record {
        pieces.push(CommandAndOutput::new(
            cao.command.clone(),
            Output {
                raw: cao.output.raw.clone(),
                parsed_ok: cao.output.parsed_ok,
                out_of_band: Vec::new(),
                result_record: Some(record.clone()),
            },
        ));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{self, Command};
    use crate::parser::parse_output_record;

    fn parsed(input: &str, command: Option<Command>) -> CommandAndOutput {
        let (output, _) = parse_output_record(input, 0).unwrap();
        CommandAndOutput::new(command, output)
    }

    fn dispatch(machine: &mut SessionStateMachine, cao: &CommandAndOutput) -> Vec<GdbEvent> {
        let dispatcher = OutputDispatcher::with_default_handlers();
        let mut ctx = HandlerContext::new(machine);
        dispatcher.dispatch(cao, &mut ctx);
        ctx.into_events()
    }

    fn launched() -> SessionStateMachine {
        let mut machine = SessionStateMachine::new();
        machine.set_launched();
        machine
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut machine = SessionStateMachine::new();
        assert_eq!(machine.on_command_done(), None);
        machine.set_launched();
        assert_eq!(
            machine.on_command_done(),
            Some(GdbEvent::StateChanged {
                from: SessionState::NotStarted,
                to: SessionState::Ready
            })
        );
        assert!(machine.on_stopped().is_none());
        assert!(machine.on_running().is_some());
        assert_eq!(machine.state(), SessionState::Running);
        assert!(machine.on_stopped().is_some());
        assert_eq!(machine.state(), SessionState::Ready);
        assert!(machine.on_exit().is_some());
        assert!(machine.on_running().is_none());
        assert!(machine.on_exit().is_none());
        assert_eq!(machine.state(), SessionState::ProgramExited);
    }

    #[test]
    fn test_running_before_any_command_done() {
        let mut machine = SessionStateMachine::new();
        assert!(machine.on_running().is_none());
        machine.set_launched();
        assert_eq!(
            machine.on_running(),
            Some(GdbEvent::StateChanged {
                from: SessionState::NotStarted,
                to: SessionState::Running
            })
        );
        assert!(machine.on_stopped().is_some());
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_stream_events() {
        let mut machine = launched();
        let events = dispatch(&mut machine, &parsed("~\"hello\\n\"\n@\"out\"\n&\"warning\"\n(gdb) \n", None));
        assert_eq!(
            events,
            vec![
                GdbEvent::ConsoleMessage { text: "hello\n".into() },
                GdbEvent::TargetOutputMessage { text: "out".into() },
                GdbEvent::ErrorMessage { text: "warning".into() },
            ]
        );
    }

    #[test]
    fn test_breakpoint_set_readies_session() {
        let mut machine = launched();
        let cmd = Command::set_breakpoint("a.c", 10, None, 0).with_cookie("c1");
        let cao = parsed(
            "^done,bkpt={number=\"1\",type=\"breakpoint\",disp=\"keep\",enabled=\"y\",addr=\"0x1\",func=\"main\",file=\"a.c\",line=\"10\",times=\"0\"}\n(gdb) \n",
            Some(cmd),
        );
        let events = dispatch(&mut machine, &cao);
        assert!(matches!(&events[0], GdbEvent::BreakpointsSet { breakpoints, full_table: false, cookie }
            if breakpoints.len() == 1 && cookie.as_deref() == Some("c1")));
        assert_eq!(
            events[1],
            GdbEvent::StateChanged {
                from: SessionState::NotStarted,
                to: SessionState::Ready
            }
        );
        assert!(matches!(&events[2], GdbEvent::CommandDone { command: Some(name), .. } if name == commands::SET_BREAKPOINT));
        assert_eq!(events.len(), 3);
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_breakpoint_deleted_event() {
        let mut machine = launched();
        let cao = parsed("^done\n(gdb) \n", Some(Command::delete_breakpoint(3)));
        let events = dispatch(&mut machine, &cao);
        assert_eq!(events[0], GdbEvent::BreakpointDeleted { number: 3, cookie: None });

        let cao = parsed("^done\n(gdb) \n", Some(Command::new("-break-delete 4 5")));
        let events = dispatch(&mut machine, &cao);
        assert_eq!(events[0], GdbEvent::BreakpointDeleted { number: 4, cookie: None });
        assert_eq!(events[1], GdbEvent::BreakpointDeleted { number: 5, cookie: None });
        assert!(matches!(events[2], GdbEvent::CommandDone { command: None, .. }));
    }

    #[test]
    fn test_run_then_stop() {
        let mut machine = launched();
        machine.on_command_done();

        let events = dispatch(&mut machine, &parsed("^running\n*running,thread-id=\"all\"\n(gdb) \n", Some(Command::run())));
        assert_eq!(
            events,
            vec![
                GdbEvent::Running { thread_id: None, cookie: None },
                GdbEvent::StateChanged {
                    from: SessionState::Ready,
                    to: SessionState::Running
                },
            ]
        );

        let stop = "*stopped,reason=\"breakpoint-hit\",bkptno=\"1\",thread-id=\"1\",frame={addr=\"0x08048470\",func=\"main\",args=[],file=\"a.c\",fullname=\"/tmp/a.c\",line=\"10\"}\n(gdb) \n";
        let events = dispatch(&mut machine, &parsed(stop, None));
        match &events[0] {
            GdbEvent::Stopped {
                reason,
                frame,
                breakpoint_number,
                thread_id,
                ..
            } => {
                assert_eq!(*reason, StopReason::BreakpointHit);
                assert_eq!(*breakpoint_number, Some(1));
                assert_eq!(*thread_id, Some(1));
                assert_eq!(frame.as_ref().unwrap().line, 10);
            }
            other => panic!("Expected Stopped, got {:?}", other),
        }
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_unsolicited_running_record() {
        let mut machine = launched();
        machine.on_command_done();
        let events = dispatch(&mut machine, &parsed("*running,thread-id=\"2\"\n(gdb) \n", None));
        assert_eq!(events[0], GdbEvent::Running { thread_id: Some(2), cookie: None });
        assert_eq!(machine.state(), SessionState::Running);
    }

    #[test]
    fn test_exit_is_terminal() {
        let mut machine = launched();
        machine.on_command_done();
        let events = dispatch(&mut machine, &parsed("*stopped,reason=\"exited-normally\"\n(gdb) \n", None));
        assert_eq!(
            events[0],
            GdbEvent::ProgramExited {
                exit_code: Some(0),
                reason: Some(StopReason::ExitedNormally)
            }
        );
        assert_eq!(machine.state(), SessionState::ProgramExited);

        let events = dispatch(&mut machine, &parsed("^done\n(gdb) \n", Some(Command::new("-exec-run"))));
        assert_eq!(events.len(), 1);
        assert_eq!(machine.state(), SessionState::ProgramExited);
    }

    #[test]
    fn test_error_event() {
        let mut machine = launched();
        let cmd = Command::evaluate_expression("nosuch").with_cookie("c9");
        let events = dispatch(&mut machine, &parsed("^error,msg=\"No symbol \\\"nosuch\\\" in current context.\"\n(gdb) \n", Some(cmd)));
        assert_eq!(
            events,
            vec![GdbEvent::CommandError {
                command: Some(commands::EVALUATE_EXPRESSION.to_string()),
                message: "No symbol \"nosuch\" in current context.".into(),
                cookie: Some("c9".into()),
            }]
        );
        assert_eq!(machine.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_variable_value_takes_expression_name() {
        let mut machine = launched();
        let cao = parsed("^done,value=\"{x = 1, y = 2}\"\n(gdb) \n", Some(Command::evaluate_expression("pt")));
        let events = dispatch(&mut machine, &cao);
        match &events[0] {
            GdbEvent::VariableValue { name, variable, .. } => {
                assert_eq!(name, "pt");
                let root = variable.find_root("pt").unwrap();
                assert_eq!(variable.children(root).len(), 2);
            }
            other => panic!("Expected VariableValue, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_handler_runs_alongside_defaults() {
        struct Counter(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        impl OutputHandler for Counter {
            fn can_handle(&self, cao: &CommandAndOutput) -> bool {
                cao.output.has_result_record()
            }
            fn handle(&self, _cao: &CommandAndOutput, _ctx: &mut HandlerContext<'_>) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut dispatcher = OutputDispatcher::with_default_handlers();
        dispatcher.add_handler(Box::new(Counter(hits.clone())));
        let mut machine = launched();
        let mut ctx = HandlerContext::new(&mut machine);
        dispatcher.dispatch(&parsed("~\"x\"\n^done\n(gdb) \n", None), &mut ctx);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(ctx.events().len(), 3);
    }

    #[test]
    fn test_event_json_shape() {
        let event = GdbEvent::BreakpointDeleted {
            number: 2,
            cookie: Some("cookie-7".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "breakpoint-deleted");
        assert_eq!(json["number"], 2);
    }
}

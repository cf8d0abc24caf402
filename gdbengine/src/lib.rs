/// GDB/MI engine
///
/// This crate drives GDB through its Machine Interface: it launches the
/// debugger, frames and parses its output, pairs results with the
/// commands that produced them and delivers typed events.

use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod commands;
pub mod communication;
pub mod config;
pub mod events;
pub mod parser;
pub mod process;
pub mod queue;
pub mod types;
pub mod variables;

pub use commands::{Command, CommandAndOutput, SequenceCounter};
pub use communication::{Channel, ChannelError, ChannelEvent, CommandSink, LineFramer, RecordFramer, TerminalWriter};
pub use config::{ConfigError, LaunchConfig};
pub use events::{GdbEvent, HandlerContext, OutputDispatcher, OutputHandler, SessionState, SessionStateMachine};
pub use parser::*;
pub use process::{GdbProcess, LaunchError, ProcessError};
pub use queue::{BreakpointCache, CommandQueue, CorrelationError};
pub use types::*;
pub use variables::{Variable, VariableId, VariableTree};

use communication::spawn_reader;

#[derive(Error, Debug)]
pub enum GdbError {
    #[error("Failed to parse GDB output: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("Communication error: {0}")]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("GDB is not running")]
    NotLaunched,
}

pub type Result<T> = std::result::Result<T, GdbError>;

/// One debugging session: the GDB process, its command queue and the
/// state derived from its output
pub struct GdbEngine {
    config: LaunchConfig,
    counter: Arc<SequenceCounter>,
    queue: CommandQueue,
    dispatcher: OutputDispatcher,
    state: SessionStateMachine,
    stdout_framer: RecordFramer,
    terminal_framer: RecordFramer,
    stderr_framer: LineFramer,
    sink: Option<Box<dyn CommandSink + Send>>,
    process: Option<GdbProcess>,
    readers: Vec<JoinHandle<()>>,
    channel_sender: mpsc::UnboundedSender<ChannelEvent>,
    channel_receiver: mpsc::UnboundedReceiver<ChannelEvent>,
    event_sender: mpsc::UnboundedSender<GdbEvent>,
    event_receiver: Arc<Mutex<mpsc::UnboundedReceiver<GdbEvent>>>,
    dead: bool,
}

impl GdbEngine {
    /// Create an engine. Cookies are drawn from `counter`, which may be
    /// shared between engines.
    pub fn new(config: LaunchConfig, counter: Arc<SequenceCounter>) -> Self {
        let (channel_sender, channel_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let max_record_bytes = config.max_record_bytes;

        Self {
            queue: CommandQueue::new(config.max_in_flight),
            config,
            counter,
            dispatcher: OutputDispatcher::with_default_handlers(),
            state: SessionStateMachine::new(),
            stdout_framer: RecordFramer::new(max_record_bytes),
            terminal_framer: RecordFramer::for_terminal(max_record_bytes),
            stderr_framer: LineFramer::new(),
            sink: None,
            process: None,
            readers: Vec::new(),
            channel_sender,
            channel_receiver,
            event_sender,
            event_receiver: Arc::new(Mutex::new(event_receiver)),
            dead: false,
        }
    }

    /// Start GDB and its reader tasks, then issue the configured init
    /// commands
    pub async fn launch(&mut self) -> Result<()> {
        if self.process.is_some() {
            log::warn!("GDB already launched");
            return Ok(());
        }

        let (process, channels) = GdbProcess::launch(&self.config)?;
        log::info!("GDB launched, PID: {:?}", process.id());

        self.readers
            .push(spawn_reader(Channel::Stdout, channels.stdout, self.channel_sender.clone()));
        self.readers
            .push(spawn_reader(Channel::Stderr, channels.stderr, self.channel_sender.clone()));
        if let Some(terminal) = channels.terminal {
            self.readers
                .push(spawn_reader(Channel::Terminal, terminal, self.channel_sender.clone()));
        }
        self.process = Some(process);
        self.dead = false;

        for text in &self.config.init_commands {
            self.queue.queue_command(Command::new(text.as_str()));
        }
        self.attach_sink(Box::new(channels.writer))
    }

    /// Use `sink` for commands and mark the session launched. Commands
    /// queued so far are issued.
    pub fn attach_sink(&mut self, sink: Box<dyn CommandSink + Send>) -> Result<()> {
        self.state.set_launched();
        self.sink = Some(sink);
        self.issue_ready()
    }

    fn issue_ready(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            self.queue.issue_ready(sink.as_mut())?;
        }
        Ok(())
    }

    /// Queue a command. It is written to GDB as soon as the in-flight
    /// window allows.
    pub fn queue_command(&mut self, command: Command) -> Result<()> {
        if self.dead {
            return Err(ChannelError::Closed.into());
        }
        self.queue.queue_command(command);
        self.issue_ready()
    }

    fn issue(&mut self, command: Command) -> Result<String> {
        let cookie = self.counter.next_cookie();
        self.queue_command(command.with_cookie(cookie.as_str()))?;
        Ok(cookie)
    }

    /// Handle bytes read from one of GDB's channels
    pub fn feed(&mut self, channel: Channel, bytes: &[u8]) {
        match channel {
            Channel::Stdout => {
                if let Some(text) = self.stdout_framer.push(bytes) {
                    self.handle_record_text(&text);
                }
            }
            Channel::Terminal => {
                if let Some(text) = self.terminal_framer.push(bytes) {
                    self.handle_record_text(&text);
                }
            }
            Channel::Stderr => {
                for text in self.stderr_framer.push(bytes) {
                    log::debug!("GDB_ERR: {}", text);
                    self.emit(GdbEvent::ErrorMessage { text });
                }
            }
        }
    }

    fn handle_record_text(&mut self, text: &str) {
        log::debug!("RECV: {:?}", text);
        let (outputs, error) = parser::parse_output_records(text);
        for output in outputs {
            let cao = self.queue.correlate(output);
            self.dispatch(&cao);
        }
        if let Some(e) = error {
            log::warn!(
                "Dropping GDB output from offset {}: {} (near {:?})",
                e.offset,
                e.message,
                e.near
            );
        }
        if let Err(e) = self.issue_ready() {
            log::error!("Failed to issue queued commands: {}", e);
        }
    }

    fn dispatch(&mut self, cao: &CommandAndOutput) {
        let mut ctx = HandlerContext::new(&mut self.state);
        self.dispatcher.dispatch(cao, &mut ctx);
        for event in ctx.into_events() {
            self.emit(event);
        }
    }

    fn emit(&self, event: GdbEvent) {
        if self.event_sender.send(event).is_err() {
            log::debug!("Event receiver dropped");
        }
    }

    /// Apply one event from a reader task
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Data { channel, bytes } => self.feed(channel, &bytes),
            ChannelEvent::Closed(channel) => self.channel_closed(channel),
        }
    }

    /// Handle the end of one of GDB's channels. Losing stdout means GDB
    /// is gone.
    pub fn channel_closed(&mut self, channel: Channel) {
        log::debug!("GDB {} closed", channel);
        match channel {
            Channel::Stderr => {
                if let Some(text) = self.stderr_framer.flush() {
                    self.emit(GdbEvent::ErrorMessage { text });
                }
            }
            Channel::Terminal => {
                if self.terminal_framer.buffered() > 0 {
                    let text = self.terminal_framer.take();
                    self.handle_record_text(&text);
                }
            }
            Channel::Stdout => {
                if self.stdout_framer.buffered() > 0 {
                    let text = self.stdout_framer.take();
                    self.handle_record_text(&text);
                }
                self.engine_died();
            }
        }
    }

    fn engine_died(&mut self) {
        if self.dead {
            return;
        }
        self.dead = true;
        log::error!("GDB output closed, engine died");
        self.emit(GdbEvent::EngineDied);
        if let Some(event) = self.state.on_exit() {
            self.emit(event);
        }
        self.sink = None;
        self.queue.clear();
        if let Some(mut process) = self.process.take() {
            match process.try_reap() {
                Ok(Some(code)) => {
                    log::debug!("GDB exited with code {}", code);
                    return;
                }
                Ok(None) => {}
                Err(e) => log::debug!("GDB reap: {}", e),
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = process.kill().await {
                            log::error!("Failed to reap GDB: {}", e);
                        }
                    });
                }
                // No runtime to wait on; kill_on_drop takes it down
                Err(_) => process.start_kill(),
            }
        }
    }

    /// Process up to `max` chunks already delivered by the reader tasks
    /// without waiting. Returns how many were processed.
    pub fn pump(&mut self, max: usize) -> usize {
        let mut processed = 0;
        while processed < max {
            match self.channel_receiver.try_recv() {
                Ok(event) => {
                    self.handle_channel_event(event);
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        processed
    }

    /// Wait for the next chunk and process it. Returns false once GDB is
    /// gone.
    pub async fn process_next(&mut self) -> bool {
        if self.dead {
            return false;
        }
        match self.channel_receiver.recv().await {
            Some(event) => {
                self.handle_channel_event(event);
                true
            }
            None => false,
        }
    }

    /// Process GDB output until its stdout closes
    pub async fn run_until_closed(&mut self) {
        while self.process_next().await {}
    }

    /// Kill GDB and stop the reader tasks
    pub async fn shutdown(&mut self) -> Result<()> {
        self.sink = None;
        self.dead = true;
        self.queue.clear();
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if let Some(mut process) = self.process.take() {
            log::debug!("Stopping GDB PID: {:?}", process.id());
            process.kill().await?;
        }
        Ok(())
    }

    /// Load an executable and, when given, its arguments. Both commands
    /// carry the returned cookie.
    pub fn load_program(&mut self, path: &str, args: &[String]) -> Result<String> {
        let cookie = self.issue(Command::load_program(path))?;
        if !args.is_empty() {
            self.queue_command(Command::set_args(args).with_cookie(cookie.as_str()))?;
        }
        Ok(cookie)
    }

    pub fn set_args(&mut self, args: &[String]) -> Result<String> {
        self.issue(Command::set_args(args))
    }

    /// Attach to a running process by PID
    pub fn attach_to_process(&mut self, pid: u32) -> Result<String> {
        self.issue(Command::attach_to_process(pid))
    }

    pub fn enable_pending_breakpoints(&mut self) -> Result<String> {
        self.issue(Command::enable_pending_breakpoints())
    }

    /// Set a breakpoint at `path:line`
    pub fn set_breakpoint(
        &mut self,
        path: &str,
        line: u32,
        condition: Option<&str>,
        ignore_count: u32,
    ) -> Result<String> {
        self.issue(Command::set_breakpoint(path, line, condition, ignore_count))
    }

    pub fn set_breakpoint_at_function(&mut self, function: &str) -> Result<String> {
        self.issue(Command::set_breakpoint_at_function(function))
    }

    /// Set a breakpoint with the CLI `break` command, which may prompt
    /// with an overloads menu
    pub fn set_legacy_breakpoint(&mut self, path: &str, line: u32) -> Result<String> {
        self.issue(Command::set_legacy_breakpoint(path, line))
    }

    /// Remove a breakpoint by number
    pub fn delete_breakpoint(&mut self, number: u32) -> Result<String> {
        self.issue(Command::delete_breakpoint(number))
    }

    pub fn list_breakpoints(&mut self) -> Result<String> {
        self.issue(Command::list_breakpoints())
    }

    /// Execute the target program
    pub fn run(&mut self) -> Result<String> {
        self.issue(Command::run())
    }

    pub fn continue_execution(&mut self) -> Result<String> {
        self.issue(Command::continue_execution())
    }

    pub fn step_into(&mut self) -> Result<String> {
        self.issue(Command::step_into())
    }

    pub fn step_over(&mut self) -> Result<String> {
        self.issue(Command::step_over())
    }

    /// Step out of current function
    pub fn step_out(&mut self) -> Result<String> {
        self.issue(Command::step_out())
    }

    pub fn run_to(&mut self, path: &str, line: u32) -> Result<String> {
        self.issue(Command::run_to(path, line))
    }

    /// Get stack frames, optionally limited to a level range
    pub fn list_frames(&mut self, range: Option<(u32, u32)>) -> Result<String> {
        self.issue(Command::list_frames(range))
    }

    pub fn list_frames_arguments(&mut self, range: Option<(u32, u32)>) -> Result<String> {
        self.issue(Command::list_frames_arguments(range))
    }

    pub fn list_local_variables(&mut self) -> Result<String> {
        self.issue(Command::list_local_variables())
    }

    pub fn evaluate_expression(&mut self, expression: &str) -> Result<String> {
        self.issue(Command::evaluate_expression(expression))
    }

    pub fn list_threads(&mut self) -> Result<String> {
        self.issue(Command::list_threads())
    }

    pub fn select_thread(&mut self, thread_id: u32) -> Result<String> {
        self.issue(Command::select_thread(thread_id))
    }

    pub fn list_files(&mut self) -> Result<String> {
        self.issue(Command::list_files())
    }

    /// Get register names
    pub fn list_register_names(&mut self) -> Result<String> {
        self.issue(Command::list_register_names())
    }

    pub fn list_changed_registers(&mut self) -> Result<String> {
        self.issue(Command::list_changed_registers())
    }

    /// Get register values
    pub fn list_register_values(&mut self) -> Result<String> {
        self.issue(Command::list_register_values())
    }

    /// Read `count` bytes of memory at `address`
    pub fn read_memory(&mut self, address: u64, count: usize) -> Result<String> {
        self.issue(Command::read_memory(address, count))
    }

    /// Ask GDB to exit
    pub fn exit_engine(&mut self) -> Result<String> {
        self.issue(Command::exit_engine())
    }

    /// Answer an overloads menu with the chosen entry indexes. An empty
    /// choice cancels. The answer bypasses the queue since the command
    /// that raised the menu is still in flight.
    pub fn choose_function_overloads(&mut self, choices: &[usize]) -> Result<()> {
        let answer = if choices.is_empty() {
            "0".to_string()
        } else {
            choices
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        };
        let sink = self.sink.as_mut().ok_or(ChannelError::NotAttached)?;
        sink.write_line(&answer)?;
        Ok(())
    }

    /// Interrupt execution (break)
    pub fn interrupt(&self) -> Result<()> {
        let process = self.process.as_ref().ok_or(GdbError::NotLaunched)?;
        process.interrupt()?;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    pub fn breakpoints(&self) -> &BreakpointCache {
        self.queue.breakpoints()
    }

    /// Number of commands written to GDB and not yet answered
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// Check if GDB is running
    pub fn is_running(&self) -> bool {
        self.process.is_some() && !self.dead
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Get the next event from GDB (non-blocking)
    pub fn try_recv_event(&self) -> Option<GdbEvent> {
        self.event_receiver.lock().ok()?.try_recv().ok()
    }

    /// Get a reference to the event receiver
    pub fn get_event_receiver(&self) -> Arc<Mutex<mpsc::UnboundedReceiver<GdbEvent>>> {
        self.event_receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<String>>>);

    impl CommandSink for SharedSink {
        fn write_line(&mut self, line: &str) -> communication::Result<()> {
            self.0.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    fn engine_with_sink() -> (GdbEngine, SharedSink) {
        let mut engine = GdbEngine::new(LaunchConfig::default(), Arc::new(SequenceCounter::new()));
        let sink = SharedSink::default();
        engine.attach_sink(Box::new(sink.clone())).unwrap();
        (engine, sink)
    }

    fn drain(engine: &GdbEngine) -> Vec<GdbEvent> {
        std::iter::from_fn(|| engine.try_recv_event()).collect()
    }

    #[test]
    fn test_cookies_come_from_shared_counter() {
        let counter = Arc::new(SequenceCounter::new());
        let mut first = GdbEngine::new(LaunchConfig::default(), counter.clone());
        let mut second = GdbEngine::new(LaunchConfig::default(), counter);
        assert_eq!(first.run().unwrap(), "cookie-1");
        assert_eq!(second.run().unwrap(), "cookie-2");
        assert_eq!(first.step_over().unwrap(), "cookie-3");
    }

    #[test]
    fn test_commands_wait_for_answers() {
        let (mut engine, sink) = engine_with_sink();
        engine.list_breakpoints().unwrap();
        engine.list_threads().unwrap();
        assert_eq!(*sink.0.lock().unwrap(), vec!["-break-list"]);

        engine.feed(Channel::Stdout, b"^done,BreakpointTable={nr_rows=\"0\",nr_cols=\"6\",hdr=[],body=[]}\n(gdb) \n");
        assert_eq!(*sink.0.lock().unwrap(), vec!["-break-list", "-thread-list-ids"]);
        assert_eq!(engine.state(), SessionState::Ready);
    }

    #[test]
    fn test_stderr_lines_become_error_messages() {
        let (mut engine, _sink) = engine_with_sink();
        engine.feed(Channel::Stderr, b"warning: no debugging symbols\npart");
        engine.channel_closed(Channel::Stderr);
        assert_eq!(
            drain(&engine),
            vec![
                GdbEvent::ErrorMessage {
                    text: "warning: no debugging symbols".into()
                },
                GdbEvent::ErrorMessage { text: "part".into() },
            ]
        );
    }

    #[test]
    fn test_malformed_output_is_dropped() {
        let (mut engine, _sink) = engine_with_sink();
        engine.run().unwrap();
        engine.feed(Channel::Stdout, b"^bogus\n(gdb) \n");
        assert!(drain(&engine).is_empty());
        assert_eq!(engine.in_flight(), 1);

        engine.feed(Channel::Stdout, b"^running\n(gdb) \n");
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn test_stdout_hang_up_kills_session() {
        let (mut engine, _sink) = engine_with_sink();
        engine.list_files().unwrap();
        engine.feed(Channel::Stdout, b"^done,files=[]\n(gdb) \n");
        drain(&engine);

        engine.channel_closed(Channel::Stdout);
        assert_eq!(
            drain(&engine),
            vec![
                GdbEvent::EngineDied,
                GdbEvent::StateChanged {
                    from: SessionState::Ready,
                    to: SessionState::ProgramExited
                },
            ]
        );
        assert!(matches!(
            engine.run(),
            Err(GdbError::Channel(ChannelError::Closed))
        ));
    }

    #[test]
    fn test_overloads_choice_answered_directly() {
        let (mut engine, sink) = engine_with_sink();
        let cookie = engine.set_legacy_breakpoint("a.cc", 3).unwrap();
        engine.feed(Channel::Terminal, b"[0] cancel\n[1] all\n[2] f(int) at a.cc:3\n[3] f(double) at a.cc:7\n> ");
        let events = drain(&engine);
        match &events[..] {
            [GdbEvent::OverloadsChoice { entries, cookie: c }] => {
                assert_eq!(entries.len(), 4);
                assert_eq!(c.as_deref(), Some(cookie.as_str()));
            }
            other => panic!("Expected OverloadsChoice, got {:?}", other),
        }
        assert_eq!(engine.in_flight(), 1);

        engine.choose_function_overloads(&[2, 3]).unwrap();
        engine.choose_function_overloads(&[]).unwrap();
        assert_eq!(*sink.0.lock().unwrap(), vec!["break a.cc:3", "2 3", "0"]);
    }

    #[test]
    fn test_load_program_shares_cookie() {
        let (mut engine, sink) = engine_with_sink();
        let cookie = engine.load_program("/tmp/prog", &["-v".to_string()]).unwrap();
        engine.feed(Channel::Stdout, b"^done\n(gdb) \n");
        engine.feed(Channel::Stdout, b"^done\n(gdb) \n");
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec!["-file-exec-and-symbols \"/tmp/prog\"", "set args -v"]
        );
        let cookies: Vec<_> = drain(&engine)
            .into_iter()
            .filter_map(|e| match e {
                GdbEvent::CommandDone { cookie, .. } => cookie,
                _ => None,
            })
            .collect();
        assert_eq!(cookies, vec![cookie.clone(), cookie]);
    }

    #[tokio::test]
    async fn test_exited_debugger_is_reaped() {
        // `true` ignores its arguments and exits at once
        let config = LaunchConfig {
            gdb_path: "true".into(),
            use_pty: false,
            init_commands: Vec::new(),
            ..Default::default()
        };
        let mut engine = GdbEngine::new(config, Arc::new(SequenceCounter::new()));
        engine.launch().await.unwrap();
        engine.run_until_closed().await;

        assert!(engine.process.is_none());
        assert!(!engine.is_running());
        assert!(drain(&engine).contains(&GdbEvent::EngineDied));
        engine.shutdown().await.unwrap();
    }

    #[test]
    fn test_interrupt_requires_launch() {
        let engine = GdbEngine::new(LaunchConfig::default(), Arc::new(SequenceCounter::new()));
        assert!(matches!(engine.interrupt(), Err(GdbError::NotLaunched)));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_pump_processes_delivered_chunks() {
        let (mut engine, _sink) = engine_with_sink();
        let sender = engine.channel_sender.clone();
        sender
            .send(ChannelEvent::Data {
                channel: Channel::Stdout,
                bytes: b"~\"hi\"\n(gd".to_vec(),
            })
            .unwrap();
        sender
            .send(ChannelEvent::Data {
                channel: Channel::Stdout,
                bytes: b"b) \n".to_vec(),
            })
            .unwrap();
        assert_eq!(engine.pump(1), 1);
        assert!(engine.try_recv_event().is_none());
        assert_eq!(engine.pump(10), 1);
        assert_eq!(
            engine.try_recv_event(),
            Some(GdbEvent::ConsoleMessage { text: "hi".into() })
        );
    }
}

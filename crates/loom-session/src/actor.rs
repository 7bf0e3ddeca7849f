use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use loom_llm::{LlmProvider, StreamEvent, ToolDefinition};
use loom_store::{Message, Store, ToolCallRecord, DEFAULT_TITLE};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::agent_loop::{
    build_raw_messages, message_to_json, parse_tool_arguments, ToolCallAssembler, DEFAULT_SYSTEM_PROMPT,
};
use crate::event::Event;
use crate::tools::Tool;

pub type SubscriberId = u64;

/// Read-only view of a chat handed back by `SessionHandle::get_state`.
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub messages: Vec<Message>,
}

enum Command {
    SendMessage {
        content: String,
        /// Attached atomically with the turn it starts, so it sees exactly
        /// that turn's events (no tail of a prior in-flight turn) and is
        /// detached again once that turn's `Done` is sent.
        reply_subscriber: Option<mpsc::Sender<Event>>,
    },
    Subscribe {
        subscriber: mpsc::Sender<Event>,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unsubscribe { id: SubscriberId },
    AddFileContext { filename: String },
    GetState { reply: oneshot::Sender<ChatSnapshot> },
    GetWorkDir { reply: oneshot::Sender<PathBuf> },
    TurnUpdate(TurnUpdate),
}

enum TurnUpdate {
    Text(String),
    ToolCallReady {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResultReady {
        id: String,
        output: serde_json::Value,
    },
    StepComplete {
        assistant: Message,
        tool_messages: Vec<Message>,
    },
    Finished { content: String },
    MaxSteps,
    Failed { message: String },
}

/// Cheaply-cloneable handle to a live session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Fire-and-forget send; events are only observable via `subscribe`.
    pub async fn send_message(&self, content: String) {
        let _ = self
            .tx
            .send(Command::SendMessage {
                content,
                reply_subscriber: None,
            })
            .await;
    }

    /// Send a message and return a receiver scoped to exactly the turn it
    /// starts — the channel is detached right after that turn's `Done`.
    pub async fn send_message_streamed(&self, content: String) -> Option<mpsc::Receiver<Event>> {
        let (tx, rx) = mpsc::channel(256);
        self.tx
            .send(Command::SendMessage {
                content,
                reply_subscriber: Some(tx),
            })
            .await
            .ok()?;
        Some(rx)
    }

    /// Attach `subscriber` and return its id (used for later unsubscribe).
    pub async fn subscribe(&self, subscriber: mpsc::Sender<Event>) -> Option<SubscriberId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe {
                subscriber,
                reply: reply_tx,
            })
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.tx.send(Command::Unsubscribe { id }).await;
    }

    pub async fn add_file_context(&self, filename: String) {
        let _ = self.tx.send(Command::AddFileContext { filename }).await;
    }

    pub async fn get_state(&self) -> Option<ChatSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::GetState { reply: reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }

    /// True once the actor's mailbox has shut down (idle timeout or crash).
    /// The registry uses this to evict stale handles instead of auto-restarting.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn get_work_dir(&self) -> Option<PathBuf> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::GetWorkDir { reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok()
    }
}

/// Everything a freshly-spawned session actor needs.
pub struct SessionConfig {
    pub id: String,
    pub store: Arc<Store>,
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<Vec<Box<dyn Tool>>>,
    pub work_dir: PathBuf,
    pub idle_timeout: Duration,
    pub max_steps: usize,
}

/// Spawn a session actor for an already-persisted chat and return a handle.
pub fn spawn(config: SessionConfig, initial: ChatSnapshot) -> SessionHandle {
    let (tx, rx) = mpsc::channel(256);
    let actor = SessionActor {
        id: config.id,
        title: initial.title,
        created_at: initial.created_at,
        messages: initial.messages,
        store: config.store,
        llm: config.llm,
        tools: config.tools,
        work_dir: config.work_dir,
        idle_timeout: config.idle_timeout,
        max_steps: config.max_steps,
        subscribers: Vec::new(),
        next_subscriber_id: 0,
        stream_buffer: Vec::new(),
        streaming: false,
        pending_sends: VecDeque::new(),
        turn_scoped: Vec::new(),
        self_tx: tx.clone(),
    };
    tokio::spawn(actor.run(rx));
    SessionHandle { tx }
}

struct SessionActor {
    id: String,
    title: String,
    created_at: String,
    messages: Vec<Message>,
    store: Arc<Store>,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<Vec<Box<dyn Tool>>>,
    work_dir: PathBuf,
    idle_timeout: Duration,
    max_steps: usize,
    subscribers: Vec<(SubscriberId, mpsc::Sender<Event>)>,
    next_subscriber_id: SubscriberId,
    stream_buffer: Vec<Event>,
    streaming: bool,
    pending_sends: VecDeque<(String, Option<mpsc::Sender<Event>>)>,
    /// Subscribers attached for exactly one turn via `send_message_streamed`,
    /// removed from `subscribers` once that turn's `Done` has been sent.
    turn_scoped: Vec<SubscriberId>,
    self_tx: mpsc::Sender<Command>,
}

impl SessionActor {
    #[instrument(skip_all, fields(chat_id = %self.id))]
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                cmd = inbox.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = tokio::time::sleep(self.idle_timeout) => {
                    if !self.streaming && self.pending_sends.is_empty() {
                        info!("session idle, shutting down");
                        break;
                    }
                }
            }
        }
        let _ = std::fs::remove_dir_all(&self.work_dir);
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::SendMessage {
                content,
                reply_subscriber,
            } => self.on_send_message(content, reply_subscriber).await,
            Command::Subscribe { subscriber, reply } => {
                let id = self.next_subscriber_id;
                self.next_subscriber_id += 1;
                if self.streaming {
                    for event in &self.stream_buffer {
                        let _ = subscriber.send(event.clone()).await;
                    }
                }
                self.subscribers.push((id, subscriber));
                let _ = reply.send(id);
            }
            Command::Unsubscribe { id } => {
                self.subscribers.retain(|(sid, _)| *sid != id);
            }
            Command::AddFileContext { filename } => {
                let text = format!(
                    "[File uploaded to working directory: {filename}] - You can use commands \
                     like `cat`, `head`, or `ls` to inspect it."
                );
                self.messages.push(Message::user(text));
                let _ = self.store.save_messages(&self.id, &self.messages);
            }
            Command::GetState { reply } => {
                let _ = reply.send(ChatSnapshot {
                    id: self.id.clone(),
                    title: self.title.clone(),
                    created_at: self.created_at.clone(),
                    messages: self.messages.clone(),
                });
            }
            Command::GetWorkDir { reply } => {
                let _ = reply.send(self.work_dir.clone());
            }
            Command::TurnUpdate(update) => self.on_turn_update(update).await,
        }
    }

    async fn on_send_message(&mut self, content: String, reply_subscriber: Option<mpsc::Sender<Event>>) {
        if self.streaming {
            self.pending_sends.push_back((content, reply_subscriber));
            return;
        }
        self.start_turn(content, reply_subscriber).await;
    }

    async fn start_turn(&mut self, content: String, reply_subscriber: Option<mpsc::Sender<Event>>) {
        if self.title == DEFAULT_TITLE && self.messages.is_empty() {
            self.title = content.chars().take(50).collect();
            let _ = self.store.update_title(&self.id, &self.title);
        }

        self.messages.push(Message::user(content.clone()));
        let _ = self.store.save_messages(&self.id, &self.messages);

        self.streaming = true;
        self.stream_buffer.clear();

        if let Some(sender) = reply_subscriber {
            let id = self.next_subscriber_id;
            self.next_subscriber_id += 1;
            self.subscribers.push((id, sender));
            self.turn_scoped.push(id);
        }

        self.emit(Event::UserMessage { content }).await;

        let history = self.messages.clone();
        tokio::spawn(run_turn(
            self.llm.clone(),
            self.tools.clone(),
            self.work_dir.clone(),
            history,
            self.max_steps,
            self.self_tx.clone(),
        ));
    }

    async fn on_turn_update(&mut self, update: TurnUpdate) {
        match update {
            TurnUpdate::Text(text) => {
                self.emit(Event::TextDelta { text }).await;
            }
            TurnUpdate::ToolCallReady { id, name, input } => {
                self.emit(Event::ToolCall {
                    tool_call_id: id,
                    tool_name: name,
                    input,
                })
                .await;
            }
            TurnUpdate::ToolResultReady { id, output } => {
                self.emit(Event::ToolResult {
                    tool_call_id: id,
                    output,
                })
                .await;
            }
            TurnUpdate::StepComplete {
                assistant,
                tool_messages,
            } => {
                self.messages.push(assistant);
                self.messages.extend(tool_messages);
                let _ = self.store.save_messages(&self.id, &self.messages);
            }
            TurnUpdate::Finished { content } => {
                self.messages.push(Message::assistant(content, Vec::new()));
                let _ = self.store.save_messages(&self.id, &self.messages);
                self.end_turn().await;
            }
            TurnUpdate::MaxSteps => {
                self.emit(Event::Error {
                    message: "Max steps reached".to_string(),
                })
                .await;
                self.end_turn().await;
            }
            TurnUpdate::Failed { message } => {
                warn!(chat_id = %self.id, error = %message, "turn failed");
                self.emit(Event::Error { message }).await;
                self.end_turn().await;
            }
        }
    }

    async fn end_turn(&mut self) {
        self.emit(Event::Done).await;
        self.streaming = false;
        if !self.turn_scoped.is_empty() {
            let scoped = std::mem::take(&mut self.turn_scoped);
            self.subscribers.retain(|(id, _)| !scoped.contains(id));
        }
        if let Some((content, reply_subscriber)) = self.pending_sends.pop_front() {
            self.start_turn(content, reply_subscriber).await;
        }
    }

    async fn emit(&mut self, event: Event) {
        self.stream_buffer.push(event.clone());
        let mut dead = Vec::new();
        for (id, sender) in &self.subscribers {
            if sender.send(event.clone()).await.is_err() {
                dead.push(*id);
            }
        }
        if !dead.is_empty() {
            self.subscribers.retain(|(id, _)| !dead.contains(id));
        }
    }
}

/// Drive one bounded agent turn: repeatedly call the LLM, assemble any tool
/// calls from its stream, execute them, and feed results back — until the
/// model stops requesting tools or the step cap is hit.
async fn run_turn(
    llm: Arc<dyn LlmProvider>,
    tools: Arc<Vec<Box<dyn Tool>>>,
    work_dir: PathBuf,
    initial_history: Vec<Message>,
    max_steps: usize,
    self_tx: mpsc::Sender<Command>,
) {
    let tool_defs: Vec<ToolDefinition> = tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.input_schema(),
        })
        .collect();

    let mut raw_messages = build_raw_messages(DEFAULT_SYSTEM_PROMPT, &initial_history);

    for _ in 0..max_steps {
        let (tx, mut rx) = mpsc::channel(128);
        let llm2 = llm.clone();
        let msgs = raw_messages.clone();
        let defs = tool_defs.clone();
        let stream_handle = tokio::spawn(async move { llm2.stream_completion(&msgs, &defs, tx).await });

        let mut text = String::new();
        let mut assembler = ToolCallAssembler::new();
        let mut failure: Option<String> = None;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text: delta } => {
                    text.push_str(&delta);
                    if send_update(&self_tx, TurnUpdate::Text(delta)).await.is_err() {
                        return;
                    }
                }
                StreamEvent::ToolCallStart { index, id, name, arguments } => {
                    assembler.start(index, id, name, arguments);
                }
                StreamEvent::ToolCallDelta { index, delta } => assembler.delta(index, &delta),
                StreamEvent::Done => break,
                StreamEvent::Error { message } => {
                    failure = Some(message);
                    break;
                }
            }
        }

        match stream_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failure.get_or_insert(e.to_string());
            }
            Err(e) => {
                failure.get_or_insert(e.to_string());
            }
        }

        if let Some(message) = failure {
            let _ = send_update(&self_tx, TurnUpdate::Failed { message }).await;
            return;
        }

        let calls: Vec<ToolCallRecord> = assembler.finish();
        if calls.is_empty() {
            let _ = send_update(&self_tx, TurnUpdate::Finished { content: text }).await;
            return;
        }

        let mut tool_messages = Vec::with_capacity(calls.len());
        for call in &calls {
            let input = parse_tool_arguments(&call.arguments);
            if send_update(
                &self_tx,
                TurnUpdate::ToolCallReady {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: input.clone(),
                },
            )
            .await
            .is_err()
            {
                return;
            }

            let tool = tools.iter().find(|t| t.name() == call.name);
            let output = match tool {
                Some(t) => {
                    debug!(tool = %call.name, "executing tool");
                    t.execute(&input, &work_dir).await.content
                }
                None => serde_json::json!({
                    "success": false,
                    "error": format!("unknown tool: {}", call.name),
                }),
            };

            if send_update(
                &self_tx,
                TurnUpdate::ToolResultReady {
                    id: call.id.clone(),
                    output: output.clone(),
                },
            )
            .await
            .is_err()
            {
                return;
            }

            tool_messages.push(Message::tool(call.id.clone(), output.to_string()));
        }

        let assistant = Message::assistant(text, calls);
        raw_messages.push(message_to_json(&assistant));
        for tm in &tool_messages {
            raw_messages.push(message_to_json(tm));
        }

        if send_update(
            &self_tx,
            TurnUpdate::StepComplete {
                assistant,
                tool_messages,
            },
        )
        .await
        .is_err()
        {
            return;
        }
    }

    let _ = send_update(&self_tx, TurnUpdate::MaxSteps).await;
}

async fn send_update(tx: &mpsc::Sender<Command>, update: TurnUpdate) -> Result<(), ()> {
    tx.send(Command::TurnUpdate(update)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use loom_store::Store;
    use tokio::time::timeout;

    /// Scripted `LlmProvider` that replays one canned event sequence per
    /// call, in order. Panics if called more times than scripted.
    struct MockLlmProvider {
        turns: StdMutex<VecDeque<Vec<StreamEvent>>>,
    }

    impl MockLlmProvider {
        fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                turns: StdMutex::new(turns.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn stream_completion(
            &self,
            _messages: &[serde_json::Value],
            _tools: &[ToolDefinition],
            tx: mpsc::Sender<StreamEvent>,
        ) -> loom_llm::Result<()> {
            let events = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .expect("mock provider called more times than scripted");
            for event in events {
                let _ = tx.send(event).await;
            }
            Ok(())
        }
    }

    /// Tool that always returns a fixed result, recording how it was invoked.
    struct EchoTool {
        calls: StdMutex<Vec<serde_json::Value>>,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input back"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, input: &serde_json::Value, _work_dir: &std::path::Path) -> crate::tools::ToolResult {
            self.calls.lock().unwrap().push(input.clone());
            crate::tools::ToolResult {
                content: serde_json::json!({"success": true, "echoed": input}),
                is_error: false,
            }
        }
    }

    fn test_config(llm: Arc<dyn LlmProvider>, tools: Vec<Box<dyn Tool>>, store: Arc<Store>, work_dir: PathBuf) -> SessionConfig {
        SessionConfig {
            id: "chat1".into(),
            store,
            llm,
            tools: Arc::new(tools),
            work_dir,
            idle_timeout: Duration::from_secs(30),
            max_steps: 4,
        }
    }

    fn snapshot() -> ChatSnapshot {
        ChatSnapshot {
            id: "chat1".into(),
            title: DEFAULT_TITLE.to_string(),
            created_at: "2026-01-01T00:00:00Z".into(),
            messages: Vec::new(),
        }
    }

    async fn drain_until_done(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("channel closed before Done");
            let done = matches!(event, Event::Done);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn text_only_turn_persists_assistant_message_and_emits_done() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create("chat1", DEFAULT_TITLE).unwrap();
        let work_dir = tempfile::tempdir().unwrap();

        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![vec![
            StreamEvent::TextDelta { text: "Hel".into() },
            StreamEvent::TextDelta { text: "lo.".into() },
            StreamEvent::Done,
        ]]));

        let config = test_config(llm, Vec::new(), store.clone(), work_dir.path().to_path_buf());
        let handle = spawn(config, snapshot());

        let mut rx = handle.send_message_streamed("hi there".into()).await.unwrap();
        let events = drain_until_done(&mut rx).await;

        assert!(matches!(events.first(), Some(Event::UserMessage { content }) if content == "hi there"));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                Event::TextDelta { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello.");
        assert!(matches!(events.last(), Some(Event::Done)));

        let chat = store.get("chat1").unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert!(matches!(&chat.messages[1], Message::Assistant { content, .. } if content == "Hello."));
    }

    #[tokio::test]
    async fn tool_calling_turn_executes_tool_and_continues_to_final_answer() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create("chat1", DEFAULT_TITLE).unwrap();
        let work_dir = tempfile::tempdir().unwrap();

        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![
            vec![
                StreamEvent::ToolCallStart {
                    index: 0,
                    id: "call1".into(),
                    name: "echo".into(),
                    arguments: "{\"msg\":".into(),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    delta: "\"hi\"}".into(),
                },
                StreamEvent::Done,
            ],
            vec![
                StreamEvent::TextDelta {
                    text: "done".into(),
                },
                StreamEvent::Done,
            ],
        ]));

        let tools: Vec<Box<dyn Tool>> = vec![Box::new(EchoTool::new())];
        let config = test_config(llm, tools, store.clone(), work_dir.path().to_path_buf());
        let handle = spawn(config, snapshot());

        let mut rx = handle.send_message_streamed("use the tool".into()).await.unwrap();
        let events = drain_until_done(&mut rx).await;

        let tool_call = events.iter().find(|e| matches!(e, Event::ToolCall { .. }));
        assert!(matches!(tool_call, Some(Event::ToolCall { tool_name, .. }) if tool_name == "echo"));
        let tool_result = events.iter().find(|e| matches!(e, Event::ToolResult { .. }));
        assert!(tool_result.is_some());

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                Event::TextDelta { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "done");

        let chat = store.get("chat1").unwrap();
        // user, assistant(tool_call), tool, assistant(final)
        assert_eq!(chat.messages.len(), 4);
        assert!(matches!(&chat.messages[2], Message::Tool { .. }));
    }

    #[tokio::test]
    async fn max_steps_reached_emits_error_and_ends_turn() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create("chat1", DEFAULT_TITLE).unwrap();
        let work_dir = tempfile::tempdir().unwrap();

        let looping_call = || {
            vec![
                StreamEvent::ToolCallStart {
                    index: 0,
                    id: "call1".into(),
                    name: "echo".into(),
                    arguments: "{}".into(),
                },
                StreamEvent::Done,
            ]
        };
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(vec![
            looping_call(),
            looping_call(),
            looping_call(),
            looping_call(),
        ]));

        let tools: Vec<Box<dyn Tool>> = vec![Box::new(EchoTool::new())];
        let mut config = test_config(llm, tools, store.clone(), work_dir.path().to_path_buf());
        config.max_steps = 4;
        let handle = spawn(config, snapshot());

        let mut rx = handle.send_message_streamed("loop".into()).await.unwrap();
        let events = drain_until_done(&mut rx).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Error { message } if message == "Max steps reached")));
    }
}


//! The conversation session.
//!
//! A [`Session`] ties a [`Transport`] to a [`ConversationState`]: it decides
//! where each prompt attaches, streams the answer back and moves the cursor
//! once the answer has been read to the end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{Authenticator, Config, SessionConfig};
use crate::error::{Error, Result};
use crate::logger::{SessionLogger, TracingLogger, instrument, instrument_sync};
use crate::observability::{STATE_LOOKUPS, STREAM_CANCELLED, STREAM_DURATION, STREAM_EVENTS};
use crate::state::{ConversationState, Resolution};
use crate::stream::parse_events;
use crate::transport::{HttpTransport, LineStream, RawResponse, StreamResponse, Transport};
use crate::types::{
    ConversationHistory, ConversationId, ConversationList, ConversationListParams,
    ConversationRequest, ConversationSummary, MessageId, Model, StreamEvent, TitleRequest,
    TitleUpdate, VisibilityUpdate,
};

const ASK_STREAM: &str = "ask_stream";

/// Answer snapshots, in arrival order.
///
/// The stream borrows the session, so nothing else can run on it until the
/// stream is dropped.  Reading it to the end moves the cursor to the answer;
/// dropping it early leaves the cursor where it was.
pub type AnswerStream<'a> = BoxStream<'a, Result<StreamEvent>>;

/// Parameters for [`Session::ask`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AskRequest {
    /// The prompt text; must not be blank.
    pub prompt: String,
    /// Conversation to post in instead of the cursor's.
    pub conversation_id: Option<ConversationId>,
    /// Message to reply to instead of the cursor's.  Requires
    /// `conversation_id`.
    pub parent_id: Option<MessageId>,
    /// Limit on each network wait (the response head, then every line);
    /// defaults to the session's.
    pub timeout: Option<Duration>,
    /// Generate a title once the answer is complete.  Always done for new
    /// conversations.
    pub gen_title: bool,
}

impl AskRequest {
    /// Ask `prompt` at the session cursor.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Post in `conversation_id`.
    pub fn with_conversation(mut self, conversation_id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Reply to `parent_id`.
    pub fn with_parent(mut self, parent_id: impl Into<MessageId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Limit each network wait to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request a generated title.
    pub fn with_gen_title(mut self, gen_title: bool) -> Self {
        self.gen_title = gen_title;
        self
    }

    fn describe(&self) -> String {
        format!(
            "conversation_id={:?} parent_id={:?} gen_title={} prompt_len={}",
            self.conversation_id.as_ref().map(ConversationId::as_str),
            self.parent_id.as_ref().map(MessageId::as_str),
            self.gen_title,
            self.prompt.len(),
        )
    }
}

/// A conversation session against one account.
///
/// One operation runs at a time; the `&mut self` receivers enforce it.  Use
/// separate sessions for concurrent conversations.
pub struct Session<T = HttpTransport> {
    transport: T,
    config: SessionConfig,
    state: ConversationState,
    logger: Arc<dyn SessionLogger>,
}

impl Session<HttpTransport> {
    /// Build a session over HTTP from a loaded configuration.
    pub async fn from_config(
        config: &Config,
        authenticator: Option<&dyn Authenticator>,
    ) -> Result<Self> {
        let access_token = config.access_token(authenticator).await?;
        let transport =
            HttpTransport::new(&config.base_url(), &access_token, config.proxy.as_deref())?;
        Ok(Self::new(transport, config.session_config()))
    }
}

impl<T: Transport + 'static> Session<T> {
    /// Create a session that logs through `tracing`.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_logger(transport, config, Arc::new(TracingLogger))
    }

    /// Create a session reporting to `logger`.
    pub fn with_logger(
        transport: T,
        config: SessionConfig,
        logger: Arc<dyn SessionLogger>,
    ) -> Self {
        let state =
            ConversationState::with_cursor(config.conversation_id.clone(), config.parent_id.clone());
        Self {
            transport,
            config,
            state,
            logger,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Cursor, head mapping and rollback history.
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Send a prompt and stream the answer.
    ///
    /// The target conversation and parent are resolved first; a parent
    /// without a conversation fails with [`Error::InvalidRequest`] before any
    /// request is made, and a conversation whose head is unknown is looked up
    /// once.  The cursor is saved for [`rollback`](Self::rollback) before the
    /// request goes out.
    ///
    /// Each item of the returned stream is the whole answer so far.  When the
    /// stream ends without error the cursor moves to the answer and, for new
    /// conversations or when asked, a title is generated.  A failed title
    /// request is logged and otherwise ignored.
    pub async fn ask(&mut self, request: AskRequest) -> Result<AnswerStream<'_>> {
        let logger = Arc::clone(&self.logger);
        let detail = request.describe();
        let pending = instrument(logger.as_ref(), "ask", &detail, self.start_answer(request)).await?;
        Ok(self.answer(pending))
    }

    /// List conversations, most recent first.
    pub async fn get_conversations(
        &self,
        params: ConversationListParams,
    ) -> Result<Vec<ConversationSummary>> {
        instrument(
            self.logger.as_ref(),
            "get_conversations",
            &params.query(),
            self.fetch_conversations(params),
        )
        .await
    }

    /// Fetch the full message tree of a conversation.
    pub async fn get_msg_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationHistory> {
        instrument(
            self.logger.as_ref(),
            "get_msg_history",
            conversation_id.as_str(),
            self.fetch_history(conversation_id),
        )
        .await
    }

    /// Ask the service to title a conversation from one of its messages.
    ///
    /// Returns the title when the service reports one.
    pub async fn gen_title(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<Option<String>> {
        let detail = format!("conversation_id={conversation_id} message_id={message_id}");
        instrument(self.logger.as_ref(), "gen_title", &detail, async {
            let body = to_json(&TitleRequest {
                message_id: message_id.clone(),
                model: Model::title(),
            })?;
            let response = self
                .transport
                .post(&format!("api/conversation/gen_title/{conversation_id}"), body)
                .await?;
            let body = check(response)?;
            let title = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("title").and_then(Value::as_str).map(str::to_string));
            Ok(title)
        })
        .await
    }

    /// Rename a conversation.
    pub async fn change_title(&self, conversation_id: &ConversationId, title: &str) -> Result<()> {
        let detail = format!("conversation_id={conversation_id} title={title}");
        instrument(self.logger.as_ref(), "change_title", &detail, async {
            let body = to_json(&TitleUpdate {
                title: title.to_string(),
            })?;
            let response = self
                .transport
                .patch(&format!("api/conversation/{conversation_id}"), body)
                .await?;
            check(response).map(drop)
        })
        .await
    }

    /// Hide a conversation.  The cursor is cleared if it was in it.
    pub async fn delete_conversation(&mut self, conversation_id: &ConversationId) -> Result<()> {
        let logger = Arc::clone(&self.logger);
        instrument(
            logger.as_ref(),
            "delete_conversation",
            conversation_id.as_str(),
            async {
                let body = to_json(&VisibilityUpdate::hidden())?;
                let response = self
                    .transport
                    .patch(&format!("api/conversation/{conversation_id}"), body)
                    .await?;
                check(response)?;
                self.state.forget(conversation_id);
                Ok(())
            },
        )
        .await
    }

    /// Hide every conversation.  Local state is left alone.
    pub async fn clear_conversations(&self) -> Result<()> {
        instrument(self.logger.as_ref(), "clear_conversations", "", async {
            let body = to_json(&VisibilityUpdate::hidden())?;
            let response = self.transport.patch("api/conversations", body).await?;
            check(response).map(drop)
        })
        .await
    }

    /// Start over: the next prompt opens a new conversation.
    pub fn reset_chat(&mut self) -> Result<()> {
        let state = &mut self.state;
        instrument_sync(self.logger.as_ref(), "reset_chat", "", || {
            state.reset();
            Ok(())
        })
    }

    /// Move the cursor back `turns` asks.
    ///
    /// Fails with [`Error::InvalidRequest`], changing nothing, when fewer
    /// asks were recorded.
    pub fn rollback(&mut self, turns: usize) -> Result<()> {
        let state = &mut self.state;
        instrument_sync(
            self.logger.as_ref(),
            "rollback",
            &format!("turns={turns}"),
            || state.rollback(turns),
        )
    }

    /// Continue an existing conversation from its current head.
    pub async fn switch_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationHistory> {
        let logger = Arc::clone(&self.logger);
        instrument(
            logger.as_ref(),
            "switch_conversation",
            conversation_id.as_str(),
            async {
                let history = self.fetch_history(conversation_id).await?;
                self.state
                    .switch_to(conversation_id.clone(), history.current_node.clone());
                Ok(history)
            },
        )
        .await
    }

    async fn start_answer(&mut self, request: AskRequest) -> Result<PendingAnswer> {
        if request.prompt.trim().is_empty() {
            return Err(Error::invalid_request("prompt must not be empty"));
        }
        let target = match self
            .state
            .resolve(request.conversation_id, request.parent_id)?
        {
            Resolution::Ready(target) => target,
            Resolution::Lookup(conversation_id) => {
                self.map_conversations().await?;
                self.state.resolve_after_lookup(conversation_id)?
            }
        };
        let gen_title = request.gen_title || target.new_conversation;
        let body = to_json(&ConversationRequest::next(
            request.prompt,
            target.conversation_id,
            Some(target.parent_id),
            Model::for_tier(self.config.paid),
        ))?;
        let timeout = request.timeout.unwrap_or(self.config.ask_timeout);
        self.state.push_history();
        let response = self
            .transport
            .post_stream("api/conversation", body, timeout)
            .await?;
        let lines = check_stream(response).await?;
        Ok(PendingAnswer {
            events: parse_events(lines, Arc::clone(&self.logger)).boxed(),
            gen_title,
        })
    }

    fn answer(&mut self, pending: PendingAnswer) -> AnswerStream<'_> {
        let progress = Progress {
            session: self,
            events: pending.events,
            last: None,
            gen_title: pending.gen_title,
            started: Instant::now(),
            finished: false,
        };
        stream::unfold(Some(progress), |progress| async move {
            let mut progress = progress?;
            match progress.events.next().await {
                Some(Ok(event)) => {
                    STREAM_EVENTS.click();
                    progress.session.logger.stream_event(&event);
                    progress.last = Some(event.clone());
                    Some((Ok(event), Some(progress)))
                }
                Some(Err(err)) => {
                    progress.finish(Some(&err));
                    Some((Err(err), None))
                }
                None => {
                    progress.complete().await;
                    None
                }
            }
        })
        .boxed()
    }

    // Refresh the head mapping from the most recent conversations.
    async fn map_conversations(&mut self) -> Result<()> {
        STATE_LOOKUPS.click();
        let conversations = self
            .fetch_conversations(ConversationListParams::default())
            .await?;
        for conversation in conversations {
            let history = self.fetch_history(&conversation.id).await?;
            self.state.record_head(conversation.id, history.current_node);
        }
        Ok(())
    }

    async fn fetch_conversations(
        &self,
        params: ConversationListParams,
    ) -> Result<Vec<ConversationSummary>> {
        let response = self
            .transport
            .get(&format!("api/conversations?{}", params.query()))
            .await?;
        let list: ConversationList = decode(&check(response)?)?;
        Ok(list.items)
    }

    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<ConversationHistory> {
        let response = self
            .transport
            .get(&format!("api/conversation/{conversation_id}"))
            .await?;
        decode(&check(response)?)
    }
}

struct PendingAnswer {
    events: BoxStream<'static, Result<StreamEvent>>,
    gen_title: bool,
}

struct Progress<'a, T> {
    session: &'a mut Session<T>,
    events: BoxStream<'static, Result<StreamEvent>>,
    last: Option<StreamEvent>,
    gen_title: bool,
    started: Instant,
    finished: bool,
}

impl<T: Transport + 'static> Progress<'_, T> {
    async fn complete(mut self) {
        if let Some(last) = self.last.take() {
            self.session.state.commit(&last);
            if self.gen_title {
                // gen_title logs its own failure.
                let _ = self
                    .session
                    .gen_title(&last.conversation_id, &last.parent_id)
                    .await;
            }
        }
        self.finish(None);
    }
}

impl<T> Progress<'_, T> {
    fn finish(&mut self, error: Option<&Error>) {
        self.finished = true;
        let elapsed = self.started.elapsed();
        STREAM_DURATION.add(elapsed.as_secs_f64());
        self.session
            .logger
            .operation_finished(ASK_STREAM, elapsed, error);
    }
}

impl<T> Drop for Progress<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            let elapsed = self.started.elapsed();
            STREAM_DURATION.add(elapsed.as_secs_f64());
            STREAM_CANCELLED.click();
            self.session.logger.operation_cancelled(ASK_STREAM, elapsed);
        }
    }
}

fn check(response: RawResponse) -> Result<String> {
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(Error::upstream(response.status, response.body))
    }
}

async fn check_stream(response: StreamResponse) -> Result<LineStream> {
    if response.is_success() {
        return Ok(response.lines);
    }
    let StreamResponse { status, lines } = response;
    let body: Vec<String> = lines
        .filter_map(|line| async move { line.ok() })
        .collect()
        .await;
    Err(Error::upstream(status, body.join("\n")))
}

fn to_json<S: serde::Serialize>(body: &S) -> Result<Value> {
    Ok(serde_json::to_value(body)?)
}

fn decode<D: DeserializeOwned>(body: &str) -> Result<D> {
    serde_json::from_str(body).map_err(|e| {
        Error::serialization(
            format!("Failed to parse response: {e}"),
            Some(Box::new(e)),
        )
    })
}

use crate::completion::{generate_chat_title, CompletionModel, CompletionRequest};
use crate::embeddings::Embedder;
use crate::error::ChatError;
use crate::models::{
    Chat, ChatConversation, ChatState, ChatTranscript, RequestContext, RetrievedChunk, Sender,
    DEFAULT_CHAT_TITLE, HISTORY_TURNS, RECENT_CHATS,
};
use crate::prompt::{first_answer_prompt, follow_up_prompt};
use crate::retrieval::Retriever;
use crate::stores::{FirstTurn, SqliteStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub question: ChatConversation,
    /// `None` when the model gave no answer; the question stays unanswered.
    pub reply: Option<ChatConversation>,
    pub sources: Vec<RetrievedChunk>,
}

pub struct ChatOrchestrator {
    store: SqliteStore,
    retriever: Retriever,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn CompletionModel>,
}

impl ChatOrchestrator {
    pub fn new(
        store: SqliteStore,
        retriever: Retriever,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            store,
            retriever,
            embedder,
            model,
        }
    }

    /// Creates a fresh chat titled after `query` and stores the query as its
    /// opening message. No answer is generated here.
    pub async fn start_chat(&self, ctx: &RequestContext, query: &str) -> Result<Chat, ChatError> {
        let query = non_empty(query)?;
        self.ensure_member(ctx).await?;

        let title = match generate_chat_title(self.model.as_ref(), query).await {
            Some(title) => title,
            None => {
                debug!("title generation failed; using default title");
                DEFAULT_CHAT_TITLE.to_string()
            }
        };

        let chat = Chat {
            id: Uuid::new_v4(),
            team_id: ctx.team_id,
            user_id: ctx.user_id,
            title,
            is_conversation_active: false,
            created_at: Utc::now(),
        };
        self.store.insert_chat(&chat).await?;
        self.store.append_message(chat.id, Sender::User, query).await?;

        info!(chat_id = %chat.id, team_id = %ctx.team_id, title = %chat.title, "started chat");
        Ok(chat)
    }

    /// Answers a fresh chat's opening message and marks the chat active.
    ///
    /// The chat becomes active even when the model fails. An already active
    /// chat is left untouched and reported with `activated == false`.
    pub async fn ensure_first_answer(
        &self,
        ctx: &RequestContext,
        chat_id: Uuid,
    ) -> Result<FirstTurn, ChatError> {
        let chat = self.chat(ctx, chat_id).await?;
        if chat.state() == ChatState::Active {
            return Ok(FirstTurn {
                activated: false,
                reply: None,
            });
        }

        let opening = self
            .store
            .messages(chat.id)
            .await?
            .into_iter()
            .rev()
            .find(|message| message.sender == Sender::User);

        let reply = match &opening {
            Some(question) => {
                let sources = self.retrieve_context(ctx.team_id, &question.message).await?;
                let prompt = first_answer_prompt(&sources, &question.message);
                self.model.complete(&CompletionRequest::answer(prompt)).await
            }
            None => {
                warn!(chat_id = %chat.id, "fresh chat has no opening message");
                None
            }
        };

        if reply.is_none() {
            warn!(chat_id = %chat.id, "no first answer; activating chat without a reply");
        }

        let turn = self.store.complete_first_turn(chat.id, reply.as_deref()).await?;
        if turn.activated {
            info!(chat_id = %chat.id, answered = turn.reply.is_some(), "chat activated");
        } else {
            debug!(chat_id = %chat.id, "chat was activated concurrently; reply discarded");
        }
        Ok(turn)
    }

    /// Stores `query`, answers it with retrieved context and up to
    /// [`HISTORY_TURNS`] earlier messages, and stores the reply if any. A
    /// fresh chat gets its first answer before `query` is stored.
    pub async fn ask(
        &self,
        ctx: &RequestContext,
        chat_id: Uuid,
        query: &str,
    ) -> Result<ChatTurn, ChatError> {
        let query = non_empty(query)?;
        let chat = self.chat(ctx, chat_id).await?;
        if chat.state() == ChatState::Fresh {
            self.ensure_first_answer(ctx, chat.id).await?;
        }

        let question = self.store.append_message(chat.id, Sender::User, query).await?;
        let history = self
            .store
            .recent_messages(chat.id, HISTORY_TURNS, Some(question.id))
            .await?;

        let sources = self.retrieve_context(ctx.team_id, query).await?;
        let prompt = follow_up_prompt(&sources, query, &history);

        let reply = match self.model.complete(&CompletionRequest::answer(prompt)).await {
            Some(answer) => Some(self.store.append_message(chat.id, Sender::Bot, &answer).await?),
            None => {
                warn!(chat_id = %chat.id, "no answer from model; turn left unanswered");
                None
            }
        };

        Ok(ChatTurn {
            question,
            reply,
            sources,
        })
    }

    pub async fn transcript(
        &self,
        ctx: &RequestContext,
        chat_id: Uuid,
    ) -> Result<ChatTranscript, ChatError> {
        let chat = self.chat(ctx, chat_id).await?;
        let conversations = self.store.messages(chat.id).await?;
        let previous_chats = self
            .store
            .recent_chats(ctx.team_id, ctx.user_id, RECENT_CHATS)
            .await?;

        Ok(ChatTranscript {
            chat,
            conversations,
            previous_chats,
        })
    }

    pub async fn chats(&self, ctx: &RequestContext) -> Result<Vec<Chat>, ChatError> {
        self.ensure_member(ctx).await?;
        Ok(self
            .store
            .recent_chats(ctx.team_id, ctx.user_id, RECENT_CHATS)
            .await?)
    }

    async fn chat(&self, ctx: &RequestContext, chat_id: Uuid) -> Result<Chat, ChatError> {
        self.ensure_member(ctx).await?;
        self.store
            .chat(ctx.team_id, ctx.user_id, chat_id)
            .await?
            .ok_or(ChatError::ChatNotFound(chat_id))
    }

    async fn ensure_member(&self, ctx: &RequestContext) -> Result<(), ChatError> {
        match self.store.team_for_member(ctx.team_id, ctx.user_id).await? {
            Some(_) => Ok(()),
            None => Err(ChatError::TeamNotFound(ctx.team_id)),
        }
    }

    /// An absent query embedding yields an empty context rather than an error.
    async fn retrieve_context(
        &self,
        team_id: Uuid,
        query: &str,
    ) -> Result<Vec<RetrievedChunk>, ChatError> {
        let Some(query_vector) = self.embedder.embed(query).await else {
            warn!(team_id = %team_id, "query embedding unavailable; answering without context");
            return Ok(Vec::new());
        };

        Ok(self.retriever.retrieve(team_id, &query_vector).await?)
    }
}

fn non_empty(query: &str) -> Result<&str, ChatError> {
    let query = query.trim();
    if query.is_empty() {
        Err(ChatError::EmptyQuery)
    } else {
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::media::MediaStore;
    use crate::models::{Document, DocumentChunk, EMBEDDING_DIMENSIONS};
    use crate::traits::ChunkIndex;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use url::Url;

    struct ScriptedModel {
        title: Option<String>,
        answers: Mutex<VecDeque<Option<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(title: Option<&str>, answers: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                title: title.map(str::to_string),
                answers: Mutex::new(answers.into_iter().map(|a| a.map(str::to_string)).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn answer_prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(&self, request: &CompletionRequest) -> Option<String> {
            if request.system.is_some() {
                return self.title.clone();
            }
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.answers.lock().unwrap().pop_front().flatten()
        }
    }

    struct NoEmbedder;

    #[async_trait]
    impl Embedder for NoEmbedder {
        fn dimensions(&self) -> usize {
            EMBEDDING_DIMENSIONS
        }

        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            None
        }
    }

    struct Fixture {
        store: SqliteStore,
        ctx: RequestContext,
    }

    async fn fixture() -> Fixture {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.insert_user("ana@example.com", None, "hash").await.unwrap();
        let (team, _) = store.insert_team_with_admin("Ops", None, user.id).await.unwrap();
        Fixture {
            store,
            ctx: RequestContext::new(team.id, user.id),
        }
    }

    fn orchestrator(
        store: &SqliteStore,
        embedder: Arc<dyn Embedder>,
        model: Arc<ScriptedModel>,
    ) -> ChatOrchestrator {
        let media = MediaStore::new("/srv/media", Url::parse("http://localhost/media/").unwrap());
        let retriever = Retriever::new(Arc::new(store.clone()), store.clone(), media);
        ChatOrchestrator::new(store.clone(), retriever, embedder, model)
    }

    async fn seed_chunk(store: &SqliteStore, team_id: Uuid, text: &str) -> Document {
        let document = Document {
            id: Uuid::new_v4(),
            team_id,
            name: "Runbook.md".to_string(),
            file_path: "documents/runbook.md".to_string(),
            size: Some(text.len() as i64),
            content_type: Some("text/markdown".to_string()),
            metadata: None,
            created_at: Utc::now(),
        };
        store.insert_document(&document).await.unwrap();
        store
            .insert_chunk(
                team_id,
                &DocumentChunk {
                    id: Uuid::new_v4(),
                    document_id: document.id,
                    chunk_index: 1,
                    text: text.to_string(),
                    embedding: HashingEmbedder::default().embed_sync(text),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        document
    }

    #[tokio::test]
    async fn start_chat_uses_generated_title_or_default() {
        let fx = fixture().await;
        let titled = orchestrator(
            &fx.store,
            Arc::new(HashingEmbedder::default()),
            ScriptedModel::new(Some("VPN key rotation"), vec![]),
        );
        let chat = titled.start_chat(&fx.ctx, "  how often do VPN keys rotate? ").await.unwrap();
        assert_eq!(chat.title, "VPN key rotation");
        assert_eq!(chat.state(), ChatState::Fresh);

        let messages = fx.store.messages(chat.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "how often do VPN keys rotate?");

        let untitled = orchestrator(
            &fx.store,
            Arc::new(HashingEmbedder::default()),
            ScriptedModel::new(None, vec![]),
        );
        let chat = untitled.start_chat(&fx.ctx, "anything").await.unwrap();
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
    }

    #[tokio::test]
    async fn first_answer_uses_retrieved_context_once() {
        let fx = fixture().await;
        let document = seed_chunk(&fx.store, fx.ctx.team_id, "VPN keys rotate every Monday.").await;
        let reply = "Every Monday.<hr/><div class=\"llm-sources\"><ol></ol></div>";
        let model = ScriptedModel::new(Some("VPN"), vec![Some(reply)]);
        let chats = orchestrator(&fx.store, Arc::new(HashingEmbedder::default()), model.clone());

        let chat = chats.start_chat(&fx.ctx, "When do VPN keys rotate?").await.unwrap();
        let first = chats.ensure_first_answer(&fx.ctx, chat.id).await.unwrap();
        assert!(first.activated);
        assert_eq!(first.reply.as_ref().map(|reply| reply.sender), Some(Sender::Bot));

        let again = chats.ensure_first_answer(&fx.ctx, chat.id).await.unwrap();
        assert!(!again.activated);
        assert!(again.reply.is_none());

        let prompts = model.answer_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("VPN keys rotate every Monday."));
        assert!(prompts[0].contains(&format!("Document id: {}", document.id)));

        let transcript = chats.transcript(&fx.ctx, chat.id).await.unwrap();
        assert_eq!(transcript.chat.state(), ChatState::Active);
        assert_eq!(transcript.conversations.len(), 2);
        assert_eq!(transcript.previous_chats.len(), 1);
    }

    #[tokio::test]
    async fn chat_activates_even_when_model_fails() {
        let fx = fixture().await;
        let model = ScriptedModel::new(None, vec![None]);
        let chats = orchestrator(&fx.store, Arc::new(HashingEmbedder::default()), model);

        let chat = chats.start_chat(&fx.ctx, "hello?").await.unwrap();
        let first = chats.ensure_first_answer(&fx.ctx, chat.id).await.unwrap();
        assert!(first.activated);
        assert!(first.reply.is_none());

        let transcript = chats.transcript(&fx.ctx, chat.id).await.unwrap();
        assert_eq!(transcript.chat.state(), ChatState::Active);
        assert_eq!(transcript.conversations.len(), 1);
    }

    #[tokio::test]
    async fn empty_team_still_prompts_the_model() {
        let fx = fixture().await;
        let reply = "I don't know.<hr/><div class=\"llm-sources\"><ol></ol></div>";
        let model = ScriptedModel::new(None, vec![Some(reply)]);
        let chats = orchestrator(&fx.store, Arc::new(HashingEmbedder::default()), model.clone());

        let chat = chats.start_chat(&fx.ctx, "What is our SLA?").await.unwrap();
        chats.ensure_first_answer(&fx.ctx, chat.id).await.unwrap();

        let prompts = model.answer_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("CONTEXT:\n\n\nUSER QUESTION:\nWhat is our SLA?"));
    }

    #[tokio::test]
    async fn missing_embedding_means_empty_context() {
        let fx = fixture().await;
        seed_chunk(&fx.store, fx.ctx.team_id, "VPN keys rotate every Monday.").await;
        let model = ScriptedModel::new(None, vec![None, Some("Monday.")]);
        let chats = orchestrator(&fx.store, Arc::new(NoEmbedder), model.clone());

        let chat = chats.start_chat(&fx.ctx, "When do VPN keys rotate?").await.unwrap();
        chats.ensure_first_answer(&fx.ctx, chat.id).await.unwrap();
        let turn = chats.ask(&fx.ctx, chat.id, "Which day?").await.unwrap();

        assert!(turn.sources.is_empty());
        assert_eq!(turn.reply.map(|reply| reply.message), Some("Monday.".to_string()));
        assert!(model
            .answer_prompts()
            .iter()
            .all(|prompt| !prompt.contains("VPN keys rotate every Monday.")));
    }

    #[tokio::test]
    async fn failed_follow_up_stores_only_the_question() {
        let fx = fixture().await;
        let model = ScriptedModel::new(None, vec![Some("Hi."), None]);
        let chats = orchestrator(&fx.store, Arc::new(HashingEmbedder::default()), model);

        let chat = chats.start_chat(&fx.ctx, "hello").await.unwrap();
        chats.ensure_first_answer(&fx.ctx, chat.id).await.unwrap();
        let turn = chats.ask(&fx.ctx, chat.id, "still there?").await.unwrap();

        assert!(turn.reply.is_none());
        let messages = fx.store.messages(chat.id).await.unwrap();
        assert_eq!(messages.len(), 3);
        let last = messages.last().unwrap();
        assert_eq!(last.sender, Sender::User);
        assert_eq!(last.message, "still there?");
    }

    #[tokio::test]
    async fn asking_a_fresh_chat_answers_the_opening_question_first() {
        let fx = fixture().await;
        let model = ScriptedModel::new(None, vec![Some("Weekly."), Some("Mondays.")]);
        let chats = orchestrator(&fx.store, Arc::new(HashingEmbedder::default()), model.clone());

        let chat = chats.start_chat(&fx.ctx, "How often do keys rotate?").await.unwrap();
        let turn = chats.ask(&fx.ctx, chat.id, "Which day?").await.unwrap();
        assert_eq!(turn.reply.map(|reply| reply.message), Some("Mondays.".to_string()));

        let transcript = chats.transcript(&fx.ctx, chat.id).await.unwrap();
        assert_eq!(transcript.chat.state(), ChatState::Active);
        let sequence = transcript
            .conversations
            .iter()
            .map(|message| (message.sender, message.message.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            sequence,
            vec![
                (Sender::User, "How often do keys rotate?"),
                (Sender::Bot, "Weekly."),
                (Sender::User, "Which day?"),
                (Sender::Bot, "Mondays."),
            ]
        );

        let prompts = model.answer_prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("USER QUESTION:\nHow often do keys rotate?"));
    }

    #[tokio::test]
    async fn follow_up_history_is_bounded() {
        let fx = fixture().await;
        let answers = (0..8).map(|_| Some("ok")).collect();
        let model = ScriptedModel::new(None, answers);
        let chats = orchestrator(&fx.store, Arc::new(HashingEmbedder::default()), model.clone());

        let chat = chats.start_chat(&fx.ctx, "question 0").await.unwrap();
        chats.ensure_first_answer(&fx.ctx, chat.id).await.unwrap();
        for round in 1..=6 {
            chats.ask(&fx.ctx, chat.id, &format!("question {round}")).await.unwrap();
        }

        let prompts = model.answer_prompts();
        let last = prompts.last().unwrap();
        let history_lines = last
            .lines()
            .filter(|line| line.starts_with("User: ") || line.starts_with("Bot: "))
            .collect::<Vec<_>>();
        assert_eq!(history_lines.len(), HISTORY_TURNS);
        assert_eq!(history_lines[0], "User: question 2");
        assert_eq!(history_lines[7], "Bot: ok");
        assert!(!last.contains("User: question 6"));
    }

    #[tokio::test]
    async fn lookups_outside_scope_are_errors() {
        let fx = fixture().await;
        let chats = orchestrator(
            &fx.store,
            Arc::new(HashingEmbedder::default()),
            ScriptedModel::new(None, vec![]),
        );

        let stranger = RequestContext::new(fx.ctx.team_id, Uuid::new_v4());
        assert!(matches!(
            chats.start_chat(&stranger, "hi").await,
            Err(ChatError::TeamNotFound(_))
        ));
        assert!(matches!(
            chats.ask(&fx.ctx, Uuid::new_v4(), "hi").await,
            Err(ChatError::ChatNotFound(_))
        ));
        assert!(matches!(
            chats.ask(&fx.ctx, Uuid::new_v4(), "   ").await,
            Err(ChatError::EmptyQuery)
        ));
        assert!(chats.chats(&fx.ctx).await.unwrap().is_empty());
    }
}

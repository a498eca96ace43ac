//! Drives a live completion stream into the controller.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::controller::{ConversationController, Exchange};
use super::{CompletionStream, TitleGenerator};
use crate::openai::Message;

pub type SharedController = Arc<Mutex<ConversationController>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Stopped,
    Failed,
}

pub struct ExchangeResult {
    pub outcome: Outcome,
    /// Background title generation, if this exchange triggered one
    pub title_task: Option<JoinHandle<()>>,
}

fn lock(controller: &SharedController) -> MutexGuard<'_, ConversationController> {
    controller.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run `exchange` to completion. Chunks are handed to `on_chunk` for
/// rendering and buffered in the controller. A stop request ends the
/// exchange early and commits what arrived so far.
pub async fn run_exchange<F>(
    controller: &SharedController,
    completion: &dyn CompletionStream,
    titles: Arc<dyn TitleGenerator>,
    exchange: Exchange,
    mut on_chunk: F,
) -> ExchangeResult
where
    F: FnMut(&str),
{
    let Exchange {
        chat_id,
        request,
        stop,
    } = exchange;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut stream = completion.stream(&request, tx);
    let mut stream_result = None;
    let mut stopped = false;

    loop {
        tokio::select! {
            // Deliver buffered chunks before reacting to a stop
            biased;
            Some(chunk) = rx.recv() => {
                on_chunk(&chunk);
                lock(controller).push_chunk(&chat_id, &chunk);
            }
            _ = stop.cancelled(), if stream_result.is_none() => {
                stopped = true;
                break;
            }
            result = &mut stream, if stream_result.is_none() => {
                stream_result = Some(result);
            }
            else => break,
        }
    }

    // Dropping the request future aborts the transport
    drop(stream);

    if let Some(Err(e)) = stream_result
        && !stopped
    {
        lock(controller).fail(&chat_id, &e);
        return ExchangeResult {
            outcome: Outcome::Failed,
            title_task: None,
        };
    }

    let finished = lock(controller).finish(&chat_id);
    let title_task = finished
        .and_then(|f| f.title_request)
        .map(|messages| {
            tokio::spawn(generate_title(
                Arc::clone(controller),
                titles,
                chat_id.clone(),
                messages,
            ))
        });

    ExchangeResult {
        outcome: if stopped {
            Outcome::Stopped
        } else {
            Outcome::Completed
        },
        title_task,
    }
}

async fn generate_title(
    controller: SharedController,
    titles: Arc<dyn TitleGenerator>,
    chat_id: String,
    messages: Vec<Message>,
) {
    let result = titles.generate_title(&messages).await;
    lock(&controller).apply_title(&chat_id, result);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{Error, Result, anyhow};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::chat::CompletionRequest;
    use crate::chat::models::{DEFAULT_CHAT_TITLE, Role};
    use crate::core::GenerationDefaults;
    use crate::store::MemoryStore;

    /// Sends the given chunks then ends, fails, or hangs.
    enum Script {
        Complete(Vec<&'static str>),
        Fail(Vec<&'static str>),
        Hang(Vec<&'static str>, CancellationToken),
    }

    struct FakeStream(Script);

    #[async_trait]
    impl CompletionStream for FakeStream {
        async fn stream(
            &self,
            _request: &CompletionRequest,
            tx: mpsc::UnboundedSender<String>,
        ) -> Result<(), Error> {
            match &self.0 {
                Script::Complete(chunks) => {
                    for c in chunks {
                        tx.send(c.to_string())?;
                    }
                    Ok(())
                }
                Script::Fail(chunks) => {
                    for c in chunks {
                        tx.send(c.to_string())?;
                    }
                    Err(anyhow!("connection reset"))
                }
                Script::Hang(chunks, stop) => {
                    for c in chunks {
                        tx.send(c.to_string())?;
                    }
                    // Simulates the user pressing stop mid-stream
                    stop.cancel();
                    futures::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    #[derive(Default)]
    struct FakeTitles {
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<Message>>>,
        fail: bool,
    }

    #[async_trait]
    impl TitleGenerator for FakeTitles {
        async fn generate_title(&self, messages: &[Message]) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.fail {
                return Err(anyhow!("title service down"));
            }
            Ok(String::from("\"Friendly Greetings\""))
        }
    }

    async fn shared_controller() -> SharedController {
        let mut controller =
            ConversationController::new(Arc::new(MemoryStore::new()), GenerationDefaults::default());
        controller.start().await;
        Arc::new(Mutex::new(controller))
    }

    fn committed(controller: &SharedController, chat_id: &str) -> Vec<(Role, String)> {
        lock(controller)
            .chats()
            .get(chat_id)
            .unwrap()
            .messages
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_exchange_commits_and_generates_title() {
        let controller = shared_controller().await;
        let titles = Arc::new(FakeTitles::default());
        let exchange = lock(&controller).send("Hello").unwrap();
        let chat_id = exchange.chat_id.clone();

        let mut rendered = String::new();
        let result = run_exchange(
            &controller,
            &FakeStream(Script::Complete(vec!["Hi", " there"])),
            titles.clone(),
            exchange,
            |chunk| rendered.push_str(chunk),
        )
        .await;

        assert_eq!(result.outcome, Outcome::Completed);
        assert_eq!(rendered, "Hi there");
        assert_eq!(
            committed(&controller, &chat_id),
            vec![
                (Role::User, String::from("Hello")),
                (Role::Assistant, String::from("Hi there"))
            ]
        );

        result.title_task.unwrap().await.unwrap();
        assert_eq!(titles.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            titles.seen.lock().unwrap()[0],
            vec![
                Message::new(Role::User, "Hello"),
                Message::new(Role::Assistant, "Hi there")
            ]
        );
        let title = lock(&controller).chats().get(&chat_id).unwrap().title.clone();
        assert_eq!(title, "Friendly Greetings");

        // A second exchange on the titled chat doesn't ask again
        let exchange = lock(&controller).send("More").unwrap();
        let result = run_exchange(
            &controller,
            &FakeStream(Script::Complete(vec!["Sure"])),
            titles.clone(),
            exchange,
            |_| {},
        )
        .await;
        assert!(result.title_task.is_none());
        assert_eq!(titles.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_mid_stream_commits_partial() {
        let controller = shared_controller().await;
        let exchange = lock(&controller).send("Hello").unwrap();
        let chat_id = exchange.chat_id.clone();
        let stop = exchange.stop.clone();

        let result = run_exchange(
            &controller,
            &FakeStream(Script::Hang(vec!["Hi", " th"], stop)),
            Arc::new(FakeTitles::default()),
            exchange,
            |_| {},
        )
        .await;

        assert_eq!(result.outcome, Outcome::Stopped);
        assert_eq!(
            committed(&controller, &chat_id),
            vec![
                (Role::User, String::from("Hello")),
                (Role::Assistant, String::from("Hi th"))
            ]
        );
        assert!(!lock(&controller).has_error());
        assert!(!lock(&controller).is_streaming(&chat_id));
    }

    #[tokio::test]
    async fn test_stop_before_first_chunk() {
        let controller = shared_controller().await;
        let exchange = lock(&controller).send("Hello").unwrap();
        let chat_id = exchange.chat_id.clone();
        let stop = exchange.stop.clone();
        assert!(lock(&controller).stop(&chat_id));
        // An earlier waiter must not consume the stop signal
        stop.cancelled().await;

        let result = run_exchange(
            &controller,
            &FakeStream(Script::Hang(vec![], CancellationToken::new())),
            Arc::new(FakeTitles::default()),
            exchange,
            |_| {},
        )
        .await;

        assert_eq!(result.outcome, Outcome::Stopped);
        assert_eq!(
            committed(&controller, &chat_id),
            vec![(Role::User, String::from("Hello"))]
        );
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_stream_sets_error() {
        let controller = shared_controller().await;
        let titles = Arc::new(FakeTitles::default());
        let exchange = lock(&controller).send("Hello").unwrap();
        let chat_id = exchange.chat_id.clone();

        let result = run_exchange(
            &controller,
            &FakeStream(Script::Fail(vec!["Hi"])),
            titles.clone(),
            exchange,
            |_| {},
        )
        .await;

        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.title_task.is_none());
        {
            let controller = lock(&controller);
            assert!(controller.error_state().has_error);
            assert_eq!(controller.error_state().chat_id, chat_id);
        }
        assert_eq!(
            committed(&controller, &chat_id),
            vec![(Role::User, String::from("Hello"))]
        );
        assert_eq!(titles.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_title_keeps_default() {
        let controller = shared_controller().await;
        let titles = Arc::new(FakeTitles {
            fail: true,
            ..Default::default()
        });
        let exchange = lock(&controller).send("Hello").unwrap();
        let chat_id = exchange.chat_id.clone();

        let result = run_exchange(
            &controller,
            &FakeStream(Script::Complete(vec!["Hi"])),
            titles,
            exchange,
            |_| {},
        )
        .await;
        result.title_task.unwrap().await.unwrap();

        let controller = lock(&controller);
        assert_eq!(controller.chats().get(&chat_id).unwrap().title, DEFAULT_CHAT_TITLE);
        assert!(!controller.has_error());
    }
}

use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Error, Result, anyhow, bail};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::chat::{
    ChatField, ConversationController, Outcome, SharedController, TitleGenerator, run_exchange,
};
use crate::chat::models::Message;
use crate::client::ApiClient;
use crate::core::AppConfig;
use crate::store::SqliteStore;

const HELP: &str = "Commands:
  /new                              start a new chat
  /list                             list chats
  /select <n>                       switch to chat n
  /delete [n]                       delete chat n (default: current)
  /retry                            resend the last message
  /prompts                          list prompts
  /prompt add <title> | <body> [| tags]
  /prompt edit <n> <title> | <body> [| tags]
  /prompt delete <n>
  /prompt select <n|default>
  /set <field> <value|default>      model, channel, temperature, top_p,
                                    max_tokens, prompt, title
  /reset                            reset chat settings to defaults
  /quit
Press Ctrl-C while a reply is streaming to stop it.";

#[derive(Debug, PartialEq)]
pub enum PromptCommand {
    Add {
        title: String,
        body: String,
        tags: Vec<String>,
    },
    Edit {
        index: usize,
        title: String,
        body: String,
        tags: Vec<String>,
    },
    Delete(usize),
    /// `None` selects the default prompt
    Select(Option<usize>),
}

/// A line typed at the chat prompt. Chats and prompts are referred to
/// by their 1-based position in `/list` and `/prompts`.
#[derive(Debug, PartialEq)]
pub enum ReplCommand {
    Send(String),
    New,
    List,
    Select(usize),
    Delete(Option<usize>),
    Retry,
    Prompts,
    Prompt(PromptCommand),
    Set(ChatField),
    Reset,
    Help,
    Quit,
}

fn parse_index(value: &str) -> Result<usize, Error> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(anyhow!("Expected a number from the list, got '{}'", value.trim())),
    }
}

/// `title | body [| tag, tag]`
fn parse_prompt_fields(value: &str) -> Result<(String, String, Vec<String>), Error> {
    let mut parts = value.splitn(3, '|').map(str::trim);
    let title = parts.next().unwrap_or_default();
    let body = parts.next().unwrap_or_default();
    if title.is_empty() || body.is_empty() {
        bail!("Usage: <title> | <body> [| tags]");
    }
    let tags = parts
        .next()
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    Ok((title.to_string(), body.to_string(), tags))
}

fn parse_field(name: &str, value: &str) -> Result<ChatField, Error> {
    let value = value.trim();
    if value.is_empty() {
        bail!("Missing value for {}", name);
    }
    let unset = value == "default";
    let field = match name {
        "title" => ChatField::Title(value.to_string()),
        "model" => ChatField::Model((!unset).then(|| value.to_string())),
        "channel" => ChatField::Channel((!unset).then(|| value.to_string())),
        "prompt" => ChatField::UserPrompt((!unset).then(|| value.to_string())),
        "temperature" => ChatField::Temperature(if unset { None } else { Some(value.parse()?) }),
        "top_p" => ChatField::TopP(if unset { None } else { Some(value.parse()?) }),
        "max_tokens" => ChatField::MaxTokens(if unset { None } else { Some(value.parse()?) }),
        other => bail!("Unknown setting '{}'", other),
    };
    Ok(field)
}

impl FromStr for ReplCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if !line.starts_with('/') {
            return Ok(ReplCommand::Send(line.to_string()));
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let cmd = match command {
            "/new" => ReplCommand::New,
            "/list" => ReplCommand::List,
            "/select" => ReplCommand::Select(parse_index(rest)?),
            "/delete" if rest.is_empty() => ReplCommand::Delete(None),
            "/delete" => ReplCommand::Delete(Some(parse_index(rest)?)),
            "/retry" => ReplCommand::Retry,
            "/prompts" => ReplCommand::Prompts,
            "/prompt" => {
                let (action, args) = rest.split_once(' ').unwrap_or((rest, ""));
                let prompt = match action {
                    "add" => {
                        let (title, body, tags) = parse_prompt_fields(args)?;
                        PromptCommand::Add { title, body, tags }
                    }
                    "edit" => {
                        let (index, fields) = args.trim().split_once(' ').unwrap_or((args, ""));
                        let (title, body, tags) = parse_prompt_fields(fields)?;
                        PromptCommand::Edit {
                            index: parse_index(index)?,
                            title,
                            body,
                            tags,
                        }
                    }
                    "delete" => PromptCommand::Delete(parse_index(args)?),
                    "select" if args.trim() == "default" => PromptCommand::Select(None),
                    "select" => PromptCommand::Select(Some(parse_index(args)?)),
                    _ => bail!("Usage: /prompt add|edit|delete|select ..."),
                };
                ReplCommand::Prompt(prompt)
            }
            "/set" => {
                let (name, value) = rest
                    .split_once(' ')
                    .ok_or_else(|| anyhow!("Usage: /set <field> <value>"))?;
                ReplCommand::Set(parse_field(name, value)?)
            }
            "/reset" => ReplCommand::Reset,
            "/help" => ReplCommand::Help,
            "/quit" | "/exit" => ReplCommand::Quit,
            other => bail!("Unknown command '{}'. Type /help for a list.", other),
        };
        Ok(cmd)
    }
}

fn lock(controller: &SharedController) -> MutexGuard<'_, ConversationController> {
    controller.lock().unwrap_or_else(|e| e.into_inner())
}

fn print_messages(messages: &[Message]) {
    for m in messages {
        println!("[{:?}] {}\n", m.role, m.content);
    }
}

fn print_chat_list(controller: &ConversationController) {
    let selected = controller.chats().selected_chat_id();
    for (i, chat) in controller.chats().chats().iter().enumerate() {
        let marker = if chat.id == selected { "*" } else { " " };
        let streaming = if controller.is_streaming(&chat.id) {
            " (streaming)"
        } else {
            ""
        };
        println!(
            "{} {}. {} [{}]{}",
            marker,
            i + 1,
            chat.title,
            chat.date_time.format("%Y-%m-%d %H:%M"),
            streaming
        );
    }
}

fn print_prompt_list(controller: &ConversationController) {
    let selected = controller.prompts().selected_prompt_id();
    for (i, prompt) in controller.prompts().prompts().iter().enumerate() {
        let marker = if prompt.id == selected { "*" } else { " " };
        println!("{} {}. {} {}", marker, i + 1, prompt.title, prompt.display_tags());
    }
}

fn chat_id_at(controller: &ConversationController, index: usize) -> Result<String, Error> {
    controller
        .chats()
        .chats()
        .get(index - 1)
        .map(|c| c.id.clone())
        .ok_or_else(|| anyhow!("No chat number {}", index))
}

fn prompt_id_at(controller: &ConversationController, index: usize) -> Result<String, Error> {
    controller
        .prompts()
        .prompts()
        .get(index - 1)
        .map(|p| p.id.clone())
        .ok_or_else(|| anyhow!("No prompt number {}", index))
}

fn run_prompt_command(controller: &mut ConversationController, cmd: PromptCommand) -> Result<()> {
    match cmd {
        PromptCommand::Add { title, body, tags } => {
            controller.prompts_mut().add_prompt(&title, &body, tags);
        }
        PromptCommand::Edit {
            index,
            title,
            body,
            tags,
        } => {
            let id = prompt_id_at(controller, index)?;
            controller.prompts_mut().edit_prompt(&id, &title, &body, tags);
        }
        PromptCommand::Delete(index) => {
            let id = prompt_id_at(controller, index)?;
            if controller.prompts().get(&id).is_some_and(|p| p.is_default()) {
                bail!("The default prompt can't be deleted");
            }
            controller.prompts_mut().delete_prompt(&id);
        }
        PromptCommand::Select(None) => controller.prompts_mut().select_prompt(None),
        PromptCommand::Select(Some(index)) => {
            let id = prompt_id_at(controller, index)?;
            controller.prompts_mut().select_prompt(Some(&id));
        }
    }
    print_prompt_list(controller);
    Ok(())
}

/// Run a single exchange in the foreground. Ctrl-C stops the reply and
/// keeps what arrived so far.
async fn stream_reply(
    controller: &SharedController,
    api: &ApiClient,
    titles: Arc<dyn TitleGenerator>,
    exchange: crate::chat::Exchange,
) {
    let stop = exchange.stop.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let result = run_exchange(controller, api, titles, exchange, |chunk| {
        print!("{}", chunk);
        let _ = stdout.flush();
    })
    .await;
    ctrl_c.abort();
    println!("\n");

    match result.outcome {
        Outcome::Completed => {}
        Outcome::Stopped => println!("(stopped)\n"),
        Outcome::Failed => println!("Something went wrong. Type /retry to try again.\n"),
    }
}

pub async fn run(api_url: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::default();
    let store = SqliteStore::open(&config.db_path)?;
    let mut controller = ConversationController::new(Arc::new(store), config.defaults.clone());
    let messages = controller.start().await;
    let controller: SharedController = Arc::new(Mutex::new(controller));

    let api = ApiClient::new(api_url);
    let titles: Arc<dyn TitleGenerator> = Arc::new(api.clone());

    let mut rl = DefaultEditor::new()?;
    println!("Type /help for commands.\n");
    print_messages(&messages);

    loop {
        let readline = rl.readline(">>> ");
        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        let cmd = match line.parse::<ReplCommand>() {
            Ok(cmd) => cmd,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let result: Result<()> = match cmd {
            ReplCommand::Send(content) => {
                let exchange = lock(&controller).send(&content);
                match exchange {
                    Ok(exchange) => {
                        stream_reply(&controller, &api, Arc::clone(&titles), exchange).await;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ReplCommand::Retry => {
                let exchange = lock(&controller).retry();
                match exchange {
                    Ok(exchange) => {
                        stream_reply(&controller, &api, Arc::clone(&titles), exchange).await;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ReplCommand::New => lock(&controller)
                .new_chat()
                .map(|chat| println!("Started {}", chat.title))
                .map_err(Error::from),
            ReplCommand::List => {
                print_chat_list(&lock(&controller));
                Ok(())
            }
            ReplCommand::Select(index) => {
                let mut controller = lock(&controller);
                chat_id_at(&controller, index).map(|id| {
                    if let Some(messages) = controller.load_chat(&id) {
                        print_messages(&messages);
                    }
                })
            }
            ReplCommand::Delete(index) => {
                let mut controller = lock(&controller);
                let id = match index {
                    Some(index) => chat_id_at(&controller, index),
                    None => Ok(controller.chats().selected_chat_id().to_string()),
                };
                id.map(|id| {
                    controller.delete_chat(&id);
                    print_chat_list(&controller);
                })
            }
            ReplCommand::Prompts => {
                print_prompt_list(&lock(&controller));
                Ok(())
            }
            ReplCommand::Prompt(cmd) => run_prompt_command(&mut lock(&controller), cmd),
            ReplCommand::Set(field) => lock(&controller)
                .update_setting(field)
                .map_err(Error::from),
            ReplCommand::Reset => lock(&controller).reset_settings().map_err(Error::from),
            ReplCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ReplCommand::Quit => break,
        };

        if let Err(e) = result {
            println!("{}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(
            "  What is a bull market? ".parse::<ReplCommand>().unwrap(),
            ReplCommand::Send(String::from("What is a bull market?"))
        );
    }

    #[test]
    fn test_chat_commands() {
        assert_eq!("/new".parse::<ReplCommand>().unwrap(), ReplCommand::New);
        assert_eq!("/select 2".parse::<ReplCommand>().unwrap(), ReplCommand::Select(2));
        assert_eq!("/delete".parse::<ReplCommand>().unwrap(), ReplCommand::Delete(None));
        assert_eq!(
            "/delete 3".parse::<ReplCommand>().unwrap(),
            ReplCommand::Delete(Some(3))
        );
        assert!("/select 0".parse::<ReplCommand>().is_err());
        assert!("/select".parse::<ReplCommand>().is_err());
        assert!("/bogus".parse::<ReplCommand>().is_err());
    }

    #[test]
    fn test_prompt_commands() {
        assert_eq!(
            "/prompt add Pirate | Talk like a pirate | fun, silly"
                .parse::<ReplCommand>()
                .unwrap(),
            ReplCommand::Prompt(PromptCommand::Add {
                title: String::from("Pirate"),
                body: String::from("Talk like a pirate"),
                tags: vec![String::from("fun"), String::from("silly")],
            })
        );
        assert_eq!(
            "/prompt edit 2 Pirate | Arr".parse::<ReplCommand>().unwrap(),
            ReplCommand::Prompt(PromptCommand::Edit {
                index: 2,
                title: String::from("Pirate"),
                body: String::from("Arr"),
                tags: vec![],
            })
        );
        assert_eq!(
            "/prompt select default".parse::<ReplCommand>().unwrap(),
            ReplCommand::Prompt(PromptCommand::Select(None))
        );
        assert_eq!(
            "/prompt delete 1".parse::<ReplCommand>().unwrap(),
            ReplCommand::Prompt(PromptCommand::Delete(1))
        );
        assert!("/prompt add NoBody".parse::<ReplCommand>().is_err());
    }

    #[test]
    fn test_set_commands() {
        assert_eq!(
            "/set temperature 0.7".parse::<ReplCommand>().unwrap(),
            ReplCommand::Set(ChatField::Temperature(Some(0.7)))
        );
        assert_eq!(
            "/set model default".parse::<ReplCommand>().unwrap(),
            ReplCommand::Set(ChatField::Model(None))
        );
        assert_eq!(
            "/set prompt Answer in French".parse::<ReplCommand>().unwrap(),
            ReplCommand::Set(ChatField::UserPrompt(Some(String::from("Answer in French"))))
        );
        assert_eq!(
            "/set max_tokens 1000".parse::<ReplCommand>().unwrap(),
            ReplCommand::Set(ChatField::MaxTokens(Some(1000)))
        );
        assert!("/set temperature hot".parse::<ReplCommand>().is_err());
        assert!("/set colour blue".parse::<ReplCommand>().is_err());
        assert!("/set model".parse::<ReplCommand>().is_err());
    }
}

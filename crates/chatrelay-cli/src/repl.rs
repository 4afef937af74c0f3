use std::io::Write;

use anyhow::Result;
use chatrelay_client::{ChatController, ChatError, MessageStatus, MessageStore, TurnOutcome};
use chatrelay_contracts::Role;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One line of REPL input
#[derive(Debug, PartialEq)]
pub enum Input {
    Message(String),
    New,
    History,
    Sessions,
    Load(String),
    Assistant(Option<String>),
    Model(Option<String>),
    Edit { index: usize, content: String },
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let optional = |value: &str| (!value.is_empty()).then(|| value.to_string());

    match name {
        "new" => Input::New,
        "history" => Input::History,
        "sessions" => Input::Sessions,
        "load" if !rest.is_empty() => Input::Load(rest.to_string()),
        "assistant" => Input::Assistant(optional(rest)),
        "model" => Input::Model(optional(rest)),
        "edit" => {
            let parsed = rest
                .split_once(char::is_whitespace)
                .and_then(|(n, content)| Some((n.parse::<usize>().ok()?, content.trim())));
            match parsed {
                Some((n, content)) if n > 0 && !content.is_empty() => Input::Edit {
                    index: n - 1,
                    content: content.to_string(),
                },
                _ => Input::Invalid("usage: /edit <message number> <new text>".to_string()),
            }
        }
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command /{}", other)),
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  /new                 start a new conversation");
    println!("  /history             show the conversation with message numbers");
    println!("  /sessions            list saved sessions");
    println!("  /load <id>           resume a saved session");
    println!("  /assistant [id]      select an assistant (no id clears it)");
    println!("  /model [id]          select a model (no id uses the server default)");
    println!("  /edit <n> <text>     replace user message n and resend");
    println!("  /quit                exit");
    println!("{}", "Ctrl-C stops a reply that is still streaming.".dimmed());
}

fn print_history(controller: &ChatController) {
    for (i, message) in controller.state().messages.iter().enumerate() {
        let label = match message.role {
            Role::User => "you".cyan().bold(),
            Role::Assistant => "assistant".green().bold(),
            Role::System => "system".dimmed(),
        };
        let suffix = if message.status == MessageStatus::Stopped {
            " [stopped]".dimmed().to_string()
        } else {
            String::new()
        };
        println!("{:>3} {}: {}{}", i + 1, label, message.content, suffix);
    }
}

pub async fn print_sessions(store: &dyn MessageStore) -> Result<()> {
    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("{}", "No saved sessions.".dimmed());
    }
    for session in sessions {
        println!(
            "{}  {}  {}",
            session.id.dimmed(),
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.title
        );
    }
    Ok(())
}

fn report(result: Result<TurnOutcome, ChatError>) {
    match result {
        Ok(TurnOutcome::Completed { persisted: true }) => println!(),
        Ok(TurnOutcome::Completed { persisted: false }) => {
            println!();
            println!("{}", "(reply not saved, see log for details)".yellow());
        }
        Ok(TurnOutcome::Stopped) => println!(" {}", "[stopped]".dimmed()),
        Err(err) => {
            println!();
            eprintln!("{} {}", "error:".red().bold(), err);
        }
    }
}

/// Run one turn, printing content as it arrives. Ctrl-C stops generation.
pub async fn stream_turn(
    controller: &ChatController,
    turn: impl Future<Output = Result<TurnOutcome, ChatError>>,
) -> Result<TurnOutcome, ChatError> {
    drive_until_done(turn, tokio::signal::ctrl_c, || {
        controller.stop();
    })
    .await
}

/// Await `turn`, calling `on_interrupt` for every interrupt signal.
///
/// If listening for the signal fails, the rest of the turn runs without it.
async fn drive_until_done<T, S>(
    turn: impl Future<Output = T>,
    mut interrupt: impl FnMut() -> S,
    on_interrupt: impl Fn(),
) -> T
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(turn);
    loop {
        tokio::select! {
            result = &mut turn => return result,
            signal = interrupt() => match signal {
                Ok(()) => on_interrupt(),
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
                    return turn.await;
                }
            },
        }
    }
}

fn print_delta(delta: &str) {
    print!("{}", delta);
    let _ = std::io::stdout().flush();
}

pub async fn ask(controller: &ChatController, message: &str) -> bool {
    let result = stream_turn(controller, controller.send_message_with(message, print_delta)).await;
    let ok = result.is_ok();
    report(result);
    ok
}

pub async fn run(
    controller: &ChatController,
    store: &dyn MessageStore,
    server_url: &str,
) -> Result<()> {
    println!("{} {}", "ChatRelay".bold(), server_url.dimmed());
    println!("{}", "Type /help for commands.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".cyan().bold());
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Message(text) => {
                print!("{} ", "assistant:".green().bold());
                let _ = std::io::stdout().flush();
                let turn = controller.send_message_with(&text, print_delta);
                report(stream_turn(controller, turn).await);
            }
            Input::Edit { index, content } => {
                print!("{} ", "assistant:".green().bold());
                let _ = std::io::stdout().flush();
                let turn = controller.edit_and_resend(index, &content);
                report(stream_turn(controller, turn).await);
            }
            Input::New => {
                controller.new_chat();
                println!("{}", "Started a new conversation.".dimmed());
            }
            Input::History => print_history(controller),
            Input::Sessions => print_sessions(store).await?,
            Input::Load(id) => match controller.load_session(&id).await {
                Ok(true) => print_history(controller),
                Ok(false) => println!("{}", format!("No session {}", id).yellow()),
                Err(err) => eprintln!("{} {}", "error:".red().bold(), err),
            },
            Input::Assistant(id) => {
                controller.select_assistant(id.clone());
                match id {
                    Some(id) => println!("{}", format!("Assistant set to {}", id).dimmed()),
                    None => println!("{}", "Assistant cleared".dimmed()),
                }
            }
            Input::Model(model) => {
                let mut settings = controller.state().settings;
                settings.model = model;
                controller.set_settings(settings);
            }
            Input::Help => print_help(),
            Input::Quit => break,
            Input::Invalid(message) => eprintln!("{} {}", "error:".red().bold(), message),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  hello  "), Input::Message("hello".to_string()));
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("/new"), Input::New);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/load abc"), Input::Load("abc".to_string()));
        assert_eq!(
            parse_input("/assistant asst_1"),
            Input::Assistant(Some("asst_1".to_string()))
        );
        assert_eq!(parse_input("/assistant"), Input::Assistant(None));
        assert_eq!(
            parse_input("/edit 3 try again"),
            Input::Edit {
                index: 2,
                content: "try again".to_string()
            }
        );
        assert!(matches!(parse_input("/edit 0 x"), Input::Invalid(_)));
        assert!(matches!(parse_input("/edit two"), Input::Invalid(_)));
        assert!(matches!(parse_input("/bogus"), Input::Invalid(_)));
        assert!(matches!(parse_input("/load"), Input::Invalid(_)));
    }

    #[tokio::test]
    async fn test_signal_listener_failure_is_not_retried() {
        let listens = Cell::new(0);
        let interrupts = Cell::new(0);

        let result = drive_until_done(
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                "done"
            },
            || {
                listens.set(listens.get() + 1);
                async { Err(std::io::Error::other("no signal handler")) }
            },
            || interrupts.set(interrupts.get() + 1),
        )
        .await;

        assert_eq!(result, "done");
        assert_eq!(listens.get(), 1);
        assert_eq!(interrupts.get(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_keeps_driving_the_turn() {
        let interrupts = Cell::new(0);
        let mut fired = false;

        let result = drive_until_done(
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                7
            },
            || {
                let first = !fired;
                fired = true;
                async move {
                    if first {
                        Ok(())
                    } else {
                        never_signals().await
                    }
                }
            },
            || interrupts.set(interrupts.get() + 1),
        )
        .await;

        assert_eq!(result, 7);
        assert_eq!(interrupts.get(), 1);
    }

    async fn never_signals() -> std::io::Result<()> {
        std::future::pending().await
    }
}

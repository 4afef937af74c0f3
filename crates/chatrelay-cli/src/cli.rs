use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "chatrelay")]
#[command(version, about = "ChatRelay - chat with a relay server from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Relay server URL (defaults to http://localhost:3000)
    #[arg(long, global = true, env = "CHATRELAY_SERVER_URL")]
    pub server_url: Option<String>,

    /// Provider route: openai, groq, mistral or openrouter
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Model id sent with each request
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Assistant id for the OpenAI assistants path
    #[arg(long, global = true)]
    pub assistant: Option<String>,

    /// Sampling temperature
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// System prompt prepended to every request
    #[arg(long, global = true)]
    pub system: Option<String>,

    /// Transcript database path (defaults to the data dir)
    #[arg(long, global = true, env = "CHATRELAY_DB_PATH")]
    pub db_path: Option<String>,

    /// Keep the conversation in memory only
    #[arg(long, global = true)]
    pub no_save: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat (the default)
    Chat {
        /// Resume a saved session
        #[arg(long)]
        session: Option<String>,
    },

    /// Send one message, print the reply and exit
    Ask {
        /// The message to send
        message: String,
    },

    /// List saved sessions
    Sessions,
}

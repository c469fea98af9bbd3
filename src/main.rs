use std::collections::HashSet;
use std::io::Write;

use clap::{Parser, Subcommand};

use agentchat_rs::config::{load_config, AppConfig};
use agentchat_rs::observability::init_tracing;
use agentchat_rs::session::{ChatWorkspace, SessionController, TurnInput, TurnStatus};
use agentchat_rs::transcript::{ChatMessage, ContentPart, Role, ToolCallStatus};

/// Chat with tool-using agents over the runtime's streaming API.
#[derive(Parser, Debug)]
#[command(name = "agentchat")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message and stream the reply
    Send {
        /// Continue this thread instead of starting a new one
        #[arg(long = "thread")]
        thread_id: Option<String>,

        /// Agent to route to; defaults to the configured default agent
        #[arg(long = "agent")]
        agent_type: Option<String>,

        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// List threads for the configured resource
    Threads,
    /// Print the stored messages of a thread
    History { thread_id: String },
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });
    if let Err(msg) = check_agent(&cli.command, &config) {
        eprintln!("{msg}");
        std::process::exit(2);
    }

    init_tracing(&config.features.log_level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(run(config, cli.command));
    std::process::exit(code);
}

/// Agents come from the config file, so they are checked after parsing.
fn check_agent(command: &Command, config: &AppConfig) -> Result<(), String> {
    match command {
        Command::Send {
            agent_type: Some(agent_type),
            ..
        } if config.agent(agent_type).is_none() => {
            let known: Vec<&str> = config
                .agents
                .iter()
                .map(|agent| agent.agent_type.as_str())
                .collect();
            Err(format!(
                "unknown agent '{agent_type}' (configured: {})",
                known.join(", ")
            ))
        }
        _ => Ok(()),
    }
}

async fn run(config: AppConfig, command: Command) -> i32 {
    let controller = match SessionController::from_config(&config) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("Failed to initialize session: {e}");
            return 1;
        }
    };
    let workspace = ChatWorkspace::new(controller);

    match command {
        Command::Send {
            thread_id,
            agent_type,
            message,
        } => send(&config, &workspace, thread_id, agent_type, message.join(" ")).await,
        Command::Threads => match workspace.refresh_threads(&config.store.resource_id).await {
            Ok(threads) => {
                for thread in threads.iter() {
                    println!(
                        "{}  {}  {}",
                        thread.id,
                        thread.updated_at.format("%Y-%m-%d %H:%M"),
                        thread.title
                    );
                }
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
        Command::History { thread_id } => match workspace.open_thread(&thread_id).await {
            Ok(messages) => {
                for message in &messages {
                    print_message(message);
                }
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
    }
}

async fn send(
    config: &AppConfig,
    workspace: &ChatWorkspace,
    thread_id: Option<String>,
    agent_type: Option<String>,
    message: String,
) -> i32 {
    let Some(agent_type) = agent_type.or_else(|| {
        config
            .default_agent()
            .map(|agent| agent.agent_type.clone())
    }) else {
        eprintln!("No agents configured");
        return 1;
    };
    let thread_id = thread_id.unwrap_or_else(|| workspace.new_thread());
    let input = TurnInput::from_config(config, thread_id.clone(), &agent_type, message);

    let handle = match workspace.submit(input) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    eprintln!("thread {thread_id}");

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut snapshots = handle.subscribe();
    let mut printer = LivePrinter::default();
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        printer.render(&snapshot);
        if snapshot.is_finalized() {
            break;
        }
    }

    match handle.wait().await {
        Ok(outcome) => {
            printer.render(&outcome.message);
            println!();
            match outcome.status {
                TurnStatus::Finished => 0,
                TurnStatus::Cancelled => {
                    eprintln!("(cancelled)");
                    130
                }
                TurnStatus::Failed(_) => 1,
            }
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

/// Prints only what is new since the last snapshot.
#[derive(Default)]
struct LivePrinter {
    printed_text: usize,
    announced: HashSet<String>,
    settled: HashSet<String>,
}

impl LivePrinter {
    fn render(&mut self, message: &ChatMessage) {
        if message.content.len() < self.printed_text
            || !message.content.is_char_boundary(self.printed_text)
        {
            // Text was spliced or replaced by an error marker; start over.
            println!();
            self.printed_text = 0;
        }
        print!("{}", &message.content[self.printed_text..]);
        self.printed_text = message.content.len();
        let _ = std::io::stdout().flush();

        for call in message.tool_calls() {
            if self.announced.insert(call.id.clone()) {
                println!("\n[tool {} {}]", call.name, serde_json::Value::Object(call.input.clone()));
            }
            if call.status.is_terminal() && self.settled.insert(call.id.clone()) {
                let label = match call.status {
                    ToolCallStatus::Error => "failed",
                    _ => "done",
                };
                println!("[tool {} {label}]", call.name);
            }
        }
    }
}

fn print_message(message: &ChatMessage) {
    let who = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    println!("--- {who} ({})", message.timestamp.format("%Y-%m-%d %H:%M"));
    for part in &message.parts {
        match part {
            ContentPart::Text { content } => println!("{content}"),
            ContentPart::ToolCall { tool_call } => println!(
                "[tool {} {:?}] {}",
                tool_call.name,
                tool_call.status,
                serde_json::Value::Object(tool_call.input.clone())
            ),
        }
    }
}

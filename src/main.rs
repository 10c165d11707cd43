use std::sync::Arc;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use ui_agent::android::AdbDevice;
use ui_agent::llm_gateway::OpenAiPlanningModel;
use ui_agent::{AgentConfig, AgentEvent, AgentLoop, LlmConfig};

async fn prompt() {
    print!("> ");
    let _ = io::stdout().flush().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
    tracing::debug!("ui_agent {} starting", env!("CARGO_PKG_VERSION"));

    println!("🤖 UI Agent Started!");
    println!("--------------------------------------------------");
    println!("Type 'help' for commands. (Needs a device on adb)");
    println!("--------------------------------------------------");

    let device = AdbDevice::from_env();
    if let Err(e) = device.check_connection().await {
        println!("❌ Preflight failed: {}", e);
        return Err(e);
    }

    let llm = LlmConfig::from_env()?;
    let model = Arc::new(OpenAiPlanningModel::new(llm)?);
    let config = AgentConfig::from_env();

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("[{} #{}] {}", event.run_id, event.iteration, event.message);
        }
    });

    let agent = AgentLoop::new(device.into_host(), model, config)
        .with_events(tx)
        .with_completion_callback(Arc::new(|outcome, iterations, message: &str| {
            println!(
                "\n[Agent] Task finished: {} after {} iterations. {}",
                outcome.as_str(),
                iterations,
                message
            );
        }));

    let stdin = io::stdin();
    let mut reader = io::BufReader::new(stdin);
    let mut buffer = String::new();

    prompt().await;
    while reader.read_line(&mut buffer).await? > 0 {
        let input = buffer.trim().to_string();
        buffer.clear();
        if input.is_empty() {
            prompt().await;
            continue;
        }

        let (cmd, rest) = input.split_once(char::is_whitespace).unwrap_or((input.as_str(), ""));
        match cmd {
            "help" => {
                println!("Available commands:");
                println!("  start <task>     - Run a task on the device");
                println!("  stop             - Stop the running task");
                println!("  status           - Show the agent status");
                println!("  quit             - Exit");
            }
            "quit" | "exit" => break,
            "start" => match agent.start(rest) {
                Ok(run_id) => println!("🚀 Started run {}", run_id),
                Err(e) => println!("⛔️ {}", e),
            },
            "stop" => {
                agent.stop();
                agent.wait().await;
                println!("🛑 Status: {:?}", agent.status());
            }
            "status" => println!("📊 Status: {:?}", agent.status()),
            _ => println!("Unknown command '{}'. Type 'help'.", cmd),
        }
        prompt().await;
    }

    if agent.is_running() {
        agent.stop();
        agent.wait().await;
    }
    Ok(())
}

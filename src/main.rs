mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use waypoint_agent::graph::{
    mermaid, GraphError, GraphNode, GraphRunner, JsonlHistoryStore, RunHistory,
};
use waypoint_agent::{AgentError, Attributed};
use waypoint_core::config::{AppConfig, EnvState};
use waypoint_core::traits::LlmClient;
use waypoint_flows::email::{parse_email, EmailDeps, EmailNode, EmailState, User};
use waypoint_flows::flight::{run_flight_booking, BookingOutcome, FlightDeps, FlightNode};
use waypoint_flows::forecast::{forecast_agent, run_weather_forecast};
use waypoint_flows::question::{
    run_continuous, run_interactive, ContinuousOutcome, QuestionDeps, QuestionNode,
};
use waypoint_flows::ForecastStore;

use crate::prompt::TerminalPrompter;

/// Exit code when a request budget or step cap stopped a run.
const EXIT_LIMIT_EXCEEDED: i32 = 2;

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Agent step graphs: question, email, flight and forecast flows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "waypoint.toml", global = true)]
    config: PathBuf,

    /// Environment profile used when no config file exists (dev, prod, test)
    #[arg(long, env = "ENV_STATE", global = true)]
    env: Option<EnvState>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask questions until one is answered correctly
    Question {
        #[arg(value_enum)]
        mode: QuestionMode,
        /// Answer the pending question (continuous mode) without prompting
        #[arg(long)]
        answer: Option<String>,
    },
    /// Write a welcome email and revise it until the reviewer accepts
    Email {
        #[arg(value_enum)]
        mode: RunMode,
        #[arg(long, default_value = "John Doe")]
        name: String,
        #[arg(long, default_value = "john.joe@example.com", value_parser = parse_email)]
        email: String,
        /// Repeat for several interests
        #[arg(long = "interest", default_values_t = ["Haskel".to_string(), "Lisp".to_string(), "Fortran".to_string()])]
        interests: Vec<String>,
    },
    /// Find and book a flight
    Flight {
        #[arg(value_enum)]
        mode: RunMode,
    },
    /// Forecast several prompts concurrently, e.g. "Weather in London tomorrow?=1"
    Forecast {
        #[arg(required = true, value_parser = parse_forecast_prompt)]
        prompts: Vec<(String, i64)>,
    },
    /// Show the resolved configuration with secrets masked
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum QuestionMode {
    /// Print the graph as a Mermaid state diagram
    Mermaid,
    /// Run once from the first question to the end
    Interactive,
    /// Resume the persisted run and keep going
    Continuous,
}

#[derive(Clone, Copy, ValueEnum)]
enum RunMode {
    Mermaid,
    Run,
}

fn parse_forecast_prompt(s: &str) -> Result<(String, i64), String> {
    let (prompt, user) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected <prompt>=<user_id>, got '{}'", s))?;
    let user_id = user
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid user id", user))?;
    if prompt.trim().is_empty() {
        return Err("prompt must not be empty".into());
    }
    Ok((prompt.trim().to_string(), user_id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("waypoint=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "waypoint", &mut std::io::stdout());
        return Ok(());
    }

    match run(cli).await {
        Err(e) if limit_exceeded(&e) => {
            error!(error = %e, "Run stopped by limit");
            eprintln!("Limit exceeded: {}", e);
            std::process::exit(EXIT_LIMIT_EXCEEDED);
        }
        other => other,
    }
}

fn limit_exceeded(e: &anyhow::Error) -> bool {
    e.downcast_ref::<GraphError>()
        .is_some_and(GraphError::is_limit_exceeded)
        || e.downcast_ref::<AgentError>()
            .is_some_and(AgentError::is_limit_exceeded)
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config");
        return Ok(AppConfig::load(&cli.config)?);
    }
    let state = match cli.env {
        Some(state) => state,
        None => EnvState::from_env()?,
    };
    warn!(
        path = %cli.config.display(),
        env = %state,
        "No config file found, reading {}* environment variables",
        state.prefix()
    );
    Ok(AppConfig::from_env(state))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Question { mode, answer } => run_question(&config, mode, answer).await,
        Commands::Email {
            mode,
            name,
            email,
            interests,
        } => {
            let user = User {
                name,
                email,
                interests,
            };
            run_email(&config, mode, user).await
        }
        Commands::Flight { mode } => run_flight(&config, mode).await,
        Commands::Forecast { prompts } => run_forecast(&config, prompts).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.masked())?);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn llm_client(config: &AppConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    if config.model.api_key.is_none() && config.model.provider != "ollama" {
        warn!(provider = %config.model.provider, "No API key configured for the model");
    }
    Ok(waypoint_llm::client_for(config)?)
}

fn print_history<N: GraphNode>(history: &RunHistory<N>) {
    println!("History: {}", history.node_names().join(" -> "));
}

async fn run_question(
    config: &AppConfig,
    mode: QuestionMode,
    answer: Option<String>,
) -> anyhow::Result<()> {
    if let QuestionMode::Mermaid = mode {
        println!("{}", mermaid(&QuestionNode::graph(), &[]));
        return Ok(());
    }

    let deps = QuestionDeps::new(llm_client(config)?, config);
    let runner = GraphRunner::<QuestionNode>::new(deps)?.with_max_steps(config.graph.max_steps);

    match mode {
        QuestionMode::Interactive => {
            let (comment, history) = run_interactive(&runner, &TerminalPrompter::interactive()).await?;
            println!("{}", comment);
            print_history(&history);
        }
        QuestionMode::Continuous => {
            let path = config.graph.history_path().join("question_graph.jsonl");
            info!(path = %path.display(), "Using persisted question history");
            let runner = runner.with_store(JsonlHistoryStore::new(path));
            let prompter = match answer {
                Some(answer) => TerminalPrompter::answering(answer),
                None => TerminalPrompter::interactive(),
            };
            match run_continuous(&runner, &prompter).await? {
                ContinuousOutcome::Finished { comment, history } => {
                    println!("{}", comment);
                    print_history(&history);
                }
                ContinuousOutcome::AwaitingAnswer { question } => {
                    println!("{}", question);
                    println!("Answer with: waypoint question continuous --answer \"...\"");
                }
            }
        }
        QuestionMode::Mermaid => {}
    }
    Ok(())
}

async fn run_email(config: &AppConfig, mode: RunMode, user: User) -> anyhow::Result<()> {
    if let RunMode::Mermaid = mode {
        println!("{}", mermaid(&EmailNode::graph(), &[]));
        return Ok(());
    }

    let deps = EmailDeps::new(llm_client(config)?, config);
    let runner = GraphRunner::<EmailNode>::new(deps)?.with_max_steps(config.graph.max_steps);
    let mut state = EmailState::new(user);
    let (email, history) = runner
        .run(EmailNode::WriteEmail { feedback: None }, &mut state)
        .await?;

    println!("Subject: {}\n\n{}", email.subject, email.body);
    print_history(&history);
    Ok(())
}

async fn run_flight(config: &AppConfig, mode: RunMode) -> anyhow::Result<()> {
    if let RunMode::Mermaid = mode {
        println!("{}", mermaid(&FlightNode::graph(), &[]));
        return Ok(());
    }

    let prompter = Arc::new(TerminalPrompter::interactive());
    let deps = FlightDeps::new(llm_client(config)?, config, prompter);
    let runner = GraphRunner::<FlightNode>::new(deps)?.with_max_steps(config.graph.max_steps);
    let (outcome, history) = run_flight_booking(&runner).await?;

    match outcome {
        BookingOutcome::Purchased {
            flight_number,
            seat,
        } => println!("Booked {} in seat {}", flight_number, seat),
        BookingOutcome::NoFlightsAvailable => println!("No flights were listed."),
        BookingOutcome::NoFlightFound => println!("No flight matched the request."),
        BookingOutcome::Declined => println!("Purchase declined."),
    }
    print_history(&history);
    Ok(())
}

async fn run_forecast(config: &AppConfig, prompts: Vec<(String, i64)>) -> anyhow::Result<()> {
    let store = ForecastStore::open(&config.database)?;
    let agent = forecast_agent(llm_client(config)?, config);

    let mut limit_error = None;
    for Attributed { key, value } in run_weather_forecast(&agent, config, prompts, &store).await {
        match value {
            Ok(forecast) => println!("[user {}] {}", key, forecast),
            Err(e) => {
                eprintln!("[user {}] failed: {}", key, e);
                if e.is_limit_exceeded() && limit_error.is_none() {
                    limit_error = Some(e);
                }
            }
        }
    }

    match limit_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#![forbid(unsafe_code)]

//! `project-factory-ctl`: local CLI companion for `project-factory`.
//!
//! Connects to the IPC socket and sends JSON commands to the server.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "project-factory-ctl",
    about = "Local CLI for the project-factory server",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `ipc_name` config).
    #[arg(long, default_value = "project-factory")]
    ipc_name: String,

    /// Shared secret matching the server's `ipc_auth_token`.
    #[arg(long, env = "FACTORY_IPC_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List all projects.
    List,

    /// Show a project with per-engine liveness.
    Status {
        /// Project name.
        name: String,
    },

    /// Record a new project without starting it.
    Create {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Create a project and start all of its engines.
    Launch {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Start (or restart) every engine of an existing project.
    Start {
        /// Project name.
        name: String,
    },

    /// Stop a project, or one of its engines.
    Stop {
        /// Project name.
        name: String,
        /// Only stop this engine.
        #[arg(long)]
        engine: Option<String>,
    },

    /// Show recent agent output.
    Logs {
        /// Project name.
        name: String,
        /// Only this engine.
        #[arg(long)]
        engine: Option<String>,
        /// Number of lines.
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },

    /// List supported engines and whether they are installed.
    Engines,

    /// Show CPU, memory, and disk usage with the live sessions.
    Health,

    /// List live multiplexer sessions.
    Sessions,

    /// List running log monitors.
    Monitors,
}

#[derive(Debug, clap::Args)]
struct ProjectArgs {
    /// Project name (letters, digits, `_`, `-`).
    name: String,
    /// Engine keys, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    engines: Vec<String>,
    /// Requirements text.
    #[arg(long, conflicts_with = "requirements_file")]
    requirements: Option<String>,
    /// Read the requirements from a file.
    #[arg(long)]
    requirements_file: Option<std::path::PathBuf>,
    /// Short description.
    #[arg(long)]
    description: Option<String>,
    /// Project type: standalone, bot, or web.
    #[arg(long, default_value = "standalone")]
    project_type: String,
}

impl ProjectArgs {
    fn to_json(&self) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
        let requirements = match (&self.requirements, &self.requirements_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => String::new(),
        };
        Ok(serde_json::json!({
            "name": self.name,
            "engines": self.engines,
            "requirements": requirements,
            "description": self.description.clone().unwrap_or_default(),
            "project_type": self.project_type,
        }))
    }
}

fn build_request(command: &Command) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let request = match command {
        Command::List => serde_json::json!({ "command": "list" }),
        Command::Status { name } => serde_json::json!({ "command": "status", "name": name }),
        Command::Create { project } => {
            serde_json::json!({ "command": "create", "new_project": project.to_json()? })
        }
        Command::Launch { project } => {
            serde_json::json!({ "command": "launch", "new_project": project.to_json()? })
        }
        Command::Start { name } => serde_json::json!({ "command": "start", "name": name }),
        Command::Stop { name, engine } => {
            let mut req = serde_json::json!({ "command": "stop", "name": name });
            if let Some(e) = engine {
                req["engine"] = serde_json::Value::String(e.clone());
            }
            req
        }
        Command::Logs {
            name,
            engine,
            lines,
        } => {
            let mut req = serde_json::json!({ "command": "logs", "name": name, "lines": lines });
            if let Some(e) = engine {
                req["engine"] = serde_json::Value::String(e.clone());
            }
            req
        }
        Command::Engines => serde_json::json!({ "command": "engines" }),
        Command::Health => serde_json::json!({ "command": "health" }),
        Command::Sessions => serde_json::json!({ "command": "sessions" }),
        Command::Monitors => serde_json::json!({ "command": "monitors" }),
    };
    Ok(request)
}

fn main() {
    let args = Cli::parse();

    let mut request_json = match build_request(&args.command) {
        Ok(req) => req,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(2);
        }
    };

    if let Some(token) = &args.auth_token {
        request_json["auth_token"] = serde_json::Value::String(token.clone());
    }

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to server: {err}");
            eprintln!("Is project-factory running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}

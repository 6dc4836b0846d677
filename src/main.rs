use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use autosentinel_lib::accounts::{self, NewAccount, RegistrationOrigin};
use autosentinel_lib::config::AppConfig;
use autosentinel_lib::logging::init_logging;
use autosentinel_lib::role::Role;
use autosentinel_lib::{http, maintenance, migrate, open_and_migrate, AppState};

#[derive(Debug, Parser)]
#[command(name = "autosentinel", about = "Vehicle history service", version)]
struct Cli {
    /// JSON config file; environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the bind address.
    #[arg(long, global = true)]
    bind: Option<SocketAddr>,
    /// Override the SQLite database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Serve the HTTP API (default).
    Serve,
    /// Apply pending schema migrations and exit.
    Migrate,
    /// Print the role to capability table.
    Roles {
        #[arg(long)]
        json: bool,
    },
    /// Delete search, telemetry and audit rows past their retention windows.
    Prune,
    /// Create an account with any role, e.g. the first system admin.
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "guest")]
        role: String,
        #[arg(long)]
        email: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<i32> {
    let command = cli.command.clone().unwrap_or(Commands::Serve);
    if let Commands::Roles { json } = command {
        print_roles(json)?;
        return Ok(0);
    }

    let config = load_config(&cli)?;
    let _guard = init_logging(&config).context("initialise logging")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(async {
        let pool = open_and_migrate(&config).await?;
        match &command {
            Commands::Serve => {
                tracing::debug!(target: "autosentinel", "service booted");
                http::serve(AppState::new(pool.clone(), config.clone())).await?;
            }
            Commands::Migrate => {
                for applied in migrate::applied_versions(&pool).await? {
                    println!("{}  applied_at={}", applied.version, applied.applied_at);
                }
            }
            Commands::Prune => {
                let summary = maintenance::prune(&pool, &config.retention)
                    .await
                    .context("prune expired rows")?;
                println!(
                    "Pruned {} searches, {} telemetry points, {} audit rows, {} expired sessions",
                    summary.search_queries,
                    summary.telemetry_traces,
                    summary.audit_logs,
                    summary.sessions
                );
            }
            Commands::CreateUser {
                username,
                password,
                role,
                email,
            } => {
                let user = accounts::register(
                    &pool,
                    NewAccount {
                        username: username.clone(),
                        password: password.clone(),
                        role: Some(role.clone()),
                        email: email.clone(),
                        ..Default::default()
                    },
                    RegistrationOrigin::Operator,
                    config.password_iterations,
                )
                .await
                .context("create user")?;
                println!("Created {} ({}) with id {}", user.username, user.role, user.id);
            }
            Commands::Roles { .. } => {}
        }
        pool.close().await;
        Ok::<i32, anyhow::Error>(0)
    })
}

fn print_roles(emit_json: bool) -> Result<()> {
    if emit_json {
        let table: Vec<_> = Role::ALL
            .into_iter()
            .map(|role| json!({ "role": role, "label": role.label(), "capabilities": role.capabilities() }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&table).context("serialize role table")?
        );
    } else {
        println!("{:<16} Capabilities", "Role");
        for role in Role::ALL {
            let caps: Vec<&str> = role.capabilities().iter().map(|c| c.as_str()).collect();
            println!("{:<16} {}", role.as_str(), caps.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() -> Result<()> {
        let cli = Cli::parse_from([
            "autosentinel",
            "--bind",
            "0.0.0.0:9100",
            "--db",
            "/tmp/as.sqlite3",
            "migrate",
        ]);
        assert!(matches!(cli.command, Some(Commands::Migrate)));
        let config = load_config(&cli)?;
        assert_eq!(config.bind.port(), 9100);
        assert_eq!(config.db_path, PathBuf::from("/tmp/as.sqlite3"));
        Ok(())
    }

    #[test]
    fn create_user_defaults_to_guest() {
        let cli = Cli::parse_from(["autosentinel", "create-user", "--username", "a", "--password", "b"]);
        match cli.command {
            Some(Commands::CreateUser { role, .. }) => assert_eq!(role, "guest"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}

use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One accepted endpoint session, as printed by `listen`. The token field
/// holds the redacted preview, never the credential itself.
#[derive(Serialize)]
pub struct SessionOutput {
    pub token: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub env_count: usize,
}

impl SessionOutput {
    pub fn new(token: &str, args: Vec<String>, cwd: String, env_count: usize) -> Self {
        Self {
            token: token_preview(token),
            args,
            cwd,
            env_count,
        }
    }
}

pub fn print_session(session: &SessionOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(session).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TOKEN", "ARGS", "CWD", "ENV"])
                .add_row(vec![
                    session.token.clone(),
                    session.args.join(" "),
                    session.cwd.clone(),
                    session.env_count.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "token={} args={:?} cwd={} env_count={}",
                session.token, session.args, session.cwd, session.env_count
            );
        }
    }
}

/// One supported platform pair, as printed by `targets`.
#[derive(Serialize)]
pub struct TargetOutput {
    pub os: &'static str,
    pub arch: &'static str,
    pub binary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

pub fn print_targets(targets: &[TargetOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(targets).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OS", "ARCH", "BINARY", "PATH"]);
            for target in targets {
                table.add_row(vec![
                    target.os.to_string(),
                    target.arch.to_string(),
                    target.binary.clone(),
                    target.path.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for target in targets {
                match &target.path {
                    Some(path) => println!("{}-{}: {}", target.os, target.arch, path),
                    None => println!("{}-{}: {}", target.os, target.arch, target.binary),
                }
            }
        }
    }
}

/// Tokens are credential material; only the length is printed.
fn token_preview(token: &str) -> String {
    if token.is_empty() {
        "<empty>".to_string()
    } else {
        format!("<{} bytes>", token.len())
    }
}

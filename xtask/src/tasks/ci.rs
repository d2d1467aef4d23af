use colored::Colorize;
use std::process::{Command, ExitStatus, Stdio};

use crate::{project_root, DynError};

/// Each step runs `cargo` with the given arguments from the workspace root.
const STEPS: [(&str, &[&str]); 7] = [
    ("cargo fmt", &["fmt", "--all", "--", "--check"]),
    ("cargo check", &["check", "--workspace", "--all-targets"]),
    (
        "cargo clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    ),
    ("cargo test", &["test", "--workspace"]),
    ("cargo test on docs", &["test", "--doc", "-p", "mongodb_client"]),
    ("cargo build on examples", &["build", "--examples"]),
    ("cargo audit", &["audit"]),
];

pub fn ci() -> Result<(), DynError> {
    for (name, args) in STEPS {
        println!(
            "{}{}{}",
            "Running ".truecolor(255, 165, 0),
            name.truecolor(255, 165, 0),
            "...".truecolor(255, 165, 0)
        );
        let status = cargo_command(args).status()?;
        if !status.success() {
            print_error_with_status_code(name, status);
            return Err(format!("`{}` failed", name).into());
        }
    }

    println!("{}", "All checks passed".green());
    Ok(())
}

fn print_error_with_status_code(task: &str, status: ExitStatus) {
    let code = match status.code() {
        Some(x) => x.to_string(),
        None => "<< no status code >>".to_string(),
    };
    println!(
        "{} `{}` finished with a non-zero status code: {}",
        "Error:".to_string().red(),
        task.blue(),
        code
    );
}

fn cargo_command(args: &[&str]) -> Command {
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut cmd = Command::new(cargo);
    cmd.current_dir(project_root())
        .args(args)
        .stdout(Stdio::inherit());
    cmd
}

//! Access tokens printed by an external command (gcloud by default)

use std::future::Future;
use std::pin::Pin;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resolver::TokenResolver;
use crate::token::Token;

pub struct CommandTokenResolver {
    program: String,
    args: Vec<String>,
}

impl CommandTokenResolver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl TokenResolver for CommandTokenResolver {
    fn name(&self) -> &str {
        &self.program
    }

    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>> {
        Box::pin(async move {
            debug!(program = %self.program, "running token command");
            let output = Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| Error::Io(format!("spawning {}: {e}", self.program)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::Command(format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                )));
            }

            let stdout = String::from_utf8(output.stdout)
                .map_err(|e| Error::Command(format!("{} printed non-UTF-8: {e}", self.program)))?;
            let token = stdout.trim();
            if token.is_empty() {
                return Err(Error::Command(format!("{} printed no token", self.program)));
            }
            Ok(Token::without_expiry(token))
        })
    }
}

//! Completion backends.

use crate::config::{LlmBackend, LlmConfig};
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// Turns a prompt into a completion. Calls block until the backend answers.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Runs an external command per prompt: prompt on stdin, completion on stdout.
#[derive(Debug, Clone)]
pub struct CommandClient {
    program: String,
    args: Vec<String>,
}

impl CommandClient {
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("llm.command is empty; set it to the program that answers prompts on stdin");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl CompletionClient for CommandClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn completion command '{}'", self.program))?;

        // Feed stdin from a separate thread so a large reply can't deadlock us.
        let stdin = child.stdin.take();
        let prompt = prompt.to_string();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt.as_bytes())?;
            }
            Ok(())
        });

        let output = child.wait_with_output().context("Completion command failed")?;
        if let Ok(Err(e)) = writer.join() {
            log::debug!("Completion command closed stdin early: {}", e);
        }

        if !output.status.success() {
            bail!(
                "Completion command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Blocking client for a local Ollama server's chat endpoint.
#[cfg(feature = "ollama")]
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: reqwest::blocking::Client,
}

#[cfg(feature = "ollama")]
impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http,
        })
    }
}

#[cfg(feature = "ollama")]
impl CompletionClient for OllamaClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        #[derive(serde::Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            stream: bool,
            messages: Vec<Msg<'a>>,
        }

        #[derive(serde::Deserialize)]
        struct Resp {
            message: RespMsg,
        }

        #[derive(serde::Deserialize)]
        struct RespMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            stream: false,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/api/chat", self.base_url);
        let resp: Resp = self
            .http
            .post(url)
            .json(&req)
            .send()?
            .error_for_status()?
            .json()?;

        Ok(resp.message.content)
    }
}

/// Build the backend selected in `config`.
pub fn from_config(config: &LlmConfig) -> Result<Box<dyn CompletionClient>> {
    match config.backend {
        LlmBackend::Command => Ok(Box::new(CommandClient::from_argv(&config.command)?)),
        #[cfg(feature = "ollama")]
        LlmBackend::Ollama => {
            log::info!("Using Ollama at {} (model {})", config.ollama_url, config.model);
            Ok(Box::new(OllamaClient::new(&config.ollama_url, &config.model)?))
        }
        #[cfg(not(feature = "ollama"))]
        LlmBackend::Ollama => bail!("llm.backend = \"ollama\" requires building with the `ollama` feature"),
    }
}

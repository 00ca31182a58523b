//! Interactive command-line agent.
//!
//! Connects to a relay, registers under an identity, then reads commands
//! from stdin while printing whatever the relay delivers.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;

use crate::config::AgentSettings;
use crate::error::{Error, Result};
use crate::protocol::{parse_frame, Envelope};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const HELP: &str = "Commands: /list, /broadcast <message>, /msg <target_id> <message>, exit";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    List,
    Broadcast(String),
    Direct { target: String, content: String },
    Exit,
    /// Nothing to do (blank line).
    Empty,
    /// Print this usage hint.
    Usage(&'static str),
}

/// Parse a line typed at the prompt. Command words are case-insensitive.
pub fn parse_command(line: &str) -> AgentCommand {
    let line = line.trim();
    if line.is_empty() {
        return AgentCommand::Empty;
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_lowercase().as_str() {
        "exit" if rest.is_empty() => AgentCommand::Exit,
        "/list" if rest.is_empty() => AgentCommand::List,
        "/broadcast" => {
            if rest.is_empty() {
                AgentCommand::Usage("Usage: /broadcast <message>")
            } else {
                AgentCommand::Broadcast(rest.to_string())
            }
        }
        "/msg" => match rest.split_once(char::is_whitespace) {
            Some((target, content)) if !content.trim().is_empty() => AgentCommand::Direct {
                target: target.to_string(),
                content: content.trim().to_string(),
            },
            _ => AgentCommand::Usage("Usage: /msg <target_id> <message>"),
        },
        _ => AgentCommand::Usage(
            "Unknown command. Use /msg <target_id> <message> or /broadcast <message> or /list.",
        ),
    }
}

/// Format a frame from the relay for display. `None` for frames an agent
/// never expects to receive.
pub fn render_incoming(envelope: &Envelope) -> Option<String> {
    match envelope {
        Envelope::Direct {
            sender_id, content, ..
        } => Some(format!("[DM from {}]: {}", sender_id, content)),
        Envelope::Broadcast { sender_id, content } => {
            Some(format!("[BROADCAST from {}]: {}", sender_id, content))
        }
        Envelope::ListResponse { agents, .. } => {
            let online = if agents.is_empty() {
                "None".to_string()
            } else {
                agents.join(", ")
            };
            Some(format!("[SERVER INFO]: Online Agents: {}", online))
        }
        Envelope::ServerInfo { content } => Some(format!("[SERVER INFO]: {}", content)),
        Envelope::ServerError { content } => Some(format!("[SERVER ERROR]: {}", content)),
        Envelope::Register { .. } | Envelope::ListRequest { .. } => None,
    }
}

/// Envelope `agent_id` sends for a command, if the command sends anything.
pub fn command_envelope(agent_id: &str, command: &AgentCommand) -> Option<Envelope> {
    match command {
        AgentCommand::List => Some(Envelope::list_request(agent_id)),
        AgentCommand::Broadcast(content) => Some(Envelope::broadcast(agent_id, content.as_str())),
        AgentCommand::Direct { target, content } => Some(Envelope::direct(
            agent_id,
            target.as_str(),
            content.as_str(),
        )),
        AgentCommand::Exit | AgentCommand::Empty | AgentCommand::Usage(_) => None,
    }
}

/// A registered connection to the relay.
pub struct AgentClient {
    agent_id: String,
    ws: WsStream,
}

impl AgentClient {
    /// Connect and register. Fails if the relay answers anything but `SERVER_INFO`.
    pub async fn connect(agent_id: &str, settings: &AgentSettings) -> Result<(Self, String)> {
        tracing::info!(agent_id, server = %settings.server_uri, "connecting to relay");
        let (mut ws, _) = tokio_tungstenite::connect_async(settings.server_uri.as_str()).await?;

        let register = Envelope::register(agent_id, settings.auth_token.as_str()).to_frame()?;
        ws.send(Message::Text(register)).await?;

        let welcome = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(other)) => {
                    return Err(Error::Protocol(format!(
                        "unexpected frame during registration: {:?}",
                        other
                    )))
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(Error::Transport(
                        "relay closed the connection during registration".to_string(),
                    ))
                }
            }
        };

        match parse_frame(&welcome) {
            Ok(Envelope::ServerInfo { content }) => {
                tracing::info!(agent_id, "registered with relay");
                Ok((
                    Self {
                        agent_id: agent_id.to_string(),
                        ws,
                    },
                    content,
                ))
            }
            Ok(Envelope::ServerError { content }) => {
                let _ = ws.close(None).await;
                Err(Error::Protocol(format!("relay rejected registration: {}", content)))
            }
            _ => {
                let _ = ws.close(None).await;
                Err(Error::Protocol(format!(
                    "unexpected registration reply: {}",
                    welcome
                )))
            }
        }
    }

    /// Run the prompt until `exit`, end of input, or the relay goes away.
    pub async fn run_interactive(self) -> Result<()> {
        let Self { agent_id, ws } = self;
        let (mut sink, mut stream) = ws.split();

        let mut receiver = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match parse_frame(&text) {
                        Ok(envelope) => match render_incoming(&envelope) {
                            Some(line) => println!("\n{}", line),
                            None => tracing::warn!(message_type = envelope.tag(), "unexpected frame"),
                        },
                        Err(e) => tracing::error!(error = %e, "invalid frame from relay"),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "connection to relay failed");
                        break;
                    }
                }
            }
        });

        println!("You are '{}'. {}", agent_id, HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = &mut receiver => break,
            };
            let Some(line) = line else { break };

            let command = parse_command(&line);
            match &command {
                AgentCommand::Exit => break,
                AgentCommand::Usage(hint) => println!("{}", hint),
                _ => {}
            }

            let Some(envelope) = command_envelope(&agent_id, &command) else {
                continue;
            };
            if let Err(e) = sink.send(Message::Text(envelope.to_frame()?)).await {
                tracing::error!(error = %e, "failed to send to relay");
                break;
            }
        }

        let _ = sink.close().await;
        tracing::info!(agent_id = %agent_id, "agent shutting down");
        Ok(())
    }
}

/// Connect as `agent_id` and run the interactive prompt.
pub async fn run_agent(agent_id: &str, settings: &AgentSettings) -> Result<()> {
    let (client, welcome) = AgentClient::connect(agent_id, settings).await?;
    println!("[SERVER INFO]: {}", welcome);
    client.run_interactive().await
}

//! The IRC session task: registration, keepalive, and the wire loop.
//!
//! One task per connection owns both halves of the socket. All writes go
//! through this task, so outbound frames are never interleaved.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parrot_chat_protocol::ChatEvent;

use crate::client::{Command, IrcConfig, Shared};
use crate::message::Message;

const PING_INTERVAL: Duration = Duration::from_secs(60);
const PING_TIMEOUT: Duration = Duration::from_secs(120);

/// Run one session to completion, then reset shared state and emit
/// [`ChatEvent::Disconnected`]. Reconnecting is the consumer's decision.
pub(crate) async fn run<S>(
    stream: S,
    config: IrcConfig,
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = match session_loop(stream, &config, &shared, cmd_rx).await {
        Ok(reason) => reason,
        Err(e) => e.to_string(),
    };
    warn!(%reason, "IRC session ended");
    shared.teardown();
    shared.emit(ChatEvent::Disconnected { reason });
}

async fn session_loop<S>(
    stream: S,
    config: &IrcConfig,
    shared: &Shared,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let mut nick = config.nick.clone();
    writer
        .write_all(format!("NICK {}\r\n", nick).as_bytes())
        .await?;
    writer
        .write_all(format!("USER {} 0 * :{}\r\n", config.username, config.realname).as_bytes())
        .await?;

    let mut line_buf = String::new();
    let mut last_activity = Instant::now();
    let mut next_ping = last_activity + PING_INTERVAL;

    loop {
        tokio::select! {
            result = reader.read_line(&mut line_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok("connection closed".to_string());
                }
                last_activity = Instant::now();
                next_ping = last_activity + PING_INTERVAL;

                if let Some(msg) = Message::parse(&line_buf) {
                    if let Some(reason) = handle_line(&msg, &mut nick, shared, &mut writer).await? {
                        return Ok(reason);
                    }
                }
                line_buf.clear();
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => write_command(&mut writer, cmd).await?,
                    None => return Ok("client handle dropped".to_string()),
                }
            }
            _ = tokio::time::sleep_until(next_ping) => {
                if last_activity.elapsed() >= PING_TIMEOUT {
                    return Ok("ping timeout".to_string());
                }
                writer.write_all(b"PING :keepalive\r\n").await?;
                next_ping = Instant::now() + PING_INTERVAL;
            }
        }
    }
}

/// Handle one inbound line. Returns `Some(reason)` when the server asked us
/// to go away.
async fn handle_line<W>(
    msg: &Message,
    nick: &mut String,
    shared: &Shared,
    writer: &mut W,
) -> Result<Option<String>>
where
    W: AsyncWrite + Unpin,
{
    match msg.command.as_str() {
        "PING" => {
            let token = msg.params.first().map(String::as_str).unwrap_or("");
            writer
                .write_all(format!("PONG :{token}\r\n").as_bytes())
                .await?;
        }
        // RPL_WELCOME: registration complete, the first param is the nick
        // the server actually assigned us.
        "001" => {
            if let Some(assigned) = msg.params.first() {
                nick.clone_from(assigned);
            }
            shared.set_registered(nick);
            info!(nick = %nick, "registered with IRC server");
            shared.emit(ChatEvent::Connected);
        }
        // ERR_NICKNAMEINUSE: retry with an underscore appended.
        "433" => {
            nick.push('_');
            debug!(nick = %nick, "nick in use, retrying");
            writer
                .write_all(format!("NICK {nick}\r\n").as_bytes())
                .await?;
        }
        "NICK" => {
            if msg.source_nick() == Some(shared.nick().as_str()) {
                if let Some(new_nick) = msg.params.first() {
                    nick.clone_from(new_nick);
                    shared.set_nick(new_nick);
                    info!(nick = %new_nick, "nick changed");
                }
            }
        }
        "JOIN" => {
            if let (Some(source), Some(channel)) = (msg.source_nick(), msg.params.first()) {
                if source == shared.nick() {
                    shared.add_channel(channel);
                    debug!(%channel, "joined channel");
                }
            }
        }
        "PART" => {
            if let (Some(source), Some(channel)) = (msg.source_nick(), msg.params.first()) {
                if source == shared.nick() {
                    shared.remove_channel(channel);
                    debug!(%channel, "left channel");
                }
            }
        }
        "KICK" => {
            if let (Some(channel), Some(kicked)) = (msg.params.first(), msg.params.get(1)) {
                if *kicked == shared.nick() {
                    shared.remove_channel(channel);
                    warn!(%channel, "kicked from channel");
                }
            }
        }
        "PRIVMSG" => {
            if let (Some(sender), Some(target), Some(text)) =
                (msg.source_nick(), msg.params.first(), msg.params.get(1))
            {
                shared.emit(ChatEvent::Message {
                    target: target.clone(),
                    sender: sender.to_string(),
                    text: text.clone(),
                });
            }
        }
        "NOTICE" => {
            let from = msg
                .source_nick()
                .unwrap_or("server")
                .to_string();
            if let Some(text) = msg.params.last() {
                shared.emit(ChatEvent::Notice {
                    from,
                    text: text.clone(),
                });
            }
        }
        "ERROR" => {
            let reason = msg
                .params
                .first()
                .cloned()
                .unwrap_or_else(|| "server error".to_string());
            return Ok(Some(format!("server error: {reason}")));
        }
        _ => {}
    }
    Ok(None)
}

async fn write_command<W>(writer: &mut W, cmd: Command) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match cmd {
        Command::Join(channel) => {
            writer
                .write_all(format!("JOIN {channel}\r\n").as_bytes())
                .await?;
        }
        Command::Privmsg { target, text } => {
            writer
                .write_all(format!("PRIVMSG {target} :{text}\r\n").as_bytes())
                .await?;
        }
    }
    Ok(())
}

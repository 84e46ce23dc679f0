//! Telegram long-polling adapter.
//!
//! When `TELEGRAM_BOT_TOKEN` is set, a tokio task polls `getUpdates` and runs
//! every text message through the interpreter, using the chat id as the user id.
//! `/start` gets a welcome; other commands are ignored.
//!
//! Optional: set `TELEGRAM_CHAT_ID` to restrict the bot to a single chat.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::interpreter::Interpreter;

const THINKING_TEXT: &str = "🧠 Думаю...";

const WELCOME_TEXT: &str = "👋 YouHub — личный хаб: задачи, люди, деньги и ИИ в одном боте.

Просто напиши, что нужно:
📋 «создай задачу оплатить интернет до пятницы»
👤 «добавь контакт Олег Сидоров, брат»
💰 «расход 500 на такси» или «цель: отпуск 150 000»
📚 «заметка: пароль от роутера на коробке»
🤖 или задай вопрос — ассистент ответит по твоим данным.

«Новый диалог» очищает историю, «забудь про …» убирает лишнее из памяти.";

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram rejects messages longer than this many characters.
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, PartialEq, Eq)]
enum Incoming<'a> {
    Start,
    Text(&'a str),
    Ignored,
}

fn classify(text: &str) -> Incoming<'_> {
    let text = text.trim();
    if text.is_empty() {
        return Incoming::Ignored;
    }
    if let Some(command) = text.strip_prefix('/') {
        // "/start", "/start payload" and "/start@BotName" all count.
        let name = command
            .split(|c: char| c.is_whitespace() || c == '@')
            .next()
            .unwrap_or_default();
        return if name.eq_ignore_ascii_case("start") {
            Incoming::Start
        } else {
            Incoming::Ignored
        };
    }
    Incoming::Text(text)
}

/// Spawn the Telegram bot task if `TELEGRAM_BOT_TOKEN` is set.
/// Does nothing when the env var is absent.
pub fn spawn_telegram_bot(interpreter: Arc<Interpreter>) {
    let token = match std::env::var("TELEGRAM_BOT_TOKEN") {
        Ok(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => return,
    };

    let allowed_chat_id: Option<i64> = std::env::var("TELEGRAM_CHAT_ID")
        .ok()
        .and_then(|s| s.trim().parse().ok());

    tokio::spawn(async move {
        tracing::info!(
            "Telegram bot active (allowed_chat_id: {:?})",
            allowed_chat_id
        );
        run_bot(interpreter, token, allowed_chat_id).await;
    });
}

async fn run_bot(interpreter: Arc<Interpreter>, token: String, allowed_chat_id: Option<i64>) {
    let api_base = format!("https://api.telegram.org/bot{}", token);
    poll_loop(interpreter, reqwest::Client::new(), api_base, allowed_chat_id).await;
}

/// Each text message is answered on its own task so one slow turn does not
/// hold up other chats. `Interpreter::handle` keeps one chat's turns in order.
async fn poll_loop(
    interpreter: Arc<Interpreter>,
    client: reqwest::Client,
    api_base: String,
    allowed_chat_id: Option<i64>,
) {
    let mut offset: i64 = 0;

    loop {
        let updates = match poll_updates(&client, &api_base, offset).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("Telegram polling failed: {:#}", e);
                tokio::time::sleep(POLL_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = update.update_id + 1;

            let msg = match update.message {
                Some(m) => m,
                None => continue,
            };
            let chat_id = msg.chat.id;

            if let Some(allowed) = allowed_chat_id {
                if chat_id != allowed {
                    tracing::debug!(
                        "Telegram: ignoring message from unauthorized chat {}",
                        chat_id
                    );
                    continue;
                }
            }

            let raw = msg.text.unwrap_or_default();
            match classify(&raw) {
                Incoming::Ignored => continue,
                Incoming::Start => {
                    send_message(&client, &api_base, chat_id, WELCOME_TEXT).await;
                }
                Incoming::Text(text) => {
                    tracing::info!("Telegram [chat {}]: {} chars", chat_id, text.chars().count());
                    tokio::spawn(answer(
                        interpreter.clone(),
                        client.clone(),
                        api_base.clone(),
                        chat_id,
                        text.to_string(),
                    ));
                }
            }
        }
    }
}

async fn answer(
    interpreter: Arc<Interpreter>,
    client: reqwest::Client,
    api_base: String,
    chat_id: i64,
    text: String,
) {
    send_message(&client, &api_base, chat_id, THINKING_TEXT).await;

    let user_id = chat_id.to_string();
    let reply = interpreter.handle(&user_id, &text).await;
    if !reply.response.trim().is_empty() {
        send_message(&client, &api_base, chat_id, &reply.response).await;
    }
}

async fn poll_updates(
    client: &reqwest::Client,
    api_base: &str,
    offset: i64,
) -> Result<Vec<Update>> {
    let params = serde_json::json!({
        "offset": offset,
        "timeout": POLL_TIMEOUT_SECS,
        "allowed_updates": ["message"]
    });

    let body: TelegramResponse<Vec<Update>> = client
        .post(format!("{}/getUpdates", api_base))
        .json(&params)
        .send()
        .await
        .context("getUpdates request failed")?
        .json()
        .await
        .context("getUpdates returned an unreadable body")?;

    if !body.ok {
        bail!("getUpdates returned ok=false");
    }
    Ok(body.result.unwrap_or_default())
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

async fn send_message(client: &reqwest::Client, api_base: &str, chat_id: i64, text: &str) {
    let text = truncate_chars(text, MAX_MESSAGE_CHARS);
    let url = format!("{}/sendMessage", api_base);
    let payload = serde_json::json!({ "chat_id": chat_id, "text": text });

    match client.post(&url).json(&payload).send().await {
        Ok(r) if r.status().is_success() => {
            tracing::debug!("Telegram: sent reply to chat {}", chat_id);
        }
        Ok(r) => {
            tracing::warn!("Telegram sendMessage failed: HTTP {}", r.status());
        }
        Err(e) => {
            tracing::error!("Telegram sendMessage error: {}", e);
        }
    }
}
